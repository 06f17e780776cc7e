mod shell;

use clap::{Parser, Subcommand};
use colored::*;
use drawbot::{
    logger, AppConfig, Attention, ConfigStore, Credential, DrawError, DrawingSession,
    GenerationWorker, ImageFormat, ImageService, ImageSize, OpenAiClient, Warning, WorkerEvent,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "drawbot", version)]
#[command(about = "Generate images from text prompts with the OpenAI Images API")]
struct Cli {
    /// Location of the credential record (defaults to ./config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enter an API key, check it with the service and store it
    Configure {
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Generate one image and optionally save it
    Generate {
        /// What to draw
        #[arg(short, long)]
        prompt: Option<String>,

        /// 256, 512 or 1024
        #[arg(short, long)]
        size: Option<ImageSize>,

        /// File name without extension
        #[arg(short, long)]
        name: Option<String>,

        /// jpeg, png or bmp
        #[arg(short, long)]
        format: Option<ImageFormat>,

        /// Directory to save into
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Interactive session: set prompt, size and format, generate, preview, save
    Shell,
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv_loaded = dotenv::dotenv().is_ok();
    let cli = Cli::parse();

    let mut app_config = AppConfig::from_env();
    if let Some(path) = cli.config.clone() {
        app_config = app_config.with_config_path(path);
    }

    if let Err(e) = logger::init_with_config(app_config.logger_config(cli.verbose)) {
        eprintln!("{}", e);
    }

    if dotenv_loaded {
        log::info!("✅ .env file loaded");
    } else {
        log::debug!("No .env file found, using process environment");
    }
    logger::log_startup_info("drawbot", env!("CARGO_PKG_VERSION"), &app_config);

    match run(cli.command, app_config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "❌".red(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, app_config: AppConfig) -> drawbot::Result<ExitCode> {
    let client: Arc<dyn ImageService> = Arc::new(OpenAiClient::new(app_config.openai.clone())?);
    let store = ConfigStore::new(app_config.config_path.clone(), Arc::clone(&client));

    match command {
        Command::Configure { api_key } => {
            configure(&store, api_key).await?;
            println!("API key saved to {}", store.path().display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Generate {
            prompt,
            size,
            name,
            format,
            dir,
        } => {
            let mut credential = match store.load()? {
                Some(credential) => credential,
                None => configure(&store, None).await?,
            };

            let save_requested = name.is_some() || format.is_some() || dir.is_some();
            let mut session = DrawingSession::new();
            if let Some(prompt) = prompt {
                session.set_prompt(prompt);
            }
            if let Some(size) = size {
                session.set_size(size);
            }
            if let Some(name) = name {
                session.set_file_name(name);
            }
            if let Some(format) = format {
                session.set_format(format);
            }
            if let Some(dir) = dir {
                session.select_directory(dir);
            }

            loop {
                match generate_once(Arc::clone(&client), credential, &mut session, save_requested)
                    .await
                {
                    Outcome::Done => return Ok(ExitCode::SUCCESS),
                    Outcome::Warned => return Ok(ExitCode::FAILURE),
                    Outcome::NeedsConfiguration => {
                        print_warning(&Warning::invalid_key());
                        credential = configure(&store, None).await?;
                    }
                }
            }
        }
        Command::Shell => {
            let credential = store.load()?;
            shell::run(&store, client, credential).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

pub(crate) fn print_warning(warning: &Warning) {
    eprintln!(
        "{}  {}: {}",
        "⚠️".yellow(),
        warning.title.yellow().bold(),
        warning.message
    );
}

fn read_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim().to_string()))
}

/// Asks for keys until the service accepts one. Only an accepted key is saved.
async fn configure(store: &ConfigStore, mut candidate: Option<String>) -> drawbot::Result<Credential> {
    loop {
        let input = match candidate.take() {
            Some(key) => key,
            None => read_line("OpenAI API key: ")?
                .ok_or_else(|| DrawError::ConfigError("No API key entered".into()))?,
        };

        let credential = match Credential::new(input) {
            Ok(credential) => credential,
            Err(_) => {
                print_warning(&Warning::new("Missing Entry", "Please enter your OpenAI API key"));
                continue;
            }
        };

        match store.save(credential).await {
            Ok(credential) => return Ok(credential),
            Err(e) => {
                log::warn!("API key was not stored: {}", e);
                print_warning(&Warning::for_key_check(&e));
            }
        }
    }
}

enum Outcome {
    Done,
    Warned,
    NeedsConfiguration,
}

impl From<Attention> for Outcome {
    fn from(attention: Attention) -> Self {
        match attention {
            Attention::Warning(warning) => {
                print_warning(&warning);
                Outcome::Warned
            }
            Attention::NeedsConfiguration => Outcome::NeedsConfiguration,
        }
    }
}

async fn generate_once(
    service: Arc<dyn ImageService>,
    credential: Credential,
    session: &mut DrawingSession,
    save_requested: bool,
) -> Outcome {
    let request = match session.prepare_generation(Some(&credential)) {
        Ok(request) => request,
        Err(attention) => return attention.into(),
    };

    let (worker, mut events) = GenerationWorker::new(service);
    let size = request.size;
    match worker.submit(credential, request) {
        Ok(id) => session.mark_submitted(id),
        Err(_) => {
            print_warning(&Warning::busy());
            return Outcome::Warned;
        }
    }

    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        if let WorkerEvent::Started { .. } = event {
            eprintln!("⏳ Generating {} image...", size);
        }
        if let Some(attention) = session.handle_event(event) {
            return attention.into();
        }
        if terminal {
            break;
        }
    }

    let Some(image) = session.image() else {
        return Outcome::Warned;
    };

    if !save_requested {
        println!("Generated a {}x{} image.", image.width(), image.height());
        match session.write_preview(&std::env::temp_dir()) {
            Ok(path) => println!("Preview: {}", path.display()),
            Err(warning) => print_warning(&warning),
        }
        println!("Pass --name, --format and --dir to save it.");
        return Outcome::Done;
    }

    match session.save_image() {
        Ok(path) => {
            println!("Saved {}", path.display());
            Outcome::Done
        }
        Err(warning) => {
            print_warning(&warning);
            Outcome::Warned
        }
    }
}
