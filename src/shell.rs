use crate::print_warning;
use drawbot::{
    Attention, ConfigStore, Credential, DrawError, DrawingSession, GenerationWorker, ImageFormat,
    ImageService, ImageSize, Warning, WorkerEvent,
};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  prompt <text>     set the prompt
  size <256|512|1024>
  format <jpeg|png|bmp>
  name <file name>  file name without extension
  dir <path>        directory to save into
  key <api key>     check and store an API key
  generate          generate an image from the prompt
  save              save the last generated image
  status            show the current selections
  help | quit";

enum Flow {
    Continue,
    Quit,
}

struct Shell<'a> {
    store: &'a ConfigStore,
    worker: GenerationWorker,
    session: DrawingSession,
    credential: Option<Credential>,
}

/// Reads commands and worker events concurrently, so the prompt stays live
/// while an image is being generated.
pub(crate) async fn run(
    store: &ConfigStore,
    service: Arc<dyn ImageService>,
    credential: Option<Credential>,
) -> drawbot::Result<()> {
    let (worker, mut events) = GenerationWorker::new(service);
    let mut shell = Shell {
        store,
        worker,
        session: DrawingSession::new(),
        credential,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", HELP);
    if shell.credential.is_none() {
        println!("No API key configured yet. Use: key <api key>");
    }
    prompt_marker();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Flow::Quit = shell.execute(line.trim()).await? {
                    break;
                }
                prompt_marker();
            }
            Some(event) = events.recv() => {
                shell.on_event(event);
                prompt_marker();
            }
        }
    }

    if shell.session.is_generating() {
        log::warn!("Exiting while a generation is still running; its result is discarded");
    }
    Ok(())
}

fn prompt_marker() {
    print!("drawbot> ");
    let _ = io::stdout().flush();
}

impl Shell<'_> {
    async fn execute(&mut self, line: &str) -> drawbot::Result<Flow> {
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command.to_ascii_lowercase().as_str() {
            "" => {}
            "help" => println!("{}", HELP),
            "quit" | "exit" => return Ok(Flow::Quit),
            "prompt" => self.session.set_prompt(rest),
            "size" => match rest.parse::<ImageSize>() {
                Ok(size) => {
                    self.session.set_size(size);
                    println!("{}", self.session.size_label());
                }
                Err(e) => print_warning(&Warning::new("Invalid Size", e.to_string())),
            },
            "format" => match rest.parse::<ImageFormat>() {
                Ok(format) => {
                    self.session.set_format(format);
                    println!("{}", self.session.format_label());
                }
                Err(e) => print_warning(&Warning::new("Invalid Format", e.to_string())),
            },
            "name" => self.session.set_file_name(rest),
            "dir" if rest.is_empty() => print_warning(&Warning::missing_path()),
            "dir" => {
                self.session.select_directory(rest);
                println!("Saving into {}", rest);
            }
            "key" => self.enter_key(rest).await?,
            "generate" => self.generate()?,
            "save" => match self.session.save_image() {
                Ok(path) => println!("Saved {}", path.display()),
                Err(warning) => print_warning(&warning),
            },
            "status" => self.print_status(),
            other => println!("Unknown command '{}'. Type help for a list.", other),
        }

        Ok(Flow::Continue)
    }

    async fn enter_key(&mut self, key: &str) -> drawbot::Result<()> {
        let candidate = match Credential::new(key) {
            Ok(candidate) => candidate,
            Err(_) => {
                print_warning(&Warning::new("Missing Entry", "Please enter your OpenAI API key"));
                return Ok(());
            }
        };

        match self.store.save(candidate).await {
            Ok(credential) => {
                self.credential = Some(credential);
                println!("API key saved to {}", self.store.path().display());
            }
            Err(e) => {
                log::warn!("API key was not stored: {}", e);
                print_warning(&Warning::for_key_check(&e));
            }
        }
        Ok(())
    }

    fn generate(&mut self) -> drawbot::Result<()> {
        let request = match self.session.prepare_generation(self.credential.as_ref()) {
            Ok(request) => request,
            Err(Attention::Warning(warning)) => {
                print_warning(&warning);
                return Ok(());
            }
            Err(Attention::NeedsConfiguration) => {
                self.ask_for_key();
                return Ok(());
            }
        };
        let Some(credential) = self.credential.clone() else {
            return Ok(());
        };

        match self.worker.submit(credential, request) {
            Ok(id) => self.session.mark_submitted(id),
            Err(DrawError::WorkerBusy) => print_warning(&Warning::busy()),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn on_event(&mut self, event: WorkerEvent) {
        let started = matches!(event, WorkerEvent::Started { .. });
        match self.session.handle_event(event) {
            Some(Attention::Warning(warning)) => {
                println!();
                print_warning(&warning);
            }
            Some(Attention::NeedsConfiguration) => {
                println!();
                print_warning(&Warning::invalid_key());
                self.credential = None;
                self.ask_for_key();
            }
            None if started => println!("\n⏳ Generating image..."),
            None => self.show_preview(),
        }
    }

    fn ask_for_key(&self) {
        println!("No usable API key configured. Use: key <api key>");
    }

    fn show_preview(&self) {
        let Some(image) = self.session.image() else {
            return;
        };
        println!("\n🖼  Image ready ({}x{}).", image.width(), image.height());
        match self.session.write_preview(&std::env::temp_dir()) {
            Ok(path) => println!("Preview: {}", path.display()),
            Err(warning) => print_warning(&warning),
        }
        println!("Use `save` to write it to disk.");
    }

    fn print_status(&self) {
        let session = &self.session;
        println!("Prompt:\t{}", session.prompt());
        println!("{}", session.size_label());
        println!("File Name:\t{}", session.file_name());
        println!("{}", session.format_label());
        match session.directory() {
            Some(dir) => println!("Path:\t{}", dir.display()),
            None => println!("Path:"),
        }
        match session.image() {
            Some(image) => println!("Image:\t{}x{}", image.width(), image.height()),
            None => println!("Image:\tnone"),
        }
        if session.is_generating() {
            println!("Generating...");
        }
        if self.credential.is_none() {
            println!("API key:\tnot configured");
        }
    }
}
