use crate::{
    error::{DrawError, Result},
    logger::{LogLevel, LoggerConfig},
    openai::ImageService,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: Option<String>,
    pub organization: Option<String>,
    pub image_model: Option<String>,
    pub inline_images: bool,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        OpenAiConfig {
            base_url: None,
            organization: None,
            image_model: None,
            inline_images: false,
        }
    }
}

impl OpenAiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let base_url = env::var("OPENAI_BASE_URL").ok().filter(|s| !s.is_empty());
        let organization = env::var("OPENAI_ORGANIZATION").ok().filter(|s| !s.is_empty());
        let image_model = env::var("OPENAI_IMAGE_MODEL").ok().filter(|s| !s.is_empty());
        let inline_images = env::var("OPENAI_INLINE_IMAGES")
            .ok()
            .map_or(false, |val| val == "true");

        OpenAiConfig {
            base_url,
            organization,
            image_model,
            inline_images,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = Some(model.into());
        self
    }

    /// Ask for base64 payloads instead of download URLs.
    pub fn with_inline_images(mut self, enabled: bool) -> Self {
        self.inline_images = enabled;
        self
    }

    pub fn resolved_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_path: PathBuf,
    pub log_level: Option<LogLevel>,
    /// Also append log lines to this file.
    pub log_file: Option<PathBuf>,
    /// Emit log lines as JSON objects.
    pub log_json: bool,
    pub openai: OpenAiConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            log_level: None,
            log_file: None,
            log_json: false,
            openai: OpenAiConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let config_path = env::var("DRAWBOT_CONFIG_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let log_level = env::var("DRAWBOT_LOG_LEVEL")
            .ok()
            .and_then(|s| s.parse().ok());
        let log_file = env::var("DRAWBOT_LOG_FILE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let log_json = env::var("DRAWBOT_LOG_JSON")
            .ok()
            .map_or(false, |val| val == "true");

        AppConfig {
            config_path,
            log_level,
            log_file,
            log_json,
            openai: OpenAiConfig::from_env(),
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn with_openai(mut self, config: OpenAiConfig) -> Self {
        self.openai = config;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_log_json(mut self, enabled: bool) -> Self {
        self.log_json = enabled;
        self
    }

    /// Logger settings for this run. `verbose` switches to the development
    /// preset; otherwise only warnings and errors are shown unless a level
    /// was configured.
    pub fn logger_config(&self, verbose: bool) -> LoggerConfig {
        let mut config = if verbose {
            LoggerConfig::development()
        } else {
            LoggerConfig::default().with_level(self.log_level.unwrap_or(LogLevel::Warn))
        };
        if self.log_json {
            config = config.with_json_output(true);
        }
        if let Some(path) = &self.log_file {
            config = config.with_file_output(&path.to_string_lossy());
        }
        config
    }
}

/// An API token. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(DrawError::InvalidCredential("API key is empty".into()));
        }
        Ok(Self(token))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialRecord {
    api_key: String,
}

/// Loads, validates and persists the API key record.
///
/// The record is only ever written with a key the service has accepted.
pub struct ConfigStore {
    path: PathBuf,
    service: Arc<dyn ImageService>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, service: Arc<dyn ImageService>) -> Self {
        Self {
            path: path.into(),
            service,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `Ok(None)` when no record exists yet. A record that exists but
    /// cannot be parsed is a hard error.
    pub fn load(&self) -> Result<Option<Credential>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No credential record at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(DrawError::ConfigError(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let record: CredentialRecord = serde_json::from_str(&contents).map_err(|e| {
            DrawError::ConfigError(format!(
                "Malformed credential record {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let credential = Credential::new(record.api_key).map_err(|_| {
            DrawError::ConfigError(format!(
                "Credential record {} has an empty api_key",
                self.path.display()
            ))
        })?;

        log::debug!("Loaded credential from {}", self.path.display());
        Ok(Some(credential))
    }

    /// `Ok(false)` only when the service rejects the key. Connectivity
    /// failures come back as `DrawError::Unreachable`.
    pub async fn validate(&self, candidate: &Credential) -> Result<bool> {
        match self.service.list_models(candidate).await {
            Ok(models) => {
                log::debug!("API key accepted, {} models visible", models.data.len());
                Ok(true)
            }
            Err(DrawError::AuthenticationError(msg)) => {
                log::warn!("API key rejected: {}", msg);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn save(&self, candidate: Credential) -> Result<Credential> {
        if !self.validate(&candidate).await? {
            return Err(DrawError::InvalidCredential(
                "The service rejected the API key".into(),
            ));
        }

        self.write_record(&candidate)?;
        log::info!("Saved credential to {}", self.path.display());
        Ok(candidate)
    }

    fn write_record(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let record = CredentialRecord {
            api_key: credential.expose().to_string(),
        };
        let contents = serde_json::to_string_pretty(&record)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
