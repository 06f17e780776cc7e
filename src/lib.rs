pub mod app;
pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod openai;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use app::{Attention, DrawingSession, Warning};
pub use config::{AppConfig, ConfigStore, Credential, OpenAiConfig};
pub use error::{DrawError, Result};
pub use models::{GenerationRequest, ImageFormat, ImageReference, ImageSize};
pub use openai::{ImageService, OpenAiClient};
pub use worker::{GenerationFailure, GenerationWorker, RequestStage, WorkerEvent};
