use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DrawError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),
    #[error("Service unreachable: {0}")]
    Unreachable(String),
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
    #[error("Invalid request: {0}")]
    InvalidRequestError(String),
    #[error("Service error ({status}): {message}")]
    ServiceError { status: u16, message: String },
    #[error("Response error: {0}")]
    ResponseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Image error: {0}")]
    ImageError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("An image is already being generated")]
    WorkerBusy,
}

impl From<std::io::Error> for DrawError {
    fn from(e: std::io::Error) -> Self {
        DrawError::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for DrawError {
    fn from(e: serde_json::Error) -> Self {
        DrawError::SerializationError(e.to_string())
    }
}

impl From<image::ImageError> for DrawError {
    fn from(e: image::ImageError) -> Self {
        DrawError::ImageError(e.to_string())
    }
}

impl DrawError {
    /// The underlying message without the variant's prefix.
    pub fn message(&self) -> String {
        match self {
            DrawError::ServiceError { message, .. } => message.clone(),
            DrawError::ConfigError(msg)
            | DrawError::InvalidCredential(msg)
            | DrawError::Unreachable(msg)
            | DrawError::AuthenticationError(msg)
            | DrawError::InvalidRequestError(msg)
            | DrawError::ResponseError(msg)
            | DrawError::SerializationError(msg)
            | DrawError::ImageError(msg)
            | DrawError::IoError(msg) => msg.clone(),
            DrawError::WorkerBusy => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DrawError>;
