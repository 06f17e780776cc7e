//! Presentation state for a drawing session: what the user has entered, what
//! is in flight, and the last generated image.

use crate::{
    config::Credential,
    error::{DrawError, Result},
    models::{GenerationRequest, ImageFormat, ImageSize},
    worker::WorkerEvent,
};
use image::DynamicImage;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A user-facing problem report: a short title and a corrective message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub title: String,
    pub message: String,
}

impl Warning {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn missing_prompt() -> Self {
        Self::new("Missing Entry", "Please enter a prompt.")
    }

    pub fn missing_size() -> Self {
        Self::new("Missing Entry", "Please select a size.")
    }

    pub fn missing_file_name() -> Self {
        Self::new("Missing Entry", "Please enter a file name.")
    }

    pub fn missing_path() -> Self {
        Self::new("Missing Path", "Please select a file path.")
    }

    pub fn missing_format() -> Self {
        Self::new("Missing Entry", "Please select a format.")
    }

    pub fn no_image() -> Self {
        Self::new("No Image", "Please generate an image first.")
    }

    pub fn invalid_key() -> Self {
        Self::new("Invalid API key", "Please enter a valid OpenAI API key")
    }

    pub fn connect_error() -> Self {
        Self::new(
            "Connect Error",
            "You should connect to the internet and try again",
        )
    }

    /// The warning shown when checking or storing a new API key fails.
    pub fn for_key_check(error: &DrawError) -> Self {
        match error {
            DrawError::InvalidCredential(_) | DrawError::AuthenticationError(_) => {
                Self::invalid_key()
            }
            DrawError::Unreachable(_) => Self::connect_error(),
            DrawError::IoError(msg) | DrawError::SerializationError(msg) => Self::new(
                "Save Error",
                format!("Could not store the API key: {}", msg),
            ),
            other => Self::new("Service Error", other.message()),
        }
    }

    pub fn busy() -> Self {
        Self::new(
            "Busy",
            "An image is already being generated. Please wait for it to finish.",
        )
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

/// Something the front end has to act on before the user can continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attention {
    /// No usable API key; run the configuration flow.
    NeedsConfiguration,
    Warning(Warning),
}

#[derive(Debug, Default)]
pub struct DrawingSession {
    prompt: String,
    size: Option<ImageSize>,
    file_name: String,
    format: Option<ImageFormat>,
    directory: Option<PathBuf>,
    image: Option<DynamicImage>,
    pending: Option<Uuid>,
}

impl DrawingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn set_size(&mut self, size: ImageSize) {
        self.size = Some(size);
    }

    pub fn size(&self) -> Option<ImageSize> {
        self.size
    }

    pub fn size_label(&self) -> String {
        match self.size {
            Some(size) => format!("Size:\t{}", size),
            None => "Size:".to_string(),
        }
    }

    pub fn set_format(&mut self, format: ImageFormat) {
        self.format = Some(format);
    }

    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn format_label(&self) -> String {
        match self.format {
            Some(format) => format!("Format:\t{}", format),
            None => "Format:".to_string(),
        }
    }

    pub fn set_file_name(&mut self, name: impl Into<String>) {
        self.file_name = name.into();
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn select_directory(&mut self, directory: impl Into<PathBuf>) {
        self.directory = Some(directory.into());
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn image(&self) -> Option<&DynamicImage> {
        self.image.as_ref()
    }

    /// True between `Started` and the matching terminal event.
    pub fn is_generating(&self) -> bool {
        self.pending.is_some()
    }

    /// Builds the request from current state, or explains why it can't.
    pub fn prepare_generation(
        &self,
        credential: Option<&Credential>,
    ) -> std::result::Result<GenerationRequest, Attention> {
        if credential.is_none() {
            return Err(Attention::NeedsConfiguration);
        }
        if self.is_generating() {
            return Err(Attention::Warning(Warning::busy()));
        }
        if self.prompt.trim().is_empty() {
            return Err(Attention::Warning(Warning::missing_prompt()));
        }
        let size = self
            .size
            .ok_or_else(|| Attention::Warning(Warning::missing_size()))?;

        Ok(GenerationRequest::new(self.prompt.clone(), size))
    }

    /// Record a request handed to the worker so the progress state is on
    /// before its `Started` event arrives.
    pub fn mark_submitted(&mut self, id: Uuid) {
        self.pending = Some(id);
    }

    /// Applies a worker event. Progress is cleared before anything is
    /// returned. A rejected API key asks for configuration instead of a
    /// warning.
    pub fn handle_event(&mut self, event: WorkerEvent) -> Option<Attention> {
        match event {
            WorkerEvent::Started { id } => {
                self.pending = Some(id);
                None
            }
            WorkerEvent::Succeeded { id, image } => {
                self.finish(id);
                log::info!("Image ready: {}x{}", image.width(), image.height());
                self.image = Some(image);
                None
            }
            WorkerEvent::Failed { id, failure } => {
                self.finish(id);
                if failure.needs_configuration() {
                    Some(Attention::NeedsConfiguration)
                } else {
                    Some(Attention::Warning(failure.warning()))
                }
            }
        }
    }

    fn finish(&mut self, id: Uuid) {
        if self.pending.is_some_and(|pending| pending != id) {
            log::warn!("Finished request {} was not the one being tracked", id);
        }
        self.pending = None;
    }

    /// Writes the current image to `<directory>/<name>.<ext>`.
    pub fn save_image(&self) -> std::result::Result<PathBuf, Warning> {
        let name = self.file_name.trim();
        if name.is_empty() {
            return Err(Warning::missing_file_name());
        }
        let directory = self.directory.as_ref().ok_or_else(Warning::missing_path)?;
        let image = self.image.as_ref().ok_or_else(Warning::no_image)?;
        let format = self.format.ok_or_else(Warning::missing_format)?;

        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Warning::new(
                "Invalid File Name",
                "The file name must not contain path separators.",
            ));
        }

        let path = directory.join(format!("{}.{}", name, format.extension()));
        write_image(image, &path, format)
            .map_err(|e| {
                Warning::new("Save Error", format!("Could not save image: {}", e.message()))
            })?;
        Ok(path)
    }
}

/// File name used for previews of the current image.
pub const PREVIEW_FILE_NAME: &str = "drawbot-preview.png";

impl DrawingSession {
    /// Writes the current image as PNG into `directory` so it can be opened
    /// in a viewer. Replaces the previous preview.
    pub fn write_preview(&self, directory: &Path) -> std::result::Result<PathBuf, Warning> {
        let image = self.image.as_ref().ok_or_else(Warning::no_image)?;
        let path = directory.join(PREVIEW_FILE_NAME);
        write_image(image, &path, ImageFormat::Png).map_err(|e| {
            Warning::new("Preview Error", format!("Could not write preview: {}", e.message()))
        })?;
        Ok(path)
    }
}

/// Encodes `image` into `format` at `path`. JPEG has no alpha channel, so the
/// image is flattened to RGB first.
pub fn write_image(image: &DynamicImage, path: &Path, format: ImageFormat) -> Result<()> {
    match format {
        ImageFormat::Jpeg => {
            DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path, format.to_codec())?
        }
        _ => image.save_with_format(path, format.to_codec())?,
    }
    log::info!("Saved {} image to {}", format, path.display());
    Ok(())
}
