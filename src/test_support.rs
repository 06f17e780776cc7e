use crate::{
    config::Credential,
    error::{DrawError, Result},
    models::{GenerationRequest, ImageReference, ImageSize, ModelList},
    openai::ImageService,
};
use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba([12, 140, 200, 255]),
    ));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

/// Scriptable stand-in for the remote service.
pub(crate) struct FakeImageService {
    accepted_key: Option<String>,
    offline: bool,
    create_error: Option<DrawError>,
    fetch_error: Option<DrawError>,
    fetch_bytes: Option<Vec<u8>>,
    gate: Option<Arc<Notify>>,
    last_size: Mutex<Option<ImageSize>>,
    create_calls: AtomicUsize,
}

impl FakeImageService {
    pub(crate) fn new() -> Self {
        Self {
            accepted_key: None,
            offline: false,
            create_error: None,
            fetch_error: None,
            fetch_bytes: None,
            gate: None,
            last_size: Mutex::new(None),
            create_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn accepting(mut self, key: &str) -> Self {
        self.accepted_key = Some(key.to_string());
        self
    }

    pub(crate) fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub(crate) fn failing_create(mut self, error: DrawError) -> Self {
        self.create_error = Some(error);
        self
    }

    pub(crate) fn failing_fetch(mut self, error: DrawError) -> Self {
        self.fetch_error = Some(error);
        self
    }

    pub(crate) fn returning_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.fetch_bytes = Some(bytes);
        self
    }

    /// Holds every `create_image` call until the gate is notified.
    pub(crate) fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageService for FakeImageService {
    async fn list_models(&self, credential: &Credential) -> Result<ModelList> {
        if self.offline {
            return Err(DrawError::Unreachable("connection refused".into()));
        }
        match &self.accepted_key {
            Some(key) if key != credential.expose() => Err(DrawError::AuthenticationError(
                "Incorrect API key provided".into(),
            )),
            _ => Ok(ModelList::default()),
        }
    }

    async fn create_image(
        &self,
        _credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<ImageReference> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(error) = &self.create_error {
            return Err(error.clone());
        }
        *self.last_size.lock().unwrap() = Some(request.size);
        Ok(ImageReference::Url("https://images.test/generated.png".into()))
    }

    async fn fetch_image(&self, _reference: &ImageReference) -> Result<Vec<u8>> {
        if let Some(error) = &self.fetch_error {
            return Err(error.clone());
        }
        if let Some(bytes) = &self.fetch_bytes {
            return Ok(bytes.clone());
        }
        let size = self.last_size.lock().unwrap().unwrap_or(ImageSize::Small);
        Ok(png_bytes(size.pixels(), size.pixels()))
    }
}
