use crate::{
    app::Warning,
    config::Credential,
    error::{DrawError, Result},
    logger,
    models::GenerationRequest,
    openai::ImageService,
};
use image::DynamicImage;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Which remote call a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Generation,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationFailure {
    PromptTooLong,
    InvalidPrompt(String),
    /// The service refused the API key; the user has to enter a new one.
    InvalidCredential(String),
    Connection { stage: RequestStage },
    Rejected(String),
    UndecodableImage(String),
}

impl GenerationFailure {
    /// Prompt and credential categories only apply to the generation call.
    /// The download goes to a pre-signed URL, so a 4xx there says nothing
    /// about the prompt or the key.
    pub fn categorize(error: DrawError, stage: RequestStage) -> Self {
        match (error, stage) {
            (DrawError::InvalidRequestError(msg), RequestStage::Generation) => {
                if msg.to_lowercase().contains("too long") {
                    GenerationFailure::PromptTooLong
                } else {
                    GenerationFailure::InvalidPrompt(msg)
                }
            }
            (DrawError::AuthenticationError(msg), RequestStage::Generation) => {
                GenerationFailure::InvalidCredential(msg)
            }
            (DrawError::Unreachable(_), stage) => GenerationFailure::Connection { stage },
            (DrawError::ImageError(msg), _) => GenerationFailure::UndecodableImage(msg),
            (other, _) => GenerationFailure::Rejected(other.message()),
        }
    }

    pub fn needs_configuration(&self) -> bool {
        matches!(self, GenerationFailure::InvalidCredential(_))
    }

    pub fn warning(&self) -> Warning {
        match self {
            GenerationFailure::PromptTooLong => {
                Warning::new("Invalid Prompt", "Your prompt may contain too much text")
            }
            GenerationFailure::InvalidPrompt(_) => Warning::new(
                "Invalid Prompt",
                "Your prompt may contain text that is not valid",
            ),
            GenerationFailure::InvalidCredential(_) => Warning::invalid_key(),
            GenerationFailure::Connection { .. } => Warning::connect_error(),
            GenerationFailure::Rejected(msg) => Warning::new("Service Error", msg.clone()),
            GenerationFailure::UndecodableImage(msg) => Warning::new(
                "Image Error",
                format!("The generated image could not be read: {}", msg),
            ),
        }
    }
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationFailure::PromptTooLong => write!(f, "prompt too long"),
            GenerationFailure::InvalidPrompt(msg) => write!(f, "invalid prompt: {}", msg),
            GenerationFailure::InvalidCredential(msg) => write!(f, "API key rejected: {}", msg),
            GenerationFailure::Connection { stage } => {
                write!(f, "connection failed during {:?}", stage)
            }
            GenerationFailure::Rejected(msg) => write!(f, "rejected: {}", msg),
            GenerationFailure::UndecodableImage(msg) => write!(f, "undecodable image: {}", msg),
        }
    }
}

/// Messages from the worker to whoever drives the UI.
///
/// Every request produces `Started` followed by exactly one of `Succeeded` or
/// `Failed`.
#[derive(Debug)]
pub enum WorkerEvent {
    Started { id: Uuid },
    Succeeded { id: Uuid, image: DynamicImage },
    Failed { id: Uuid, failure: GenerationFailure },
}

impl WorkerEvent {
    pub fn id(&self) -> Uuid {
        match self {
            WorkerEvent::Started { id }
            | WorkerEvent::Succeeded { id, .. }
            | WorkerEvent::Failed { id, .. } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerEvent::Started { .. })
    }
}

struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs one generation at a time off the caller's task and reports back over
/// a channel.
pub struct GenerationWorker {
    service: Arc<dyn ImageService>,
    events: mpsc::Sender<WorkerEvent>,
    in_flight: Arc<AtomicBool>,
}

impl GenerationWorker {
    pub fn new(service: Arc<dyn ImageService>) -> (Self, mpsc::Receiver<WorkerEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let worker = Self {
            service,
            events,
            in_flight: Arc::new(AtomicBool::new(false)),
        };
        (worker, receiver)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Starts a request on the current tokio runtime. Fails with
    /// `DrawError::WorkerBusy` while a previous request has not finished.
    pub fn submit(&self, credential: Credential, request: GenerationRequest) -> Result<Uuid> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Rejected generation request while another is in flight");
            return Err(DrawError::WorkerBusy);
        }

        let id = Uuid::new_v4();
        let guard = InFlight(Arc::clone(&self.in_flight));
        let service = Arc::clone(&self.service);
        let events = self.events.clone();

        tokio::spawn(async move {
            if events.send(WorkerEvent::Started { id }).await.is_err() {
                log::debug!("Event receiver dropped before request {} started", id);
            }

            let timer = logger::timer("image generation");
            let event = match generate(service.as_ref(), &credential, &request).await {
                Ok(image) => WorkerEvent::Succeeded { id, image },
                Err(failure) => {
                    log::warn!("Request {} failed: {}", id, failure);
                    WorkerEvent::Failed { id, failure }
                }
            };
            drop(timer);

            // Free the slot first so the consumer may resubmit on receipt.
            drop(guard);
            if events.send(event).await.is_err() {
                log::debug!("Event receiver dropped before request {} finished", id);
            }
        });

        Ok(id)
    }
}

/// Create, fetch and decode one image. No retries.
pub async fn generate(
    service: &dyn ImageService,
    credential: &Credential,
    request: &GenerationRequest,
) -> std::result::Result<DynamicImage, GenerationFailure> {
    let reference = service
        .create_image(credential, request)
        .await
        .map_err(|e| GenerationFailure::categorize(e, RequestStage::Generation))?;

    let bytes = service
        .fetch_image(&reference)
        .await
        .map_err(|e| GenerationFailure::categorize(e, RequestStage::Download))?;

    let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| GenerationFailure::UndecodableImage(e.to_string()))?
        .map_err(|e| GenerationFailure::UndecodableImage(e.to_string()))?;

    let expected = request.size.pixels();
    if image.width() != expected || image.height() != expected {
        log::warn!(
            "Service returned {}x{} for a {} request",
            image.width(),
            image.height(),
            request.size
        );
    }

    Ok(image)
}
