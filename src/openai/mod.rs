pub mod image_client;
pub mod model_client;

use crate::{
    config::{Credential, OpenAiConfig},
    error::{DrawError, Result},
    models::{ApiErrorBody, GenerationRequest, ImageReference, ModelList},
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

pub use image_client::ImageClient;
pub use model_client::ModelClient;

/// The remote operations the credential store and the generation worker need.
#[async_trait]
pub trait ImageService: Send + Sync {
    async fn list_models(&self, credential: &Credential) -> Result<ModelList>;

    async fn create_image(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<ImageReference>;

    async fn fetch_image(&self, reference: &ImageReference) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    base_url: String,
    organization: Option<String>,
}

impl Endpoint {
    fn new(config: &OpenAiConfig) -> Self {
        Self {
            base_url: config.resolved_base_url().to_string(),
            organization: config.organization.clone(),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn authorize(&self, builder: RequestBuilder, credential: &Credential) -> RequestBuilder {
        let builder = builder.bearer_auth(credential.expose());
        match &self.organization {
            Some(org) => builder.header("OpenAI-Organization", org),
            None => builder,
        }
    }
}

#[derive(Clone)]
pub struct OpenAiClient {
    image_client: ImageClient,
    model_client: ModelClient,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("drawbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DrawError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        let endpoint = Endpoint::new(&config);

        log::debug!("OpenAI endpoint: {}", endpoint.base_url);

        Ok(Self {
            image_client: ImageClient::new(client.clone(), endpoint.clone(), &config),
            model_client: ModelClient::new(client, endpoint),
        })
    }
}

#[async_trait]
impl ImageService for OpenAiClient {
    async fn list_models(&self, credential: &Credential) -> Result<ModelList> {
        self.model_client.list(credential).await
    }

    async fn create_image(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<ImageReference> {
        self.image_client.generate(credential, request).await
    }

    async fn fetch_image(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        self.image_client.fetch(reference).await
    }
}

/// Maps a non-success status and its body onto the crate error taxonomy.
pub(crate) fn error_for_status(status: StatusCode, body: &str) -> DrawError {
    let message = ApiErrorBody::message_from(body);
    let is_invalid_request = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error.kind)
        .map_or(false, |kind| kind == "invalid_request_error");

    match status {
        StatusCode::UNAUTHORIZED => DrawError::AuthenticationError(message),
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => {
            DrawError::InvalidRequestError(message)
        }
        _ if is_invalid_request && status.is_client_error() => {
            DrawError::InvalidRequestError(message)
        }
        _ => DrawError::ServiceError {
            status: status.as_u16(),
            message,
        },
    }
}

/// Passes successful responses through and converts everything else.
pub(crate) async fn check_response(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    log::error!("{} failed with status {}: {}", what, status, body);
    Err(error_for_status(status, &body))
}

/// Anything that fails before a response arrives is treated as a connectivity
/// problem.
pub(crate) fn transport_error(what: &str, e: reqwest::Error) -> DrawError {
    log::error!("{} transport error: {:?}", what, e);
    DrawError::Unreachable(format!("{} failed: {}", what, e))
}
