use super::{check_response, transport_error, Endpoint};
use crate::{
    config::{Credential, OpenAiConfig},
    error::{DrawError, Result},
    models::{GenerationRequest, ImageReference, ImagesGenerationPayload, ImagesGenerationResponse},
};
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;

#[derive(Clone)]
pub struct ImageClient {
    client: Client,
    endpoint: Endpoint,
    model: Option<String>,
    inline_images: bool,
}

impl ImageClient {
    pub(crate) fn new(client: Client, endpoint: Endpoint, config: &OpenAiConfig) -> Self {
        Self {
            client,
            endpoint,
            model: config.image_model.clone(),
            inline_images: config.inline_images,
        }
    }

    /// Requests exactly one image and returns where to get it from.
    pub async fn generate(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<ImageReference> {
        let payload = ImagesGenerationPayload {
            prompt: &request.prompt,
            n: 1,
            size: request.size.as_str(),
            model: self.model.as_deref(),
            response_format: self.inline_images.then_some("b64_json"),
        };

        log::info!(
            "Generating {} image with model: {}",
            request.size,
            self.model.as_deref().unwrap_or("service default")
        );

        let http_request = self
            .client
            .post(self.endpoint.url("images/generations"))
            .json(&payload);
        let response = self
            .endpoint
            .authorize(http_request, credential)
            .send()
            .await
            .map_err(|e| transport_error("Image generation", e))?;

        let response = check_response(response, "Image generation").await?;
        let parsed: ImagesGenerationResponse = response
            .json()
            .await
            .map_err(|e| DrawError::ResponseError(format!("Invalid generation response: {}", e)))?;

        let first = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| DrawError::ResponseError("No images generated".into()))?;

        if let Some(revised) = &first.revised_prompt {
            log::info!("Service revised the prompt to: {}", revised);
        }

        match (first.url, first.b64_json) {
            (Some(url), _) => Ok(ImageReference::Url(url)),
            (None, Some(data)) => Ok(ImageReference::Inline(data)),
            (None, None) => Err(DrawError::ResponseError(
                "Image response missing both url and b64_json".into(),
            )),
        }
    }

    /// Downloads (or decodes) the raw encoded image bytes.
    pub async fn fetch(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        match reference {
            ImageReference::Inline(data) => general_purpose::STANDARD
                .decode(data)
                .map_err(|e| DrawError::ResponseError(format!("Invalid base64 image: {}", e))),
            ImageReference::Url(url) => {
                log::debug!("Downloading image from {}", url);
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| transport_error("Image download", e))?;

                let response = check_response(response, "Image download").await?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| transport_error("Image download", e))?;

                log::debug!("Downloaded {} bytes", bytes.len());
                Ok(bytes.to_vec())
            }
        }
    }
}
