use super::{check_response, transport_error, Endpoint};
use crate::{
    config::Credential,
    error::{DrawError, Result},
    models::ModelList,
};
use reqwest::Client;

#[derive(Clone)]
pub struct ModelClient {
    client: Client,
    endpoint: Endpoint,
}

impl ModelClient {
    pub(crate) fn new(client: Client, endpoint: Endpoint) -> Self {
        Self { client, endpoint }
    }

    /// Cheapest authenticated call the API offers; used to check a key.
    pub async fn list(&self, credential: &Credential) -> Result<ModelList> {
        let request = self.client.get(self.endpoint.url("models"));
        let response = self
            .endpoint
            .authorize(request, credential)
            .send()
            .await
            .map_err(|e| transport_error("Model listing", e))?;

        let response = check_response(response, "Model listing").await?;
        response
            .json::<ModelList>()
            .await
            .map_err(|e| DrawError::ResponseError(format!("Invalid model list: {}", e)))
    }
}
