use drawbot::{ConfigStore, Credential, DrawError, OpenAiClient, OpenAiConfig};
use serde_json::json;
use std::fs;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn models_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer sk-good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"id": "dall-e-2", "object": "model", "owned_by": "system"}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {
                "message": "Incorrect API key provided",
                "type": "invalid_request_error",
                "code": "invalid_api_key"
            }
        })))
        .mount(&server)
        .await;

    server
}

/// A local address nothing is listening on.
fn closed_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

fn store_for(base_url: String, dir: &tempfile::TempDir) -> ConfigStore {
    let client = OpenAiClient::new(OpenAiConfig::new().with_base_url(base_url)).unwrap();
    ConfigStore::new(dir.path().join("config.json"), Arc::new(client))
}

#[tokio::test]
async fn accepted_key_is_saved_and_loaded_back() {
    let server = models_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store = store_for(format!("{}/v1", server.uri()), &dir);

    assert!(store.load().unwrap().is_none());
    let saved = store.save(Credential::new("sk-good").unwrap()).await.unwrap();
    assert_eq!(saved.expose(), "sk-good");

    let record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
    assert_eq!(record, json!({"api_key": "sk-good"}));

    let next_start = store_for(format!("{}/v1", server.uri()), &dir);
    assert_eq!(next_start.load().unwrap(), Some(saved));
}

#[tokio::test]
async fn rejected_key_does_not_touch_storage() {
    let server = models_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store = store_for(format!("{}/v1", server.uri()), &dir);

    let bad = Credential::new("sk-bad").unwrap();
    assert!(!store.validate(&bad).await.unwrap());
    assert!(matches!(
        store.save(bad.clone()).await,
        Err(DrawError::InvalidCredential(_))
    ));
    assert!(!store.path().exists());

    store.save(Credential::new("sk-good").unwrap()).await.unwrap();
    let before = fs::read(store.path()).unwrap();
    assert!(store.save(bad).await.is_err());
    assert_eq!(fs::read(store.path()).unwrap(), before);
}

#[tokio::test]
async fn unreachable_service_is_not_an_invalid_key() {
    let base_url = format!("{}/v1", closed_base_url());
    let dir = tempfile::tempdir().unwrap();
    let store = store_for(base_url, &dir);
    let result = store.validate(&Credential::new("sk-good").unwrap()).await;
    assert!(matches!(result, Err(DrawError::Unreachable(_))));
    assert!(!store.path().exists());
}
