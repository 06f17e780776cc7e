use base64::{engine::general_purpose, Engine as _};
use drawbot::{
    Attention, Credential, DrawingSession, GenerationFailure, GenerationWorker, ImageFormat, ImageSize,
    OpenAiClient, OpenAiConfig, RequestStage, WorkerEvent,
};
use image::{DynamicImage, Rgba, RgbaImage};
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn png_bytes(edge: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgba8(RgbaImage::from_fn(edge, edge, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 90, 255])
    }));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// A local address nothing is listening on.
fn closed_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

fn client_for(server: &MockServer) -> OpenAiClient {
    OpenAiClient::new(OpenAiConfig::new().with_base_url(format!("{}/v1", server.uri()))).unwrap()
}

async fn run_request(
    client: OpenAiClient,
    prompt: &str,
    size: ImageSize,
) -> (DrawingSession, Option<GenerationFailure>) {
    let (worker, mut events) = GenerationWorker::new(Arc::new(client));
    let mut session = DrawingSession::new();
    session.set_prompt(prompt);
    session.set_size(size);

    let credential = Credential::new("sk-good").unwrap();
    let request = session.prepare_generation(Some(&credential)).unwrap();
    let id = worker.submit(credential, request).unwrap();

    let started = events.recv().await.unwrap();
    assert!(matches!(started, WorkerEvent::Started { id: started_id } if started_id == id));
    session.handle_event(started);
    assert!(session.is_generating());

    let outcome = events.recv().await.unwrap();
    assert_eq!(outcome.id(), id);
    let failure = match &outcome {
        WorkerEvent::Failed { failure, .. } => Some(failure.clone()),
        _ => None,
    };
    session.handle_event(outcome);
    assert!(!session.is_generating());
    (session, failure)
}

async fn mount_generation_error(server: &MockServer, message: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": message, "type": "invalid_request_error", "code": null}
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn generates_downloads_and_saves_an_image() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(header("authorization", "Bearer sk-good"))
        .and(body_partial_json(json!({"prompt": "a red fox", "n": 1, "size": "512x512"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "created": 1680000000,
            "data": [{"url": format!("{}/files/fox.png", server.uri())}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/fox.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png_bytes(512)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (mut session, failure) =
        run_request(client_for(&server), "a red fox", ImageSize::Medium).await;
    assert!(failure.is_none());
    let image = session.image().unwrap().clone();
    assert_eq!((image.width(), image.height()), (512, 512));

    let dir = tempfile::tempdir().unwrap();
    session.set_file_name("cat");
    session.set_format(ImageFormat::Png);
    session.select_directory(dir.path());
    let saved = session.save_image().unwrap();
    assert_eq!(saved, dir.path().join("cat.png"));
    assert_eq!(image::open(&saved).unwrap().to_rgba8(), image.to_rgba8());
}

#[tokio::test]
async fn inline_payloads_skip_the_download() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(body_partial_json(json!({"response_format": "b64_json", "size": "256x256"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"b64_json": general_purpose::STANDARD.encode(png_bytes(256))}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiClient::new(
        OpenAiConfig::new()
            .with_base_url(format!("{}/v1", server.uri()))
            .with_inline_images(true),
    )
    .unwrap();
    let (session, failure) = run_request(client, "a blue whale", ImageSize::Small).await;
    assert!(failure.is_none());
    assert_eq!(session.image().map(|i| i.width()), Some(256));
}

#[tokio::test]
async fn long_prompt_is_reported_as_too_long() {
    let server = MockServer::start().await;
    mount_generation_error(
        &server,
        "'prompt' is too long - maximum length is 1000 characters",
    )
    .await;

    let (session, failure) =
        run_request(client_for(&server), &"fox ".repeat(400), ImageSize::Small).await;
    assert_eq!(failure, Some(GenerationFailure::PromptTooLong));
    assert!(session.image().is_none());
}

#[tokio::test]
async fn rejected_content_is_reported_as_invalid_prompt() {
    let server = MockServer::start().await;
    mount_generation_error(
        &server,
        "Your request was rejected as a result of our safety system. Your prompt may contain text that is not allowed.",
    )
    .await;

    let (session, failure) =
        run_request(client_for(&server), "something disallowed", ImageSize::Small).await;
    let failure = failure.unwrap();
    assert!(matches!(failure, GenerationFailure::InvalidPrompt(_)));
    assert_eq!(failure.warning().title, "Invalid Prompt");
    assert!(session.image().is_none());
}

#[tokio::test]
async fn offline_generation_call_is_a_connection_warning() {
    let client = OpenAiClient::new(
        OpenAiConfig::new().with_base_url(format!("{}/v1", closed_base_url())),
    )
    .unwrap();

    let (session, failure) = run_request(client, "a red fox", ImageSize::Small).await;
    let failure = failure.unwrap();
    assert_eq!(
        failure,
        GenerationFailure::Connection {
            stage: RequestStage::Generation
        }
    );
    assert_eq!(failure.warning().title, "Connect Error");
    assert!(session.image().is_none());
}

#[tokio::test]
async fn offline_image_host_is_a_connection_warning() {
    let dead_url = format!("{}/files/fox.png", closed_base_url());

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": [{"url": dead_url}]})),
        )
        .mount(&server)
        .await;

    let (session, failure) =
        run_request(client_for(&server), "a red fox", ImageSize::Small).await;
    assert_eq!(
        failure,
        Some(GenerationFailure::Connection {
            stage: RequestStage::Download
        })
    );
    assert!(session.image().is_none());
}

#[tokio::test]
async fn server_errors_are_service_warnings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "The server had an error while processing your request.", "type": "server_error"}
        })))
        .mount(&server)
        .await;

    let (_, failure) = run_request(client_for(&server), "a red fox", ImageSize::Small).await;
    let failure = failure.unwrap();
    assert!(matches!(failure, GenerationFailure::Rejected(_)));
    assert_eq!(failure.warning().title, "Service Error");
}

#[tokio::test]
async fn expired_image_link_is_not_blamed_on_the_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"url": format!("{}/files/x.png", server.uri())}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/x.png"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "Signature has expired", "type": "invalid_request_error"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (session, failure) =
        run_request(client_for(&server), "a red fox", ImageSize::Small).await;
    let failure = failure.unwrap();
    assert_eq!(failure, GenerationFailure::Rejected("Signature has expired".into()));
    assert_eq!(failure.warning().title, "Service Error");
    assert!(session.image().is_none());
}

#[tokio::test]
async fn revoked_key_sends_the_user_back_to_configuration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided: sk-good.", "type": "invalid_request_error", "code": "invalid_api_key"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (worker, mut events) = GenerationWorker::new(Arc::new(client_for(&server)));
    let mut session = DrawingSession::new();
    session.set_prompt("a red fox");
    session.set_size(ImageSize::Small);

    let credential = Credential::new("sk-good").unwrap();
    let request = session.prepare_generation(Some(&credential)).unwrap();
    let id = worker.submit(credential, request).unwrap();
    session.mark_submitted(id);

    assert!(session.handle_event(events.recv().await.unwrap()).is_none());
    let outcome = events.recv().await.unwrap();
    assert!(matches!(
        &outcome,
        WorkerEvent::Failed { failure: GenerationFailure::InvalidCredential(_), .. }
    ));
    assert_eq!(session.handle_event(outcome), Some(Attention::NeedsConfiguration));
    assert!(!session.is_generating());
}
