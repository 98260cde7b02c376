use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use study_assistant::{
    Credential, FailureClass, GeminiModelResolver, GenerationEndpoint, GenerationService, KeyPool,
    ModelResolver, RetryPolicy, RotationManager,
};

const MODEL: &str = "gemini-1.5-flash";
const GENERATE_PATH: &str = "/models/gemini-1.5-flash:generateContent";

fn gemini_success_body(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
}

fn quota_body() -> Value {
    json!({
        "error": {
            "code": 429,
            "message": "Resource has been exhausted (e.g. check quota).",
            "status": "RESOURCE_EXHAUSTED"
        }
    })
}

fn resolver_for(server: &MockServer) -> GeminiModelResolver {
    GeminiModelResolver::new(Some(server.uri()), Duration::from_secs(5)).unwrap()
}

async fn mount_model(server: &MockServer, model: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/models/{}", model)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": format!("models/{}", model) })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_resolve_and_generate_success() {
    let server = MockServer::start().await;
    mount_model(&server, MODEL).await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_success_body("[]")))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    let endpoint = resolver
        .resolve(&Credential::new("test-key"), MODEL)
        .await
        .expect("model should resolve");

    assert_eq!(endpoint.model_name(), MODEL);
    assert_eq!(endpoint.generate_content("prompt").await.unwrap(), "[]");
}

#[tokio::test]
async fn test_multi_part_candidate_is_concatenated() {
    let server = MockServer::start().await;
    mount_model(&server, MODEL).await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "[{\"question\":" }, { "text": "\"Q\"}]" }] } }]
        })))
        .mount(&server)
        .await;

    let endpoint = resolver_for(&server)
        .resolve(&Credential::new("test-key"), MODEL)
        .await
        .unwrap();

    assert_eq!(endpoint.generate_content("prompt").await.unwrap(), "[{\"question\":\"Q\"}]");
}

#[tokio::test]
async fn test_quota_response_is_classified_and_hides_key() {
    let server = MockServer::start().await;
    mount_model(&server, MODEL).await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(quota_body()))
        .mount(&server)
        .await;

    let endpoint = resolver_for(&server)
        .resolve(&Credential::new("AIzaSy-very-secret-key"), MODEL)
        .await
        .unwrap();
    let error = endpoint.generate_content("prompt").await.unwrap_err();

    assert_eq!(error.status, Some(429));
    assert_eq!(error.classify(), FailureClass::Quota);
    assert!(error.message.contains("RESOURCE_EXHAUSTED"));
    assert!(!error.to_string().contains("very-secret"));
}

#[tokio::test]
async fn test_service_unavailable_is_transient() {
    let server = MockServer::start().await;
    mount_model(&server, MODEL).await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let endpoint = resolver_for(&server)
        .resolve(&Credential::new("test-key"), MODEL)
        .await
        .unwrap();
    let error = endpoint.generate_content("prompt").await.unwrap_err();

    assert_eq!(error.classify(), FailureClass::Transient);
    assert_eq!(error.message, "Service Unavailable");
}

#[tokio::test]
async fn test_missing_candidates_is_an_error() {
    let server = MockServer::start().await;
    mount_model(&server, MODEL).await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let endpoint = resolver_for(&server)
        .resolve(&Credential::new("test-key"), MODEL)
        .await
        .unwrap();
    let error = endpoint.generate_content("prompt").await.unwrap_err();

    assert!(error.message.contains("No candidates"));
}

#[tokio::test]
async fn test_unknown_model_fails_resolution() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models/gemini-unknown"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": 404, "message": "models/gemini-unknown is not found", "status": "NOT_FOUND" }
        })))
        .mount(&server)
        .await;

    let result = resolver_for(&server)
        .resolve(&Credential::new("test-key"), "gemini-unknown")
        .await;

    let error = result.err().expect("resolution should fail");
    assert_eq!(error.status, Some(404));
    assert_eq!(error.classify(), FailureClass::Fatal);
}

#[tokio::test]
async fn test_service_rotates_keys_against_http_backend() {
    let server = MockServer::start().await;
    mount_model(&server, MODEL).await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(query_param("key", "key-a"))
        .respond_with(ResponseTemplate::new(429).set_body_json(quota_body()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(query_param("key", "key-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_success_body(
            r#"[{"question":"What do mitochondria produce?","answer":"ATP"}]"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let rotation = Arc::new(RotationManager::new(
        KeyPool::from_list("key-a,key-b"),
        Arc::new(resolver_for(&server)),
        MODEL,
        "gemini-pro",
    ));
    let policy = RetryPolicy {
        max_attempts: 5,
        backoff_base: Duration::from_millis(10),
        rotation_pause: Duration::from_millis(10),
    };
    let service = GenerationService::new(rotation.clone(), policy, Duration::from_secs(10));

    let cards = service
        .generate_flashcards("Mitochondria produce ATP.", Some(1))
        .await
        .expect("second key should succeed");

    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].answer, "ATP");
    assert_eq!(rotation.rotation_count(), 1);
}

#[tokio::test]
async fn test_slow_model_lookup_times_out_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/models/{}", MODEL)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "name": format!("models/{}", MODEL) }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let resolver = GeminiModelResolver::new(Some(server.uri()), Duration::from_millis(200)).unwrap();
    let started = std::time::Instant::now();
    let error = resolver
        .resolve(&Credential::new("AIzaSy-very-secret-key"), MODEL)
        .await
        .err()
        .expect("lookup should time out");

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(error.message, "request timed out");
    assert_eq!(error.classify(), FailureClass::Transient);
    assert!(!error.to_string().contains("very-secret"));
}
