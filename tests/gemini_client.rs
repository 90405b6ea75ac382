//! Integration tests for the Gemini text generator
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use deepdive::generate::{
    GeminiConfig, GeminiGenerator, GenerateError, TextGenerator, CONNECTION_ERROR_MESSAGE,
    DEFAULT_SYSTEM_INSTRUCTION, EMPTY_RESPONSE_MESSAGE, MISSING_KEY_MESSAGE,
};

const GENERATE_PATH: &str = "/v1beta/models/test-model:generateContent";

/// Create a test generator pointing to mock server
fn create_test_generator(base_url: &str) -> GeminiGenerator {
    let config = GeminiConfig {
        api_key: Some("test-api-key".to_string()),
        base_url: base_url.to_string(),
        model: "test-model".to_string(),
        timeout_ms: 2000,
    };
    GeminiGenerator::new(config).expect("Failed to create generator")
}

fn reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] }
        }]
    }))
}

#[tokio::test]
async fn test_successful_generation() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "test-api-key"))
        .and(body_partial_json(json!({
            "contents": [{ "role": "user", "parts": [{ "text": "Why did the line stop?" }] }],
            "systemInstruction": { "parts": [{ "text": "Be brief" }] }
        })))
        .respond_with(reply("The motor overheated."))
        .expect(1)
        .mount(&mock_server)
        .await;

    let generator = create_test_generator(&mock_server.uri());
    let text = generator
        .generate("Why did the line stop?", Some("Be brief"))
        .await;

    assert_eq!(text, "The motor overheated.");
}

#[tokio::test]
async fn test_default_system_instruction() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(body_partial_json(json!({
            "systemInstruction": { "parts": [{ "text": DEFAULT_SYSTEM_INSTRUCTION }] }
        })))
        .respond_with(reply("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let generator = create_test_generator(&mock_server.uri());
    assert_eq!(generator.generate("Anything", None).await, "ok");
}

#[tokio::test]
async fn test_server_error_becomes_connection_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let generator = create_test_generator(&mock_server.uri());

    let err = generator.try_generate("Why?", None).await.unwrap_err();
    assert!(matches!(err, GenerateError::Api { status: 500, .. }));

    assert_eq!(generator.generate("Why?", None).await, CONNECTION_ERROR_MESSAGE);
}

#[tokio::test]
async fn test_empty_candidates_become_fallback_text() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&mock_server)
        .await;

    let generator = create_test_generator(&mock_server.uri());
    assert_eq!(generator.generate("Why?", None).await, EMPTY_RESPONSE_MESSAGE);
}

#[tokio::test]
async fn test_invalid_json_becomes_connection_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let generator = create_test_generator(&mock_server.uri());

    let err = generator.try_generate("Why?", None).await.unwrap_err();
    assert!(matches!(err, GenerateError::InvalidResponse { .. }));
    assert_eq!(generator.generate("Why?", None).await, CONNECTION_ERROR_MESSAGE);
}

#[tokio::test]
async fn test_missing_key_skips_network() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(reply("should not be called"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let generator = GeminiGenerator::new(GeminiConfig {
        api_key: Some(String::new()),
        base_url: mock_server.uri(),
        ..GeminiConfig::default()
    })
    .unwrap();

    assert_eq!(generator.generate("Why?", None).await, MISSING_KEY_MESSAGE);
}
