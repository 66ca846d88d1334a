use httpmock::Method::POST;
use httpmock::MockServer;

use tempo_gateway::ai::{BackendError, GeminiClient, GenerativeBackend};

#[tokio::test]
async fn gemini_client_sends_the_expected_request_shape() {
    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST)
            .path("/models/gemini-pro:generateContent")
            .header("x-goog-api-key", "test-key")
            .body_includes("\"role\":\"user\"")
            .body_includes("Translate the following text to es");
        then.status(200)
            .header("content-type", "application/json")
            .body(
                r#"{
                  "candidates": [{"content": {"parts": [{"text": "Hola"}]}}],
                  "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 3, "totalTokenCount": 12}
                }"#,
            );
    });

    let client = GeminiClient::new("test-key").with_base_url(upstream.base_url());
    let completion = client
        .generate(&tempo_gateway::ai::translation_prompt("Hello", "es"))
        .await
        .expect("completion");

    mock.assert_calls(1);
    assert_eq!(completion.text, "Hola");
    assert_eq!(completion.total_tokens, Some(12));
    assert_eq!(client.model(), "gemini-pro");
}

#[tokio::test]
async fn gemini_client_concatenates_multi_part_candidates() {
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(POST).path("/models/gemini-pro:generateContent");
        then.status(200)
            .header("content-type", "application/json")
            .body(
                r#"{"candidates": [{"content": {"parts": [{"text": "Hola"}, {"text": " mundo"}]}}]}"#,
            );
    });

    let client = GeminiClient::new("test-key").with_base_url(upstream.base_url());
    let completion = client.generate("prompt").await.expect("completion");
    assert_eq!(completion.text, "Hola mundo");
    assert_eq!(completion.total_tokens, None);
}

#[tokio::test]
async fn gemini_client_surfaces_api_errors() {
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(POST).path("/models/gemini-pro:generateContent");
        then.status(429)
            .header("content-type", "application/json")
            .body(r#"{"error": {"message": "quota exhausted"}}"#);
    });

    let client = GeminiClient::new("test-key").with_base_url(upstream.base_url());
    let err = client.generate("prompt").await.expect_err("error");
    match err {
        BackendError::Api { status, body } => {
            assert_eq!(status.as_u16(), 429);
            assert!(body.contains("quota exhausted"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn gemini_client_tolerates_empty_candidate_lists() {
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(POST).path("/models/gemini-pro:generateContent");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"candidates": []}"#);
    });

    let client = GeminiClient::new("test-key").with_base_url(upstream.base_url());
    let completion = client.generate("prompt").await.expect("completion");
    assert_eq!(completion.text, "");
}

#[tokio::test]
async fn gemini_client_respects_model_override() {
    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST)
            .path("/models/gemini-pro-vision:generateContent");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"candidates": [{"content": {"parts": [{"text": "ok"}]}}]}"#);
    });

    let client = GeminiClient::new("test-key")
        .with_base_url(upstream.base_url())
        .with_model("gemini-pro-vision");
    let completion = client.generate("prompt").await.expect("completion");

    mock.assert_calls(1);
    assert_eq!(completion.text, "ok");
    assert_eq!(client.model(), "gemini-pro-vision");
}
