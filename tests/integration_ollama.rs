#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Remote embedding provider behavior against a mocked Ollama server.
// Run with: cargo test --test integration_ollama

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use loglens::LensError;
use loglens::config::EmbeddingConfig;
use loglens::embeddings::provider::EmbeddingProvider;
use loglens::embeddings::{ModelId, OllamaProvider};

const DIMENSION: usize = 4;

fn test_model() -> ModelId {
    ModelId::new("ollama", "test-embed", DIMENSION).expect("valid model id")
}

fn provider_for_server(server: &MockServer) -> OllamaProvider {
    let config = EmbeddingConfig {
        protocol: "http".to_string(),
        host: "127.0.0.1".to_string(),
        port: server.address().port(),
        default_model: test_model().to_string(),
        batch_size: 32,
        retry_attempts: 3,
        timeout_seconds: 5,
    };
    OllamaProvider::new(test_model(), &config)
        .expect("can create provider")
        .with_timeout(Duration::from_secs(2))
}

fn embeddings_body(count: usize) -> serde_json::Value {
    let rows: Vec<Vec<f32>> = (0..count)
        .map(|i| vec![i as f32, 1.0, 0.0, 0.0])
        .collect();
    json!({ "embeddings": rows })
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_round_trips_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_body(3)))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for_server(&server);
    let texts: Vec<String> = (0..3).map(|i| format!("log line {i}")).collect();

    let vectors = tokio::task::spawn_blocking(move || provider.embed_batch(&texts))
        .await
        .expect("task completes")
        .expect("embedding succeeds");

    assert_eq!(vectors.len(), 3);
    for (i, vector) in vectors.iter().enumerate() {
        assert_eq!(vector.len(), DIMENSION);
        assert_eq!(vector[0], i as f32);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_body(1)))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for_server(&server);
    let vectors =
        tokio::task::spawn_blocking(move || provider.embed_batch(&["one text".to_string()]))
            .await
            .expect("task completes")
            .expect("third attempt succeeds");

    assert_eq!(vectors.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_fail_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for_server(&server);
    let result =
        tokio::task::spawn_blocking(move || provider.embed_batch(&["one text".to_string()]))
            .await
            .expect("task completes");

    assert!(matches!(result, Err(LensError::Provider(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_surface_as_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let provider = provider_for_server(&server).with_retry_attempts(2);
    let result =
        tokio::task::spawn_blocking(move || provider.embed_batch(&["one text".to_string()]))
            .await
            .expect("task completes");

    assert!(matches!(result, Err(LensError::Provider(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn count_mismatch_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_body(1)))
        .mount(&server)
        .await;

    let provider = provider_for_server(&server);
    let result = tokio::task::spawn_blocking(move || {
        provider.embed_batch(&["a".to_string(), "b".to_string()])
    })
    .await
    .expect("task completes");

    // One vector for two texts: the response must be rejected, never
    // silently zipped.
    assert!(matches!(result, Err(LensError::Provider(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_dimension_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[1.0, 2.0]] })),
        )
        .mount(&server)
        .await;

    let provider = provider_for_server(&server);
    let result =
        tokio::task::spawn_blocking(move || provider.embed_batch(&["one text".to_string()]))
            .await
            .expect("task completes");

    assert!(matches!(result, Err(LensError::Provider(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn model_listing_backs_the_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                { "name": "test-embed", "size": 1024, "digest": "abc123" },
                { "name": "other-model", "size": 2048, "digest": "def456" }
            ]
        })))
        .mount(&server)
        .await;

    let provider = provider_for_server(&server);
    tokio::task::spawn_blocking(move || provider.health_check())
        .await
        .expect("task completes")
        .expect("configured model is available");
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_fails_for_a_missing_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&server)
        .await;

    let provider = provider_for_server(&server);
    let result = tokio::task::spawn_blocking(move || provider.health_check())
        .await
        .expect("task completes");
    assert!(result.is_err());
}
