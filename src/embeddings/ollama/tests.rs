use super::*;

fn test_model() -> ModelId {
    ModelId::new("ollama", "nomic-embed-text", 768).expect("valid model id")
}

#[test]
fn provider_creation_from_config() {
    let config = EmbeddingConfig::default();
    let provider = OllamaProvider::new(test_model(), &config);
    assert!(provider.is_ok());
}

#[test]
fn provider_reports_declared_dimension() {
    let config = EmbeddingConfig::default();
    let provider = OllamaProvider::new(test_model(), &config).expect("can create provider");
    assert_eq!(provider.dimension(), 768);
    assert_eq!(provider.model_id().name(), "nomic-embed-text");
}

#[test]
fn builder_methods() {
    let config = EmbeddingConfig::default();
    let provider = OllamaProvider::new(test_model(), &config)
        .expect("can create provider")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);
    assert_eq!(provider.retry_attempts, 5);
}

#[test]
fn empty_batch_short_circuits() {
    let config = EmbeddingConfig::default();
    let provider = OllamaProvider::new(test_model(), &config).expect("can create provider");

    // No texts means no network round-trip at all.
    let vectors = provider.embed_batch(&[]).expect("empty batch should succeed");
    assert!(vectors.is_empty());
}

#[test]
fn invalid_host_is_a_config_error() {
    let config = EmbeddingConfig {
        host: "not a host".to_string(),
        ..EmbeddingConfig::default()
    };
    assert!(matches!(
        OllamaProvider::new(test_model(), &config),
        Err(LensError::Config(_))
    ));
}
