use std::io::Write;

use serial_test::serial;

use super::*;
use crate::vault::{MockVaultProvider, Secret};

const ENV_KEYS: [&str; 9] = [
    "RAGLINE_LLM_BASE_URL",
    "RAGLINE_LLM_MODEL",
    "RAGLINE_LLM_EMBEDDING_MODEL",
    "RAGLINE_LLM_TEMPERATURE",
    "RAGLINE_LLM_MAX_RETRIES",
    "RAGLINE_LLM_TIMEOUT",
    "RAGLINE_RETRIEVAL_K",
    "RAGLINE_RETRIEVAL_CHUNK_SIZE",
    "RAGLINE_RETRIEVAL_CHUNK_OVERLAP",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn defaults() {
    let config = Config::default();
    assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    assert_eq!(config.llm.model, "gpt-4o-mini");
    assert_eq!(config.llm.embedding_model, "text-embedding-3-small");
    assert!(config.llm.temperature.abs() < f32::EPSILON);
    assert_eq!(config.llm.max_retries, 3);
    assert_eq!(config.retrieval.k, 4);
    assert_eq!(config.retrieval.chunk_size, 1000);
    assert_eq!(config.retrieval.chunk_overlap, 200);
    assert!(config.router.destinations.is_empty());
    assert!(config.secrets.openai_api_key.is_none());
    config.validate().unwrap();
}

#[test]
#[serial]
fn defaults_when_file_missing() {
    clear_env();
    let config = Config::load(std::path::Path::new("/nonexistent/ragline.toml")).unwrap();
    assert_eq!(config.llm.model, "gpt-4o-mini");
}

#[test]
#[serial]
fn parse_valid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ragline.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
[llm]
base_url = "http://localhost:8080/v1"
model = "local-model"
temperature = 0.7

[retrieval]
k = 3
chunk_size = 500
chunk_overlap = 50

[router]
default_prompt = "Answer briefly: {{input}}"

[[router.destinations]]
name = "physics"
description = "Good for answering questions about physics"
template = "You are a physics professor. {{input}}"

[[router.destinations]]
name = "math"
description = "Good for answering math questions"
template = "You are a mathematician. {{input}}"
"#
    )
    .unwrap();

    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
    assert_eq!(config.llm.model, "local-model");
    assert_eq!(config.llm.embedding_model, "text-embedding-3-small");
    assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(config.retrieval.k, 3);
    assert!(config.retrieval.sentence_aware);
    assert_eq!(config.router.default_prompt, "Answer briefly: {input}");
    assert_eq!(config.router.destinations.len(), 2);
    assert_eq!(config.router.destinations[1].name, "math");
    config.validate().unwrap();
}

#[test]
#[serial]
fn invalid_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[llm\nmodel = ").unwrap();
    clear_env();
    let err = Config::load(&path).unwrap_err();
    assert!(err.to_string().contains("failed to parse config file"));
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("RAGLINE_LLM_MODEL", "gpt-4o");
        std::env::set_var("RAGLINE_LLM_TEMPERATURE", "0.3");
        std::env::set_var("RAGLINE_RETRIEVAL_K", "8");
        std::env::set_var("RAGLINE_RETRIEVAL_CHUNK_SIZE", "300");
        std::env::set_var("RAGLINE_RETRIEVAL_CHUNK_OVERLAP", "30");
        std::env::set_var("RAGLINE_LLM_TIMEOUT", "5");
    }
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.llm.model, "gpt-4o");
    assert!((config.llm.temperature - 0.3).abs() < f32::EPSILON);
    assert_eq!(config.retrieval.k, 8);
    assert_eq!(config.retrieval.chunk_size, 300);
    assert_eq!(config.retrieval.chunk_overlap, 30);
    assert_eq!(config.llm.timeout_secs, 5);
}

#[test]
#[serial]
fn env_override_invalid_ignored() {
    clear_env();
    let mut config = Config::default();

    unsafe { std::env::set_var("RAGLINE_RETRIEVAL_K", "many") };
    unsafe { std::env::set_var("RAGLINE_LLM_MAX_RETRIES", "-1") };
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.retrieval.k, 4);
    assert_eq!(config.llm.max_retries, 3);
}

#[test]
fn validate_rejects_zero_k() {
    let mut config = Config::default();
    config.retrieval.k = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_overlap_not_below_size() {
    let mut config = Config::default();
    config.retrieval.chunk_overlap = config.retrieval.chunk_size;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("chunk_overlap"));
}

#[test]
fn validate_rejects_temperature_out_of_range() {
    let mut config = Config::default();
    config.llm.temperature = 2.5;
    assert!(config.validate().is_err());
    config.llm.temperature = -0.1;
    assert!(config.validate().is_err());
}

#[tokio::test]
async fn resolve_secrets_prefers_ragline_key() {
    let vault = MockVaultProvider::new()
        .with_secret("RAGLINE_OPENAI_API_KEY", "sk-ragline")
        .with_secret("OPENAI_API_KEY", "sk-generic");
    let mut config = Config::default();
    config.resolve_secrets(&vault).await.unwrap();
    assert_eq!(
        config.secrets.openai_api_key.as_ref().map(Secret::expose),
        Some("sk-ragline")
    );
}

#[tokio::test]
async fn resolve_secrets_falls_back_to_openai_key() {
    let vault = MockVaultProvider::new().with_secret("OPENAI_API_KEY", "sk-generic");
    let mut config = Config::default();
    config.resolve_secrets(&vault).await.unwrap();
    assert_eq!(
        config.secrets.openai_api_key.as_ref().map(Secret::expose),
        Some("sk-generic")
    );
}

#[tokio::test]
async fn resolve_secrets_without_key() {
    let mut config = Config::default();
    config
        .resolve_secrets(&MockVaultProvider::new())
        .await
        .unwrap();
    assert!(config.secrets.openai_api_key.is_none());
}

#[test]
fn secrets_not_in_debug_output() {
    let mut config = Config::default();
    config.secrets.openai_api_key = Some(Secret::new("sk-very-secret"));
    let dump = format!("{config:?}");
    assert!(!dump.contains("sk-very-secret"));
}
