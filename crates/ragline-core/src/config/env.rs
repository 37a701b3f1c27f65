use std::str::FromStr;

use super::Config;

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    if let Ok(parsed) = v.trim().parse::<T>() {
        Some(parsed)
    } else {
        tracing::warn!("ignoring invalid {key} value: {v}");
        None
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RAGLINE_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("RAGLINE_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("RAGLINE_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Some(t) = env_parse::<f32>("RAGLINE_LLM_TEMPERATURE") {
            self.llm.temperature = t;
        }
        if let Some(n) = env_parse::<u32>("RAGLINE_LLM_MAX_RETRIES") {
            self.llm.max_retries = n;
        }
        if let Some(secs) = env_parse::<u64>("RAGLINE_LLM_TIMEOUT") {
            self.llm.timeout_secs = secs;
        }
        if let Some(k) = env_parse::<usize>("RAGLINE_RETRIEVAL_K") {
            self.retrieval.k = k;
        }
        if let Some(size) = env_parse::<usize>("RAGLINE_RETRIEVAL_CHUNK_SIZE") {
            self.retrieval.chunk_size = size;
        }
        if let Some(overlap) = env_parse::<usize>("RAGLINE_RETRIEVAL_CHUNK_OVERLAP") {
            self.retrieval.chunk_overlap = overlap;
        }
    }
}
