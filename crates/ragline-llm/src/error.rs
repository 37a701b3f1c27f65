#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited by {provider}")]
    RateLimited { provider: &'static str },

    #[error("authentication failed for {provider}")]
    AuthenticationFailed { provider: &'static str },

    #[error("{provider} unavailable (status {status})")]
    ServiceUnavailable { provider: &'static str, status: u16 },

    #[error("{provider} request failed (status {status})")]
    Api { provider: &'static str, status: u16 },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: &'static str },

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Map a non-success HTTP status onto the transport taxonomy.
    #[must_use]
    pub fn from_status(provider: &'static str, status: u16) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed { provider },
            429 => Self::RateLimited { provider },
            502..=504 => Self::ServiceUnavailable { provider, status },
            _ => Self::Api { provider, status },
        }
    }

    /// Whether a caller may reasonably repeat the same request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::ServiceUnavailable { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
