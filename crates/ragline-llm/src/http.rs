//! Shared HTTP client construction for consistent timeout and TLS configuration.

use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Create a shared HTTP client with the default request timeout.
#[must_use]
pub fn default_client() -> reqwest::Client {
    client_with_timeout(DEFAULT_REQUEST_TIMEOUT)
}

/// Config: 30s connect timeout, `timeout` per request, rustls TLS,
/// `ragline/{version}` user-agent, redirect limit 10.
#[must_use]
pub fn client_with_timeout(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .user_agent(concat!("ragline/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .expect("default HTTP client construction must not fail")
}
