//! Process-wide HTTP client
//!
//! Clients are rebuilt every time a credential rotates or a connection is
//! reset. They all share one `reqwest::Client`, so rebuilding never discards the
//! connection pool configuration.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// HTTP connect timeout (seconds)
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds)
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

static GLOBAL_HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .user_agent(concat!("channel-stats-harvester/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            panic!("FATAL: Failed to build HTTP client: {e}. Check system TLS configuration.");
        })
});

/// Shared HTTP client (cheap clone, internally reference counted)
pub fn global_http_client() -> Client {
    GLOBAL_HTTP_CLIENT.clone()
}
