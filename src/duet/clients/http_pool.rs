//! Shared `reqwest::Client` instances, one per base URL.
//!
//! Both agents of a session usually talk to different hosts, and many sessions run against
//! the same two hosts at once. Keeping one pooled client per base URL lets every session
//! reuse the same keep-alive connections instead of paying DNS and TLS setup per call.
//!
//! Per-request timeouts are applied by the provider clients on each request, so the pooled
//! client itself carries only connection-level settings.

use crate::client_wrapper::ClientError;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

lazy_static! {
    static ref HTTP_CLIENT_POOL: Mutex<HashMap<String, reqwest::Client>> =
        Mutex::new(HashMap::new());
}

/// Get or create the shared HTTP client for `base_url`.
///
/// Returns a [`ClientError::Transport`] tagged with `provider` if the client cannot be
/// built (for example when the TLS backend fails to initialise).
pub fn get_http_client(provider: &str, base_url: &str) -> Result<reqwest::Client, ClientError> {
    let mut pool = HTTP_CLIENT_POOL
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(client) = pool.get(base_url) {
        return Ok(client.clone());
    }

    let client = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|err| ClientError::Transport {
            provider: provider.to_string(),
            detail: format!("failed to build HTTP client: {}", err),
        })?;

    log::debug!("duet::clients::http_pool: new HTTP client for {}", base_url);
    pool.insert(base_url.to_string(), client.clone());
    Ok(client)
}

/// Number of distinct base URLs currently holding a pooled client.
pub fn pooled_client_count() -> usize {
    HTTP_CLIENT_POOL
        .lock()
        .map(|pool| pool.len())
        .unwrap_or(0)
}
