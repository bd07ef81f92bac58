use crate::client_wrapper::ClientError;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default per-call timeout applied to every provider request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default completion length requested from providers.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;

/// Longest provider error body echoed back into a [`ClientError::Rejected`].
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Send a prepared request, check the status code, and decode the JSON body.
///
/// Status failures keep the (truncated) response body so observers can see why the
/// provider refused the call; a 2xx body that does not match `T` becomes
/// [`ClientError::Malformed`].
pub async fn send_and_decode<T: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, ClientError> {
    let response = request
        .send()
        .await
        .map_err(|err| ClientError::from_reqwest(provider, err))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| ClientError::from_reqwest(provider, err))?;

    if !status.is_success() {
        log::error!(
            "duet::clients::common::send_and_decode(...): {} API Error: {} {}",
            provider,
            status,
            body
        );
        return Err(ClientError::Rejected {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: truncate(&body, MAX_ERROR_BODY_CHARS),
        });
    }

    serde_json::from_str(&body).map_err(|err| ClientError::Malformed {
        provider: provider.to_string(),
        detail: err.to_string(),
    })
}

/// Join `base_url` and `path` with exactly one slash between them.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
