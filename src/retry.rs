//! JSON-over-HTTP calls with exponential backoff, shared by the remote
//! embedding and generation providers.
//!
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, ... capped at 32s

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

/// POST `body` to `url` and return the decoded JSON response.
///
/// `service` names the remote in error messages. Errors are returned as
/// plain messages so each provider can wrap them in its own error kind.
pub async fn post_json(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    headers: &[(&str, String)],
    body: &Value,
    max_retries: u32,
) -> Result<Value, String> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| format!("{} returned invalid JSON: {}", service, e));
                }

                let body_text = response.text().await.unwrap_or_default();
                let message = format!("{} API error {}: {}", service, status, body_text);
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(service, attempt, %status, "retrying");
                    last_err = Some(message);
                    continue;
                }
                return Err(message);
            }
            Err(e) => {
                warn!(service, attempt, error = %e, "request failed, retrying");
                last_err = Some(format!("{} request to {} failed: {}", service, url, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} call failed after retries", service)))
}

/// HTTP client with the given request timeout.
pub fn client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}
