//! Shared HTTP plumbing: client construction, response mapping and retries.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::PlatformError;

/// Retry behaviour of a single send or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
        }
    }
}

impl RetrySettings {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Result of a retried operation together with the attempts it used.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, PlatformError>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
pub async fn with_retry<T, F, Fut>(
    settings: &RetrySettings,
    operation: &str,
    mut op: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let max_attempts = settings.max_attempts.max(1);
    let mut backoff = settings.backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let wait = backoff.next_backoff().unwrap_or(settings.max_interval);
                warn!(
                    operation,
                    attempt,
                    backoff_ms = wait.as_millis() as u64,
                    error = %e,
                    "transient error, retrying"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

/// Build an HTTP client with the adapters' timeouts.
pub fn build_client() -> Result<Client, PlatformError> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()?)
}

/// XRPC error response format.
#[derive(Debug, Deserialize)]
struct XrpcError {
    error: String,
    message: String,
}

/// Mastodon error response format.
#[derive(Debug, Deserialize)]
struct MastodonError {
    error: String,
}

/// Map a non-success response to an error, passing successes through.
pub async fn check_response(
    response: Response,
    endpoint: &str,
) -> Result<Response, PlatformError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        return Err(PlatformError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after_secs,
        });
    }

    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.map_err(|e| {
        PlatformError::InvalidResponse(format!(
            "request failed ({}): failed to read response: {}",
            status, e
        ))
    })?;

    if let Ok(xrpc) = serde_json::from_str::<XrpcError>(&text) {
        return Err(PlatformError::Xrpc {
            error: xrpc.error,
            message: xrpc.message,
        });
    }
    let message = serde_json::from_str::<MastodonError>(&text)
        .map(|e| e.error)
        .unwrap_or(text);

    Err(PlatformError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Check the response and decode its JSON body.
pub async fn decode_response<T: DeserializeOwned>(
    response: Response,
    endpoint: &str,
) -> Result<T, PlatformError> {
    let response = check_response(response, endpoint).await?;
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetrySettings {
        RetrySettings {
            max_attempts: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors_up_to_limit() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome: Attempted<()> = with_retry(&fast(), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PlatformError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            })
        })
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let outcome: Attempted<()> = with_retry(&fast(), "test", || async {
            Err(PlatformError::Api {
                status: 400,
                message: "bad request".to_string(),
            })
        })
        .await;

        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_success_after_transient_failure() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome = with_retry(&fast(), "test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PlatformError::Api {
                    status: 500,
                    message: "oops".to_string(),
                })
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 2);
    }
}
