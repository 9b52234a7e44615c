//! JSON-over-HTTP with retry for provider calls.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, RequestBuilder, StatusCode};

use canon_core::error::{CanonError, CanonResult};

/// Retry policy for provider calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
enum CallError {
    /// Network failure, 429 or 5xx. Worth another try.
    Transient(String),
    Permanent(String),
}

impl CallError {
    fn message(self) -> String {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

pub(crate) fn build_client() -> CanonResult<Client> {
    Client::builder()
        .build()
        .map_err(|e| CanonError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Send the request `build` produces, retrying transient failures, and
/// return the body of the first successful response.
///
/// `extract_error` turns an error body into a readable message.
pub(crate) async fn send_with_retry<B>(
    provider: &'static str,
    policy: RetryPolicy,
    build: B,
    extract_error: fn(&str) -> Option<String>,
) -> CanonResult<String>
where
    B: Fn() -> RequestBuilder,
{
    let send_once = || async {
        let response = build()
            .send()
            .await
            .map_err(|e| CallError::Transient(format!("{} request failed: {}", provider, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::Transient(format!("{} body unreadable: {}", provider, e)))?;

        if status.is_success() {
            return Ok(body);
        }
        let message = format!(
            "{} API error ({}): {}",
            provider,
            status,
            extract_error(&body).unwrap_or(body)
        );
        if is_transient_status(status) {
            Err(CallError::Transient(message))
        } else {
            Err(CallError::Permanent(message))
        }
    };

    send_once
        .retry(
            ExponentialBuilder::default()
                .with_max_times(policy.max_retries)
                .with_min_delay(policy.initial_delay)
                .with_max_delay(policy.max_delay),
        )
        .when(|e| matches!(e, CallError::Transient(_)))
        .notify(|err, dur| {
            tracing::warn!("{} call failed, retrying in {:?}: {:?}", provider, dur, err);
        })
        .await
        .map_err(|e| CanonError::oracle(e.message()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_oracle_error() {
        let client = build_client().unwrap();
        let err = send_with_retry(
            "test",
            RetryPolicy::none(),
            || client.post("http://127.0.0.1:9/unreachable").body("{}"),
            |_| None,
        )
        .await
        .unwrap_err();

        assert!(err.is_transient_collaborator());
        assert!(err.to_string().contains("test request failed"));
    }
}
