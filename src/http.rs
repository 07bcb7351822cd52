//! Shared HTTP plumbing for the remote embedding and generation providers.

use std::time::Duration;

use agentic_rag_core::{ServiceError, ServiceErrorKind};

/// Build a client whose own timeout sits slightly above the agents'
/// per-call timeout, so the agent timeout is the one that fires.
pub fn client(timeout: Duration) -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .timeout(timeout + Duration::from_secs(5))
        .build()
        .map_err(|e| ServiceError::new(ServiceErrorKind::Unavailable, e.to_string()))
}

/// Classify a non-success HTTP status.
pub fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> ServiceError {
    let kind = if status.as_u16() == 429 {
        ServiceErrorKind::RateLimited
    } else if status.is_server_error() {
        ServiceErrorKind::Unavailable
    } else {
        ServiceErrorKind::BadResponse
    };
    ServiceError::new(kind, format!("{} API error {}: {}", provider, status, body))
}

/// Classify a transport-level failure.
pub fn transport_error(provider: &str, err: reqwest::Error) -> ServiceError {
    let kind = if err.is_timeout() {
        ServiceErrorKind::Timeout
    } else {
        ServiceErrorKind::Unavailable
    };
    ServiceError::new(kind, format!("{} request failed: {}", provider, err))
}

/// POST a JSON body and return the decoded JSON response.
pub async fn post_json(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> Result<serde_json::Value, ServiceError> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(status_error(provider, status, &text));
    }

    response.json().await.map_err(|e| {
        ServiceError::new(
            ServiceErrorKind::BadResponse,
            format!("{} returned invalid JSON: {}", provider, e),
        )
    })
}

pub fn bad_response(provider: &str, what: &str) -> ServiceError {
    ServiceError::new(
        ServiceErrorKind::BadResponse,
        format!("Invalid {} response: {}", provider, what),
    )
}
