//! Mapping of HTTP transport and status failures onto [`ErrorKind`].
//!
//! Both REST adapters route every response through these helpers so that no
//! raw `reqwest` or serde error ever reaches the coordinator.

use crate::swap_client::{ErrorKind, SwapClientError};
use reqwest::{Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

pub fn classify_transport(error: reqwest::Error) -> SwapClientError {
    let kind = if error.is_timeout() {
        ErrorKind::Timeout
    } else if error.is_connect() {
        ErrorKind::ConnectionRefused
    } else if error.is_request() || error.is_body() {
        ErrorKind::ConnectionReset
    } else {
        ErrorKind::Unexpected
    };

    SwapClientError::new(kind, error.to_string())
}

pub fn classify_status(status: StatusCode, message: &str) -> SwapClientError {
    let kind = match status.as_u16() {
        402 => ErrorKind::InsufficientBalance,
        408 => ErrorKind::Timeout,
        409 => ErrorKind::Conflict,
        500 => ErrorKind::ServerError,
        _ => ErrorKind::Unexpected,
    };

    let message = match kind {
        ErrorKind::Conflict => message.to_owned(),
        _ if message.is_empty() => format!("backend responded with status {}", status),
        _ => format!("backend responded with status {}: {}", status, message),
    };

    SwapClientError::new(kind, message)
}

pub fn is_success(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 201 | 204)
}

/// Passes successful responses through and classifies everything else,
/// preferring the `message` (or `error`) field of a JSON error body.
pub async fn check_status(response: Response) -> Result<Response, SwapClientError> {
    let status = response.status();
    if is_success(status) {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|body| body.message.or(body.error))
        .unwrap_or(body);

    tracing::debug!(%status, %message, "backend request failed");

    Err(classify_status(status, &message))
}

/// Decodes a JSON body; a body that does not match `T` is reported as
/// `malformed`.
pub async fn json<T: DeserializeOwned>(
    response: Response,
    malformed: ErrorKind,
) -> Result<T, SwapClientError> {
    let bytes = response.bytes().await.map_err(classify_transport)?;

    serde_json::from_slice(&bytes).map_err(|e| {
        SwapClientError::new(malformed, format!("malformed response body: {}", e))
    })
}
