//! Request plumbing shared by the REST-backed providers.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ServiceErrorKind;

/// A failed call, classified for retrying.
#[derive(Debug)]
pub(crate) struct CallError {
    pub message: String,
    pub kind: ServiceErrorKind,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// A client with `timeout` applied to every request.
pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client, CallError> {
    reqwest::Client::builder().timeout(timeout).build().map_err(|e| CallError {
        message: format!("failed to build HTTP client: {e}"),
        kind: ServiceErrorKind::Permanent,
    })
}

/// Send `request` and decode a JSON success body.
///
/// Non-2xx responses are classified by status; the service's
/// `{"error": {"message": ...}}` body is used as the message when present.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, CallError> {
    let response = request.send().await.map_err(|e| CallError {
        message: format!("request failed: {e}"),
        kind: ServiceErrorKind::from_reqwest(&e),
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail =
            serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
        return Err(CallError {
            message: format!("API returned {status}: {detail}"),
            kind: ServiceErrorKind::from_status(status),
        });
    }

    response.json::<T>().await.map_err(|e| CallError {
        message: format!("failed to parse response: {e}"),
        kind: if e.is_decode() {
            ServiceErrorKind::Permanent
        } else {
            ServiceErrorKind::from_reqwest(&e)
        },
    })
}
