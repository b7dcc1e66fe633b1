//! Errors from the model client.
//!
//! Every variant names the endpoint or the reason, so a failed turn can be
//! reported to the user with the message alone.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    /// Could not reach the model endpoint.
    #[error("cannot reach model at {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("model at {endpoint} did not answer within {duration_secs}s")]
    Timeout { endpoint: String, duration_secs: u64 },

    /// Non-2xx status. `body` is the response text, possibly shortened.
    #[error("model endpoint returned HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The reply body or one of its SSE chunks could not be decoded.
    #[error("malformed model response: {reason}")]
    StreamError { reason: String },

    #[error("model config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// Classify a `reqwest` failure for a request to `endpoint`.
    pub(crate) fn from_reqwest(endpoint: &str, timeout_secs: u64, err: reqwest::Error) -> Self {
        let endpoint = endpoint.to_string();
        if err.is_timeout() {
            Self::Timeout {
                endpoint,
                duration_secs: timeout_secs,
            }
        } else {
            Self::ConnectionFailed {
                endpoint,
                reason: err.to_string(),
            }
        }
    }
}
