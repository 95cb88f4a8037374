use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Business-level failure reported inside a response envelope.
///
/// The message is whatever the server sent and is surfaced to the user
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("server rejected the request (code {code}): {message}")]
pub struct ApiError {
    pub code: i64,
    pub message: String,
}

impl ApiError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
