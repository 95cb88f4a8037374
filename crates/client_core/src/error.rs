use reqwest::StatusCode;
use shared::error::ApiError;
use thiserror::Error;

/// Failure taxonomy of the HTTP surface.
///
/// Transport failures are retryable by re-invoking the same operation with
/// the same in-memory state; business errors carry the server message
/// verbatim and are not retried automatically.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("authentication required")]
    Unauthorized,
    #[error("server returned HTTP {status}")]
    Http { status: StatusCode },
    #[error(transparent)]
    Business(#[from] ApiError),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("local storage failure: {0}")]
    Storage(anyhow::Error),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status } => status.is_server_error(),
            _ => false,
        }
    }

    pub(crate) fn from_send(err: reqwest::Error) -> Self {
        Self::Transport(err)
    }
}

impl From<anyhow::Error> for ClientError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}
