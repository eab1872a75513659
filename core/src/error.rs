use thiserror::Error;

/// Broad class of a failed collaborator call, derived from the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Auth,
    RateLimited,
    Client,
    Network,
    Internal,
}

/// Failure reported by a REST or transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("api call failed ({status:?}): {message}")]
pub struct ApiError {
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A failure with no HTTP response (connection refused, timeout, offline).
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    pub fn kind(&self) -> ApiErrorKind {
        match self.status {
            None => ApiErrorKind::Network,
            Some(401 | 403) => ApiErrorKind::Auth,
            Some(408 | 429) => ApiErrorKind::RateLimited,
            Some(400..=499) => ApiErrorKind::Client,
            Some(500..=599) => ApiErrorKind::Network,
            Some(_) => ApiErrorKind::Internal,
        }
    }

    /// Whether repeating the same call can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ApiErrorKind::Network | ApiErrorKind::RateLimited)
    }
}

#[derive(Debug, Error)]
pub enum InboxError {
    /// Rejected before any network call.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("malformed '{event}' event: {reason}")]
    MalformedEvent { event: String, reason: String },
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("messaging runtime has shut down")]
    Shutdown,
}

impl InboxError {
    pub fn malformed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            event: event.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InboxError>;
