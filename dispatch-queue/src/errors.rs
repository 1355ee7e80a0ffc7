use thiserror::Error;

/// Boxed error returned by listeners.
pub type SendableError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("cannot reach backend: {0}")]
    Connection(String),
    #[error("queue setup failed for {queue}: {message}")]
    Declare { queue: String, message: String },
    #[error("queue not found: {0}")]
    NotFound(String),
    #[error("publish to {queue} failed: {message}")]
    Publish { queue: String, message: String },
    #[error("receive from {queue} failed: {message}")]
    Receive { queue: String, message: String },
    #[error("delivery stream for {0} closed")]
    StreamClosed(String),
    #[error("payload on {queue} is not valid base64: {source}")]
    Decode {
        queue: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("ack on {queue} failed: {message}")]
    Ack { queue: String, message: String },
    #[error("reject on {queue} failed: {message}")]
    Reject { queue: String, message: String },
    #[error("delete on {queue} failed: {message}")]
    Delete { queue: String, message: String },
    #[error("listener failed on {queue}: {source}")]
    Handler {
        queue: String,
        #[source]
        source: SendableError,
    },
    #[error("purge of {queue} failed: {message}")]
    Purge { queue: String, message: String },
    #[error("purge of {0} rate limited by backend")]
    RateLimited(String),
    #[error("internal queue error: {0}")]
    Internal(String),
}

/// Fieldless tag for matching on the category of a [`QueueError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Declare,
    NotFound,
    Publish,
    Receive,
    StreamClosed,
    Decode,
    Ack,
    Reject,
    Delete,
    Handler,
    Purge,
    RateLimited,
    Internal,
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Connection(_) => ErrorKind::Connection,
            QueueError::Declare { .. } => ErrorKind::Declare,
            QueueError::NotFound(_) => ErrorKind::NotFound,
            QueueError::Publish { .. } => ErrorKind::Publish,
            QueueError::Receive { .. } => ErrorKind::Receive,
            QueueError::StreamClosed(_) => ErrorKind::StreamClosed,
            QueueError::Decode { .. } => ErrorKind::Decode,
            QueueError::Ack { .. } => ErrorKind::Ack,
            QueueError::Reject { .. } => ErrorKind::Reject,
            QueueError::Delete { .. } => ErrorKind::Delete,
            QueueError::Handler { .. } => ErrorKind::Handler,
            QueueError::Purge { .. } => ErrorKind::Purge,
            QueueError::RateLimited(_) => ErrorKind::RateLimited,
            QueueError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may reasonably retry the same operation later.
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::RateLimited(_) | QueueError::Connection(_))
    }

    /// The listener's own error, when this error came from a listener.
    pub fn handler_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            QueueError::Handler { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
