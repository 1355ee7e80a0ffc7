use dispatch_queue::QueueError;
use dispatch_utilities::SendableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("a queue name is required")]
    MissingQueue,

    #[error("failed to read payload: {0}")]
    Payload(#[from] std::io::Error),

    #[error("start-up failed: {0}")]
    Startup(SendableError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
