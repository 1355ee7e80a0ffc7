use crate::{BackendKind, QueueError};
use log::{error, info, warn};

/// Something worth reporting that happened on a queue.
#[derive(Debug)]
pub enum QueueEvent<'a> {
    Declared { queue: &'a str, backend: BackendKind },
    Sent { queue: &'a str, bytes: usize },
    SendFailed { queue: &'a str, error: &'a QueueError },
    ListenStarted { queue: &'a str, backend: BackendKind },
    Received { queue: &'a str },
    Acknowledged { queue: &'a str },
    Requeued { queue: &'a str },
    LeftUndeleted { queue: &'a str },
    RejectFailed { queue: &'a str, error: &'a QueueError },
    ListenStopped { queue: &'a str, error: Option<&'a QueueError> },
    Purged { queue: &'a str },
}

/// Receiver for [`QueueEvent`]s. Adapters hold one of these instead of
/// logging directly.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &QueueEvent<'_>);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: &QueueEvent<'_>) {
        match event {
            QueueEvent::Declared { queue, backend } => {
                info!("Queue {} ready on {} backend", queue, backend)
            }
            QueueEvent::Sent { queue, bytes } => {
                info!("New message sent to {} ({} bytes)", queue, bytes)
            }
            QueueEvent::SendFailed { queue, error } => {
                error!("Error sending message to {}: {}", queue, error)
            }
            QueueEvent::ListenStarted { queue, backend } => {
                info!("Listening on {} ({})", queue, backend)
            }
            QueueEvent::Received { queue } => info!("New message received on {}", queue),
            QueueEvent::Acknowledged { queue } => info!("Message on {} acknowledged", queue),
            QueueEvent::Requeued { queue } => warn!("Message on {} rejected and requeued", queue),
            QueueEvent::LeftUndeleted { queue } => {
                warn!("Message on {} left for redelivery after visibility timeout", queue)
            }
            QueueEvent::RejectFailed { queue, error } => {
                error!("Unable to requeue message on {}: {}", queue, error)
            }
            QueueEvent::ListenStopped { queue, error: Some(error) } => {
                error!("Error while processing messages on {}: {}", queue, error)
            }
            QueueEvent::ListenStopped { queue, error: None } => {
                info!("Listener on {} shut down", queue)
            }
            QueueEvent::Purged { queue } => info!("Queue {} purged", queue),
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _event: &QueueEvent<'_>) {}
}
