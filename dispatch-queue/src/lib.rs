pub mod adapters;
mod consume;
mod errors;
pub mod in_memory;
mod reporting;
mod shutdown;
mod types;

pub use errors::{ErrorKind, QueueError, SendableError};
pub use reporting::{EventSink, LogSink, NullSink, QueueEvent};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
pub use types::{listener_fn, BackendKind, FnListener, Listener};

use async_trait::async_trait;
use std::convert::Infallible;
use std::sync::Arc;

/// A queue that can carry opaque byte payloads to a listener.
///
/// A handle is bound to one physical queue for its whole life. Only one listen
/// call per handle is supported at a time; `send_bytes` may run alongside it.
#[async_trait]
pub trait Queue: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Enqueue `payload` for delivery.
    async fn send_bytes(&self, payload: &[u8]) -> Result<(), QueueError>;

    /// Deliver messages to `listener` until it fails, the backend fails, or
    /// `shutdown` fires. Returns `Ok(())` only for shutdown.
    ///
    /// Shutdown never interrupts the listener, but it does abandon a receive
    /// that is still waiting. On a polling backend a message the service hands
    /// out during that abandoned receive is never seen here and stays hidden
    /// until its visibility timeout runs out.
    async fn listen_until(
        &self,
        listener: Arc<dyn Listener>,
        shutdown: Shutdown,
    ) -> Result<(), QueueError>;

    /// Deliver messages to `listener` until something fails. Never returns
    /// successfully.
    async fn listen(&self, listener: Arc<dyn Listener>) -> Result<Infallible, QueueError> {
        match self.listen_until(listener, Shutdown::never()).await {
            Ok(()) => Err(QueueError::Internal(
                "listener stopped without a shutdown signal".into(),
            )),
            Err(err) => Err(err),
        }
    }
}

/// A queue whose pending messages can be discarded.
#[async_trait]
pub trait PersistentQueue: Queue {
    /// Drop every message not yet delivered. Succeeds on an empty queue.
    async fn purge(&self) -> Result<(), QueueError>;
}
