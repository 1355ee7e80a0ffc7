use crate::SendableError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Callback invoked once per delivered payload.
///
/// Returning an error stops the listen loop and the error is handed back to the
/// caller of `listen`. The listener is never invoked concurrently for one queue.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_message(&self, payload: &[u8]) -> Result<(), SendableError>;
}

/// Adapts a plain closure into a [`Listener`].
pub struct FnListener<F>(F);

#[async_trait]
impl<F> Listener for FnListener<F>
where
    F: Fn(&[u8]) -> Result<(), SendableError> + Send + Sync,
{
    async fn on_message(&self, payload: &[u8]) -> Result<(), SendableError> {
        (self.0)(payload)
    }
}

pub fn listener_fn<F>(f: F) -> Arc<dyn Listener>
where
    F: Fn(&[u8]) -> Result<(), SendableError> + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Push delivery with explicit ack/reject.
    Amqp,
    /// Pull delivery with delete-after-processing.
    Sqs,
}

impl BackendKind {
    pub fn supports_negative_ack(self) -> bool {
        matches!(self, BackendKind::Amqp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Amqp => "amqp",
            BackendKind::Sqs => "sqs",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A received payload together with the backend handle needed to settle it.
pub(crate) struct Delivery<R> {
    pub payload: Vec<u8>,
    pub receipt: R,
}

/// What happens to a delivery once the listener has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    Acknowledge,
    RejectRequeue,
    LeaveUndeleted,
}

impl DeliveryOutcome {
    pub fn decide(handled: bool, supports_negative_ack: bool) -> Self {
        match (handled, supports_negative_ack) {
            (true, _) => DeliveryOutcome::Acknowledge,
            (false, true) => DeliveryOutcome::RejectRequeue,
            (false, false) => DeliveryOutcome::LeaveUndeleted,
        }
    }
}
