use crate::types::{Delivery, DeliveryOutcome};
use crate::{EventSink, Listener, QueueError, QueueEvent, Shutdown};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Pause after a poll cycle that produced nothing, so a zero long-poll wait
/// does not turn into a busy loop.
pub(crate) const EMPTY_CYCLE_PAUSE: Duration = Duration::from_millis(50);

/// Backend side of a listen call: yields deliveries and settles them.
#[async_trait]
pub(crate) trait DeliverySource: Send + 'static {
    type Receipt: Send + 'static;

    fn supports_negative_ack(&self) -> bool;

    /// Next delivery, or `None` when a poll cycle came back empty.
    async fn next(&mut self) -> Result<Option<Delivery<Self::Receipt>>, QueueError>;

    async fn acknowledge(&mut self, receipt: Self::Receipt) -> Result<(), QueueError>;

    async fn reject(&mut self, receipt: Self::Receipt) -> Result<(), QueueError>;

    async fn close(&mut self) {}
}

pub(crate) struct ConsumeContext {
    pub queue: String,
    pub listener: Arc<dyn Listener>,
    pub shutdown: Shutdown,
    pub sink: Arc<dyn EventSink>,
}

/// Runs the consume loop on its own task and waits for the single result it
/// reports: the first error, or `Ok(())` after shutdown.
pub(crate) async fn run<S>(mut source: S, mut ctx: ConsumeContext) -> Result<(), QueueError>
where
    S: DeliverySource,
{
    let (report, outcome) = oneshot::channel();

    tokio::spawn(async move {
        let result = consume(&mut source, &mut ctx).await;
        source.close().await;
        ctx.sink.record(&QueueEvent::ListenStopped {
            queue: &ctx.queue,
            error: result.as_ref().err(),
        });
        let _ = report.send(result);
    });

    match outcome.await {
        Ok(result) => result,
        Err(_) => Err(QueueError::Internal(
            "consumer task stopped without reporting a result".into(),
        )),
    }
}

async fn consume<S>(source: &mut S, ctx: &mut ConsumeContext) -> Result<(), QueueError>
where
    S: DeliverySource,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.shutdown.triggered() => return Ok(()),
            next = source.next() => next?,
        };

        let Some(delivery) = next else {
            tokio::select! {
                biased;
                _ = ctx.shutdown.triggered() => return Ok(()),
                _ = tokio::time::sleep(EMPTY_CYCLE_PAUSE) => {}
            }
            continue;
        };
        ctx.sink.record(&QueueEvent::Received { queue: &ctx.queue });

        let result = ctx.listener.on_message(&delivery.payload).await;
        match DeliveryOutcome::decide(result.is_ok(), source.supports_negative_ack()) {
            DeliveryOutcome::Acknowledge => {
                source.acknowledge(delivery.receipt).await?;
                ctx.sink.record(&QueueEvent::Acknowledged { queue: &ctx.queue });
            }
            DeliveryOutcome::RejectRequeue => match source.reject(delivery.receipt).await {
                Ok(()) => ctx.sink.record(&QueueEvent::Requeued { queue: &ctx.queue }),
                Err(err) => ctx.sink.record(&QueueEvent::RejectFailed {
                    queue: &ctx.queue,
                    error: &err,
                }),
            },
            DeliveryOutcome::LeaveUndeleted => {
                ctx.sink.record(&QueueEvent::LeftUndeleted { queue: &ctx.queue })
            }
        }

        if let Err(err) = result {
            return Err(QueueError::Handler {
                queue: ctx.queue.clone(),
                source: err,
            });
        }
    }
}
