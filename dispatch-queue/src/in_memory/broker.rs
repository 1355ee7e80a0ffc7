use crate::adapters::amqp::{AmqpDelivery, AmqpSession, AmqpTransport, PublishProperties};
use crate::QueueError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub body: Vec<u8>,
    pub properties: PublishProperties,
    pub redelivered: bool,
}

struct Unacked {
    session: u64,
    queue: String,
    message: StoredMessage,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    unacked: HashMap<u64, Unacked>,
    next_delivery_tag: u64,
    next_session: u64,
    open_sessions: usize,
    consumer_generation: u64,
    refuse_connections: bool,
    fail_acks: bool,
    fail_rejects: bool,
}

impl BrokerState {
    fn unacked_by(&self, session: u64) -> usize {
        self.unacked
            .values()
            .filter(|unacked| unacked.session == session)
            .count()
    }

    fn requeue(&mut self, unacked: Unacked) {
        let mut message = unacked.message;
        message.redelivered = true;
        if let Some(queue) = self.queues.get_mut(&unacked.queue) {
            queue.push_front(message);
        }
    }

    /// Puts everything a session still holds back at the head of its queue,
    /// oldest first.
    fn requeue_session(&mut self, session: u64) {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, unacked)| unacked.session == session)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();
        for tag in tags.into_iter().rev() {
            if let Some(unacked) = self.unacked.remove(&tag) {
                self.requeue(unacked);
            }
        }
    }
}

/// Broker living in process memory, reachable through [`AmqpTransport`].
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, opening a session fails with `QueueError::Connection`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// While set, every ack fails with `QueueError::Ack`.
    pub fn fail_acks(&self, fail: bool) {
        self.state.lock().fail_acks = fail;
    }

    /// While set, every reject fails with `QueueError::Reject` and the
    /// delivery stays with its session.
    pub fn fail_rejects(&self, fail: bool) {
        self.state.lock().fail_rejects = fail;
    }

    /// Ends every active subscription, the way a broker restart would.
    pub fn close_consumers(&self) {
        self.state.lock().consumer_generation += 1;
        self.notify.notify_waiters();
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.state.lock().queues.contains_key(queue)
    }

    /// Messages waiting for delivery, head first.
    pub fn ready_messages(&self, queue: &str) -> Vec<StoredMessage> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ready_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or_default()
    }

    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().open_sessions
    }
}

#[async_trait]
impl AmqpTransport for InMemoryBroker {
    type Session = InMemorySession;

    async fn open(&self) -> Result<InMemorySession, QueueError> {
        let mut guard = self.state.lock();
        if guard.refuse_connections {
            return Err(QueueError::Connection("connection refused".into()));
        }
        guard.next_session += 1;
        guard.open_sessions += 1;

        Ok(InMemorySession {
            broker: self.clone(),
            id: guard.next_session,
            prefetch: 0,
            subscription: None,
            closed: false,
        })
    }
}

struct Subscription {
    queue: String,
    generation: u64,
}

pub struct InMemorySession {
    broker: InMemoryBroker,
    id: u64,
    prefetch: u16,
    subscription: Option<Subscription>,
    closed: bool,
}

impl InMemorySession {
    fn subscribed_queue(&self) -> String {
        self.subscription
            .as_ref()
            .map(|subscription| subscription.queue.clone())
            .unwrap_or_default()
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut guard = self.broker.state.lock();
            guard.requeue_session(self.id);
            guard.open_sessions -= 1;
        }
        self.broker.notify.notify_waiters();
    }

    fn settle(&self, delivery_tag: u64) -> Result<Unacked, String> {
        let mut guard = self.broker.state.lock();
        match guard.unacked.get(&delivery_tag) {
            Some(unacked) if unacked.session == self.id => {}
            _ => {
                return Err(format!(
                    "PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"
                ))
            }
        }
        guard
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| format!("delivery tag {delivery_tag} vanished"))
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

fn no_queue(queue: &str) -> String {
    format!("NOT_FOUND - no queue '{queue}'")
}

#[async_trait]
impl AmqpSession for InMemorySession {
    async fn declare_durable(&mut self, queue: &str) -> Result<(), QueueError> {
        self.broker
            .state
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<(), QueueError> {
        self.prefetch = count;
        Ok(())
    }

    async fn publish(
        &mut self,
        queue: &str,
        body: &[u8],
        properties: &PublishProperties,
    ) -> Result<(), QueueError> {
        {
            let mut guard = self.broker.state.lock();
            let messages = guard
                .queues
                .get_mut(queue)
                .ok_or_else(|| QueueError::Publish {
                    queue: queue.to_string(),
                    message: no_queue(queue),
                })?;
            messages.push_back(StoredMessage {
                body: body.to_vec(),
                properties: properties.clone(),
                redelivered: false,
            });
        }
        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn purge(&mut self, queue: &str) -> Result<u32, QueueError> {
        let mut guard = self.broker.state.lock();
        let messages = guard
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::Purge {
                queue: queue.to_string(),
                message: no_queue(queue),
            })?;
        let purged = messages.len() as u32;
        messages.clear();
        Ok(purged)
    }

    async fn consume(&mut self, queue: &str) -> Result<(), QueueError> {
        let guard = self.broker.state.lock();
        if !guard.queues.contains_key(queue) {
            return Err(QueueError::Declare {
                queue: queue.to_string(),
                message: no_queue(queue),
            });
        }
        self.subscription = Some(Subscription {
            queue: queue.to_string(),
            generation: guard.consumer_generation,
        });
        Ok(())
    }

    async fn next_delivery(&mut self) -> Option<Result<AmqpDelivery, QueueError>> {
        let (queue, generation) = self
            .subscription
            .as_ref()
            .map(|subscription| (subscription.queue.clone(), subscription.generation))?;
        let notify = Arc::clone(&self.broker.notify);

        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut guard = self.broker.state.lock();
                if guard.consumer_generation != generation {
                    return None;
                }

                let has_credit =
                    self.prefetch == 0 || guard.unacked_by(self.id) < usize::from(self.prefetch);
                if has_credit {
                    if let Some(message) = guard.queues.get_mut(&queue).and_then(VecDeque::pop_front)
                    {
                        guard.next_delivery_tag += 1;
                        let delivery_tag = guard.next_delivery_tag;
                        let body = message.body.clone();
                        guard.unacked.insert(
                            delivery_tag,
                            Unacked {
                                session: self.id,
                                queue: queue.clone(),
                                message,
                            },
                        );
                        return Some(Ok(AmqpDelivery { delivery_tag, body }));
                    }
                }
            }

            notified.await;
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), QueueError> {
        let queue = self.subscribed_queue();
        if self.broker.state.lock().fail_acks {
            return Err(QueueError::Ack {
                queue,
                message: "channel closed".into(),
            });
        }
        self.settle(delivery_tag)
            .map(|_| ())
            .map_err(|message| QueueError::Ack { queue, message })
    }

    async fn reject(&mut self, delivery_tag: u64, requeue: bool) -> Result<(), QueueError> {
        if self.broker.state.lock().fail_rejects {
            return Err(QueueError::Reject {
                queue: self.subscribed_queue(),
                message: "channel closed".into(),
            });
        }
        let unacked = self.settle(delivery_tag).map_err(|message| QueueError::Reject {
            queue: self.subscribed_queue(),
            message,
        })?;
        if requeue {
            self.broker.state.lock().requeue(unacked);
            self.broker.notify.notify_waiters();
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.release();
    }
}
