use crate::adapters::sqs::{QueueAddress, SqsApi, SqsMessage};
use crate::QueueError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

const URL_PREFIX: &str = "memory://";

#[derive(Debug, Clone)]
pub struct InMemorySqsConfig {
    /// How long a received message stays hidden before it can be received again.
    pub visibility_timeout: Duration,
    /// Minimum spacing between purges of one queue; zero disables the limit.
    pub purge_cooldown: Duration,
}

impl Default for InMemorySqsConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            purge_cooldown: Duration::ZERO,
        }
    }
}

impl InMemorySqsConfig {
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_purge_cooldown(mut self, cooldown: Duration) -> Self {
        self.purge_cooldown = cooldown;
        self
    }
}

struct HostedMessage {
    body: String,
    receipt_handle: Option<String>,
    visible_at: Instant,
    receive_count: u32,
}

#[derive(Default)]
struct HostedQueue {
    messages: Vec<HostedMessage>,
    last_purge: Option<Instant>,
}

#[derive(Default)]
struct SqsState {
    queues: HashMap<String, HostedQueue>,
    fail_deletes: bool,
}

/// Hosted queue service living in process memory, reachable through [`SqsApi`].
#[derive(Clone, Default)]
pub struct InMemorySqs {
    state: Arc<Mutex<SqsState>>,
    notify: Arc<Notify>,
    config: InMemorySqsConfig,
}

impl InMemorySqs {
    pub fn new(config: InMemorySqsConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Creates the queue if needed and returns its address.
    pub fn create_queue(&self, name: &str) -> QueueAddress {
        let url = format!("{URL_PREFIX}{name}");
        self.state.lock().queues.entry(url.clone()).or_default();
        QueueAddress {
            name: name.to_string(),
            url,
        }
    }

    /// Stores `body` verbatim, bypassing the adapter's encoding.
    pub fn push_raw_body(&self, name: &str, body: impl Into<String>) {
        let url = format!("{URL_PREFIX}{name}");
        if let Some(queue) = self.state.lock().queues.get_mut(&url) {
            queue.messages.push(HostedMessage {
                body: body.into(),
                receipt_handle: None,
                visible_at: Instant::now(),
                receive_count: 0,
            });
        }
        self.notify.notify_waiters();
    }

    /// While set, every delete fails with `QueueError::Delete`.
    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().fail_deletes = fail;
    }

    /// Messages currently stored, visible or not.
    pub fn message_count(&self, name: &str) -> usize {
        self.with_queue(name, |queue| queue.messages.len())
    }

    pub fn visible_count(&self, name: &str) -> usize {
        let now = Instant::now();
        self.with_queue(name, |queue| {
            queue
                .messages
                .iter()
                .filter(|message| message.visible_at <= now)
                .count()
        })
    }

    /// Highest number of times any stored message has been received.
    pub fn max_receive_count(&self, name: &str) -> u32 {
        self.with_queue(name, |queue| {
            queue
                .messages
                .iter()
                .map(|message| message.receive_count)
                .max()
                .unwrap_or_default()
        })
    }

    fn with_queue<T: Default>(&self, name: &str, f: impl FnOnce(&HostedQueue) -> T) -> T {
        let url = format!("{URL_PREFIX}{name}");
        self.state.lock().queues.get(&url).map(f).unwrap_or_default()
    }

    /// Marks up to `max` visible messages as received. `Err` carries the
    /// earliest instant at which a hidden message becomes visible again.
    fn take_visible(&self, queue_url: &str, max: usize) -> Result<Vec<SqsMessage>, Option<Instant>> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let Some(queue) = guard.queues.get_mut(queue_url) else {
            return Ok(Vec::new());
        };

        let mut taken = Vec::new();
        for message in queue.messages.iter_mut() {
            if taken.len() >= max {
                break;
            }
            if message.visible_at > now {
                continue;
            }
            let receipt = Uuid::new_v4().to_string();
            message.receipt_handle = Some(receipt.clone());
            message.visible_at = now + self.config.visibility_timeout;
            message.receive_count += 1;
            taken.push(SqsMessage {
                body: Some(message.body.clone()),
                receipt_handle: Some(receipt),
            });
        }

        if taken.is_empty() {
            Err(queue.messages.iter().map(|message| message.visible_at).min())
        } else {
            Ok(taken)
        }
    }

    fn missing(queue: &QueueAddress) -> String {
        format!("AWS.SimpleQueueService.NonExistentQueue: {}", queue.url)
    }
}

#[async_trait]
impl SqsApi for InMemorySqs {
    async fn queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        let url = format!("{URL_PREFIX}{queue_name}");
        if self.state.lock().queues.contains_key(&url) {
            Ok(url)
        } else {
            Err(QueueError::NotFound(queue_name.to_string()))
        }
    }

    async fn send_message(&self, queue: &QueueAddress, body: String) -> Result<(), QueueError> {
        {
            let mut guard = self.state.lock();
            let hosted = guard
                .queues
                .get_mut(&queue.url)
                .ok_or_else(|| QueueError::Publish {
                    queue: queue.name.clone(),
                    message: Self::missing(queue),
                })?;
            hosted.messages.push(HostedMessage {
                body,
                receipt_handle: None,
                visible_at: Instant::now(),
                receive_count: 0,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive_messages(
        &self,
        queue: &QueueAddress,
        max: i32,
        wait: Duration,
    ) -> Result<Vec<SqsMessage>, QueueError> {
        if !self.state.lock().queues.contains_key(&queue.url) {
            return Err(QueueError::Receive {
                queue: queue.name.clone(),
                message: Self::missing(queue),
            });
        }

        let deadline = Instant::now() + wait;
        let max = usize::try_from(max.max(1)).unwrap_or(1);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = match self.take_visible(&queue.url, max) {
                Ok(messages) => return Ok(messages),
                Err(next_visible) => next_visible.map_or(deadline, |at| at.min(deadline)),
            };
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(
        &self,
        queue: &QueueAddress,
        receipt_handle: &str,
    ) -> Result<(), QueueError> {
        let mut guard = self.state.lock();
        if guard.fail_deletes {
            return Err(QueueError::Delete {
                queue: queue.name.clone(),
                message: "service unavailable".into(),
            });
        }
        let hosted = guard.queues.get_mut(&queue.url).ok_or_else(|| QueueError::Delete {
            queue: queue.name.clone(),
            message: Self::missing(queue),
        })?;

        let position = hosted
            .messages
            .iter()
            .position(|message| message.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| QueueError::Delete {
                queue: queue.name.clone(),
                message: format!("ReceiptHandleIsInvalid: {receipt_handle}"),
            })?;
        hosted.messages.remove(position);
        Ok(())
    }

    async fn purge_queue(&self, queue: &QueueAddress) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let hosted = guard.queues.get_mut(&queue.url).ok_or_else(|| QueueError::Purge {
            queue: queue.name.clone(),
            message: Self::missing(queue),
        })?;

        let cooling_down = hosted
            .last_purge
            .is_some_and(|last| now.duration_since(last) < self.config.purge_cooldown);
        if cooling_down {
            return Err(QueueError::RateLimited(queue.name.clone()));
        }
        hosted.messages.clear();
        hosted.last_purge = Some(now);
        Ok(())
    }
}
