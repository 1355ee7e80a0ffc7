//! Pull-delivery backend for SQS-style hosted queues.
//!
//! Bodies travel as base64 text. There is no negative acknowledgment: a message
//! the listener fails on is simply not deleted and comes back once the
//! queue's visibility timeout runs out.
//!
//! Stopping a listener mid long-poll drops the pending receive. Whatever the
//! service returned to it is redelivered after the visibility timeout, so keep
//! `wait_time` short where prompt redelivery after shutdown matters.

use crate::consume::{self, ConsumeContext, DeliverySource};
use crate::types::Delivery;
use crate::{
    BackendKind, EventSink, Listener, LogSink, PersistentQueue, Queue, QueueError, QueueEvent,
    Shutdown,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub const MAX_MESSAGES_PER_RECEIVE: i32 = 1;
/// Longest long-poll the service accepts.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqsMessage {
    pub body: Option<String>,
    pub receipt_handle: Option<String>,
}

/// A resolved queue: calls go to `url`, errors name `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAddress {
    pub name: String,
    pub url: String,
}

#[async_trait]
pub trait SqsApi: Clone + Send + Sync + 'static {
    /// Resolve a queue name to its URL; `QueueError::NotFound` if it does not exist.
    async fn queue_url(&self, queue_name: &str) -> Result<String, QueueError>;

    async fn send_message(&self, queue: &QueueAddress, body: String) -> Result<(), QueueError>;

    async fn receive_messages(
        &self,
        queue: &QueueAddress,
        max: i32,
        wait: Duration,
    ) -> Result<Vec<SqsMessage>, QueueError>;

    async fn delete_message(
        &self,
        queue: &QueueAddress,
        receipt_handle: &str,
    ) -> Result<(), QueueError>;

    async fn purge_queue(&self, queue: &QueueAddress) -> Result<(), QueueError>;
}

pub fn encode_body(payload: &[u8]) -> String {
    BASE64_STANDARD.encode(payload)
}

pub fn decode_body(body: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_STANDARD.decode(body)
}

#[derive(Debug, Clone)]
pub struct SqsQueueConfig {
    pub name: String,
    pub wait_time: Duration,
}

impl SqsQueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wait_time: DEFAULT_WAIT_TIME,
        }
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }
}

pub struct SqsQueue<C: SqsApi> {
    client: C,
    config: SqsQueueConfig,
    address: QueueAddress,
    sink: Arc<dyn EventSink>,
}

impl<C: SqsApi> SqsQueue<C> {
    /// Looks the queue up by name; fails with `QueueError::NotFound` if it is missing.
    pub async fn connect(client: C, config: SqsQueueConfig) -> Result<Self, QueueError> {
        Self::connect_with_sink(client, config, Arc::new(LogSink)).await
    }

    pub async fn connect_with_sink(
        client: C,
        config: SqsQueueConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, QueueError> {
        let url = client.queue_url(&config.name).await?;
        sink.record(&QueueEvent::Declared {
            queue: &config.name,
            backend: BackendKind::Sqs,
        });
        let address = QueueAddress {
            name: config.name.clone(),
            url,
        };
        Ok(Self {
            client,
            config,
            address,
            sink,
        })
    }

    pub fn queue_url(&self) -> &str {
        &self.address.url
    }

    pub fn address(&self) -> &QueueAddress {
        &self.address
    }
}

#[async_trait]
impl<C: SqsApi> Queue for SqsQueue<C> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Sqs
    }

    async fn send_bytes(&self, payload: &[u8]) -> Result<(), QueueError> {
        let result = self
            .client
            .send_message(&self.address, encode_body(payload))
            .await;
        match &result {
            Ok(()) => self.sink.record(&QueueEvent::Sent {
                queue: &self.config.name,
                bytes: payload.len(),
            }),
            Err(error) => self.sink.record(&QueueEvent::SendFailed {
                queue: &self.config.name,
                error,
            }),
        }
        result
    }

    async fn listen_until(
        &self,
        listener: Arc<dyn Listener>,
        shutdown: Shutdown,
    ) -> Result<(), QueueError> {
        self.sink.record(&QueueEvent::ListenStarted {
            queue: &self.config.name,
            backend: BackendKind::Sqs,
        });

        let source = PollingSource {
            client: self.client.clone(),
            address: self.address.clone(),
            wait_time: self.config.wait_time,
            received: VecDeque::new(),
        };
        consume::run(
            source,
            ConsumeContext {
                queue: self.config.name.clone(),
                listener,
                shutdown,
                sink: Arc::clone(&self.sink),
            },
        )
        .await
    }
}

#[async_trait]
impl<C: SqsApi> PersistentQueue for SqsQueue<C> {
    /// May fail with `QueueError::RateLimited` when purges are requested too often.
    async fn purge(&self) -> Result<(), QueueError> {
        self.client.purge_queue(&self.address).await?;
        self.sink.record(&QueueEvent::Purged {
            queue: &self.config.name,
        });
        Ok(())
    }
}

struct PollingSource<C> {
    client: C,
    address: QueueAddress,
    wait_time: Duration,
    received: VecDeque<SqsMessage>,
}

#[async_trait]
impl<C: SqsApi> DeliverySource for PollingSource<C> {
    type Receipt = String;

    fn supports_negative_ack(&self) -> bool {
        false
    }

    async fn next(&mut self) -> Result<Option<Delivery<String>>, QueueError> {
        if self.received.is_empty() {
            let messages = self
                .client
                .receive_messages(&self.address, MAX_MESSAGES_PER_RECEIVE, self.wait_time)
                .await?;
            self.received.extend(messages);
        }

        let Some(message) = self.received.pop_front() else {
            return Ok(None);
        };
        // Bodiless messages carry nothing to hand to the listener.
        let Some(body) = message.body else {
            return Ok(None);
        };
        let payload = decode_body(&body).map_err(|source| QueueError::Decode {
            queue: self.address.name.clone(),
            source,
        })?;
        let receipt = message.receipt_handle.ok_or_else(|| QueueError::Receive {
            queue: self.address.name.clone(),
            message: "message has no receipt handle".into(),
        })?;

        Ok(Some(Delivery { payload, receipt }))
    }

    async fn acknowledge(&mut self, receipt: String) -> Result<(), QueueError> {
        self.client.delete_message(&self.address, &receipt).await
    }

    async fn reject(&mut self, _receipt: String) -> Result<(), QueueError> {
        Ok(())
    }
}

/// SQS client backed by the AWS SDK.
#[cfg(feature = "sqs")]
pub mod real {
    use super::{QueueAddress, SqsApi, SqsMessage};
    use crate::QueueError;
    use async_trait::async_trait;
    use aws_config::meta::region::RegionProviderChain;
    use aws_config::BehaviorVersion;
    use aws_sdk_sqs::config::Region;
    use aws_sdk_sqs::error::DisplayErrorContext;
    use aws_sdk_sqs::Client;
    use std::time::Duration;

    const MAX_WAIT_SECONDS: u64 = 20;

    #[derive(Clone)]
    pub struct AwsSqsApi {
        inner: Client,
    }

    impl AwsSqsApi {
        pub fn new(inner: Client) -> Self {
            Self { inner }
        }

        /// Builds a client from the default credential chain, falling back to
        /// `us-east-1` when no region is configured anywhere.
        pub async fn from_env(region: Option<String>) -> Self {
            let region_provider = RegionProviderChain::first_try(region.map(Region::new))
                .or_default_provider()
                .or_else("us-east-1");

            let shared_config = aws_config::defaults(BehaviorVersion::v2025_08_07())
                .region(region_provider)
                .load()
                .await;

            Self::new(Client::new(&shared_config))
        }
    }

    #[async_trait]
    impl SqsApi for AwsSqsApi {
        async fn queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
            let output = self
                .inner
                .get_queue_url()
                .queue_name(queue_name)
                .send()
                .await
                .map_err(|err| {
                    let message = DisplayErrorContext(&err).to_string();
                    if err.into_service_error().is_queue_does_not_exist() {
                        QueueError::NotFound(queue_name.to_string())
                    } else {
                        QueueError::Declare {
                            queue: queue_name.to_string(),
                            message,
                        }
                    }
                })?;

            output
                .queue_url
                .ok_or_else(|| QueueError::NotFound(queue_name.to_string()))
        }

        async fn send_message(&self, queue: &QueueAddress, body: String) -> Result<(), QueueError> {
            self.inner
                .send_message()
                .queue_url(&queue.url)
                .message_body(body)
                .send()
                .await
                .map_err(|err| QueueError::Publish {
                    queue: queue.name.clone(),
                    message: DisplayErrorContext(&err).to_string(),
                })?;
            Ok(())
        }

        async fn receive_messages(
            &self,
            queue: &QueueAddress,
            max: i32,
            wait: Duration,
        ) -> Result<Vec<SqsMessage>, QueueError> {
            let output = self
                .inner
                .receive_message()
                .queue_url(&queue.url)
                .max_number_of_messages(max)
                .wait_time_seconds(wait.as_secs().min(MAX_WAIT_SECONDS) as i32)
                .send()
                .await
                .map_err(|err| QueueError::Receive {
                    queue: queue.name.clone(),
                    message: DisplayErrorContext(&err).to_string(),
                })?;

            Ok(output
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|message| SqsMessage {
                    body: message.body,
                    receipt_handle: message.receipt_handle,
                })
                .collect())
        }

        async fn delete_message(
            &self,
            queue: &QueueAddress,
            receipt_handle: &str,
        ) -> Result<(), QueueError> {
            self.inner
                .delete_message()
                .queue_url(&queue.url)
                .receipt_handle(receipt_handle)
                .send()
                .await
                .map_err(|err| QueueError::Delete {
                    queue: queue.name.clone(),
                    message: DisplayErrorContext(&err).to_string(),
                })?;
            Ok(())
        }

        async fn purge_queue(&self, queue: &QueueAddress) -> Result<(), QueueError> {
            self.inner
                .purge_queue()
                .queue_url(&queue.url)
                .send()
                .await
                .map_err(|err| {
                    let message = DisplayErrorContext(&err).to_string();
                    if err.into_service_error().is_purge_queue_in_progress() {
                        QueueError::RateLimited(queue.name.clone())
                    } else {
                        QueueError::Purge {
                            queue: queue.name.clone(),
                            message,
                        }
                    }
                })?;
            Ok(())
        }
    }

}
