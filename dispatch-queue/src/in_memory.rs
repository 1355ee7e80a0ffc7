//! In-process stand-ins for the broker and the hosted queue. They follow the
//! same delivery rules as the real services closely enough to exercise the
//! adapters without a network.

mod broker;
mod sqs;

pub use broker::{InMemoryBroker, InMemorySession, StoredMessage};
pub use sqs::{InMemorySqs, InMemorySqsConfig};
