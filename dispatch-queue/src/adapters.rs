pub mod amqp;
pub mod sqs;

pub use amqp::{AmqpQueue, AmqpQueueConfig};
pub use sqs::{SqsQueue, SqsQueueConfig};
