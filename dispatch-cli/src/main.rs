mod config;
mod errors;

use std::sync::Arc;

use config::{Action, Backend, Config, PayloadSource, parse_config};
use dispatch_queue::adapters::amqp::real::LapinTransport;
use dispatch_queue::adapters::sqs::real::AwsSqsApi;
use dispatch_queue::adapters::{AmqpQueue, AmqpQueueConfig, SqsQueue, SqsQueueConfig};
use dispatch_queue::{Listener, PersistentQueue, SendableError, listener_fn, shutdown_channel};
use dispatch_utilities::startup;
use errors::CliError;
use log::{error, info, warn};
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let config = parse_config()?;
    startup::startup("Dispatch", config.log_level, config.log_file.as_deref())
        .map_err(CliError::Startup)?;

    let result = run(&config).await;
    if let Err(err) = &result {
        error!("{} on queue '{}' failed: {}", action_name(&config.action), config.queue, err);
    }
    result
}

async fn run(config: &Config) -> Result<(), CliError> {
    let queue = build_queue(config).await?;
    info!("Using {} queue '{}'", queue.kind(), queue.name());

    match &config.action {
        Action::Send(source) => {
            let payload = read_payload(source).await?;
            queue.send_bytes(&payload).await?;
            info!("Sent {} bytes", payload.len());
        }
        Action::Listen { fail_on } => listen(queue, fail_on.clone()).await?,
        Action::Purge => {
            queue.purge().await?;
            info!("Queue '{}' purged", queue.name());
        }
    }
    Ok(())
}

async fn build_queue(config: &Config) -> Result<Arc<dyn PersistentQueue>, CliError> {
    match config.backend {
        Backend::Amqp => {
            let transport = LapinTransport::new(config.amqp_url.clone())
                .with_connection_name("dispatch-cli");
            let queue_config = AmqpQueueConfig::new(config.queue.clone())
                .with_content_type(config.content_type.clone());
            Ok(Arc::new(AmqpQueue::declare(transport, queue_config).await?))
        }
        Backend::Sqs => {
            let client = AwsSqsApi::from_env(config.region.clone()).await;
            let queue_config =
                SqsQueueConfig::new(config.queue.clone()).with_wait_time(config.wait_time);
            Ok(Arc::new(SqsQueue::connect(client, queue_config).await?))
        }
    }
}

async fn read_payload(source: &PayloadSource) -> Result<Vec<u8>, CliError> {
    match source {
        PayloadSource::Inline(text) => Ok(text.as_bytes().to_vec()),
        PayloadSource::File(path) => Ok(tokio::fs::read(path).await?),
        PayloadSource::Stdin => {
            let mut payload = Vec::new();
            tokio::io::stdin().read_to_end(&mut payload).await?;
            Ok(payload)
        }
    }
}

async fn listen(queue: Arc<dyn PersistentQueue>, fail_on: Option<String>) -> Result<(), CliError> {
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received. Stopping listener...");
                trigger.trigger();
            }
            Err(err) => warn!("Failed to listen for Ctrl+C: {}", err),
        }
    });

    queue.listen_until(print_listener(fail_on), shutdown).await?;
    info!("Listener stopped");
    Ok(())
}

fn print_listener(fail_on: Option<String>) -> Arc<dyn Listener> {
    listener_fn(move |payload: &[u8]| -> Result<(), SendableError> {
        println!("{}", String::from_utf8_lossy(payload));
        match &fail_on {
            Some(text) if contains(payload, text.as_bytes()) => {
                Err(format!("payload contains '{text}'").into())
            }
            _ => Ok(()),
        }
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

fn action_name(action: &Action) -> &'static str {
    match action {
        Action::Send(_) => "send",
        Action::Listen { .. } => "listen",
        Action::Purge => "purge",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_text_inside_binary_payloads() {
        assert!(contains(b"{\"msg\":\"ko\"}", b"ko"));
        assert!(contains(&[0xff, b'k', b'o', 0x00], b"ko"));
        assert!(!contains(b"ok", b"ko"));
        assert!(!contains(b"k", b"ko"));
        assert!(!contains(b"anything", b""));
    }

    #[tokio::test]
    async fn print_listener_fails_only_on_the_sentinel() {
        let listener = print_listener(Some("ko".into()));
        assert!(listener.on_message(b"{\"msg\":\"ok\"}").await.is_ok());
        assert!(listener.on_message(b"{\"msg\":\"ko\"}").await.is_err());

        let permissive = print_listener(None);
        assert!(permissive.on_message(b"ko").await.is_ok());
    }

    #[tokio::test]
    async fn inline_payloads_are_sent_verbatim() {
        let payload = read_payload(&PayloadSource::Inline("héllo".into())).await.unwrap();
        assert_eq!(payload, "héllo".as_bytes());
    }
}
