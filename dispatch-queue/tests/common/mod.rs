#![allow(dead_code)]

use dispatch_queue::{listener_fn, EventSink, Listener, QueueEvent, SendableError, ShutdownTrigger};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
pub struct Msg {
    pub msg: String,
}

pub fn msg(text: &str) -> Vec<u8> {
    serde_json::to_vec(&Msg { msg: text.into() }).expect("message serializes")
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(DEADLINE, future)
        .await
        .expect("operation did not finish in time")
}

/// Signals once per `"ok"` message and fails on anything else.
pub fn ok_until_ko() -> (Arc<dyn Listener>, mpsc::UnboundedReceiver<bool>) {
    let (result, signals) = mpsc::unbounded_channel();
    let listener = listener_fn(move |payload: &[u8]| -> Result<(), SendableError> {
        let data: Msg = serde_json::from_slice(payload)?;
        if data.msg == "ok" {
            let _ = result.send(true);
            Ok(())
        } else {
            Err("Test Error".into())
        }
    });
    (listener, signals)
}

/// Records every payload and fires `trigger` once `stop_after` have been seen.
pub fn collect_then_stop(
    stop_after: usize,
    trigger: ShutdownTrigger,
) -> (Arc<dyn Listener>, Arc<Mutex<Vec<Vec<u8>>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener = {
        let seen = Arc::clone(&seen);
        listener_fn(move |payload: &[u8]| {
            let mut seen = seen.lock();
            seen.push(payload.to_vec());
            if seen.len() >= stop_after {
                trigger.trigger();
            }
            Ok(())
        })
    };
    (listener, seen)
}

/// Keeps a rendered copy of every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &QueueEvent<'_>) {
        self.events.lock().push(format!("{event:?}"));
    }
}
