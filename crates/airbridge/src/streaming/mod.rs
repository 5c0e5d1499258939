// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-topic fan-out.
//!
//! [`FanoutCore`] is the queue-and-subscribers skeleton shared by the chat,
//! events, and not-parsed facilities; the radar facility has its own
//! scheduler in [`radar`]. Items are timestamped at enqueue; the single
//! consumer task awaits all sinks' writes concurrently per item and isolates
//! their failures.

pub mod bus_sink;
pub mod facilities;
pub mod file_sink;
pub mod radar;
pub mod sink;

pub use sink::{load_sink, SharedSink, StreamingSink, SubscriptionOptions};

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Error;
use crate::event::{StreamPayload, TimestampedData};

/// Thread-safe producer end of a facility queue.
///
/// `publish` stamps the item and enqueues it; it is synchronous and callable
/// from plain OS threads (the watchdog, the game-log worker) as well as from
/// the async plane.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<Option<TimestampedData>>,
}

impl Publisher {
    pub fn publish(&self, payload: StreamPayload) {
        let _ = self.tx.send(Some(TimestampedData::new(payload)));
    }
}

/// Queue + subscriber set shared by the linear streaming facilities.
pub struct FanoutCore {
    name: &'static str,
    tx: mpsc::UnboundedSender<Option<TimestampedData>>,
    rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Option<TimestampedData>>>>,
    subscribers: Arc<Mutex<Vec<SharedSink>>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl FanoutCore {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name,
            tx,
            rx: parking_lot::Mutex::new(Some(rx)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            task: parking_lot::Mutex::new(None),
        }
    }

    pub fn publisher(&self) -> Publisher {
        Publisher { tx: self.tx.clone() }
    }

    /// Add a sink; `before_first` runs (typically attaching the upstream
    /// tap) when the set was empty.
    pub async fn subscribe_with(&self, sink: SharedSink, before_first: impl FnOnce()) {
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.is_empty() {
            before_first();
        }
        subscribers.push(sink);
    }

    /// Remove a sink; `after_last` runs when the set becomes empty.
    /// Unsubscribing a sink that was never subscribed is an error.
    pub async fn unsubscribe_with(
        &self,
        sink: &SharedSink,
        after_last: impl FnOnce(),
    ) -> Result<(), Error> {
        let mut subscribers = self.subscribers.lock().await;
        let before = subscribers.len();
        subscribers.retain(|s| !Arc::ptr_eq(s, sink));
        if subscribers.len() == before {
            return Err(Error::BadInput(format!(
                "sink is not subscribed to the {} facility",
                self.name
            )));
        }
        if subscribers.is_empty() {
            after_last();
        }
        Ok(())
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Launch the consumer task. Items enqueued while no sinks are
    /// subscribed are dropped.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().take() else {
            warn!(facility = self.name, "facility was already started");
            return;
        };
        let name = self.name;
        let subscribers = Arc::clone(&self.subscribers);
        *self.task.lock() = Some(tokio::spawn(process_queue(name, rx, subscribers)));
    }

    /// Post the shutdown sentinel.
    pub fn stop(&self) {
        let _ = self.tx.send(None);
    }

    /// Join the consumer task.
    pub async fn wait_stopped(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn process_queue(
    name: &'static str,
    mut rx: mpsc::UnboundedReceiver<Option<TimestampedData>>,
    subscribers: Arc<Mutex<Vec<SharedSink>>>,
) {
    while let Some(Some(item)) = rx.recv().await {
        let subscribers = subscribers.lock().await;
        if subscribers.is_empty() {
            continue;
        }
        let writes = subscribers.iter().map(|sink| sink.write(&item));
        for result in join_all(writes).await {
            if let Err(e) = result {
                warn!(facility = name, "sink failed to handle item: {e:#}");
            }
        }
    }
    debug!(facility = name, "facility queue processing stopped");
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
