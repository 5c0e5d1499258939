// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messaging-bus sink: one subject per sink instance.
//!
//! `write` only enqueues; a worker task publishes. The worker waits for the
//! bus to be connected before pulling a message and again before publishing
//! it, so a disconnect between the two retries cleanly with the same
//! message still queued behind the gate. Delivery is at-most-once: publish
//! failures are logged and dropped.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::sink::StreamingSink;
use crate::bus::BusClient;
use crate::event::TimestampedData;

pub struct BusSink {
    bus: BusClient,
    subject: String,
    tx: mpsc::UnboundedSender<Option<Bytes>>,
    rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Option<Bytes>>>>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl BusSink {
    pub fn new(bus: BusClient, subject: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            bus,
            subject,
            tx,
            rx: parking_lot::Mutex::new(Some(rx)),
            worker: parking_lot::Mutex::new(None),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl StreamingSink for BusSink {
    fn write<'a>(
        &'a self,
        item: &'a TimestampedData,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let payload = serde_json::to_vec(item)?;
            self.tx
                .send(Some(payload.into()))
                .map_err(|_| anyhow::anyhow!("bus sink queue is closed"))
        })
    }

    fn plug_in(&self) -> anyhow::Result<()> {
        let Some(rx) = self.rx.lock().take() else {
            anyhow::bail!("bus sink was already plugged in");
        };
        let bus = self.bus.clone();
        let subject = self.subject.clone();
        *self.worker.lock() = Some(tokio::spawn(run_worker(bus, subject, rx)));
        Ok(())
    }

    fn unplug(&self) {
        let _ = self.tx.send(None);
    }

    fn wait_unplugged<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let worker = self.worker.lock().take();
            if let Some(worker) = worker {
                let _ = worker.await;
            }
        })
    }
}

async fn run_worker(bus: BusClient, subject: String, mut rx: mpsc::UnboundedReceiver<Option<Bytes>>) {
    debug!(subject = %subject, "bus sink worker started");

    loop {
        bus.wait_connected().await;
        let Some(Some(message)) = rx.recv().await else {
            break;
        };
        // The connection may have dropped between pull and publish.
        bus.wait_connected().await;
        if let Err(e) = bus.publish(subject.clone(), message).await {
            warn!(subject = %subject, "failed to publish to the bus: {e:#}");
        }
    }

    bus.flush().await;
    debug!(subject = %subject, "bus sink worker stopped");
}
