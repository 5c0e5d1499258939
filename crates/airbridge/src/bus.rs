// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared messaging-bus (NATS) client.
//!
//! One connection per bridge, shared by every bus sink. The client
//! reconnects on its own; sinks gate their publishes on the connected flag
//! exposed here so messages queued during an outage go out after the
//! reconnect instead of erroring.

use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Bus connection settings from the app config.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Server URL, e.g. `nats://127.0.0.1:4222`.
    pub url: String,
    /// Connection name advertised to the server.
    #[serde(default = "default_bus_name")]
    pub name: String,
    /// Auth token, when the server requires one.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_bus_name() -> String {
    "airbridge".to_owned()
}

#[derive(Clone)]
pub struct BusClient {
    client: async_nats::Client,
    connected: watch::Receiver<bool>,
}

impl BusClient {
    /// Connect, retrying the initial attempt in the background. Returns as
    /// soon as the client exists; publishes gate on [`BusClient::wait_connected`].
    pub async fn connect(config: &BusConfig) -> anyhow::Result<Self> {
        let (connected_tx, connected_rx) = watch::channel(false);
        let connected_tx = Arc::new(connected_tx);

        let mut opts = async_nats::ConnectOptions::new()
            .name(&config.name)
            .retry_on_initial_connect();
        if let Some(ref token) = config.token {
            opts = opts.token(token.clone());
        }
        let tx = Arc::clone(&connected_tx);
        opts = opts.event_callback(move |event| {
            let tx = Arc::clone(&tx);
            async move {
                match event {
                    async_nats::Event::Connected => {
                        info!("bus connection was established");
                        let _ = tx.send(true);
                    }
                    async_nats::Event::Disconnected => {
                        warn!("bus connection was lost");
                        let _ = tx.send(false);
                    }
                    other => debug!("bus event: {other}"),
                }
            }
        });

        info!(url = %config.url, "connecting to the messaging bus");
        let client = opts.connect(&config.url).await?;

        Ok(Self { client, connected: connected_rx })
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Resolve once the connection is up. Never resolves if the client was
    /// dropped, which only happens at shutdown.
    pub async fn wait_connected(&self) {
        let mut connected = self.connected.clone();
        let _ = connected.wait_for(|up| *up).await;
    }

    pub async fn publish(&self, subject: String, payload: Bytes) -> anyhow::Result<()> {
        self.client.publish(subject, payload).await?;
        Ok(())
    }

    /// Flush buffered publishes; used during orderly shutdown.
    pub async fn flush(&self) {
        if let Err(e) = self.client.flush().await {
            warn!("bus flush failed: {e}");
        }
    }
}
