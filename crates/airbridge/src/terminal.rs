// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator stdin → DS stdin.
//!
//! A reader thread bridges blocking stdin to the async plane; prompts come
//! back through the DS prompt handler, so there is nothing terminal-fancy
//! here.

use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ds::process::DedicatedServer;

/// Spawn the stdin reader thread and the forwarding task.
///
/// The thread lives until stdin closes (it cannot be interrupted portably);
/// the forwarding task stops on `shutdown`.
pub fn spawn_stdin_forwarder(
    ds: Arc<DedicatedServer>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

    let builder = std::thread::Builder::new().name("stdin-reader".into());
    let spawned = builder.spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line_tx.send(line).is_err() {
                break;
            }
        }
        debug!("stdin reader finished");
    });
    if let Err(e) = spawned {
        warn!("failed to spawn the stdin reader: {e}");
    }

    tokio::spawn(async move {
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = line_rx.recv() => line,
            };
            let Some(line) = line else {
                break;
            };
            let input = format!("{line}\n");
            if let Err(e) = ds.input(&input).await {
                warn!("failed to forward stdin line to the dedicated server: {e}");
                break;
            }
        }
    })
}
