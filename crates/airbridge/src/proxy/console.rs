// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Console TCP proxy.
//!
//! Accepts any number of clients and duplex-forwards line-framed bytes
//! between them and the single upstream console connection. Inbound bytes
//! are buffered until a newline: only the prefix up to and including the
//! last `\n` is ever forwarded upstream, in one write. Every upstream chunk
//! is fanned out to every connected client through its own writer task, so
//! one slow client cannot block the others.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ds::console::{ConsoleClient, DataHandler};
use crate::error::Error;

type ClosedMap = Arc<Mutex<HashMap<u64, oneshot::Receiver<()>>>>;

pub struct ConsoleProxy {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    closed: ClosedMap,
}

impl ConsoleProxy {
    /// Bind the listener and start accepting clients.
    pub async fn start(
        bind: SocketAddr,
        console: Arc<ConsoleClient>,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(bind).await.map_err(Error::from_transport)?;
        let local_addr = listener.local_addr().map_err(Error::from_transport)?;
        info!(%local_addr, "console proxy listening");

        let cancel = CancellationToken::new();
        let closed: ClosedMap = Arc::new(Mutex::new(HashMap::new()));
        let accept_task = tokio::spawn(run_accept_loop(
            listener,
            console,
            cancel.clone(),
            Arc::clone(&closed),
        ));

        Ok(Self {
            local_addr,
            cancel,
            accept_task: parking_lot::Mutex::new(Some(accept_task)),
            closed,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Refuse new connections and ask the existing ones to close.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Resolves when the accept loop has stopped and every connection has
    /// acknowledged its close.
    pub async fn wait_stopped(&self) {
        let accept_task = self.accept_task.lock().take();
        if let Some(task) = accept_task {
            let _ = task.await;
        }
        let receivers: Vec<_> = {
            let mut closed = self.closed.lock().await;
            closed.drain().map(|(_, rx)| rx).collect()
        };
        for rx in receivers {
            // A dropped sender means the connection is already gone.
            let _ = rx.await;
        }
    }
}

async fn run_accept_loop(
    listener: TcpListener,
    console: Arc<ConsoleClient>,
    cancel: CancellationToken,
    closed: ClosedMap,
) {
    let next_id = AtomicU64::new(0);

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                debug!("console proxy accept error: {e}");
                continue;
            }
        };

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        let (closed_tx, closed_rx) = oneshot::channel();
        closed.lock().await.insert(id, closed_rx);

        tokio::spawn(run_connection(
            stream,
            peer,
            Arc::clone(&console),
            cancel.child_token(),
            closed_tx,
        ));
    }
}

async fn run_connection(
    stream: TcpStream,
    peer: SocketAddr,
    console: Arc<ConsoleClient>,
    cancel: CancellationToken,
    closed_tx: oneshot::Sender<()>,
) {
    info!(%peer, "console proxy connection opened");

    let (mut read_half, mut write_half) = stream.into_split();

    // Everything the upstream broadcasts is queued for this client; the
    // queue decouples it from other clients' write speed.
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    let tap: DataHandler = Arc::new(move |chunk: &Bytes| {
        let _ = outbound_tx.send(chunk.clone());
    });
    console.subscribe_to_data(Arc::clone(&tap));

    let mut buffer = BytesMut::with_capacity(8192);
    let mut chunk = [0u8; 4096];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            outbound = outbound_rx.recv() => {
                let Some(data) = outbound else { break };
                if let Err(e) = write_half.write_all(&data).await {
                    debug!(%peer, "console proxy write failed: {e}");
                    break;
                }
            }

            read = read_half.read(&mut chunk) => {
                let n = match read {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        debug!(%peer, "console proxy read failed: {e}");
                        break;
                    }
                };
                buffer.extend_from_slice(&chunk[..n]);

                let Some(last_eol) = buffer.iter().rposition(|&b| b == b'\n') else {
                    continue;
                };
                let complete = buffer.split_to(last_eol + 1).freeze();
                if let Err(e) = console.write_bytes(&complete).await {
                    warn!(%peer, "console proxy upstream write failed: {e}");
                    break;
                }
            }
        }
    }

    console.unsubscribe_from_data(&tap);
    let _ = closed_tx.send(());
    info!(%peer, "console proxy connection closed");
}

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;
