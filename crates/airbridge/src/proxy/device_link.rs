// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-link UDP proxy.
//!
//! One datagram in, at most one datagram out: decompose the compound
//! request, forward the messages through the upstream client, compose the
//! answers, reply to the originating peer. Each datagram is handled by its
//! own task; failures are logged and dropped, as datagram semantics demand.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ds::device_link::{compose_answer, decompose_data, DeviceLinkClient};
use crate::error::Error;

pub struct DeviceLinkProxy {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    recv_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DeviceLinkProxy {
    pub async fn start(
        bind: SocketAddr,
        client: Arc<DeviceLinkClient>,
    ) -> Result<Self, Error> {
        let socket = UdpSocket::bind(bind).await.map_err(Error::from_transport)?;
        let local_addr = socket.local_addr().map_err(Error::from_transport)?;
        info!(%local_addr, "device link proxy listening");

        let cancel = CancellationToken::new();
        let recv_task =
            tokio::spawn(run_recv_loop(Arc::new(socket), client, cancel.clone()));

        Ok(Self {
            local_addr,
            cancel,
            recv_task: parking_lot::Mutex::new(Some(recv_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn wait_stopped(&self) {
        let recv_task = self.recv_task.lock().take();
        if let Some(task) = recv_task {
            let _ = task.await;
        }
    }
}

async fn run_recv_loop(
    socket: Arc<UdpSocket>,
    client: Arc<DeviceLinkClient>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 65536];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (n, peer) = match received {
            Ok(pair) => pair,
            Err(e) => {
                debug!("device link proxy read failed: {e}");
                continue;
            }
        };

        let data = buf[..n].to_vec();
        let socket = Arc::clone(&socket);
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            if let Err(e) = execute_request(&socket, &client, &data, peer).await {
                debug!(%peer, "device link proxy request failed: {e}");
            }
        });
    }
}

async fn execute_request(
    socket: &UdpSocket,
    client: &DeviceLinkClient,
    data: &[u8],
    peer: SocketAddr,
) -> Result<(), Error> {
    let requests = decompose_data(data)?;
    let answers = client.send_messages(requests, None).await?;

    if answers.is_empty() {
        return Ok(());
    }
    let reply = compose_answer(&answers);
    socket.send_to(&reply, peer).await.map_err(Error::from_transport)?;
    Ok(())
}

#[cfg(test)]
#[path = "device_link_tests.rs"]
mod tests;
