// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::ConsoleProxy;
use crate::ds::console::ConsoleClient;

/// Fake upstream console: records every read as its own chunk and forwards
/// injected lines back to the client.
async fn spawn_fake_upstream() -> anyhow::Result<(
    std::net::SocketAddr,
    Arc<Mutex<Vec<Vec<u8>>>>,
    mpsc::UnboundedSender<Vec<u8>>,
)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let chunks: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let chunks_task = Arc::clone(&chunks);
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                read = stream.read(&mut buf) => {
                    let Ok(n) = read else { return };
                    if n == 0 {
                        return;
                    }
                    chunks_task.lock().push(buf[..n].to_vec());
                }
                pushed = push_rx.recv() => {
                    let Some(data) = pushed else { return };
                    if stream.write_all(&data).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    Ok((addr, chunks, push_tx))
}

async fn flattened(chunks: &Mutex<Vec<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&chunks.lock().concat()).into_owned()
}

#[tokio::test]
async fn forwards_only_on_newline_boundaries() -> anyhow::Result<()> {
    let (upstream_addr, chunks, _push) = spawn_fake_upstream().await?;
    let console = Arc::new(ConsoleClient::connect(upstream_addr).await?);
    let proxy = ConsoleProxy::start("127.0.0.1:0".parse()?, Arc::clone(&console)).await?;

    let mut client = TcpStream::connect(proxy.local_addr()).await?;

    client.write_all(b"chat all hi").await?;
    client.flush().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(chunks.lock().is_empty(), "no partial line may reach the upstream");

    client.write_all(b"\n").await?;
    client.flush().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(flattened(&chunks).await, "chat all hi\n");

    client.write_all(b"chat all bye\n").await?;
    client.flush().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(flattened(&chunks).await, "chat all hi\nchat all bye\n");

    proxy.stop();
    proxy.wait_stopped().await;
    Ok(())
}

#[tokio::test]
async fn broadcasts_upstream_chunks_to_all_clients() -> anyhow::Result<()> {
    let (upstream_addr, _chunks, push) = spawn_fake_upstream().await?;
    let console = Arc::new(ConsoleClient::connect(upstream_addr).await?);
    let proxy = ConsoleProxy::start("127.0.0.1:0".parse()?, Arc::clone(&console)).await?;

    let mut client_a = TcpStream::connect(proxy.local_addr()).await?;
    let mut client_b = TcpStream::connect(proxy.local_addr()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    push.send(b"Mission BEGIN\n".to_vec())?;

    for client in [&mut client_a, &mut client_b] {
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf)).await??;
        assert_eq!(&buf[..n], b"Mission BEGIN\n");
    }

    proxy.stop();
    proxy.wait_stopped().await;
    Ok(())
}

#[tokio::test]
async fn disconnected_client_is_unsubscribed() -> anyhow::Result<()> {
    let (upstream_addr, _chunks, push) = spawn_fake_upstream().await?;
    let console = Arc::new(ConsoleClient::connect(upstream_addr).await?);
    let proxy = ConsoleProxy::start("127.0.0.1:0".parse()?, Arc::clone(&console)).await?;

    let client_a = TcpStream::connect(proxy.local_addr()).await?;
    let mut client_b = TcpStream::connect(proxy.local_addr()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    drop(client_a);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The survivor still receives broadcasts.
    push.send(b"still here\n".to_vec())?;
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(2), client_b.read(&mut buf)).await??;
    assert_eq!(&buf[..n], b"still here\n");

    proxy.stop();
    proxy.wait_stopped().await;
    Ok(())
}

#[tokio::test]
async fn stop_closes_existing_connections() -> anyhow::Result<()> {
    let (upstream_addr, _chunks, _push) = spawn_fake_upstream().await?;
    let console = Arc::new(ConsoleClient::connect(upstream_addr).await?);
    let proxy = ConsoleProxy::start("127.0.0.1:0".parse()?, Arc::clone(&console)).await?;

    let mut client = TcpStream::connect(proxy.local_addr()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    proxy.stop();
    proxy.wait_stopped().await;

    // The client observes EOF once its connection task is gone.
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf)).await??;
    assert_eq!(n, 0);

    // New connections are refused after stop.
    assert!(TcpStream::connect(proxy.local_addr()).await.is_err());
    Ok(())
}
