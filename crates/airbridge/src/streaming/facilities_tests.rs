// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use super::{ChatStreamingFacility, EventsStreamingFacility, NotParsedStringsStreamingFacility};
use crate::ds::console::ConsoleClient;
use crate::ds::game_log::{GameLogWorker, LineParser};
use crate::event::{GameEvent, StreamPayload};
use crate::parsing::GameLogParser;
use crate::streaming::tests::RecordingSink;

/// Fake console upstream that only pushes lines; commands are ignored.
async fn spawn_push_only_console(
) -> anyhow::Result<(std::net::SocketAddr, mpsc::UnboundedSender<String>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        while let Some(line) = push_rx.recv().await {
            if stream.write_all(line.as_bytes()).await.is_err() {
                return;
            }
        }
    });

    Ok((addr, push_tx))
}

fn real_parser() -> LineParser {
    let parser = GameLogParser::new();
    Arc::new(move |line: &str| parser.parse(line))
}

#[tokio::test]
async fn chat_facility_subscriber_churn() -> anyhow::Result<()> {
    let (addr, push) = spawn_push_only_console().await?;
    let console = Arc::new(ConsoleClient::connect(addr).await?);
    let facility = ChatStreamingFacility::new(Arc::clone(&console));

    let (sink, rec) = RecordingSink::shared(false);
    facility.subscribe(Arc::clone(&sink)).await;
    facility.start();

    for body in ["one", "two", "three"] {
        push.send(format!("Chat: john.doe --- {body}\n"))?;
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    facility.unsubscribe(&sink).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    push.send("Chat: john.doe --- four\n".into())?;
    tokio::time::sleep(Duration::from_millis(150)).await;

    facility.stop();
    facility.wait_stopped().await;

    let items = rec.items.lock();
    let bodies: Vec<&str> = items
        .iter()
        .map(|item| match &item.data {
            StreamPayload::Chat(message) => message.body.as_str(),
            other => panic!("unexpected payload {other:?}"),
        })
        .collect();
    assert_eq!(bodies, vec!["one", "two", "three"]);
    Ok(())
}

#[tokio::test]
async fn unsubscribe_of_unknown_sink_fails() -> anyhow::Result<()> {
    let (addr, _push) = spawn_push_only_console().await?;
    let console = Arc::new(ConsoleClient::connect(addr).await?);
    let facility = ChatStreamingFacility::new(console);

    let (sink, _) = RecordingSink::shared(false);
    assert!(facility.unsubscribe(&sink).await.is_err());
    Ok(())
}

#[tokio::test]
async fn events_facility_suppresses_game_log_connection_events() -> anyhow::Result<()> {
    let (addr, push) = spawn_push_only_console().await?;
    let console = Arc::new(ConsoleClient::connect(addr).await?);

    let (line_tx, line_rx) = std::sync::mpsc::sync_channel(64);
    let worker = GameLogWorker::new(line_rx, real_parser());
    let facility = EventsStreamingFacility::new(Arc::clone(&console), worker.subscriptions());

    let (sink, rec) = RecordingSink::shared(false);
    facility.subscribe(Arc::clone(&sink)).await;
    facility.start();

    let worker_thread = std::thread::spawn(move || worker.run());

    // The game-log copy of the connection event must be suppressed; the
    // console copy is authoritative.
    line_tx.send(Some("[8:33:05 PM] john.doe has connected".into()))?;
    line_tx.send(Some("[8:33:06 PM] Mission BEGIN".into()))?;
    push.send("socket channel '703', ip 192.168.1.2:21000, john.doe, is complete created\n".into())?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    line_tx.send(None)?;
    worker_thread.join().map_err(|_| anyhow::anyhow!("worker panicked"))?;

    facility.stop();
    facility.wait_stopped().await;

    let items = rec.items.lock();
    let events: Vec<&GameEvent> = items
        .iter()
        .map(|item| match &item.data {
            StreamPayload::Event(event) => event,
            other => panic!("unexpected payload {other:?}"),
        })
        .collect();

    assert_eq!(events.len(), 2);
    assert!(events.iter().any(|e| matches!(e, GameEvent::MissionHasBegun)));
    let connected: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, GameEvent::HumanHasConnected { .. }))
        .collect();
    assert_eq!(connected.len(), 1, "exactly one connection event (console's)");
    match connected[0] {
        GameEvent::HumanHasConnected { channel, .. } => {
            assert_eq!(*channel, Some(703), "the console copy carries the channel");
        }
        _ => {}
    }
    Ok(())
}

#[tokio::test]
async fn not_parsed_facility_delivers_rejected_lines() -> anyhow::Result<()> {
    let (line_tx, line_rx) = std::sync::mpsc::sync_channel(64);
    let worker = GameLogWorker::new(line_rx, real_parser());
    let facility = NotParsedStringsStreamingFacility::new(worker.subscriptions());

    let (sink, rec) = RecordingSink::shared(false);
    facility.subscribe(sink).await;
    facility.start();

    let worker_thread = std::thread::spawn(move || worker.run());
    line_tx.send(Some("utter gibberish".into()))?;
    line_tx.send(Some("[8:33:06 PM] Mission BEGIN".into()))?;
    line_tx.send(None)?;
    worker_thread.join().map_err(|_| anyhow::anyhow!("worker panicked"))?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    facility.stop();
    facility.wait_stopped().await;

    let items = rec.items.lock();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].data, StreamPayload::NotParsed { value: "utter gibberish".into() });
    Ok(())
}
