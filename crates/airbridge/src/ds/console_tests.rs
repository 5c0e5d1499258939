// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use super::{
    parse_humans_statistics, parse_mission_info, ChatHandler, ConnectionEventHandler,
    ConsoleClient, DataHandler, MissionStatus,
};
use crate::error::Error;
use crate::event::{Belligerent, GameEvent};

/// Fake console DS: answers known commands with canned blocks and forwards
/// lines injected through `push_tx` to the client out-of-band.
async fn spawn_fake_console() -> anyhow::Result<(std::net::SocketAddr, mpsc::UnboundedSender<String>)>
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { return };
                    let response: String = match line.trim() {
                        "server" => {
                            "Type: Local server\nName: Test server\nDescription: \
                             For tests\n\n".into()
                        }
                        "user" => {
                            " N       Name           Ping    Score   Army        Aircraft\n \
                             1       john.doe       15      120     (1)Red      * Red 90 Pe-8\n \
                             2       jane.roe       22      -5      (2)Blue\n\n".into()
                        }
                        "mission" => "Mission: net/dogfight/T.mis is Playing\n\n".into(),
                        "mission BEGIN" => "Mission: net/dogfight/T.mis is Playing\n\n".into(),
                        "mission DESTROY" => "Mission NOT loaded\n\n".into(),
                        cmd if cmd.starts_with("chat ") || cmd.starts_with("kick") => "\n".into(),
                        "slow" => continue, // never answered
                        _ => "\n".into(),
                    };
                    if write_half.write_all(response.as_bytes()).await.is_err() {
                        return;
                    }
                }
                pushed = push_rx.recv() => {
                    let Some(pushed) = pushed else { return };
                    if write_half.write_all(pushed.as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    Ok((addr, push_tx))
}

#[tokio::test]
async fn server_info_round_trip() -> anyhow::Result<()> {
    let (addr, _push) = spawn_fake_console().await?;
    let client = ConsoleClient::connect(addr).await?;

    let info = client.get_server_info(Some(Duration::from_secs(2))).await?;
    assert_eq!(info.server_type, "Local server");
    assert_eq!(info.name, "Test server");
    assert_eq!(info.description, "For tests");
    Ok(())
}

#[tokio::test]
async fn humans_list_parses_rows() -> anyhow::Result<()> {
    let (addr, _push) = spawn_fake_console().await?;
    let client = ConsoleClient::connect(addr).await?;

    let humans = client.get_humans_list(Some(Duration::from_secs(2))).await?;
    assert_eq!(humans.len(), 2);
    assert_eq!(humans[0].callsign, "john.doe");
    assert_eq!(humans[0].belligerent, Belligerent::Red);
    assert_eq!(humans[0].aircraft.as_deref(), Some("* Red 90 Pe-8"));
    assert_eq!(humans[1].score, -5);
    assert_eq!(humans[1].aircraft, None);

    assert_eq!(client.get_humans_count(Some(Duration::from_secs(2))).await?, 2);
    Ok(())
}

#[tokio::test]
async fn mission_control_round_trip() -> anyhow::Result<()> {
    let (addr, _push) = spawn_fake_console().await?;
    let client = ConsoleClient::connect(addr).await?;

    let info = client.get_mission_info(Some(Duration::from_secs(2))).await?;
    assert_eq!(info.status, MissionStatus::Playing);
    assert_eq!(info.mission.as_deref(), Some("net/dogfight/T.mis"));

    let info = client.mission_unload(Some(Duration::from_secs(2))).await?;
    assert_eq!(info.status, MissionStatus::NotLoaded);
    Ok(())
}

#[tokio::test]
async fn chat_subscribers_receive_interleaved_chat() -> anyhow::Result<()> {
    let (addr, push) = spawn_fake_console().await?;
    let client = ConsoleClient::connect(addr).await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let subscriber: ChatHandler = {
        let seen = Arc::clone(&seen);
        Arc::new(move |m: &crate::event::ChatMessage| seen.lock().push(m.clone()))
    };
    client.subscribe_to_chat(Arc::clone(&subscriber));

    push.send("Chat: john.doe --- hello everyone\n".into())?;
    push.send("Chat: --- server notice\n".into())?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].sender.as_deref(), Some("john.doe"));
        assert_eq!(seen[0].body, "hello everyone");
        assert_eq!(seen[1].sender, None);
    }

    client.unsubscribe_from_chat(&subscriber);
    push.send("Chat: john.doe --- after unsubscribe\n".into())?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.lock().len(), 2);
    Ok(())
}

#[tokio::test]
async fn connection_events_are_dispatched() -> anyhow::Result<()> {
    let (addr, push) = spawn_fake_console().await?;
    let client = ConsoleClient::connect(addr).await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let subscriber: ConnectionEventHandler = {
        let seen = Arc::clone(&seen);
        Arc::new(move |e: &GameEvent| seen.lock().push(e.clone()))
    };
    client.subscribe_to_human_connection_events(Arc::clone(&subscriber));

    push.send("socket channel '703', ip 192.168.1.2:21000, john.doe, is complete created\n".into())?;
    push.send("socketConnection with 192.168.1.2:21000 on channel 703 lost.  Reason: \n".into())?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    match &seen[0] {
        GameEvent::HumanHasConnected { callsign, channel, address } => {
            assert_eq!(callsign, "john.doe");
            assert_eq!(*channel, Some(703));
            assert_eq!(address.as_deref(), Some("192.168.1.2:21000"));
        }
        other => panic!("expected HumanHasConnected, got {other:?}"),
    }
    assert!(matches!(&seen[1], GameEvent::HumanHasDisconnected { channel: Some(703), .. }));
    Ok(())
}

#[tokio::test]
async fn raw_data_tap_receives_complete_chunks() -> anyhow::Result<()> {
    let (addr, push) = spawn_fake_console().await?;
    let client = ConsoleClient::connect(addr).await?;

    let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let tap: DataHandler = {
        let seen = Arc::clone(&seen);
        Arc::new(move |chunk: &bytes::Bytes| seen.lock().extend_from_slice(chunk))
    };
    client.subscribe_to_data(Arc::clone(&tap));

    push.send("line one\nline two\n".into())?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(String::from_utf8_lossy(&seen.lock()), "line one\nline two\n");

    client.unsubscribe_from_data(&tap);
    push.send("line three\n".into())?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(String::from_utf8_lossy(&seen.lock()), "line one\nline two\n");
    Ok(())
}

#[tokio::test]
async fn unanswered_request_times_out() -> anyhow::Result<()> {
    let (addr, _push) = spawn_fake_console().await?;
    let client = ConsoleClient::connect(addr).await?;

    let result = client.request("slow", Some(Duration::from_millis(100))).await;
    assert_eq!(result, Err(Error::Timeout));

    // The slot was released: a later request still correlates correctly.
    let info = client.get_server_info(Some(Duration::from_secs(2))).await?;
    assert_eq!(info.name, "Test server");
    Ok(())
}

#[tokio::test]
async fn unknown_belligerent_fails_before_writing() -> anyhow::Result<()> {
    let (addr, _push) = spawn_fake_console().await?;
    let client = ConsoleClient::connect(addr).await?;

    let result = client.chat_to_belligerent("hi", 7, Some(Duration::from_secs(1))).await;
    assert!(matches!(result, Err(Error::BadInput(_))));

    let result = client.chat_to_belligerent("hi", 2, Some(Duration::from_secs(2))).await;
    assert_eq!(result, Ok(()));
    Ok(())
}

#[tokio::test]
async fn closing_fails_pending_requests() -> anyhow::Result<()> {
    let (addr, _push) = spawn_fake_console().await?;
    let client = Arc::new(ConsoleClient::connect(addr).await?);

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.request("slow", Some(Duration::from_secs(5))).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close();
    client.wait_closed().await;

    assert_eq!(pending.await?, Err(Error::ConnectionAborted));
    Ok(())
}

#[test]
fn statistics_blocks_parse() -> anyhow::Result<()> {
    let lines: Vec<String> = [
        "-------------------------------------------------------",
        "Name: john.doe",
        "Score: 120",
        "Kills: 3",
        "Deaths: 1",
        "-------------------------------------------------------",
        "Name: jane.roe",
        "Score: 40",
        "Kills: 1",
        "Deaths: 2",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect();

    let stats = parse_humans_statistics(&lines)?;
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].callsign, "john.doe");
    assert_eq!(stats[0].kills, 3);
    assert_eq!(stats[1].deaths, 2);
    Ok(())
}

#[test]
fn mission_parse_rejects_garbage() {
    let lines = vec!["whatever".to_owned()];
    assert!(matches!(parse_mission_info(&lines), Err(Error::BadInput(_))));
}
