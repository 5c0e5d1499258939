// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::Radar;
use crate::ds::device_link::{
    compose_answer, decompose_data, DeviceLinkClient, Message, OPCODE_MOVING_AIRCRAFTS_POSITIONS,
    OPCODE_MOVING_GROUND_UNITS_POSITIONS, OPCODE_REFRESH_RADAR, OPCODE_SHIPS_POSITIONS,
};

/// Fake DS: one moving and one stationary ship, one aircraft, no ground
/// units. Refresh requests are counted.
async fn spawn_fake_ds() -> anyhow::Result<(std::net::SocketAddr, Arc<std::sync::atomic::AtomicU32>)>
{
    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    let addr = socket.local_addr()?;
    let refreshes = Arc::new(std::sync::atomic::AtomicU32::new(0));

    let refreshes_task = Arc::clone(&refreshes);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(requests) = decompose_data(&buf[..n]) else {
                continue;
            };
            let mut answers = Vec::new();
            for request in requests {
                match request.opcode {
                    OPCODE_REFRESH_RADAR => {
                        refreshes_task.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                    OPCODE_SHIPS_POSITIONS => answers.push(Message::with_value(
                        request.opcode,
                        "tanker;1;0;10.0;20.0;0.0:pier;2;1;5.0;6.0;0.0",
                    )),
                    OPCODE_MOVING_AIRCRAFTS_POSITIONS => answers.push(Message::with_value(
                        request.opcode,
                        "john.doe;1;1.0;2.0;300.0",
                    )),
                    OPCODE_MOVING_GROUND_UNITS_POSITIONS => {
                        answers.push(Message::with_value(request.opcode, ""))
                    }
                    other => answers.push(Message::with_value(other, "")),
                }
            }
            if !answers.is_empty() {
                let _ = socket.send_to(&compose_answer(&answers), peer).await;
            }
        }
    });

    Ok((addr, refreshes))
}

#[tokio::test]
async fn moving_actors_snapshot_filters_stationary_ships() -> anyhow::Result<()> {
    let (addr, refreshes) = spawn_fake_ds().await?;
    let radar = Radar::new(Arc::new(DeviceLinkClient::connect(addr).await?));

    let snapshot = radar.get_all_moving_actors_positions(Some(Duration::from_secs(2))).await?;

    assert_eq!(snapshot.aircrafts.len(), 1);
    assert_eq!(snapshot.aircrafts[0].callsign, "john.doe");
    assert!(snapshot.ground_units.is_empty());
    assert_eq!(snapshot.ships.len(), 1);
    assert_eq!(snapshot.ships[0].name, "tanker");
    assert!(!snapshot.is_empty());

    assert_eq!(refreshes.load(std::sync::atomic::Ordering::Relaxed), 1);
    Ok(())
}

#[tokio::test]
async fn stationary_ships_are_partitioned() -> anyhow::Result<()> {
    let (addr, _) = spawn_fake_ds().await?;
    let radar = Radar::new(Arc::new(DeviceLinkClient::connect(addr).await?));

    let moving = radar.get_moving_ships_positions(Some(Duration::from_secs(2))).await?;
    assert_eq!(moving.len(), 1);
    assert_eq!(moving[0].name, "tanker");

    let stationary = radar.get_stationary_ships_positions(Some(Duration::from_secs(2))).await?;
    assert_eq!(stationary.len(), 1);
    assert_eq!(stationary[0].name, "pier");
    Ok(())
}

#[tokio::test]
async fn empty_snapshot_reports_empty() {
    let snapshot = super::AllMovingActorsPositions::default();
    assert!(snapshot.is_empty());
}
