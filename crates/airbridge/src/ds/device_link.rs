// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-link wire codec and the upstream UDP client.
//!
//! Datagrams are ASCII: a direction marker (`R` for requests, `A` for
//! answers) followed by `/`-joined messages, each `opcode` or
//! `opcode\value`. `$` escapes itself and `/` inside values, so
//! `decompose_data(compose_answer(xs)) == xs` for any well-formed list.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::event::Belligerent;

pub const OPCODE_REFRESH_RADAR: u16 = 1001;
pub const OPCODE_SHIPS_POSITIONS: u16 = 1002;
pub const OPCODE_MOVING_AIRCRAFTS_POSITIONS: u16 = 1003;
pub const OPCODE_MOVING_GROUND_UNITS_POSITIONS: u16 = 1004;
pub const OPCODE_STATIONARY_OBJECTS_POSITIONS: u16 = 1005;
pub const OPCODE_HOUSES_POSITIONS: u16 = 1006;

const REQUEST_MARKER: &str = "R";
const ANSWER_MARKER: &str = "A";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One device-link message: an opcode with an optional value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: u16,
    pub value: Option<String>,
}

impl Message {
    pub fn new(opcode: u16) -> Self {
        Self { opcode, value: None }
    }

    pub fn with_value(opcode: u16, value: impl Into<String>) -> Self {
        Self { opcode, value: Some(value.into()) }
    }

    /// Radar refresh is fire-and-forget; everything else gets an answer.
    pub fn expects_answer(&self) -> bool {
        self.opcode != OPCODE_REFRESH_RADAR
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '$' => out.push_str("$$"),
            '/' => out.push_str("$/"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '$' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn compose(marker: &str, messages: &[Message]) -> Vec<u8> {
    let mut out = String::from(marker);
    for message in messages {
        out.push('/');
        out.push_str(&message.opcode.to_string());
        if let Some(ref value) = message.value {
            out.push('\\');
            out.push_str(&escape(value));
        }
    }
    out.into_bytes()
}

/// Serialize a request datagram.
pub fn compose_request(messages: &[Message]) -> Vec<u8> {
    compose(REQUEST_MARKER, messages)
}

/// Serialize an answer datagram.
pub fn compose_answer(messages: &[Message]) -> Vec<u8> {
    compose(ANSWER_MARKER, messages)
}

/// Split a datagram into its messages. Accepts either direction marker.
pub fn decompose_data(data: &[u8]) -> Result<Vec<Message>, Error> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::BadInput("device link datagram is not ASCII".into()))?;

    let rest = text
        .strip_prefix(REQUEST_MARKER)
        .or_else(|| text.strip_prefix(ANSWER_MARKER))
        .ok_or_else(|| Error::BadInput(format!("unknown datagram marker in {text:?}")))?;
    let rest = match rest.strip_prefix('/') {
        Some(r) => r,
        None if rest.is_empty() => return Ok(vec![]),
        None => return Err(Error::BadInput(format!("malformed datagram {text:?}"))),
    };
    if rest.is_empty() {
        return Ok(vec![]);
    }

    split_segments(rest)
        .into_iter()
        .map(|segment| {
            let (opcode, value) = match segment.split_once('\\') {
                Some((opcode, value)) => (opcode, Some(unescape(value))),
                None => (segment.as_str(), None),
            };
            let opcode = opcode
                .parse()
                .map_err(|_| Error::BadInput(format!("bad opcode {opcode:?}")))?;
            Ok(Message { opcode, value })
        })
        .collect()
}

/// Split on `/`, honoring `$`-escapes.
fn split_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '$' => {
                current.push('$');
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '/' => segments.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    segments.push(current);
    segments
}

/// 3D location reported by the radar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActorPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipPosition {
    pub name: String,
    pub army: Belligerent,
    pub is_stationary: bool,
    pub pos: ActorPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAircraftPosition {
    pub callsign: String,
    pub army: Belligerent,
    pub pos: ActorPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingGroundUnitPosition {
    pub name: String,
    pub army: Belligerent,
    pub pos: ActorPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationaryObjectPosition {
    pub name: String,
    pub army: Belligerent,
    pub pos: ActorPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HousePosition {
    pub name: String,
    pub army: Belligerent,
    pub pos: ActorPoint,
}

type PendingMap = Mutex<HashMap<u16, VecDeque<oneshot::Sender<Message>>>>;

/// Upstream UDP client with per-request reply correlation by opcode.
pub struct DeviceLinkClient {
    socket: Arc<UdpSocket>,
    pending: Arc<PendingMap>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    default_timeout: Duration,
}

impl DeviceLinkClient {
    /// Bind an ephemeral socket connected to the DS device-link address and
    /// start the answer reader.
    pub async fn connect(remote: SocketAddr) -> Result<Self, Error> {
        let bind_addr: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16, 0, 0, 0, 0, 0, 0, 0], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await.map_err(Error::from_transport)?;
        socket.connect(remote).await.map_err(Error::from_transport)?;

        let socket = Arc::new(socket);
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));

        let cancel = CancellationToken::new();
        let reader = tokio::spawn(run_reader(
            Arc::clone(&socket),
            Arc::clone(&pending),
            cancel.clone(),
        ));

        Ok(Self {
            socket,
            pending,
            reader: parking_lot::Mutex::new(Some(reader)),
            cancel,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Send a compound request and collect the correlated answers.
    ///
    /// Answers missing at the deadline are omitted; partial results are not
    /// an error. Transport loss is.
    pub async fn send_messages(
        &self,
        messages: Vec<Message>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Message>, Error> {
        if messages.is_empty() {
            return Ok(vec![]);
        }

        let mut receivers = Vec::new();
        {
            let mut pending = self.pending.lock().await;
            for message in messages.iter().filter(|m| m.expects_answer()) {
                let (tx, rx) = oneshot::channel();
                pending.entry(message.opcode).or_default().push_back(tx);
                receivers.push((message.opcode, rx));
            }
        }

        let datagram = compose_request(&messages);
        if let Err(e) = self.socket.send(&datagram).await {
            for (opcode, _) in &receivers {
                self.purge_one(*opcode).await;
            }
            return Err(Error::from_transport(e));
        }

        let deadline =
            tokio::time::Instant::now() + timeout.unwrap_or(self.default_timeout);
        let mut answers = Vec::new();
        let mut timed_out = false;

        for (opcode, rx) in receivers {
            if timed_out {
                self.purge_one(opcode).await;
                continue;
            }
            match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(message)) => answers.push(message),
                Ok(Err(_)) => return Err(Error::ConnectionAborted),
                Err(_) => {
                    self.purge_one(opcode).await;
                    timed_out = true;
                }
            }
        }

        Ok(answers)
    }

    /// Ask the DS to repopulate its radar snapshot. No answer is expected.
    pub async fn refresh_radar(&self) -> Result<(), Error> {
        let datagram = compose_request(&[Message::new(OPCODE_REFRESH_RADAR)]);
        self.socket.send(&datagram).await.map_err(Error::from_transport)?;
        Ok(())
    }

    pub async fn get_all_ships_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<ShipPosition>, Error> {
        let value = self.query(OPCODE_SHIPS_POSITIONS, timeout).await?;
        parse_records(&value, parse_ship)
    }

    pub async fn get_all_moving_aircrafts_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<MovingAircraftPosition>, Error> {
        let value = self.query(OPCODE_MOVING_AIRCRAFTS_POSITIONS, timeout).await?;
        parse_records(&value, parse_aircraft)
    }

    pub async fn get_all_moving_ground_units_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<MovingGroundUnitPosition>, Error> {
        let value = self.query(OPCODE_MOVING_GROUND_UNITS_POSITIONS, timeout).await?;
        parse_records(&value, parse_ground_unit)
    }

    pub async fn get_all_stationary_objects_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<StationaryObjectPosition>, Error> {
        let value = self.query(OPCODE_STATIONARY_OBJECTS_POSITIONS, timeout).await?;
        parse_records(&value, parse_stationary_object)
    }

    pub async fn get_all_houses_positions(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<HousePosition>, Error> {
        let value = self.query(OPCODE_HOUSES_POSITIONS, timeout).await?;
        parse_records(&value, parse_house)
    }

    /// Stop the answer reader. Pending requests fail with
    /// [`Error::ConnectionAborted`].
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub async fn wait_closed(&self) {
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }
    }

    async fn query(&self, opcode: u16, timeout: Option<Duration>) -> Result<String, Error> {
        let answers = self.send_messages(vec![Message::new(opcode)], timeout).await?;
        let answer = answers
            .into_iter()
            .find(|m| m.opcode == opcode)
            .ok_or(Error::Timeout)?;
        Ok(answer.value.unwrap_or_default())
    }

    async fn purge_one(&self, opcode: u16) {
        let mut pending = self.pending.lock().await;
        if let Some(queue) = pending.get_mut(&opcode) {
            queue.pop_front();
            if queue.is_empty() {
                pending.remove(&opcode);
            }
        }
    }
}

async fn run_reader(
    socket: Arc<UdpSocket>,
    pending: Arc<PendingMap>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 65536];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv(&mut buf) => received,
        };
        let n = match received {
            Ok(n) => n,
            Err(e) => {
                warn!("device link socket read failed: {e}");
                break;
            }
        };

        let messages = match decompose_data(&buf[..n]) {
            Ok(messages) => messages,
            Err(e) => {
                debug!("dropping malformed device link datagram: {e}");
                continue;
            }
        };

        let mut pending = pending.lock().await;
        for message in messages {
            let Some(queue) = pending.get_mut(&message.opcode) else {
                debug!(opcode = message.opcode, "unsolicited device link answer");
                continue;
            };
            if let Some(tx) = queue.pop_front() {
                let _ = tx.send(message);
            }
        }
        pending.retain(|_, queue| !queue.is_empty());
    }

    // Drop every pending sender so outstanding requests observe the abort.
    pending.lock().await.clear();
}

/// Records are `:`-separated, fields `;`-separated.
fn parse_records<T>(
    value: &str,
    parse_one: impl Fn(&[&str]) -> Option<T>,
) -> Result<Vec<T>, Error> {
    if value.is_empty() {
        return Ok(vec![]);
    }
    value
        .split(':')
        .map(|record| {
            let fields: Vec<&str> = record.split(';').collect();
            parse_one(&fields)
                .ok_or_else(|| Error::BadInput(format!("malformed radar record {record:?}")))
        })
        .collect()
}

fn parse_army(field: &str) -> Option<Belligerent> {
    Belligerent::from_id(field.parse().ok()?)
}

fn parse_point(fields: &[&str]) -> Option<ActorPoint> {
    let [x, y, z] = fields else {
        return None;
    };
    Some(ActorPoint { x: x.parse().ok()?, y: y.parse().ok()?, z: z.parse().ok()? })
}

fn parse_ship(fields: &[&str]) -> Option<ShipPosition> {
    let [name, army, stationary, rest @ ..] = fields else {
        return None;
    };
    Some(ShipPosition {
        name: (*name).to_owned(),
        army: parse_army(army)?,
        is_stationary: *stationary == "1",
        pos: parse_point(rest)?,
    })
}

fn parse_aircraft(fields: &[&str]) -> Option<MovingAircraftPosition> {
    let [callsign, army, rest @ ..] = fields else {
        return None;
    };
    Some(MovingAircraftPosition {
        callsign: (*callsign).to_owned(),
        army: parse_army(army)?,
        pos: parse_point(rest)?,
    })
}

fn parse_ground_unit(fields: &[&str]) -> Option<MovingGroundUnitPosition> {
    let [name, army, rest @ ..] = fields else {
        return None;
    };
    Some(MovingGroundUnitPosition {
        name: (*name).to_owned(),
        army: parse_army(army)?,
        pos: parse_point(rest)?,
    })
}

fn parse_stationary_object(fields: &[&str]) -> Option<StationaryObjectPosition> {
    let [name, army, rest @ ..] = fields else {
        return None;
    };
    Some(StationaryObjectPosition {
        name: (*name).to_owned(),
        army: parse_army(army)?,
        pos: parse_point(rest)?,
    })
}

fn parse_house(fields: &[&str]) -> Option<HousePosition> {
    let [name, army, rest @ ..] = fields else {
        return None;
    };
    Some(HousePosition {
        name: (*name).to_owned(),
        army: parse_army(army)?,
        pos: parse_point(rest)?,
    })
}

#[cfg(test)]
#[path = "device_link_tests.rs"]
mod tests;
