// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream console client.
//!
//! Maintains the single TCP connection to the DS console. Inbound bytes are
//! split at the last newline; each complete-lines chunk is broadcast to
//! raw-data taps (the console proxy rides these), then classified line by
//! line: chat messages and human connection events go to their typed
//! subscribers, everything else feeds the pending-request FIFO. A response
//! block ends with one empty line.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::event::{Belligerent, ChatMessage, GameEvent};

/// Raw tap over complete-lines byte chunks, in registration order.
pub type DataHandler = Arc<dyn Fn(&Bytes) + Send + Sync>;
/// Chat subscriber, invoked synchronously in parse order.
pub type ChatHandler = Arc<dyn Fn(&ChatMessage) + Send + Sync>;
/// Human connection-event subscriber.
pub type ConnectionEventHandler = Arc<dyn Fn(&GameEvent) + Send + Sync>;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Server identity block returned by `server`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub server_type: String,
    pub name: String,
    pub description: String,
}

/// One row of the `user` listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Human {
    pub number: u32,
    pub callsign: String,
    pub ping: u32,
    pub score: i64,
    pub belligerent: Belligerent,
    pub aircraft: Option<String>,
}

/// One block of the `user STAT` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanStatistics {
    pub callsign: String,
    pub score: i64,
    pub kills: u32,
    pub deaths: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissionStatus {
    NotLoaded,
    Loaded,
    Playing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionInfo {
    pub status: MissionStatus,
    pub mission: Option<String>,
}

struct PendingRequest {
    id: u64,
    lines: Vec<String>,
    tx: oneshot::Sender<Vec<String>>,
}

struct LineClassifier {
    chat: Regex,
    chat_server: Regex,
    connected: Regex,
    disconnected: Regex,
}

impl LineClassifier {
    fn new() -> Self {
        // Fixed, known-valid expressions; failures would be caught in tests.
        #[allow(clippy::unwrap_used)]
        fn re(pattern: &str) -> Regex {
            Regex::new(pattern).unwrap()
        }

        Self {
            chat: re(r"^Chat:\s+(?P<sender>.+?)\s+---\s+(?P<body>.*)$"),
            chat_server: re(r"^Chat:\s*---\s*(?P<body>.*)$"),
            connected: re(
                r"^socket channel '(?P<channel>\d+)', ip (?P<address>\S+), (?P<callsign>.+), is complete created$",
            ),
            disconnected: re(
                r"^socketConnection with (?P<address>\S+) on channel (?P<channel>\d+) lost\..*$",
            ),
        }
    }

    fn classify(&self, line: &str) -> Classified {
        if let Some(c) = self.chat.captures(line) {
            return Classified::Chat(ChatMessage {
                sender: Some(c["sender"].to_owned()),
                body: c["body"].to_owned(),
            });
        }
        if let Some(c) = self.chat_server.captures(line) {
            return Classified::Chat(ChatMessage { sender: None, body: c["body"].to_owned() });
        }
        if let Some(c) = self.connected.captures(line) {
            return Classified::ConnectionEvent(GameEvent::HumanHasConnected {
                callsign: c["callsign"].to_owned(),
                channel: c["channel"].parse().ok(),
                address: Some(c["address"].to_owned()),
            });
        }
        if let Some(c) = self.disconnected.captures(line) {
            return Classified::ConnectionEvent(GameEvent::HumanHasDisconnected {
                callsign: None,
                channel: c["channel"].parse().ok(),
                address: Some(c["address"].to_owned()),
            });
        }
        Classified::Plain
    }
}

enum Classified {
    Chat(ChatMessage),
    ConnectionEvent(GameEvent),
    Plain,
}

struct Shared {
    writer: Mutex<OwnedWriteHalf>,
    pending: Mutex<VecDeque<PendingRequest>>,
    data_subscribers: parking_lot::Mutex<Vec<DataHandler>>,
    chat_subscribers: parking_lot::Mutex<Vec<ChatHandler>>,
    connection_event_subscribers: parking_lot::Mutex<Vec<ConnectionEventHandler>>,
    classifier: LineClassifier,
    next_request_id: AtomicU64,
}

/// The console client. One instance per supervised DS.
pub struct ConsoleClient {
    shared: Arc<Shared>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    default_timeout: Duration,
}

impl ConsoleClient {
    pub async fn connect(remote: SocketAddr) -> Result<Self, Error> {
        let stream = TcpStream::connect(remote).await.map_err(Error::from_transport)?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared {
            writer: Mutex::new(write_half),
            pending: Mutex::new(VecDeque::new()),
            data_subscribers: parking_lot::Mutex::new(Vec::new()),
            chat_subscribers: parking_lot::Mutex::new(Vec::new()),
            connection_event_subscribers: parking_lot::Mutex::new(Vec::new()),
            classifier: LineClassifier::new(),
            next_request_id: AtomicU64::new(0),
        });

        let cancel = CancellationToken::new();
        let reader =
            tokio::spawn(run_reader(read_half, Arc::clone(&shared), cancel.clone()));
        info!(%remote, "console client connected");

        Ok(Self {
            shared,
            reader: parking_lot::Mutex::new(Some(reader)),
            cancel,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn subscribe_to_data(&self, subscriber: DataHandler) {
        self.shared.data_subscribers.lock().push(subscriber);
    }

    pub fn unsubscribe_from_data(&self, subscriber: &DataHandler) {
        self.shared.data_subscribers.lock().retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    pub fn subscribe_to_chat(&self, subscriber: ChatHandler) {
        self.shared.chat_subscribers.lock().push(subscriber);
    }

    pub fn unsubscribe_from_chat(&self, subscriber: &ChatHandler) {
        self.shared.chat_subscribers.lock().retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    pub fn subscribe_to_human_connection_events(&self, subscriber: ConnectionEventHandler) {
        self.shared.connection_event_subscribers.lock().push(subscriber);
    }

    pub fn unsubscribe_from_human_connection_events(&self, subscriber: &ConnectionEventHandler) {
        self.shared
            .connection_event_subscribers
            .lock()
            .retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    /// Write raw bytes to the console. Used directly by the proxy, which has
    /// already framed them on newline boundaries.
    pub async fn write_bytes(&self, data: &[u8]) -> Result<(), Error> {
        let mut writer = self.shared.writer.lock().await;
        writer.write_all(data).await.map_err(Error::from_transport)?;
        writer.flush().await.map_err(Error::from_transport)
    }

    /// Issue one command line and await its response block.
    async fn request(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>, Error> {
        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let line = format!("{command}\n");

        // Enqueue and write under the writer lock so concurrent RPCs cannot
        // invert the FIFO correlation order.
        let written = {
            let mut writer = self.shared.writer.lock().await;
            self.shared.pending.lock().await.push_back(PendingRequest {
                id,
                lines: Vec::new(),
                tx,
            });
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await.map_err(Error::from_transport),
                Err(e) => Err(Error::from_transport(e)),
            }
        };
        if let Err(e) = written {
            self.forget_request(id).await;
            return Err(e);
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(lines)) => Ok(lines),
            Ok(Err(_)) => Err(Error::ConnectionAborted),
            Err(_) => {
                self.forget_request(id).await;
                Err(Error::Timeout)
            }
        }
    }

    async fn forget_request(&self, id: u64) {
        self.shared.pending.lock().await.retain(|r| r.id != id);
    }

    pub async fn get_server_info(&self, timeout: Option<Duration>) -> Result<ServerInfo, Error> {
        let lines = self.request("server", timeout).await?;
        parse_server_info(&lines)
    }

    pub async fn get_humans_list(&self, timeout: Option<Duration>) -> Result<Vec<Human>, Error> {
        let lines = self.request("user", timeout).await?;
        parse_humans_list(&lines)
    }

    pub async fn get_humans_count(&self, timeout: Option<Duration>) -> Result<usize, Error> {
        Ok(self.get_humans_list(timeout).await?.len())
    }

    pub async fn get_humans_statistics(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Vec<HumanStatistics>, Error> {
        let lines = self.request("user STAT", timeout).await?;
        parse_humans_statistics(&lines)
    }

    pub async fn kick_by_callsign(
        &self,
        callsign: &str,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        self.request(&format!("kick {callsign}"), timeout).await.map(|_| ())
    }

    pub async fn kick_by_number(
        &self,
        number: u32,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        self.request(&format!("kick# {number}"), timeout).await.map(|_| ())
    }

    pub async fn chat_to_all(&self, message: &str, timeout: Option<Duration>) -> Result<(), Error> {
        self.request(&format!("chat {message} ALL"), timeout).await.map(|_| ())
    }

    pub async fn chat_to_human(
        &self,
        message: &str,
        callsign: &str,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        self.request(&format!("chat {message} TO {callsign}"), timeout).await.map(|_| ())
    }

    /// `belligerent_id` is the caller-facing numeric id; it must map to a
    /// known belligerent before any bytes are written.
    pub async fn chat_to_belligerent(
        &self,
        message: &str,
        belligerent_id: u8,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        let belligerent = Belligerent::from_id(belligerent_id)
            .ok_or_else(|| Error::BadInput(format!("unknown belligerent id {belligerent_id}")))?;
        self.request(&format!("chat {message} ARMY {}", belligerent.to_id()), timeout)
            .await
            .map(|_| ())
    }

    pub async fn mission_load(
        &self,
        path: &str,
        timeout: Option<Duration>,
    ) -> Result<MissionInfo, Error> {
        let lines = self.request(&format!("mission LOAD {path}"), timeout).await?;
        parse_mission_info(&lines)
    }

    pub async fn mission_begin(&self, timeout: Option<Duration>) -> Result<MissionInfo, Error> {
        let lines = self.request("mission BEGIN", timeout).await?;
        parse_mission_info(&lines)
    }

    pub async fn mission_end(&self, timeout: Option<Duration>) -> Result<MissionInfo, Error> {
        let lines = self.request("mission END", timeout).await?;
        parse_mission_info(&lines)
    }

    pub async fn mission_unload(&self, timeout: Option<Duration>) -> Result<MissionInfo, Error> {
        let lines = self.request("mission DESTROY", timeout).await?;
        parse_mission_info(&lines)
    }

    pub async fn get_mission_info(&self, timeout: Option<Duration>) -> Result<MissionInfo, Error> {
        let lines = self.request("mission", timeout).await?;
        parse_mission_info(&lines)
    }

    /// Stop the reader. Pending requests fail with
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
}

async fn run_reader(
    mut read_half: OwnedReadHalf,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let mut buffer = BytesMut::with_capacity(8192);
    let mut chunk = [0u8; 4096];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_half.read(&mut chunk) => read,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("console socket read failed: {e}");
                break;
            }
        };
        buffer.extend_from_slice(&chunk[..n]);

        let Some(last_eol) = buffer.iter().rposition(|&b| b == b'\n') else {
            continue;
        };
        let complete = buffer.split_to(last_eol + 1).freeze();

        dispatch_chunk(&shared, &complete).await;
    }

    // Fail whatever is still pending so callers see the abort.
    let mut pending = shared.pending.lock().await;
    if !pending.is_empty() {
        warn!(count = pending.len(), "console connection lost with pending requests");
    }
    pending.clear();
    debug!("console reader finished");
}

async fn dispatch_chunk(shared: &Shared, complete: &Bytes) {
    for subscriber in shared.data_subscribers.lock().iter() {
        subscriber(complete);
    }

    let text = String::from_utf8_lossy(complete);
    for line in text.split_inclusive('\n') {
        let stripped = line.trim_end_matches(['\n', '\r']);
        handle_line(shared, stripped).await;
    }
}

async fn handle_line(shared: &Shared, line: &str) {
    match shared.classifier.classify(line) {
        Classified::Chat(message) => {
            for subscriber in shared.chat_subscribers.lock().iter() {
                subscriber(&message);
            }
        }
        Classified::ConnectionEvent(event) => {
            for subscriber in shared.connection_event_subscribers.lock().iter() {
                subscriber(&event);
            }
        }
        Classified::Plain => {
            let mut pending = shared.pending.lock().await;
            let Some(head) = pending.front_mut() else {
                if !line.is_empty() {
                    debug!(line, "unsolicited console line");
                }
                return;
            };
            if line.is_empty() {
                // Blank line terminates the head request's response block.
                if let Some(request) = pending.pop_front() {
                    let _ = request.tx.send(request.lines);
                }
            } else {
                head.lines.push(line.to_owned());
            }
        }
    }
}

fn parse_server_info(lines: &[String]) -> Result<ServerInfo, Error> {
    let mut server_type = None;
    let mut name = None;
    let mut description = None;

    for line in lines {
        if let Some(rest) = line.strip_prefix("Type:") {
            server_type = Some(rest.trim().to_owned());
        } else if let Some(rest) = line.strip_prefix("Name:") {
            name = Some(rest.trim().to_owned());
        } else if let Some(rest) = line.strip_prefix("Description:") {
            description = Some(rest.trim().to_owned());
        }
    }

    match (server_type, name) {
        (Some(server_type), Some(name)) => Ok(ServerInfo {
            server_type,
            name,
            description: description.unwrap_or_default(),
        }),
        _ => Err(Error::BadInput(format!("malformed server info response {lines:?}"))),
    }
}

fn parse_humans_list(lines: &[String]) -> Result<Vec<Human>, Error> {
    // Fixed, known-valid expression.
    #[allow(clippy::unwrap_used)]
    let row = Regex::new(
        r"^\s*(?P<number>\d+)\s+(?P<callsign>\S+)\s+(?P<ping>\d+)\s+(?P<score>-?\d+)\s+\((?P<army>\d)\)\S*(?:\s+(?P<aircraft>.+))?$",
    )
    .unwrap();

    let mut humans = Vec::new();
    for line in lines {
        let Some(c) = row.captures(line) else {
            continue; // header or decoration
        };
        let belligerent = c["army"]
            .parse()
            .ok()
            .and_then(Belligerent::from_id)
            .ok_or_else(|| Error::BadInput(format!("bad army in user row {line:?}")))?;
        humans.push(Human {
            number: c["number"].parse().map_err(|_| bad_row(line))?,
            callsign: c["callsign"].to_owned(),
            ping: c["ping"].parse().map_err(|_| bad_row(line))?,
            score: c["score"].parse().map_err(|_| bad_row(line))?,
            belligerent,
            aircraft: c.name("aircraft").map(|m| m.as_str().trim().to_owned()),
        });
    }
    Ok(humans)
}

fn bad_row(line: &str) -> Error {
    Error::BadInput(format!("malformed user row {line:?}"))
}

fn parse_humans_statistics(lines: &[String]) -> Result<Vec<HumanStatistics>, Error> {
    let mut result = Vec::new();
    let mut current: Option<HumanStatistics> = None;

    for line in lines {
        let line = line.trim();
        if line.starts_with('-') {
            if let Some(stats) = current.take() {
                result.push(stats);
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("Name:") {
            if let Some(stats) = current.take() {
                result.push(stats);
            }
            current = Some(HumanStatistics {
                callsign: rest.trim().to_owned(),
                score: 0,
                kills: 0,
                deaths: 0,
            });
        } else if let Some(stats) = current.as_mut() {
            if let Some(rest) = line.strip_prefix("Score:") {
                stats.score = rest.trim().parse().unwrap_or(0);
            } else if let Some(rest) = line.strip_prefix("Kills:") {
                stats.kills = rest.trim().parse().unwrap_or(0);
            } else if let Some(rest) = line.strip_prefix("Deaths:") {
                stats.deaths = rest.trim().parse().unwrap_or(0);
            }
        }
    }
    if let Some(stats) = current.take() {
        result.push(stats);
    }
    Ok(result)
}

fn parse_mission_info(lines: &[String]) -> Result<MissionInfo, Error> {
    for line in lines {
        let line = line.trim();
        if line == "Mission NOT loaded" {
            return Ok(MissionInfo { status: MissionStatus::NotLoaded, mission: None });
        }
        if let Some(rest) = line.strip_prefix("Mission: ") {
            if let Some(mission) = rest.strip_suffix(" is Loaded") {
                return Ok(MissionInfo {
                    status: MissionStatus::Loaded,
                    mission: Some(mission.to_owned()),
                });
            }
            if let Some(mission) = rest.strip_suffix(" is Playing") {
                return Ok(MissionInfo {
                    status: MissionStatus::Playing,
                    mission: Some(mission.to_owned()),
                });
            }
        }
    }
    Err(Error::BadInput(format!("malformed mission response {lines:?}")))
}

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;
