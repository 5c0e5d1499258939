// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data carried through the streaming facilities: chat messages, parsed game
//! events, and the timestamped envelope every sink receives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::radar::AllMovingActorsPositions;

/// A chat line received over the DS console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Absent for messages originated by the server itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub body: String,
}

/// A map location referenced by a game-log event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub x: f64,
    pub y: f64,
}

/// One of the two sides of a mission, plus the neutral default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Belligerent {
    None,
    Red,
    Blue,
}

impl Belligerent {
    /// Map the numeric id used by console commands and the game log.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::None),
            1 => Some(Self::Red),
            2 => Some(Self::Blue),
            _ => None,
        }
    }

    pub fn to_id(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Red => 1,
            Self::Blue => 2,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "red" => Some(Self::Red),
            "blue" => Some(Self::Blue),
            _ => None,
        }
    }
}

/// A parsed game event.
///
/// Produced by the game-log parser and, for the two human-connection
/// variants, by the console client as well. The console is authoritative for
/// those two; the events facility suppresses the game-log duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    HumanHasConnected {
        callsign: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
    HumanHasDisconnected {
        #[serde(skip_serializing_if = "Option::is_none")]
        callsign: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
    HumanHasSelectedArmy {
        callsign: String,
        army: Belligerent,
        pos: MapPoint,
    },
    HumanAircraftHasTookOff {
        callsign: String,
        aircraft: String,
        pos: MapPoint,
    },
    HumanAircraftHasLanded {
        callsign: String,
        aircraft: String,
        pos: MapPoint,
    },
    MissionIsPlaying {
        mission: String,
    },
    MissionHasBegun,
    MissionHasEnded,
}

impl GameEvent {
    /// Whether this event also arrives via the console client, which is the
    /// authoritative source for it.
    pub fn is_human_connection_event(&self) -> bool {
        matches!(
            self,
            Self::HumanHasConnected { .. } | Self::HumanHasDisconnected { .. }
        )
    }
}

/// Payload kinds flowing through the streaming facilities.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamPayload {
    Chat(ChatMessage),
    Event(GameEvent),
    NotParsed { value: String },
    Radar(AllMovingActorsPositions),
}

/// The envelope every sink receives: the payload plus the UTC instant at
/// which the item was accepted into its facility's queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimestampedData {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: StreamPayload,
}

impl TimestampedData {
    pub fn new(data: StreamPayload) -> Self {
        Self { timestamp: Utc::now(), data }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
