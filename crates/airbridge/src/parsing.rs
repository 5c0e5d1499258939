// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Game-log line parser.
//!
//! The DS appends human-readable event lines to its game log; each line
//! starts with a bracketed timestamp followed by one of a fixed set of
//! sentence shapes. Lines that match none of them are reported as not
//! parsed and flow to the `not_parsed_strings` facility unchanged.

use regex::Regex;

use crate::event::{Belligerent, GameEvent, MapPoint};

/// Marker returned for lines the parser does not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotParsed;

/// Regex-backed parser for the DS game log.
pub struct GameLogParser {
    timestamp: Regex,
    connected: Regex,
    disconnected: Regex,
    selected_army: Regex,
    took_off: Regex,
    landed: Regex,
    mission_playing: Regex,
    mission_begin: Regex,
    mission_end: Regex,
}

impl Default for GameLogParser {
    fn default() -> Self {
        Self::new()
    }
}

impl GameLogParser {
    pub fn new() -> Self {
        // The expressions are fixed and known-valid; a failure here would be
        // a programming error caught by the unit tests.
        #[allow(clippy::unwrap_used)]
        fn re(pattern: &str) -> Regex {
            Regex::new(pattern).unwrap()
        }

        Self {
            timestamp: re(r"^\[[^\]]+\]\s+"),
            connected: re(r"^(?P<callsign>.+) has connected$"),
            disconnected: re(r"^(?P<callsign>.+) has disconnected$"),
            selected_army: re(
                r"^(?P<callsign>.+) selected army (?P<army>\w+) at (?P<x>[-\d.]+) (?P<y>[-\d.]+)$",
            ),
            took_off: re(
                r"^(?P<callsign>.+):(?P<aircraft>\S+) took off at (?P<x>[-\d.]+) (?P<y>[-\d.]+)$",
            ),
            landed: re(
                r"^(?P<callsign>.+):(?P<aircraft>\S+) landed at (?P<x>[-\d.]+) (?P<y>[-\d.]+)$",
            ),
            mission_playing: re(r"^Mission: (?P<mission>.+) is Playing$"),
            mission_begin: re(r"^Mission BEGIN$"),
            mission_end: re(r"^Mission END$"),
        }
    }

    /// Parse one stripped game-log line.
    pub fn parse(&self, line: &str) -> Result<GameEvent, NotParsed> {
        let body = self.timestamp.replace(line, "");
        let body = body.as_ref();

        if self.mission_begin.is_match(body) {
            return Ok(GameEvent::MissionHasBegun);
        }
        if self.mission_end.is_match(body) {
            return Ok(GameEvent::MissionHasEnded);
        }
        if let Some(c) = self.mission_playing.captures(body) {
            return Ok(GameEvent::MissionIsPlaying { mission: c["mission"].to_owned() });
        }
        if let Some(c) = self.took_off.captures(body) {
            return Ok(GameEvent::HumanAircraftHasTookOff {
                callsign: c["callsign"].to_owned(),
                aircraft: c["aircraft"].to_owned(),
                pos: point(&c)?,
            });
        }
        if let Some(c) = self.landed.captures(body) {
            return Ok(GameEvent::HumanAircraftHasLanded {
                callsign: c["callsign"].to_owned(),
                aircraft: c["aircraft"].to_owned(),
                pos: point(&c)?,
            });
        }
        if let Some(c) = self.selected_army.captures(body) {
            let army = Belligerent::from_name(&c["army"]).ok_or(NotParsed)?;
            return Ok(GameEvent::HumanHasSelectedArmy {
                callsign: c["callsign"].to_owned(),
                army,
                pos: point(&c)?,
            });
        }
        if let Some(c) = self.connected.captures(body) {
            return Ok(GameEvent::HumanHasConnected {
                callsign: c["callsign"].to_owned(),
                channel: None,
                address: None,
            });
        }
        if let Some(c) = self.disconnected.captures(body) {
            return Ok(GameEvent::HumanHasDisconnected {
                callsign: Some(c["callsign"].to_owned()),
                channel: None,
                address: None,
            });
        }

        Err(NotParsed)
    }
}

fn point(captures: &regex::Captures<'_>) -> Result<MapPoint, NotParsed> {
    let x = captures["x"].parse().map_err(|_| NotParsed)?;
    let y = captures["y"].parse().map_err(|_| NotParsed)?;
    Ok(MapPoint { x, y })
}

#[cfg(test)]
#[path = "parsing_tests.rs"]
mod tests;
