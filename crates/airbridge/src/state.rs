// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent bridge state, kept in a small YAML file next to the config.
//!
//! Carries the watchdog's tailing position across restarts; rewritten on
//! clean shutdown.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::watchdog::WatchdogState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    #[serde(default)]
    pub game_log_watch_dog: WatchdogState,
}

/// Load the state file; a missing file is a fresh start, not an error.
pub fn load_state(path: &Path) -> anyhow::Result<PersistentState> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PersistentState::default());
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("failed to read state file '{}'", path.display())
            });
        }
    };
    serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse state file '{}'", path.display()))
}

pub fn save_state(state: &PersistentState, path: &Path) -> anyhow::Result<()> {
    let text = serde_yaml::to_string(state)?;
    std::fs::write(path, text)
        .with_context(|| format!("failed to write state file '{}'", path.display()))
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
