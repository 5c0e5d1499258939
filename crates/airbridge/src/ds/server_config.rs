// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loader for the subset of the DS `confs.ini` the bridge depends on.
//!
//! Key mapping follows the DS itself: the game connection port lives under
//! `[NET] localPort`, the console port under `[Console] IP` (the DS really
//! does store the port under that key), the device link port under
//! `[DeviceLink] port`, and the game log path under `[game] eventlog`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

/// Parsed DS configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// UDP game connection port (`[NET] localPort`).
    pub connection_port: u16,
    /// TCP console port (`[Console] IP`).
    pub console_port: u16,
    /// UDP device link port (`[DeviceLink] port`).
    pub device_link_port: u16,
    /// Game log path (`[game] eventlog`), relative to the DS root dir.
    pub game_log_path: PathBuf,
}

impl ServerConfig {
    pub fn from_ini_str(text: &str) -> anyhow::Result<Self> {
        let sections = parse_ini(text);

        let connection_port =
            port(&sections, "net", "localport").context("missing [NET] localPort")?;

        let Some(console_port) = port(&sections, "console", "ip") else {
            bail!(
                "server's console is disabled, please configure it to proceed \
                 ([Console] IP in confs.ini)"
            );
        };
        let Some(device_link_port) = port(&sections, "devicelink", "port") else {
            bail!(
                "server's device link is disabled, please configure it to proceed \
                 ([DeviceLink] port in confs.ini)"
            );
        };

        let game_log_path = sections
            .get("game")
            .and_then(|s| s.get("eventlog"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("eventlog.lst"));

        Ok(Self { connection_port, console_port, device_link_port, game_log_path })
    }

    pub fn from_ini_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read DS config '{}'", path.display()))?;
        Self::from_ini_str(&text)
            .with_context(|| format!("failed to parse DS config '{}'", path.display()))
    }
}

fn port(
    sections: &HashMap<String, HashMap<String, String>>,
    section: &str,
    key: &str,
) -> Option<u16> {
    let value = sections.get(section)?.get(key)?;
    value.parse().ok().filter(|p| *p != 0)
}

/// Minimal ini reader: `[section]` headers, `key = value` pairs, `;` and `#`
/// comments. Section and key names are lowercased; values keep their case.
fn parse_ini(text: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current = String::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = name.trim().to_lowercase();
            sections.entry(current.clone()).or_default();
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        sections
            .entry(current.clone())
            .or_default()
            .insert(key.trim().to_lowercase(), value.trim().to_owned());
    }

    sections
}

#[cfg(test)]
#[path = "server_config_tests.rs"]
mod tests;
