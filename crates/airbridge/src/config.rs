// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;

use crate::bus::BusConfig;
use crate::streaming::SubscriptionOptions;

/// Bridge for the IL-2 FB dedicated server.
#[derive(Debug, Parser)]
#[command(name = "airbridge", version, about)]
pub struct Cli {
    /// Path to the config file.
    #[arg(short = 'c', long = "config", env = "AIRBRIDGE_CONFIG", default_value = "airbridge.yml")]
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub ds: DsConfig,
    /// Where the persistent bridge state lives.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Messaging-bus connection; required when any `bus` sink is configured.
    #[serde(default)]
    pub nats: Option<BusConfig>,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DsConfig {
    /// Path to the DS executable.
    pub exe_path: PathBuf,
    /// DS config, name or path; defaults to `confs.ini` next to the exe.
    #[serde(default)]
    pub config_path: Option<String>,
    /// Start script, name or path; defaults to `server.cmd` next to the exe.
    #[serde(default)]
    pub start_script_path: Option<String>,
    /// Wine binary used to run the DS on non-Windows hosts.
    #[serde(default = "default_wine_bin_path")]
    pub wine_bin_path: String,
    #[serde(default)]
    pub console_proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub device_link_proxy: Option<ProxyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    pub bind: BindConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindConfig {
    #[serde(default = "default_bind_address")]
    pub address: String,
    pub port: u16,
}

impl BindConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        (self.address.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve bind address '{}'", self.address))?
            .next()
            .with_context(|| format!("bind address '{}' resolves to nothing", self.address))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Sink configurations keyed by shortcut name (`file`, `bus`).
pub type SinkMap = BTreeMap<String, SinkConfig>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamingConfig {
    #[serde(default)]
    pub chat: SinkMap,
    #[serde(default)]
    pub events: SinkMap,
    #[serde(default)]
    pub not_parsed_strings: SinkMap,
    #[serde(default)]
    pub radar: SinkMap,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    /// Constructor arguments, passed to the sink loader as-is.
    #[serde(default)]
    pub args: serde_yaml::Value,
    /// Passed verbatim to `facility.subscribe`.
    #[serde(default)]
    pub subscription_options: SubscriptionOptions,
}

pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config '{}'", path.display()))?;
    let config: Config = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse config '{}'", path.display()))?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => bail!("invalid logging format '{other}' (expected text or json)"),
        }

        for proxy in [&self.ds.console_proxy, &self.ds.device_link_proxy].into_iter().flatten() {
            if proxy.bind.port == 0 {
                bail!("proxy bind port must not be 0");
            }
        }

        if self.nats.is_none() && self.has_bus_sink() {
            bail!("a 'bus' streaming sink is configured but the 'nats' section is missing");
        }
        Ok(())
    }

    fn has_bus_sink(&self) -> bool {
        [
            &self.streaming.chat,
            &self.streaming.events,
            &self.streaming.not_parsed_strings,
            &self.streaming.radar,
        ]
        .iter()
        .any(|sinks| sinks.contains_key("bus"))
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("airbridge.state")
}

fn default_wine_bin_path() -> String {
    "wine".to_owned()
}

fn default_bind_address() -> String {
    "localhost".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_format() -> String {
    "text".to_owned()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
