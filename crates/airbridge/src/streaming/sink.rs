// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The sink capability and the config-driven sink loader.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::bus::BusClient;
use crate::event::TimestampedData;

/// An output endpoint registered with a streaming facility.
///
/// `write` failures are caught and logged by the facility loop; they never
/// tear the facility down. `plug_in`/`unplug` bracket the sink's lifecycle
/// around its subscriptions.
pub trait StreamingSink: Send + Sync {
    fn write<'a>(
        &'a self,
        item: &'a TimestampedData,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

    fn plug_in(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn unplug(&self) {}

    fn wait_unplugged<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}

pub type SharedSink = Arc<dyn StreamingSink>;

/// Per-sink options passed verbatim to `facility.subscribe`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionOptions {
    /// Radar refresh period in seconds. Ignored by the other facilities.
    pub refresh_period: Option<f64>,
}

/// Arguments of the `file` sink shortcut.
#[derive(Debug, Deserialize)]
struct FileSinkArgs {
    path: std::path::PathBuf,
}

/// Arguments of the `bus` sink shortcut.
#[derive(Debug, Deserialize)]
struct BusSinkArgs {
    subject: String,
}

/// Build a sink from its configured shortcut name and args.
pub fn load_sink(
    name: &str,
    args: &serde_yaml::Value,
    bus: Option<&BusClient>,
) -> anyhow::Result<SharedSink> {
    match name {
        "file" => {
            let args: FileSinkArgs = serde_yaml::from_value(args.clone())
                .context("bad args for 'file' sink")?;
            Ok(Arc::new(super::file_sink::JsonFileSink::new(args.path)))
        }
        "bus" => {
            let args: BusSinkArgs = serde_yaml::from_value(args.clone())
                .context("bad args for 'bus' sink")?;
            let bus = bus.context("'bus' sink configured but no bus connection")?;
            Ok(Arc::new(super::bus_sink::BusSink::new(bus.clone(), args.subject)))
        }
        other => bail!("unknown streaming sink '{other}'"),
    }
}

#[cfg(test)]
#[path = "sink_tests.rs"]
mod tests;
