// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSON-lines file sink.

use std::fs::File;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::debug;

use super::sink::StreamingSink;
use crate::event::TimestampedData;

struct OpenFile {
    file: File,
    device: u64,
    inode: u64,
}

/// Writes one JSON object per line. If the target is rotated away (device or
/// inode change, or removal), the next write reopens it.
pub struct JsonFileSink {
    path: PathBuf,
    open: Mutex<Option<OpenFile>>,
}

impl JsonFileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path, open: Mutex::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(&self) -> anyhow::Result<OpenFile> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create sink directory '{}'", parent.display())
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open sink file '{}'", self.path.display()))?;
        let (device, inode) = identity(&self.path).unwrap_or((0, 0));
        Ok(OpenFile { file, device, inode })
    }

    fn write_line(&self, line: &str) -> anyhow::Result<()> {
        let mut open = self.open.lock();

        let reopen = match open.as_ref() {
            None => true,
            Some(current) => match identity(&self.path) {
                Some((device, inode)) => device != current.device || inode != current.inode,
                None => true, // rotated away
            },
        };
        if reopen {
            debug!(path = %self.path.display(), "reopening streaming sink file");
            *open = Some(self.open_file()?);
        }

        let Some(open) = open.as_mut() else {
            anyhow::bail!("sink file is not open");
        };
        open.file.write_all(line.as_bytes())?;
        open.file.write_all(b"\n")?;
        open.file.flush()?;
        Ok(())
    }
}

impl StreamingSink for JsonFileSink {
    fn write<'a>(
        &'a self,
        item: &'a TimestampedData,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let line = serde_json::to_string(item)?;
            self.write_line(&line)
        })
    }

    fn plug_in(&self) -> anyhow::Result<()> {
        *self.open.lock() = Some(self.open_file()?);
        Ok(())
    }

    fn unplug(&self) {
        if let Some(mut open) = self.open.lock().take() {
            let _ = open.file.flush();
        }
    }
}

#[cfg(unix)]
fn identity(path: &Path) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::symlink_metadata(path).ok()?;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn identity(path: &Path) -> Option<(u64, u64)> {
    let _ = std::fs::symlink_metadata(path).ok()?;
    Some((0, 0))
}

#[cfg(test)]
#[path = "file_sink_tests.rs"]
mod tests;
