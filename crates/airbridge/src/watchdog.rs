// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tail of the DS game log, resilient to rotation and restarts.
//!
//! Runs on a dedicated OS thread and delivers each newly appended line
//! (trailing whitespace stripped) to synchronous subscribers. The durable
//! `{device, inode, offset}` state lets a restart resume exactly where the
//! previous run stopped; any identity change resets the offset to zero.
//! Wakeups come from a `notify` watcher on the parent directory, with a
//! polling fallback.

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Handler invoked with each appended line, on the watcher thread.
pub type LineHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Durable tailing position, persisted across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogState {
    pub device: Option<u64>,
    pub inode: Option<u64>,
    #[serde(default)]
    pub offset: u64,
}

const DEFAULT_POLLING_PERIOD: Duration = Duration::from_millis(500);

enum Interrupted {
    Stopped,
    FileVanished,
}

pub struct TextFileWatchDog {
    path: PathBuf,
    state: Arc<Mutex<WatchdogState>>,
    polling_period: Duration,
    stop: AtomicBool,
    subscribers: Mutex<Vec<LineHandler>>,
}

impl TextFileWatchDog {
    pub fn new(path: PathBuf, state: Arc<Mutex<WatchdogState>>) -> Self {
        Self {
            path,
            state,
            polling_period: DEFAULT_POLLING_PERIOD,
            stop: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_polling_period(mut self, period: Duration) -> Self {
        self.polling_period = period;
        self
    }

    pub fn subscribe(&self, subscriber: LineHandler) {
        self.subscribers.lock().push(subscriber);
    }

    pub fn unsubscribe(&self, subscriber: &LineHandler) {
        self.subscribers.lock().retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    /// Ask the watcher thread to stop at its next wakeup.
    pub fn stop(&self) {
        info!(path = %self.path.display(), "asking game log watch dog to stop");
        self.stop.store(true, Ordering::Release);
    }

    /// Blocking tail loop; run this on its own thread.
    pub fn run(&self) {
        info!(path = %self.path.display(), "game log watch dog has started");

        let (wake_tx, wake_rx) = std::sync::mpsc::channel::<()>();
        let _watcher = self.setup_notify_watcher(wake_tx);

        loop {
            let Err(interrupted) = self.tail(&wake_rx) else {
                continue;
            };
            match interrupted {
                Interrupted::Stopped => break,
                Interrupted::FileVanished => self.clear_state(),
            }
        }

        info!(path = %self.path.display(), "game log watch dog has stopped");
    }

    /// Watch the parent directory so file creation wakes the loop too.
    fn setup_notify_watcher(&self, wake_tx: Sender<()>) -> Option<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
            let _ = wake_tx.send(());
        })
        .ok()?;

        let watch_path = self.path.parent().unwrap_or(self.path.as_path());
        if let Err(e) = watcher.watch(watch_path, RecursiveMode::NonRecursive) {
            warn!("notify watch failed, falling back to polling only: {e}");
            return None;
        }
        Some(watcher)
    }

    /// Tail the file until stop or until its identity changes.
    fn tail(&self, wake_rx: &Receiver<()>) -> Result<(), Interrupted> {
        self.wait_for_file(wake_rx)?;
        self.reconcile_identity()?;

        let offset = self.state.lock().offset;
        let file = std::fs::File::open(&self.path).map_err(|_| Interrupted::FileVanished)?;

        // Truncation with an unchanged identity: start over.
        if let Ok(meta) = file.metadata() {
            if meta.len() < offset {
                self.state.lock().offset = 0;
            }
        }

        let mut reader = BufReader::new(file);
        let mut offset = self.state.lock().offset;
        reader.seek(SeekFrom::Start(offset)).map_err(|_| Interrupted::FileVanished)?;

        let mut line = String::new();
        loop {
            if self.stop.load(Ordering::Acquire) {
                return Err(Interrupted::Stopped);
            }
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    self.ensure_file_unchanged()?;
                    self.sleep(wake_rx)?;
                    let _ = reader.seek(SeekFrom::Start(offset));
                }
                Ok(n) if line.ends_with('\n') => {
                    offset += n as u64;
                    self.state.lock().offset = offset;
                    self.dispatch(line.trim_end());
                }
                Ok(_) => {
                    // Incomplete trailing fragment; wait for its newline.
                    let _ = reader.seek(SeekFrom::Start(offset));
                    self.ensure_file_unchanged()?;
                    self.sleep(wake_rx)?;
                }
                Err(e) => {
                    error!("game log read failed: {e}");
                    return Err(Interrupted::FileVanished);
                }
            }
        }
    }

    fn wait_for_file(&self, wake_rx: &Receiver<()>) -> Result<(), Interrupted> {
        if !self.path.exists() {
            self.clear_state();
        }
        while !self.path.exists() {
            self.sleep(wake_rx)?;
        }
        Ok(())
    }

    /// Record the file's identity, resetting the offset when it changed.
    fn reconcile_identity(&self) -> Result<(), Interrupted> {
        let (device, inode) =
            file_identity(&self.path).ok_or(Interrupted::FileVanished)?;
        let mut state = self.state.lock();

        match (state.device, state.inode) {
            (Some(d), Some(i)) if d == device && i == inode => {}
            (Some(_), Some(_)) => {
                state.device = Some(device);
                state.inode = Some(inode);
                state.offset = 0;
            }
            _ => {
                state.device = Some(device);
                state.inode = Some(inode);
            }
        }
        Ok(())
    }

    fn ensure_file_unchanged(&self) -> Result<(), Interrupted> {
        let (device, inode) =
            file_identity(&self.path).ok_or(Interrupted::FileVanished)?;
        let state = self.state.lock();
        if state.device == Some(device) && state.inode == Some(inode) {
            Ok(())
        } else {
            Err(Interrupted::FileVanished)
        }
    }

    fn clear_state(&self) {
        let mut state = self.state.lock();
        state.device = None;
        state.inode = None;
        state.offset = 0;
    }

    fn sleep(&self, wake_rx: &Receiver<()>) -> Result<(), Interrupted> {
        match wake_rx.recv_timeout(self.polling_period) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            // No notify watcher; plain polling.
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(self.polling_period),
        }
        if self.stop.load(Ordering::Acquire) {
            Err(Interrupted::Stopped)
        } else {
            Ok(())
        }
    }

    fn dispatch(&self, line: &str) {
        for subscriber in self.subscribers.lock().iter() {
            subscriber(line);
        }
    }
}

#[cfg(unix)]
fn file_identity(path: &Path) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::symlink_metadata(path).ok()?;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(path: &Path) -> Option<(u64, u64)> {
    let _ = std::fs::symlink_metadata(path).ok()?;
    Some((0, 0))
}

#[cfg(test)]
#[path = "watchdog_tests.rs"]
mod tests;
