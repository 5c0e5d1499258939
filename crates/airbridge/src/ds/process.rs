// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervision of the DS child process.
//!
//! Spawns the DS (through wine on non-Windows), drives the boot handshake on
//! its stdout, fans stdout/stderr out to string handlers, verifies its
//! listeners came up, and coordinates termination.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::framing::{read_until_end, read_until_line, StringHandler};
use super::listeners;
use super::server_config::ServerConfig;
use crate::error::Error;

pub const DEFAULT_CONFIG_NAME: &str = "confs.ini";
pub const DEFAULT_START_SCRIPT_NAME: &str = "server.cmd";

const BOOT_INPUT_LINE: &str = "host\n";
const BOOT_STOP_LINE: &str = "localhost: Server\n";

/// Stream handlers wired before `start`.
#[derive(Default, Clone)]
pub struct StreamHandlers {
    pub stdout: Option<StringHandler>,
    pub stderr: Option<StringHandler>,
    pub prompt: Option<StringHandler>,
}

/// The supervised DS instance. One spawn per instance.
pub struct DedicatedServer {
    pub exe_path: PathBuf,
    pub root_dir: PathBuf,
    pub config_path: PathBuf,
    pub start_script_path: PathBuf,
    pub config: ServerConfig,
    wine_bin_path: String,
    handlers: StreamHandlers,
    started: AtomicBool,
    pid: AtomicU32,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stream_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DedicatedServer {
    /// Resolve and validate paths, then load the DS configuration.
    pub fn new(
        exe_path: &Path,
        config_path: Option<&str>,
        start_script_path: Option<&str>,
        wine_bin_path: &str,
        handlers: StreamHandlers,
    ) -> anyhow::Result<Self> {
        let exe_path = normalize_exe_path(exe_path)?;
        let root_dir = exe_path
            .parent()
            .map(Path::to_path_buf)
            .context("dedicated server's executable has no parent directory")?;
        let config_path =
            normalize_aux_path(&root_dir, config_path, DEFAULT_CONFIG_NAME, "config")?;
        let start_script_path = normalize_aux_path(
            &root_dir,
            start_script_path,
            DEFAULT_START_SCRIPT_NAME,
            "start script",
        )?;
        let config = ServerConfig::from_ini_file(&config_path)?;

        Ok(Self {
            exe_path,
            root_dir,
            config_path,
            start_script_path,
            config,
            wine_bin_path: wine_bin_path.to_owned(),
            handlers,
            started: AtomicBool::new(false),
            pid: AtomicU32::new(0),
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            stream_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Absolute path of the game log, resolved against the DS root dir.
    pub fn game_log_path(&self) -> PathBuf {
        let path = &self.config.game_log_path;
        if path.is_absolute() {
            path.clone()
        } else {
            self.root_dir.join(path)
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Spawn the DS and drive it through the boot handshake.
    ///
    /// Stream handler tasks are attached only after the handshake; on any
    /// failure the child is killed and awaited before the error propagates.
    pub async fn start(&self) -> Result<(), Error> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::Internal("dedicated server was already started".into()));
        }

        match self.boot().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut child = self.child.lock().await;
                if let Some(child) = child.as_mut() {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
                Err(e)
            }
        }
    }

    async fn boot(&self) -> Result<(), Error> {
        let mut child = self.spawn_process().map_err(|e| Error::Internal(e.to_string()))?;
        self.pid.store(child.id().unwrap_or(0), Ordering::Release);

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("dedicated server's stdout is not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("dedicated server's stderr is not piped".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Internal("dedicated server's stdin is not piped".into()))?;
        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);

        // Consume stderr whenever a handler exists; otherwise close the pipe
        // so the child cannot block on it.
        if self.handlers.stderr.is_some() {
            let handler = self.handlers.stderr.clone();
            let task = tokio::spawn(async move {
                read_until_end(stderr, "STDERR", handler.as_ref(), None).await;
            });
            self.stream_tasks.lock().await.push(task);
        } else {
            drop(stderr);
        }

        self.input(BOOT_INPUT_LINE).await?;
        read_until_line(
            &mut stdout,
            "STDOUT",
            BOOT_INPUT_LINE,
            BOOT_STOP_LINE,
            self.handlers.stdout.as_ref(),
            self.handlers.prompt.as_ref(),
        )
        .await?;

        // The steady-state stdout reader starts only after the handshake.
        if self.handlers.stdout.is_some() || self.handlers.prompt.is_some() {
            let output = self.handlers.stdout.clone();
            let prompt = self.handlers.prompt.clone();
            let task = tokio::spawn(async move {
                read_until_end(stdout, "STDOUT", output.as_ref(), prompt.as_ref()).await;
            });
            self.stream_tasks.lock().await.push(task);
        } else {
            drop(stdout);
        }

        Ok(())
    }

    fn spawn_process(&self) -> anyhow::Result<Child> {
        let mut command = if cfg!(windows) {
            Command::new(&self.exe_path)
        } else {
            let mut command = Command::new(&self.wine_bin_path);
            command.arg(&self.exe_path);
            command
        };
        command
            .arg("-conf")
            .arg(&self.config_path)
            .arg("-cmd")
            .arg(&self.start_script_path)
            .current_dir(&self.root_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        // Detach from the terminal's process group so signals meant for the
        // bridge do not reach the DS.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().with_context(|| {
            format!("failed to spawn dedicated server '{}'", self.exe_path.display())
        })?;
        info!(pid = child.id(), "dedicated server was spawned");
        Ok(child)
    }

    /// Poll the child's open inet listeners until they match the configured
    /// game, console, and device-link ports.
    pub async fn wait_network_listeners(
        &self,
        timeout: Duration,
        poll_period: Duration,
    ) -> Result<(), Error> {
        let pid = self
            .pid()
            .ok_or_else(|| Error::Internal("dedicated server is not running".into()))?;
        let expected: BTreeSet<u16> = [
            self.config.connection_port,
            self.config.console_port,
            self.config.device_link_port,
        ]
        .into();

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match listeners::inet_listener_ports(pid) {
                Ok(actual) if actual == expected => return Ok(()),
                Ok(actual) => {
                    debug!(?actual, ?expected, "dedicated server ports not ready");
                }
                Err(e) => debug!("listener poll failed: {e}"),
            }
            if tokio::time::Instant::now() + poll_period > deadline {
                return Err(Error::PortsNotOpen);
            }
            tokio::time::sleep(poll_period).await;
        }
    }

    /// Append bytes to the DS stdin and flush.
    pub async fn input(&self, s: &str) -> Result<(), Error> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin
            .as_mut()
            .ok_or_else(|| Error::Internal("dedicated server's stdin is closed".into()))?;
        stdin.write_all(s.as_bytes()).await.map_err(Error::from_transport)?;
        stdin.flush().await.map_err(Error::from_transport)
    }

    /// Politely ask the DS to shut down.
    pub async fn ask_exit(&self) -> Result<(), Error> {
        self.input("exit\n").await
    }

    /// OS-level terminate, if the DS is still running.
    pub async fn terminate(&self) {
        let Some(pid) = self.pid() else {
            return;
        };
        let mut child = self.child.lock().await;
        let Some(child) = child.as_mut() else {
            return;
        };
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Ok(pid) = i32::try_from(pid) {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            let _ = child.start_kill();
        }
        warn!("dedicated server was asked to terminate");
    }

    /// Join all stream handler tasks, then await the child's exit code.
    pub async fn wait_finished(&self) -> Result<i32, Error> {
        let tasks: Vec<JoinHandle<()>> = self.stream_tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let mut child = self.child.lock().await;
        let child = child
            .as_mut()
            .ok_or_else(|| Error::Internal("dedicated server was never spawned".into()))?;
        let status = child.wait().await.map_err(|e| Error::Internal(e.to_string()))?;
        let code = status.code().unwrap_or(-1);
        info!(code, "dedicated server has exited");
        Ok(code)
    }
}

fn normalize_exe_path(initial: &Path) -> anyhow::Result<PathBuf> {
    let path = std::fs::canonicalize(initial).with_context(|| {
        format!("dedicated server's executable does not exist (path='{}')", initial.display())
    })?;
    Ok(path)
}

fn normalize_aux_path(
    root_dir: &Path,
    initial: Option<&str>,
    default_name: &str,
    what: &str,
) -> anyhow::Result<PathBuf> {
    let path = match initial {
        None => root_dir.join(default_name),
        Some(s) if s.contains(std::path::MAIN_SEPARATOR) => PathBuf::from(s),
        Some(s) => root_dir.join(s),
    };
    if !path.exists() {
        bail!("dedicated server's {what} does not exist (path='{}')", path.display());
    }
    Ok(path)
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
