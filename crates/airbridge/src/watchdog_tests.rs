// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{TextFileWatchDog, WatchdogState};

fn identity(path: &Path) -> (u64, u64) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(path).unwrap_or_else(|e| panic!("stat: {e}"));
        (meta.dev(), meta.ino())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        (0, 0)
    }
}

struct Harness {
    watchdog: Arc<TextFileWatchDog>,
    seen: Arc<Mutex<Vec<String>>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Harness {
    fn start(path: &Path, state: WatchdogState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let watchdog = Arc::new(
            TextFileWatchDog::new(path.to_path_buf(), state)
                .with_polling_period(Duration::from_millis(10)),
        );

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            watchdog.subscribe(Arc::new(move |line: &str| seen.lock().push(line.to_owned())));
        }

        let thread = {
            let watchdog = Arc::clone(&watchdog);
            std::thread::spawn(move || watchdog.run())
        };

        Self { watchdog, seen, thread: Some(thread) }
    }

    fn wait_for(&self, count: usize) {
        for _ in 0..200 {
            if self.seen.lock().len() >= count {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.watchdog.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let lines = self.seen.lock().clone();
        lines
    }
}

#[test]
fn resumes_from_persisted_offset() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("eventlog.lst");
    std::fs::write(&path, "already seen line\nfresh line one\nfresh line two\n")?;

    let offset = "already seen line\n".len() as u64;
    let (device, inode) = identity(&path);
    let state = WatchdogState { device: Some(device), inode: Some(inode), offset };

    let harness = Harness::start(&path, state);
    harness.wait_for(2);

    assert_eq!(harness.finish(), vec!["fresh line one".to_owned(), "fresh line two".to_owned()]);
    Ok(())
}

#[test]
fn identity_change_resets_to_start() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("eventlog.lst");
    std::fs::write(&path, "first\nsecond\n")?;

    let (device, inode) = identity(&path);
    // A stale inode simulates rotation before this run.
    let state = WatchdogState { device: Some(device), inode: Some(inode + 1), offset: 128 };

    let harness = Harness::start(&path, state);
    harness.wait_for(2);

    assert_eq!(harness.finish(), vec!["first".to_owned(), "second".to_owned()]);
    Ok(())
}

#[test]
fn emits_lines_appended_while_running() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("eventlog.lst");
    std::fs::write(&path, "")?;

    let harness = Harness::start(&path, WatchdogState::default());
    std::thread::sleep(Duration::from_millis(50));

    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
        file.write_all(b"appended one  \nappended two\n")?;
    }
    harness.wait_for(2);

    // Trailing whitespace is stripped before delivery.
    assert_eq!(harness.finish(), vec!["appended one".to_owned(), "appended two".to_owned()]);
    Ok(())
}

#[test]
fn trailing_fragment_waits_for_its_newline() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("eventlog.lst");
    std::fs::write(&path, "whole\npartial")?;

    let harness = Harness::start(&path, WatchdogState::default());
    harness.wait_for(1);
    assert_eq!(harness.seen.lock().clone(), vec!["whole".to_owned()]);

    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
        file.write_all(b" completed\n")?;
    }
    harness.wait_for(2);

    assert_eq!(
        harness.finish(),
        vec!["whole".to_owned(), "partial completed".to_owned()]
    );
    Ok(())
}

#[test]
fn waits_for_file_to_appear() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("eventlog.lst");

    let harness = Harness::start(&path, WatchdogState::default());
    std::thread::sleep(Duration::from_millis(50));
    std::fs::write(&path, "born late\n")?;
    harness.wait_for(1);

    assert_eq!(harness.finish(), vec!["born late".to_owned()]);
    Ok(())
}

#[test]
fn offset_is_tracked_in_shared_state() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("eventlog.lst");
    std::fs::write(&path, "abc\n")?;

    let state = Arc::new(Mutex::new(WatchdogState::default()));
    let watchdog = Arc::new(
        TextFileWatchDog::new(path.clone(), Arc::clone(&state))
            .with_polling_period(Duration::from_millis(10)),
    );
    let thread = {
        let watchdog = Arc::clone(&watchdog);
        std::thread::spawn(move || watchdog.run())
    };

    for _ in 0..200 {
        if state.lock().offset == 4 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    watchdog.stop();
    let _ = thread.join();

    let state = *state.lock();
    assert_eq!(state.offset, 4);
    assert!(state.device.is_some());
    assert!(state.inode.is_some());
    Ok(())
}
