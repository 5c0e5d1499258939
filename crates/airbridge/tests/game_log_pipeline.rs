// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end slice: a fake DS process boots, appends to its game log, and
//! the watchdog → worker → facility → file-sink chain lands the items in
//! JSON files.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use airbridge::ds::game_log::GameLogWorker;
use airbridge::ds::process::{DedicatedServer, StreamHandlers};
use airbridge::parsing::GameLogParser;
use airbridge::streaming::facilities::NotParsedStringsStreamingFacility;
use airbridge::streaming::file_sink::JsonFileSink;
use airbridge::streaming::SharedSink;
use airbridge::watchdog::{TextFileWatchDog, WatchdogState};

const CONFS_INI: &str = "\
[NET]
localPort=21000
[Console]
IP=20000
[DeviceLink]
port=10000
[game]
eventlog=eventlog.lst
";

const FAKE_DS: &str = "#!/bin/sh\n\
                       printf 'il2server 1.0\\n1>'\n\
                       read line\n\
                       printf 'localhost: Server\\n2>'\n\
                       printf '[8:33:06 PM] Mission BEGIN\\nsomething unparseable\\n' >> eventlog.lst\n\
                       read line\n\
                       exit 0\n";

fn fake_ds_root() -> anyhow::Result<tempfile::TempDir> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir()?;
    let exe = dir.path().join("il2server.exe");
    std::fs::write(&exe, FAKE_DS)?;
    std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755))?;
    std::fs::write(dir.path().join("confs.ini"), CONFS_INI)?;
    std::fs::write(dir.path().join("server.cmd"), "")?;
    Ok(dir)
}

async fn wait_for_line(path: &std::path::Path, needle: &str) -> bool {
    for _ in 0..100 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if contents.contains(needle) {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn game_log_lines_reach_the_file_sink() -> anyhow::Result<()> {
    let dir = fake_ds_root()?;

    let ds = Arc::new(DedicatedServer::new(
        &dir.path().join("il2server.exe"),
        None,
        None,
        "/bin/sh",
        StreamHandlers::default(),
    )?);
    ds.start().await.map_err(|e| anyhow::anyhow!("start failed: {e}"))?;

    // Game-log plumbing, wired the way the bridge wires it.
    let (line_tx, line_rx) = std::sync::mpsc::sync_channel::<Option<String>>(64);
    let parser = GameLogParser::new();
    let worker = GameLogWorker::new(line_rx, Arc::new(move |line| parser.parse(line)));
    let subscriptions = worker.subscriptions();

    let not_parsed = NotParsedStringsStreamingFacility::new(subscriptions);
    let sink_path = dir.path().join("not_parsed.jsonl");
    let sink: SharedSink = Arc::new(JsonFileSink::new(sink_path.clone()));
    sink.plug_in()?;
    not_parsed.subscribe(Arc::clone(&sink)).await;
    not_parsed.start();

    let worker_thread = std::thread::spawn(move || worker.run());

    let watchdog_state = Arc::new(parking_lot::Mutex::new(WatchdogState::default()));
    let watchdog = Arc::new(
        TextFileWatchDog::new(ds.game_log_path(), Arc::clone(&watchdog_state))
            .with_polling_period(Duration::from_millis(20)),
    );
    {
        let line_tx = line_tx.clone();
        watchdog.subscribe(Arc::new(move |line: &str| {
            let _ = line_tx.try_send(Some(line.to_owned()));
        }));
    }
    let watchdog_thread = {
        let watchdog = Arc::clone(&watchdog);
        std::thread::spawn(move || watchdog.run())
    };

    // The fake DS appends its lines right after the handshake.
    assert!(
        wait_for_line(&sink_path, "something unparseable").await,
        "the unparseable line never reached the sink"
    );

    // Orderly teardown, reverse order.
    ds.ask_exit().await.map_err(|e| anyhow::anyhow!("ask_exit failed: {e}"))?;
    let code = ds.wait_finished().await.map_err(|e| anyhow::anyhow!("wait failed: {e}"))?;
    assert_eq!(code, 0);

    watchdog.stop();
    let _ = watchdog_thread.join();
    let _ = line_tx.send(None);
    let _ = worker_thread.join();

    not_parsed.stop();
    not_parsed.wait_stopped().await;
    sink.unplug();
    sink.wait_unplugged().await;

    // The parsed Mission BEGIN line was not delivered to this facility.
    let contents = std::fs::read_to_string(&sink_path)?;
    assert!(contents.contains("something unparseable"));
    assert!(!contents.contains("mission_has_begun"));

    // The watchdog state advanced past the bytes it has consumed.
    assert!(watchdog_state.lock().offset > 0);
    Ok(())
}
