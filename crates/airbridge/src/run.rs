// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level lifecycle: wires the DS, the upstream clients, the streaming
//! facilities, the worker threads, and the proxies together.
//!
//! Start order matters — every step blocks until its precondition holds:
//! DS boot handshake, DS ports, stdin listener, upstream clients, bus,
//! sinks, facilities, worker threads, proxies. Stop runs the same list in
//! reverse, and must succeed even from a partially-failed start.

use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bus::BusClient;
use crate::config::{Config, LoggingConfig, SinkMap};
use crate::ds::console::ConsoleClient;
use crate::ds::device_link::DeviceLinkClient;
use crate::ds::game_log::GameLogWorker;
use crate::ds::process::{DedicatedServer, StreamHandlers};
use crate::parsing::GameLogParser;
use crate::proxy::console::ConsoleProxy;
use crate::proxy::device_link::DeviceLinkProxy;
use crate::radar::Radar;
use crate::state;
use crate::streaming::facilities::{
    ChatStreamingFacility, EventsStreamingFacility, NotParsedStringsStreamingFacility,
};
use crate::streaming::radar::{RadarStreamingFacility, DEFAULT_REFRESH_PERIOD};
use crate::streaming::{load_sink, SharedSink};
use crate::terminal;
use crate::watchdog::TextFileWatchDog;

const PORTS_TIMEOUT: Duration = Duration::from_secs(30);
const PORTS_POLL_PERIOD: Duration = Duration::from_millis(500);
const GAME_LOG_QUEUE_CAPACITY: usize = 1024;

/// Initialize tracing from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = match config.format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run the bridge to completion. Returns the DS exit code.
pub async fn run(config: Config) -> anyhow::Result<i32> {
    init_tracing(&config.logging);

    let handlers = StreamHandlers {
        stdout: Some(Arc::new(|s: &str| {
            print!("{s}");
            let _ = std::io::stdout().flush();
        })),
        stderr: Some(Arc::new(|s: &str| {
            eprint!("{s}");
            let _ = std::io::stderr().flush();
        })),
        prompt: Some(Arc::new(|s: &str| {
            print!("{s}");
            let _ = std::io::stdout().flush();
        })),
    };

    let ds = Arc::new(DedicatedServer::new(
        &config.ds.exe_path,
        config.ds.config_path.as_deref(),
        config.ds.start_script_path.as_deref(),
        &config.ds.wine_bin_path,
        handlers,
    )?);

    let persistent = state::load_state(&config.state_path)?;
    let watchdog_state = Arc::new(parking_lot::Mutex::new(persistent.game_log_watch_dog));

    // 1. Spawn + boot handshake.
    ds.start().await.context("failed to start the dedicated server")?;

    // 2. Wait for its listeners.
    if let Err(e) = ds.wait_network_listeners(PORTS_TIMEOUT, PORTS_POLL_PERIOD).await {
        error!("dedicated server ports did not open: {e}");
        ds.terminate().await;
        let _ = ds.wait_finished().await;
        return Err(e.into());
    }

    let result = run_bridge(&config, &ds, &watchdog_state).await;

    // Persist the watchdog position on the way out, clean or not.
    let snapshot = state::PersistentState { game_log_watch_dog: *watchdog_state.lock() };
    if let Err(e) = state::save_state(&snapshot, &config.state_path) {
        warn!("failed to persist state: {e:#}");
    }

    result
}

/// Everything after the DS is up. On error the caller still persists state;
/// the DS itself is asked down through the signal path or by the error.
async fn run_bridge(
    config: &Config,
    ds: &Arc<DedicatedServer>,
    watchdog_state: &Arc<parking_lot::Mutex<crate::watchdog::WatchdogState>>,
) -> anyhow::Result<i32> {
    let shutdown = CancellationToken::new();

    // 3. stdin listener.
    let stdin_task = terminal::spawn_stdin_forwarder(Arc::clone(ds), shutdown.clone());

    // 4. Upstream clients.
    let console_addr = SocketAddr::from(([127, 0, 0, 1], ds.config.console_port));
    let console = Arc::new(
        ConsoleClient::connect(console_addr)
            .await
            .context("failed to connect to the DS console")?,
    );
    let device_link_addr = SocketAddr::from(([127, 0, 0, 1], ds.config.device_link_port));
    let device_link = Arc::new(
        DeviceLinkClient::connect(device_link_addr)
            .await
            .context("failed to connect to the DS device link")?,
    );

    // 5. Messaging bus.
    let bus = match &config.nats {
        Some(bus_config) => Some(BusClient::connect(bus_config).await?),
        None => None,
    };

    // Game-log plumbing: watchdog thread → bounded queue → worker thread.
    let (line_tx, line_rx) = std::sync::mpsc::sync_channel::<Option<String>>(
        GAME_LOG_QUEUE_CAPACITY,
    );
    let parser = GameLogParser::new();
    let worker = GameLogWorker::new(line_rx, Arc::new(move |line| parser.parse(line)));
    let game_log = worker.subscriptions();

    let chat = ChatStreamingFacility::new(Arc::clone(&console));
    let events = EventsStreamingFacility::new(Arc::clone(&console), game_log.clone());
    let not_parsed = NotParsedStringsStreamingFacility::new(game_log.clone());
    let radar = RadarStreamingFacility::new(Radar::new(Arc::clone(&device_link)));

    // 6. Load, plug in, and subscribe the configured sinks.
    let mut plugged: Vec<SharedSink> = Vec::new();

    for (sink, _) in load_sinks(&config.streaming.chat, bus.as_ref(), &mut plugged)? {
        chat.subscribe(sink).await;
    }
    for (sink, _) in load_sinks(&config.streaming.events, bus.as_ref(), &mut plugged)? {
        events.subscribe(sink).await;
    }
    for (sink, _) in load_sinks(&config.streaming.not_parsed_strings, bus.as_ref(), &mut plugged)? {
        not_parsed.subscribe(sink).await;
    }
    for (sink, options) in load_sinks(&config.streaming.radar, bus.as_ref(), &mut plugged)? {
        let period = options.unwrap_or(DEFAULT_REFRESH_PERIOD.as_secs_f64());
        radar.subscribe(sink, period).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    // 7. Start the facilities.
    chat.start();
    events.start();
    not_parsed.start();
    radar.start();

    // 8. Worker threads.
    let worker_thread = std::thread::Builder::new()
        .name("game-log-worker".into())
        .spawn(move || worker.run())
        .context("failed to spawn the game log worker thread")?;

    let watchdog = Arc::new(TextFileWatchDog::new(
        ds.game_log_path(),
        Arc::clone(watchdog_state),
    ));
    {
        let line_tx = line_tx.clone();
        watchdog.subscribe(Arc::new(move |line: &str| {
            if line_tx.try_send(Some(line.to_owned())).is_err() {
                warn!("game log queue is full, dropping a line");
            }
        }));
    }
    let watchdog_thread = {
        let watchdog = Arc::clone(&watchdog);
        std::thread::Builder::new()
            .name("game-log-watchdog".into())
            .spawn(move || watchdog.run())
            .context("failed to spawn the watchdog thread")?
    };

    // 9. Proxies.
    let console_proxy = match &config.ds.console_proxy {
        Some(proxy) => Some(
            ConsoleProxy::start(proxy.bind.socket_addr()?, Arc::clone(&console)).await?,
        ),
        None => None,
    };
    let device_link_proxy = match &config.ds.device_link_proxy {
        Some(proxy) => Some(
            DeviceLinkProxy::start(proxy.bind.socket_addr()?, Arc::clone(&device_link)).await?,
        ),
        None => None,
    };

    spawn_signal_handler(Arc::clone(ds));
    info!("airbridge is up");

    // The DS's own exit is the canonical terminal event.
    let exit_result = ds.wait_finished().await;

    info!("dedicated server is down, shutting the bridge down");

    // Teardown, in reverse.
    if let Some(ref proxy) = console_proxy {
        proxy.stop();
        proxy.wait_stopped().await;
    }
    if let Some(ref proxy) = device_link_proxy {
        proxy.stop();
        proxy.wait_stopped().await;
    }

    watchdog.stop();
    join_thread(watchdog_thread, "watchdog").await;
    let _ = line_tx.send(None);
    join_thread(worker_thread, "game log worker").await;

    chat.stop();
    events.stop();
    not_parsed.stop();
    radar.stop();
    chat.wait_stopped().await;
    events.wait_stopped().await;
    not_parsed.wait_stopped().await;
    radar.wait_stopped().await;

    for sink in &plugged {
        sink.unplug();
    }
    for sink in &plugged {
        sink.wait_unplugged().await;
    }

    console.close();
    console.wait_closed().await;
    device_link.close();
    device_link.wait_closed().await;
    if let Some(ref bus) = bus {
        bus.flush().await;
    }

    shutdown.cancel();
    let _ = stdin_task.await;

    Ok(exit_result.map_err(|e| anyhow::anyhow!("dedicated server wait failed: {e}"))?)
}

type LoadedSink = (SharedSink, Option<f64>);

/// Build and plug in every sink of one facility's configuration, returning
/// the sinks with their radar refresh period (if any).
fn load_sinks(
    sinks: &SinkMap,
    bus: Option<&BusClient>,
    plugged: &mut Vec<SharedSink>,
) -> anyhow::Result<Vec<LoadedSink>> {
    let mut loaded = Vec::new();
    for (name, sink_config) in sinks {
        let sink = load_sink(name, &sink_config.args, bus)
            .with_context(|| format!("failed to load the '{name}' sink"))?;
        sink.plug_in().with_context(|| format!("failed to plug in the '{name}' sink"))?;
        plugged.push(Arc::clone(&sink));
        loaded.push((sink, sink_config.subscription_options.refresh_period));
    }
    Ok(loaded)
}

async fn join_thread(handle: std::thread::JoinHandle<()>, name: &'static str) {
    let joined = tokio::task::spawn_blocking(move || handle.join()).await;
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!("{name} thread panicked"),
        Err(e) => error!("failed to join the {name} thread: {e}"),
    }
}

/// First signal asks the DS to exit and lets the bridge follow its
/// termination; a second one terminates the DS outright.
fn spawn_signal_handler(ds: Arc<DedicatedServer>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).ok();
            let mut sigint = signal(SignalKind::interrupt()).ok();

            tokio::select! {
                _ = async {
                    match sigterm.as_mut() {
                        Some(s) => { s.recv().await; }
                        None => std::future::pending().await,
                    }
                } => info!("received SIGTERM"),
                _ = async {
                    match sigint.as_mut() {
                        Some(s) => { s.recv().await; }
                        None => std::future::pending().await,
                    }
                } => info!("received SIGINT"),
            }
            if let Err(e) = ds.ask_exit().await {
                warn!("failed to ask the dedicated server to exit: {e}");
                ds.terminate().await;
                return;
            }

            tokio::select! {
                _ = async {
                    match sigterm.as_mut() {
                        Some(s) => { s.recv().await; }
                        None => std::future::pending().await,
                    }
                } => info!("received SIGTERM again, terminating the dedicated server"),
                _ = async {
                    match sigint.as_mut() {
                        Some(s) => { s.recv().await; }
                        None => std::future::pending().await,
                    }
                } => info!("received SIGINT again, terminating the dedicated server"),
            }
            ds.terminate().await;
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C");
                if let Err(e) = ds.ask_exit().await {
                    warn!("failed to ask the dedicated server to exit: {e}");
                    ds.terminate().await;
                    return;
                }
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C again, terminating the dedicated server");
                ds.terminate().await;
            }
        }
    });
}
