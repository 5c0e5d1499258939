// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker thread that turns raw game-log lines into events.
//!
//! The watchdog thread produces lines into a bounded channel; this worker
//! consumes them, runs the parser, and dispatches parsed events and
//! not-parsed strings to separately-subscribed handlers. A `None` sentinel
//! shuts the worker down.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::event::GameEvent;
use crate::parsing::NotParsed;

/// Handler invoked with each parsed event, on the worker thread.
pub type EventHandler = Arc<dyn Fn(&GameEvent) + Send + Sync>;
/// Handler invoked with each line the parser rejected, on the worker thread.
pub type StringHandler = Arc<dyn Fn(&str) + Send + Sync>;
/// Line parser; injected so tests can substitute their own.
pub type LineParser = Arc<dyn Fn(&str) -> Result<GameEvent, NotParsed> + Send + Sync>;

/// Thread-safe subscription handle shared between the worker thread and the
/// async-side facilities.
#[derive(Clone, Default)]
pub struct GameLogSubscriptions {
    events: Arc<Mutex<Vec<EventHandler>>>,
    not_parsed: Arc<Mutex<Vec<StringHandler>>>,
}

impl GameLogSubscriptions {
    pub fn subscribe_to_events(&self, subscriber: EventHandler) {
        self.events.lock().push(subscriber);
    }

    pub fn unsubscribe_from_events(&self, subscriber: &EventHandler) {
        self.events.lock().retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    pub fn subscribe_to_not_parsed_strings(&self, subscriber: StringHandler) {
        self.not_parsed.lock().push(subscriber);
    }

    pub fn unsubscribe_from_not_parsed_strings(&self, subscriber: &StringHandler) {
        self.not_parsed.lock().retain(|s| !Arc::ptr_eq(s, subscriber));
    }
}

/// The worker itself. Owns the consumer end of the line queue; runs on a
/// dedicated OS thread via [`GameLogWorker::run`].
pub struct GameLogWorker {
    lines: Receiver<Option<String>>,
    parser: LineParser,
    subscriptions: GameLogSubscriptions,
}

impl GameLogWorker {
    pub fn new(lines: Receiver<Option<String>>, parser: LineParser) -> Self {
        Self { lines, parser, subscriptions: GameLogSubscriptions::default() }
    }

    /// Subscription handle, cloneable across threads.
    pub fn subscriptions(&self) -> GameLogSubscriptions {
        self.subscriptions.clone()
    }

    /// Consume lines until the `None` sentinel or a closed producer.
    pub fn run(self) {
        info!("game log worker has started");

        loop {
            let line = match self.lines.recv() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(_) => {
                    warn!("game log line producer was dropped");
                    break;
                }
            };

            match (self.parser)(&line) {
                Ok(event) => self.dispatch_event(&event),
                Err(NotParsed) => self.dispatch_not_parsed(&line),
            }
        }

        info!("game log worker has finished");
    }

    fn dispatch_event(&self, event: &GameEvent) {
        for subscriber in self.subscriptions.events.lock().iter() {
            // A panicking subscriber would take the whole thread down; the
            // facilities' handlers only enqueue, but keep the contract here.
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber(event);
            })) {
                error!("subscriber failed to handle game log event: {e:?}");
            }
        }
    }

    fn dispatch_not_parsed(&self, line: &str) {
        for subscriber in self.subscriptions.not_parsed.lock().iter() {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber(line);
            })) {
                error!("subscriber failed to handle not parsed string {line:?}: {e:?}");
            }
        }
    }
}

#[cfg(test)]
#[path = "game_log_tests.rs"]
mod tests;
