// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concrete streaming facilities: chat, game events, not-parsed strings.
//!
//! Each one owns a [`FanoutCore`] and the upstream taps that feed it. Taps
//! attach when the first sink subscribes and detach when the last one
//! leaves, so an unobserved topic costs nothing.

use std::sync::Arc;

use crate::ds::console::{ChatHandler, ConnectionEventHandler, ConsoleClient};
use crate::ds::game_log::{EventHandler, GameLogSubscriptions, StringHandler};
use crate::error::Error;
use crate::event::{ChatMessage, GameEvent, StreamPayload};

use super::{FanoutCore, SharedSink};

/// Chat messages from the console.
pub struct ChatStreamingFacility {
    core: FanoutCore,
    console: Arc<ConsoleClient>,
    tap: ChatHandler,
}

impl ChatStreamingFacility {
    pub fn new(console: Arc<ConsoleClient>) -> Self {
        let core = FanoutCore::new("chat");
        let publisher = core.publisher();
        let tap: ChatHandler = Arc::new(move |message: &ChatMessage| {
            publisher.publish(StreamPayload::Chat(message.clone()));
        });
        Self { core, console, tap }
    }

    pub async fn subscribe(&self, sink: SharedSink) {
        self.core
            .subscribe_with(sink, || self.console.subscribe_to_chat(Arc::clone(&self.tap)))
            .await;
    }

    pub async fn unsubscribe(&self, sink: &SharedSink) -> Result<(), Error> {
        self.core
            .unsubscribe_with(sink, || self.console.unsubscribe_from_chat(&self.tap))
            .await
    }

    pub fn start(&self) {
        self.core.start();
    }

    pub fn stop(&self) {
        self.core.stop();
    }

    pub async fn wait_stopped(&self) {
        self.core.wait_stopped().await;
    }
}

/// Parsed game events, merged from the console (authoritative for human
/// connection events) and the game-log worker (everything else).
pub struct EventsStreamingFacility {
    core: FanoutCore,
    console: Arc<ConsoleClient>,
    game_log: GameLogSubscriptions,
    console_tap: ConnectionEventHandler,
    game_log_tap: EventHandler,
}

impl EventsStreamingFacility {
    pub fn new(console: Arc<ConsoleClient>, game_log: GameLogSubscriptions) -> Self {
        let core = FanoutCore::new("events");

        let publisher = core.publisher();
        let console_tap: ConnectionEventHandler = Arc::new(move |event: &GameEvent| {
            publisher.publish(StreamPayload::Event(event.clone()));
        });

        let publisher = core.publisher();
        let game_log_tap: EventHandler = Arc::new(move |event: &GameEvent| {
            // The console already delivers these; the game-log copies would
            // be duplicates.
            if event.is_human_connection_event() {
                return;
            }
            publisher.publish(StreamPayload::Event(event.clone()));
        });

        Self { core, console, game_log, console_tap, game_log_tap }
    }

    pub async fn subscribe(&self, sink: SharedSink) {
        self.core
            .subscribe_with(sink, || {
                self.console
                    .subscribe_to_human_connection_events(Arc::clone(&self.console_tap));
                self.game_log.subscribe_to_events(Arc::clone(&self.game_log_tap));
            })
            .await;
    }

    pub async fn unsubscribe(&self, sink: &SharedSink) -> Result<(), Error> {
        self.core
            .unsubscribe_with(sink, || {
                self.console.unsubscribe_from_human_connection_events(&self.console_tap);
                self.game_log.unsubscribe_from_events(&self.game_log_tap);
            })
            .await
    }

    pub fn start(&self) {
        self.core.start();
    }

    pub fn stop(&self) {
        self.core.stop();
    }

    pub async fn wait_stopped(&self) {
        self.core.wait_stopped().await;
    }
}

/// Game-log lines the parser rejected, delivered verbatim.
pub struct NotParsedStringsStreamingFacility {
    core: FanoutCore,
    game_log: GameLogSubscriptions,
    tap: StringHandler,
}

impl NotParsedStringsStreamingFacility {
    pub fn new(game_log: GameLogSubscriptions) -> Self {
        let core = FanoutCore::new("not_parsed_strings");
        let publisher = core.publisher();
        let tap: StringHandler = Arc::new(move |s: &str| {
            publisher.publish(StreamPayload::NotParsed { value: s.to_owned() });
        });
        Self { core, game_log, tap }
    }

    pub async fn subscribe(&self, sink: SharedSink) {
        self.core
            .subscribe_with(sink, || {
                self.game_log.subscribe_to_not_parsed_strings(Arc::clone(&self.tap));
            })
            .await;
    }

    pub async fn unsubscribe(&self, sink: &SharedSink) -> Result<(), Error> {
        self.core
            .unsubscribe_with(sink, || {
                self.game_log.unsubscribe_from_not_parsed_strings(&self.tap);
            })
            .await
    }

    pub fn start(&self) {
        self.core.start();
    }

    pub fn stop(&self) {
        self.core.stop();
    }

    pub async fn wait_stopped(&self) {
        self.core.wait_stopped().await;
    }
}

#[cfg(test)]
#[path = "facilities_tests.rs"]
mod tests;
