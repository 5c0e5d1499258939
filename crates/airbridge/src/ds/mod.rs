// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Everything that talks to the dedicated server directly: process
//! supervision, stdio framing, the console and device-link clients, the DS
//! ini configuration, and the game-log worker.

pub mod console;
pub mod device_link;
pub mod framing;
pub mod game_log;
pub mod listeners;
pub mod process;
pub mod server_config;
