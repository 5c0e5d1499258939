// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use airbridge::config::{load_config, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    };

    match airbridge::run::run(config).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(-1);
        }
    }
}
