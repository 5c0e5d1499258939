// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use super::ServerConfig;

const SAMPLE: &str = "\
[NET]
localPort = 21000

[Console]
; the DS stores the console port under IP
IP = 20000

[DeviceLink]
port = 10000

[game]
eventlog = log/eventlog.lst
";

#[test]
fn parses_ports_and_game_log() -> anyhow::Result<()> {
    let config = ServerConfig::from_ini_str(SAMPLE)?;

    assert_eq!(config.connection_port, 21000);
    assert_eq!(config.console_port, 20000);
    assert_eq!(config.device_link_port, 10000);
    assert_eq!(config.game_log_path, PathBuf::from("log/eventlog.lst"));
    Ok(())
}

#[test]
fn game_log_defaults_when_absent() -> anyhow::Result<()> {
    let text = "[NET]\nlocalPort=21000\n[Console]\nIP=20000\n[DeviceLink]\nport=10000\n";
    let config = ServerConfig::from_ini_str(text)?;
    assert_eq!(config.game_log_path, PathBuf::from("eventlog.lst"));
    Ok(())
}

#[test]
fn disabled_console_is_rejected() {
    let text = "[NET]\nlocalPort=21000\n[DeviceLink]\nport=10000\n";
    let err = ServerConfig::from_ini_str(text).map(|_| ()).unwrap_err();
    assert!(err.to_string().contains("console is disabled"));
}

#[test]
fn zero_port_counts_as_disabled() {
    let text = "[NET]\nlocalPort=21000\n[Console]\nIP=0\n[DeviceLink]\nport=10000\n";
    let err = ServerConfig::from_ini_str(text).map(|_| ()).unwrap_err();
    assert!(err.to_string().contains("console is disabled"));
}

#[test]
fn disabled_device_link_is_rejected() {
    let text = "[NET]\nlocalPort=21000\n[Console]\nIP=20000\n";
    let err = ServerConfig::from_ini_str(text).map(|_| ()).unwrap_err();
    assert!(err.to_string().contains("device link is disabled"));
}

#[test]
fn section_and_key_lookup_is_case_insensitive() -> anyhow::Result<()> {
    let text = "[net]\nLOCALPORT=1\n[CONSOLE]\nip=2\n[devicelink]\nPORT=3\n";
    let config = ServerConfig::from_ini_str(text)?;
    assert_eq!((config.connection_port, config.console_port, config.device_link_port), (1, 2, 3));
    Ok(())
}
