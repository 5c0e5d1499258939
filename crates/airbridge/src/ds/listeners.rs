// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Enumeration of a process's bound inet ports via `/proc`.
//!
//! Boot verification needs to know when the DS has opened its game, console,
//! and device-link listeners. The socket inodes owned by the pid (symlink
//! targets under `/proc/<pid>/fd`) are joined against the kernel net tables
//! (`/proc/net/{tcp,tcp6,udp,udp6}`) to recover local port numbers.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::Error;

/// TCP state `LISTEN` in `/proc/net/tcp`.
const TCP_LISTEN: u8 = 0x0A;
/// UDP sockets sit in state `CLOSE`; any bound socket counts.
const UDP_CLOSE: u8 = 0x07;

/// Ports on which `pid` currently has inet listeners (TCP listen state or a
/// bound UDP socket).
pub fn inet_listener_ports(pid: u32) -> Result<BTreeSet<u16>, Error> {
    if !cfg!(target_os = "linux") {
        return Err(Error::Internal("listener polling requires /proc".into()));
    }

    let inodes = socket_inodes(Path::new("/proc"), pid)?;
    let mut ports = BTreeSet::new();

    for (table, listen_state) in
        [("tcp", TCP_LISTEN), ("tcp6", TCP_LISTEN), ("udp", UDP_CLOSE), ("udp6", UDP_CLOSE)]
    {
        let path = format!("/proc/net/{table}");
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        for (inode, port) in parse_net_table(&text, listen_state) {
            if inodes.contains(&inode) {
                ports.insert(port);
            }
        }
    }

    Ok(ports)
}

/// Socket inodes owned by `pid`, read from its fd symlinks.
fn socket_inodes(proc_root: &Path, pid: u32) -> Result<BTreeSet<u64>, Error> {
    let fd_dir = proc_root.join(pid.to_string()).join("fd");
    let entries = std::fs::read_dir(&fd_dir)
        .map_err(|e| Error::Internal(format!("cannot read {}: {e}", fd_dir.display())))?;

    let mut inodes = BTreeSet::new();
    for entry in entries.flatten() {
        let Ok(target) = std::fs::read_link(entry.path()) else {
            continue;
        };
        if let Some(inode) = parse_socket_link(&target.to_string_lossy()) {
            inodes.insert(inode);
        }
    }
    Ok(inodes)
}

/// Parse a `socket:[12345]` fd symlink target.
fn parse_socket_link(target: &str) -> Option<u64> {
    target.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

/// Parse a `/proc/net/{tcp,udp}` table into `(inode, local_port)` pairs for
/// rows in the given state.
fn parse_net_table(text: &str, state: u8) -> Vec<(u64, u16)> {
    let mut result = Vec::new();

    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // sl local_address rem_address st ... inode
        if fields.len() < 10 {
            continue;
        }
        let Ok(st) = u8::from_str_radix(fields[3], 16) else {
            continue;
        };
        if st != state {
            continue;
        }
        let Some((_, port_hex)) = fields[1].rsplit_once(':') else {
            continue;
        };
        let Ok(port) = u16::from_str_radix(port_hex, 16) else {
            continue;
        };
        let Ok(inode) = fields[9].parse::<u64>() else {
            continue;
        };
        result.push((inode, port));
    }

    result
}

#[cfg(test)]
#[path = "listeners_tests.rs"]
mod tests;
