// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::Serialize;

/// Error classes shared by the clients, proxies, and streaming facilities.
///
/// Consumers branch on the class rather than the message: the radar
/// scheduler terminates on [`Error::ConnectionAborted`] but keeps running
/// through a [`Error::Timeout`], and proxies report [`Error::BadInput`]
/// back to the offending peer without tearing anything down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Error {
    /// Malformed input from a client (datagram, command argument, config).
    BadInput(String),
    /// An RPC or refresh exceeded its budget; the pending slot is released.
    Timeout,
    /// A DS stdio stream closed before the boot handshake completed.
    StreamClosedPrematurely { stream: &'static str },
    /// The DS did not open its expected listeners within the budget.
    PortsNotOpen,
    /// The transport under a singleton upstream client was lost.
    ConnectionAborted,
    /// Unanticipated failure; the affected task terminates, peers continue.
    Internal(String),
}

impl Error {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadInput(_) => "BAD_INPUT",
            Self::Timeout => "TIMEOUT",
            Self::StreamClosedPrematurely { .. } => "STREAM_CLOSED_PREMATURELY",
            Self::PortsNotOpen => "PORTS_NOT_OPEN",
            Self::ConnectionAborted => "CONNECTION_ABORTED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Classify a transport error from one of the upstream sockets.
    pub fn from_transport(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::ConnectionAborted,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadInput(detail) => write!(f, "bad input: {detail}"),
            Self::Timeout => f.write_str("request timed out"),
            Self::StreamClosedPrematurely { stream } => {
                write!(f, "dedicated server's {stream} stream was closed unexpectedly")
            }
            Self::PortsNotOpen => {
                f.write_str("expected ports of dedicated server are closed")
            }
            Self::ConnectionAborted => f.write_str("upstream connection was lost"),
            Self::Internal(detail) => write!(f, "internal error: {detail}"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
