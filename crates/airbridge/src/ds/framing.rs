// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tokenizer for the DS stdout/stderr streams.
//!
//! The DS interleaves newline-terminated text with numeric prompts (decimal
//! digits followed by `>`, no newline). The framer carves both out of a byte
//! stream; the two drivers run it over an [`AsyncRead`] for the boot
//! handshake (`read_until_line`) and for steady-state consumption
//! (`read_until_end`).

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Error;

/// Synchronous handler for a framed string.
pub type StringHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// A token carved from the stream.
///
/// `Line` keeps its trailing newline; `Prompt` carries the literal token,
/// digits plus `>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineFrame {
    Line(String),
    Prompt(String),
}

/// Incremental framer. Feed one decoded character at a time.
#[derive(Debug, Default)]
pub struct LineFramer {
    acc: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one character, emitting a frame when one completes.
    pub fn push(&mut self, ch: char) -> Option<LineFrame> {
        let is_prompt = ch == '>' && self.acc.parse::<u64>().is_ok();
        self.acc.push(ch);

        if ch == '\n' {
            return Some(LineFrame::Line(std::mem::take(&mut self.acc)));
        }
        if is_prompt {
            return Some(LineFrame::Prompt(std::mem::take(&mut self.acc)));
        }
        None
    }

    /// Flush residual characters at end of stream.
    pub fn finish(&mut self) -> Option<LineFrame> {
        if self.acc.is_empty() {
            None
        } else {
            Some(LineFrame::Line(std::mem::take(&mut self.acc)))
        }
    }
}

/// Dispatch a frame: lines go to `output`, prompts to `prompt` when present,
/// falling back to `output` otherwise.
fn dispatch(
    frame: &LineFrame,
    output: Option<&StringHandler>,
    prompt: Option<&StringHandler>,
) {
    match frame {
        LineFrame::Line(s) => {
            if let Some(handler) = output {
                handler(s);
            }
        }
        LineFrame::Prompt(s) => {
            if let Some(handler) = prompt.or(output) {
                handler(s);
            }
        }
    }
}

/// Run the framer until a line equal to `stop_line` is seen.
///
/// At that moment `input_line` and `stop_line` are echoed through the
/// handler (the stop line itself is not delivered twice), after which the
/// driver keeps going until the next prompt and returns. EOF at any earlier
/// point fails with [`Error::StreamClosedPrematurely`].
pub async fn read_until_line<R>(
    mut stream: R,
    stream_name: &'static str,
    input_line: &str,
    stop_line: &str,
    output_handler: Option<&StringHandler>,
    prompt_handler: Option<&StringHandler>,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 1024];
    let mut stop_seen = false;

    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|_| Error::StreamClosedPrematurely { stream: stream_name })?;
        if n == 0 {
            return Err(Error::StreamClosedPrematurely { stream: stream_name });
        }

        for &byte in &buf[..n] {
            let Some(frame) = framer.push(byte as char) else {
                continue;
            };

            match &frame {
                LineFrame::Line(s) if !stop_seen && s == stop_line => {
                    stop_seen = true;
                    if let Some(handler) = output_handler {
                        handler(input_line);
                        handler(stop_line);
                    }
                }
                LineFrame::Prompt(_) if stop_seen => {
                    dispatch(&frame, output_handler, prompt_handler);
                    return Ok(());
                }
                _ => dispatch(&frame, output_handler, prompt_handler),
            }
        }
    }
}

/// Run the framer until EOF, flushing any residual bytes as a final line.
pub async fn read_until_end<R>(
    mut stream: R,
    stream_name: &'static str,
    output_handler: Option<&StringHandler>,
    prompt_handler: Option<&StringHandler>,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 1024];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(stream = stream_name, "stream read failed: {e}");
                break;
            }
        };

        for &byte in &buf[..n] {
            if let Some(frame) = framer.push(byte as char) {
                dispatch(&frame, output_handler, prompt_handler);
            }
        }
    }

    if let Some(frame) = framer.finish() {
        dispatch(&frame, output_handler, prompt_handler);
    }
    tracing::debug!(stream = stream_name, "stream was closed");
}

#[cfg(test)]
#[path = "framing_tests.rs"]
mod tests;
