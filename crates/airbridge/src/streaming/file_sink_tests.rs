// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::JsonFileSink;
use crate::event::{StreamPayload, TimestampedData};
use crate::streaming::StreamingSink;

fn item(value: &str) -> TimestampedData {
    TimestampedData::new(StreamPayload::NotParsed { value: value.to_owned() })
}

#[tokio::test]
async fn appends_one_json_object_per_line() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stream.jsonl");
    let sink = JsonFileSink::new(path.clone());

    sink.plug_in()?;
    sink.write(&item("first")).await?;
    sink.write(&item("second")).await?;
    sink.unplug();
    sink.wait_unplugged().await;

    let contents = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(lines[0])?;
    assert_eq!(first["kind"], "not_parsed");
    assert_eq!(first["value"], "first");
    assert!(first.get("timestamp").is_some());
    Ok(())
}

#[tokio::test]
async fn survives_rotation_of_the_target() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stream.jsonl");
    let sink = JsonFileSink::new(path.clone());

    sink.plug_in()?;
    sink.write(&item("before")).await?;

    // Rotate the file away; the next write must reopen a fresh one.
    std::fs::rename(&path, dir.path().join("stream.jsonl.1"))?;
    sink.write(&item("after")).await?;
    sink.unplug();

    let rotated = std::fs::read_to_string(dir.path().join("stream.jsonl.1"))?;
    assert!(rotated.contains("before"));
    let fresh = std::fs::read_to_string(&path)?;
    assert!(fresh.contains("after"));
    assert!(!fresh.contains("before"));
    Ok(())
}

#[tokio::test]
async fn creates_missing_parent_directories() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("deep/nested/stream.jsonl");
    let sink = JsonFileSink::new(path.clone());

    sink.plug_in()?;
    sink.write(&item("x")).await?;
    sink.unplug();

    assert!(path.exists());
    Ok(())
}
