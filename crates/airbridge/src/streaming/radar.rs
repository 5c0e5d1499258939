// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Radar streaming facility.
//!
//! Unlike the linear facilities there is no upstream tap: a scheduler task
//! polls the radar and publishes snapshots. Subscribers are grouped by
//! refresh period (one group per distinct period); the loop ticks at the
//! gcd of all periods, refreshes once per pass when any group is due, and
//! acknowledges each served group so its cadence is preserved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::SharedSink;
use crate::error::Error;
use crate::event::{StreamPayload, TimestampedData};
use crate::radar::Radar;

pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

struct SubscriberGroup {
    refresh_period: Duration,
    sinks: Vec<SharedSink>,
    last_refresh: Option<tokio::time::Instant>,
}

impl SubscriberGroup {
    fn needs_refresh(&self, now: tokio::time::Instant) -> bool {
        match self.last_refresh {
            None => true,
            Some(prev) => now.saturating_duration_since(prev) >= self.refresh_period,
        }
    }

    /// Record a served refresh. After the first ack, the stored instant is
    /// aligned to `now - (elapsed mod period)` so the group's cadence does
    /// not drift by the dispatch latency.
    fn ack_refresh(&mut self, now: tokio::time::Instant) {
        match self.last_refresh {
            None => self.last_refresh = Some(now),
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev).as_millis() as u64;
                let period = self.refresh_period.as_millis().max(1) as u64;
                let buzz = Duration::from_millis(elapsed % period);
                self.last_refresh = Some(now - buzz);
            }
        }
    }
}

struct Inner {
    radar: Radar,
    groups: Mutex<Vec<SubscriberGroup>>,
    /// Wakes the scheduler out of its empty-subscriber pause.
    resume: Notify,
    /// Cancels the current tick sleep or in-flight refresh.
    interrupt: Notify,
    stopped: AtomicBool,
    request_timeout: Duration,
}

pub struct RadarStreamingFacility {
    inner: Arc<Inner>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RadarStreamingFacility {
    pub fn new(radar: Radar) -> Self {
        Self {
            inner: Arc::new(Inner {
                radar,
                groups: Mutex::new(Vec::new()),
                resume: Notify::new(),
                interrupt: Notify::new(),
                stopped: AtomicBool::new(false),
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
            }),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Register a sink with its refresh period in seconds.
    pub async fn subscribe(&self, sink: SharedSink, refresh_period: f64) -> Result<(), Error> {
        if !refresh_period.is_finite() || refresh_period <= 0.0 {
            return Err(Error::BadInput(format!(
                "refresh period must be positive, got {refresh_period}"
            )));
        }
        let period = Duration::from_secs_f64(refresh_period);

        let mut groups = self.inner.groups.lock().await;
        match groups.iter_mut().find(|g| g.refresh_period == period) {
            Some(group) => group.sinks.push(sink),
            None => groups.push(SubscriberGroup {
                refresh_period: period,
                sinks: vec![sink],
                last_refresh: None,
            }),
        }
        drop(groups);

        // Wake a paused scheduler and restart the tick at the new gcd.
        self.inner.resume.notify_one();
        self.inner.interrupt.notify_waiters();
        Ok(())
    }

    pub async fn unsubscribe(&self, sink: &SharedSink) -> Result<(), Error> {
        let mut groups = self.inner.groups.lock().await;
        let mut found = false;
        for group in groups.iter_mut() {
            let before = group.sinks.len();
            group.sinks.retain(|s| !Arc::ptr_eq(s, sink));
            if group.sinks.len() != before {
                found = true;
            }
        }
        if !found {
            return Err(Error::BadInput(
                "sink is not subscribed to the radar facility".into(),
            ));
        }
        groups.retain(|g| !g.sinks.is_empty());
        let empty = groups.is_empty();
        drop(groups);

        if empty {
            // Pause: cancel whatever the scheduler is currently doing.
            self.inner.interrupt.notify_waiters();
        }
        Ok(())
    }

    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("radar facility was already started");
            return;
        }
        *task = Some(tokio::spawn(run_scheduler(Arc::clone(&self.inner))));
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.resume.notify_one();
        self.inner.interrupt.notify_waiters();
    }

    pub async fn wait_stopped(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    #[cfg(test)]
    async fn group_periods(&self) -> Vec<Duration> {
        self.inner.groups.lock().await.iter().map(|g| g.refresh_period).collect()
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Tick period: gcd of all group periods, in milliseconds.
fn tick_period(groups: &[SubscriberGroup]) -> Option<Duration> {
    groups
        .iter()
        .map(|g| g.refresh_period.as_millis().max(1) as u64)
        .reduce(gcd)
        .map(Duration::from_millis)
}

async fn run_scheduler(inner: Arc<Inner>) {
    debug!("radar scheduler started");

    loop {
        if inner.stopped.load(Ordering::Acquire) {
            break;
        }

        let tick = tick_period(&inner.groups.lock().await);
        let Some(tick) = tick else {
            // No subscribers: pause until one arrives or we are stopped.
            tokio::select! {
                _ = inner.resume.notified() => {}
                _ = inner.interrupt.notified() => {}
            }
            continue;
        };

        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = inner.interrupt.notified() => continue,
        }
        if inner.stopped.load(Ordering::Acquire) {
            break;
        }

        let now = tokio::time::Instant::now();
        let any_due = inner.groups.lock().await.iter().any(|g| g.needs_refresh(now));
        if !any_due {
            continue;
        }

        let snapshot = tokio::select! {
            result = inner.radar.get_all_moving_actors_positions(Some(inner.request_timeout)) => result,
            _ = inner.interrupt.notified() => continue,
        };
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(Error::ConnectionAborted) => {
                error!("radar connection was aborted, terminating the radar facility");
                break;
            }
            Err(e) => {
                warn!("radar refresh failed: {e}");
                continue;
            }
        };
        if snapshot.is_empty() {
            continue;
        }

        let mut groups = inner.groups.lock().await;
        for group in groups.iter_mut() {
            if !group.needs_refresh(now) {
                continue;
            }
            let item = TimestampedData::new(StreamPayload::Radar(snapshot.clone()));
            for result in join_all(group.sinks.iter().map(|sink| sink.write(&item))).await {
                if let Err(e) = result {
                    warn!("radar sink failed to handle snapshot: {e:#}");
                }
            }
            group.ack_refresh(now);
        }
    }

    debug!("radar scheduler stopped");
}

#[cfg(test)]
#[path = "radar_facility_tests.rs"]
mod tests;
