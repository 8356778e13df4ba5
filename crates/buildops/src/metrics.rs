use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::queue::DrainReport;

/// Rates observed over one reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopMetricsSnapshot {
    pub tps: f32,
    pub edits_applied_per_second: f32,
    pub edits_failed_per_second: f32,
    pub queue_len: usize,
}

#[derive(Debug, Default)]
struct PublishedMetrics {
    latest: LoopMetricsSnapshot,
    publications: u64,
    poison_reported: bool,
}

/// Latest published loop metrics, shareable across threads.
#[derive(Clone, Debug, Default)]
pub struct MetricsHandle {
    shared: Arc<Mutex<PublishedMetrics>>,
}

impl MetricsHandle {
    pub fn snapshot(&self) -> LoopMetricsSnapshot {
        self.lock().latest
    }

    /// How many snapshots have been published so far.
    pub fn publications(&self) -> u64 {
        self.lock().publications
    }

    pub fn publish(&self, snapshot: LoopMetricsSnapshot) {
        let mut published = self.lock();
        published.latest = snapshot;
        published.publications = published.publications.saturating_add(1);
    }

    /// Recovers the inner value from a poisoned lock and warns once.
    fn lock(&self) -> MutexGuard<'_, PublishedMetrics> {
        self.shared.lock().unwrap_or_else(|poisoned| {
            let mut published = poisoned.into_inner();
            if !published.poison_reported {
                published.poison_reported = true;
                warn!("metrics_lock_poisoned_recovered");
            }
            published
        })
    }
}

/// Counts ticks and drain results until the reporting window elapses.
#[derive(Debug)]
pub struct MetricsAccumulator {
    window: Duration,
    window_opened_at: Instant,
    ticks: u32,
    totals: DrainReport,
}

impl MetricsAccumulator {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            window_opened_at: now,
            ticks: 0,
            totals: DrainReport::default(),
        }
    }

    pub fn record_tick(&mut self, report: &DrainReport) {
        self.ticks = self.ticks.saturating_add(1);
        self.totals.dequeued = self.totals.dequeued.saturating_add(report.dequeued);
        self.totals.applied = self.totals.applied.saturating_add(report.applied);
        self.totals.failed = self.totals.failed.saturating_add(report.failed);
    }

    /// Closes the window and returns its rates once at least `window` has passed.
    pub fn maybe_snapshot(&mut self, now: Instant, queue_len: usize) -> Option<LoopMetricsSnapshot> {
        let open_for = now.saturating_duration_since(self.window_opened_at);
        if open_for < self.window {
            return None;
        }

        let seconds = open_for.as_secs_f32().max(f32::EPSILON);
        let per_second = |count: usize| count as f32 / seconds;
        let snapshot = LoopMetricsSnapshot {
            tps: self.ticks as f32 / seconds,
            edits_applied_per_second: per_second(self.totals.applied),
            edits_failed_per_second: per_second(self.totals.failed),
            queue_len,
        };

        *self = Self::new(self.window, now);
        Some(snapshot)
    }
}
