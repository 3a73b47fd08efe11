use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Pipeline counters, shared across concurrently running cycles.
#[derive(Debug, Default)]
pub struct PipelineStats {
    ticks: AtomicU64,
    ticks_skipped: AtomicU64,
    fetches_ok: AtomicU64,
    fetches_failed: AtomicU64,
    entries_parsed: AtomicU64,
    parse_anomalies: AtomicU64,
    classification_anomalies: AtomicU64,
    batches_aborted: AtomicU64,
    batches_dropped: AtomicU64,
    points_written: AtomicU64,
    point_errors: AtomicU64,
    writes_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub ticks_skipped: u64,
    pub fetches_ok: u64,
    pub fetches_failed: u64,
    pub entries_parsed: u64,
    pub parse_anomalies: u64,
    pub classification_anomalies: u64,
    pub batches_aborted: u64,
    pub batches_dropped: u64,
    pub points_written: u64,
    pub point_errors: u64,
    pub writes_failed: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tick number, starting at 1.
    pub fn record_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch(&self, ok: bool) {
        let counter = if ok { &self.fetches_ok } else { &self.fetches_failed };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parsed(&self, entries: usize, anomalies: usize) {
        self.entries_parsed.fetch_add(entries as u64, Ordering::Relaxed);
        self.parse_anomalies.fetch_add(anomalies as u64, Ordering::Relaxed);
    }

    pub fn record_classified(&self, anomalies: usize, aborted: bool) {
        self.classification_anomalies
            .fetch_add(anomalies as u64, Ordering::Relaxed);
        if aborted {
            self.batches_aborted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Data arrived while the write stage was full.
    pub fn record_batch_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self, points: usize, point_errors: usize) {
        self.points_written.fetch_add(points as u64, Ordering::Relaxed);
        self.point_errors.fetch_add(point_errors as u64, Ordering::Relaxed);
    }

    pub fn record_write_failed(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            fetches_ok: self.fetches_ok.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            entries_parsed: self.entries_parsed.load(Ordering::Relaxed),
            parse_anomalies: self.parse_anomalies.load(Ordering::Relaxed),
            classification_anomalies: self.classification_anomalies.load(Ordering::Relaxed),
            batches_aborted: self.batches_aborted.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            point_errors: self.point_errors.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
        }
    }
}
