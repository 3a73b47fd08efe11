//! The polling control loop.
//!
//! One loop selects between the interval timer and finished fetches. Each
//! fetch and each parse/classify/write cycle runs as its own task, so a slow
//! router or sink never delays the next tick. Both stages are capped at
//! `max_in_flight` concurrent tasks: a tick that finds the fetch stage full
//! is skipped, and data that finds the write stage full is dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::classify::Classifier;
use crate::db::{MetricSink, Writer};
use crate::fetch::FlowSource;
use crate::models::domain::Batch;
use crate::parser::parse_accounting;
use crate::stats::{PipelineStats, StatsSnapshot};

const STATS_EVERY_TICKS: u64 = 20;

pub struct Scheduler<F, S> {
    source: Arc<F>,
    writer: Arc<Writer<S>>,
    classifier: Classifier,
    interval: Duration,
    max_in_flight: usize,
    drain_timeout: Duration,
    stats: Arc<PipelineStats>,
}

impl<F: FlowSource, S: MetricSink> Scheduler<F, S> {
    pub fn new(source: F, writer: Writer<S>, classifier: Classifier, interval: Duration) -> Self {
        Self {
            source: Arc::new(source),
            writer: Arc::new(writer),
            classifier,
            interval,
            max_in_flight: 2,
            drain_timeout: Duration::from_secs(10),
            stats: Arc::new(PipelineStats::new()),
        }
    }

    /// Per-stage cap on concurrent fetches and concurrent writes.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// How long shutdown waits for in-flight cycles before abandoning them.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Runs until `shutdown` resolves, then returns the final counters.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> StatsSnapshot {
        let (data_tx, mut data_rx) = mpsc::channel::<String>(self.max_in_flight);
        let fetch_permits = Arc::new(Semaphore::new(self.max_in_flight));
        let write_permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        // First poll happens one interval after startup.
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        info!(
            interval = ?self.interval,
            max_in_flight = self.max_in_flight,
            network = %self.classifier.network(),
            "Polling started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let tick = self.stats.record_tick();
                    match Arc::clone(&fetch_permits).try_acquire_owned() {
                        Ok(permit) => {
                            let source = Arc::clone(&self.source);
                            let stats = Arc::clone(&self.stats);
                            let data_tx = data_tx.clone();
                            tasks.spawn(async move {
                                let _permit = permit;
                                fetch_cycle(source.as_ref(), &stats, &data_tx).await;
                            });
                        }
                        Err(_) => {
                            self.stats.record_tick_skipped();
                            warn!(tick, "Previous fetches still running, skipping tick");
                        }
                    }
                    if tick % STATS_EVERY_TICKS == 0 {
                        log_stats(&self.stats.snapshot());
                    }
                }
                Some(body) = data_rx.recv() => {
                    match Arc::clone(&write_permits).try_acquire_owned() {
                        Ok(permit) => {
                            let writer = Arc::clone(&self.writer);
                            let stats = Arc::clone(&self.stats);
                            let classifier = self.classifier;
                            tasks.spawn(async move {
                                let _permit = permit;
                                write_cycle(&body, &classifier, writer.as_ref(), &stats).await;
                            });
                        }
                        Err(_) => {
                            self.stats.record_batch_dropped();
                            warn!("Previous writes still running, dropping accounting data");
                        }
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Cycle task panicked");
                        }
                    }
                }
            }
        }

        info!("Shutting down, waiting for in-flight cycles");
        let drained = time::timeout(self.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), "Abandoning unfinished cycles");
            tasks.abort_all();
        }

        let snapshot = self.stats.snapshot();
        log_stats(&snapshot);
        snapshot
    }
}

async fn fetch_cycle<F: FlowSource>(source: &F, stats: &PipelineStats, data_tx: &mpsc::Sender<String>) {
    match source.fetch().await {
        Ok(body) => {
            stats.record_fetch(true);
            if data_tx.send(body).await.is_err() {
                debug!("Control loop gone, discarding fetched data");
            }
        }
        Err(e) => {
            stats.record_fetch(false);
            warn!(error = %e, "Error fetching data from router");
        }
    }
}

/// Parse, classify and write one fetched dump.
pub async fn write_cycle<S: MetricSink>(
    body: &str,
    classifier: &Classifier,
    writer: &Writer<S>,
    stats: &PipelineStats,
) {
    let dump = parse_accounting(body);
    stats.record_parsed(dump.entries.len(), dump.anomalies.len());
    for anomaly in &dump.anomalies {
        warn!(%anomaly, "Substituted unparseable accounting field");
    }
    debug!(entries = dump.entries.len(), "Parsed accounting data");

    let classified = classifier.classify_all(&dump.entries);
    stats.record_classified(classified.anomalies.len(), classified.aborted);
    for anomaly in &classified.anomalies {
        warn!(
            from = ?anomaly.source_addr,
            to = ?anomaly.destination_addr,
            "Flow with no local endpoint"
        );
    }
    if classified.aborted {
        warn!(
            entries = dump.entries.len(),
            "Discarding whole batch after classification anomaly"
        );
        return;
    }

    let batch = Batch::new(classified.points);
    let started = Instant::now();
    match writer.write(batch).await {
        Ok(report) => {
            stats.record_written(report.written, report.point_errors);
            info!(
                points = report.written,
                dropped = report.point_errors,
                elapsed = ?started.elapsed(),
                "Wrote usage points"
            );
        }
        Err(e) => {
            stats.record_write_failed();
            error!(error = %e, "Error writing usage points");
        }
    }
}

fn log_stats(snapshot: &StatsSnapshot) {
    match serde_json::to_string(snapshot) {
        Ok(json) => info!(stats = %json, "Pipeline stats"),
        Err(e) => warn!(error = %e, "Could not serialize stats"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::AnomalyPolicy;
    use crate::db::WriteReport;
    use crate::error::{FetchError, WriteError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    const DUMP: &str = "192.168.1.5 8.8.8.8 1200 4\n8.8.8.8 192.168.1.5 64000 50\n\n";

    /// Replays scripted results; repeats the last one when the script runs out.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<String, ()>>>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<&str, ()>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().map(|r| r.map(str::to_string)).collect()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl FlowSource for ScriptedSource {
        async fn fetch(&self) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front().unwrap()
                } else {
                    script.front().cloned().unwrap()
                }
            };
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            next.map_err(|_| FetchError::Timeout(Duration::from_secs(1)))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Arc<Mutex<Vec<Batch>>>,
        panic: bool,
        delay: Duration,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl MetricSink for RecordingSink {
        async fn write(&self, batch: Batch) -> Result<WriteReport, WriteError> {
            if self.panic {
                panic!("sink exploded");
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            let written = batch.len();
            self.batches.lock().unwrap().push(batch);
            Ok(WriteReport {
                written,
                point_errors: 0,
            })
        }
    }

    fn classifier() -> Classifier {
        Classifier::new("192.168.0.0/16".parse().unwrap())
    }

    async fn run_for(
        scheduler: Scheduler<ScriptedSource, RecordingSink>,
        duration: Duration,
    ) -> StatsSnapshot {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(scheduler.run_until(async {
            stop_rx.await.ok();
        }));
        time::sleep(duration).await;
        stop_tx.send(()).unwrap();
        handle.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn polls_every_interval_and_writes_in_order() {
        let sink = RecordingSink::default();
        let batches = Arc::clone(&sink.batches);
        let scheduler = Scheduler::new(
            ScriptedSource::new(vec![Ok(DUMP)]),
            Writer::new(sink, Duration::from_secs(5)),
            classifier(),
            Duration::from_secs(15),
        );

        let stats = run_for(scheduler, Duration::from_secs(46)).await;
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.fetches_ok, 3);
        assert_eq!(stats.points_written, 6);

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 3);
        let first = &batches[0].points;
        assert_eq!(first[0].ip.to_string(), "192.168.1.5");
        assert_eq!(first[0].direction.as_str(), "upload");
        assert_eq!(first[1].direction.as_str(), "download");
        assert_eq!(first[1].bytes, 64000);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_does_not_stop_next_tick() {
        let sink = RecordingSink::default();
        let batches = Arc::clone(&sink.batches);
        let scheduler = Scheduler::new(
            ScriptedSource::new(vec![Err(()), Ok(DUMP)]),
            Writer::new(sink, Duration::from_secs(5)),
            classifier(),
            Duration::from_secs(15),
        );

        let stats = run_for(scheduler, Duration::from_secs(31)).await;
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.fetches_failed, 1);
        assert_eq!(stats.fetches_ok, 1);
        assert_eq!(batches.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_router_is_bounded() {
        let sink = RecordingSink::default();
        let source = ScriptedSource::new(vec![Ok(DUMP)]).slow(Duration::from_secs(1000));
        let scheduler = Scheduler::new(
            source,
            Writer::new(sink, Duration::from_secs(5)),
            classifier(),
            Duration::from_secs(15),
        )
        .with_max_in_flight(1)
        .with_drain_timeout(Duration::from_secs(1));
        let source = Arc::clone(&scheduler.source);

        let stats = run_for(scheduler, Duration::from_secs(61)).await;
        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.ticks_skipped, 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.fetches_ok, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_is_bounded() {
        let sink = RecordingSink {
            delay: Duration::from_secs(40),
            ..Default::default()
        };
        let peak = Arc::clone(&sink.peak);
        let batches = Arc::clone(&sink.batches);
        let scheduler = Scheduler::new(
            ScriptedSource::new(vec![Ok(DUMP)]),
            Writer::new(sink, Duration::from_secs(100)),
            classifier(),
            Duration::from_secs(15),
        )
        .with_max_in_flight(1)
        .with_drain_timeout(Duration::from_secs(1));

        // Writes start at 15s and 60s; the data from 30s and 45s finds the
        // write stage busy.
        let stats = run_for(scheduler, Duration::from_secs(61)).await;
        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.fetches_ok, 4);
        assert_eq!(stats.batches_dropped, 2);
        assert_eq!(stats.points_written, 2);
        assert_eq!(batches.lock().unwrap().len(), 1);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_policy_writes_nothing_for_the_cycle() {
        let sink = RecordingSink::default();
        let batches = Arc::clone(&sink.batches);
        let dump = "192.168.1.5 8.8.8.8 10 1\n8.8.8.8 1.1.1.1 10 1\n8.8.8.8 192.168.1.9 10 1\n\n";
        let scheduler = Scheduler::new(
            ScriptedSource::new(vec![Ok(dump)]),
            Writer::new(sink, Duration::from_secs(5)),
            classifier().with_anomaly_policy(AnomalyPolicy::AbortBatch),
            Duration::from_secs(15),
        );

        let stats = run_for(scheduler, Duration::from_secs(16)).await;
        assert_eq!(stats.classification_anomalies, 1);
        assert_eq!(stats.batches_aborted, 1);
        assert_eq!(stats.points_written, 0);
        assert!(batches.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn skip_policy_writes_valid_points() {
        let sink = RecordingSink::default();
        let batches = Arc::clone(&sink.batches);
        let dump = "192.168.1.5 8.8.8.8 10 1\n8.8.8.8 1.1.1.1 10 1\n8.8.8.8 192.168.1.9 10 1\n\n";
        let scheduler = Scheduler::new(
            ScriptedSource::new(vec![Ok(dump)]),
            Writer::new(sink, Duration::from_secs(5)),
            classifier(),
            Duration::from_secs(15),
        );

        let stats = run_for(scheduler, Duration::from_secs(16)).await;
        assert_eq!(stats.classification_anomalies, 1);
        assert_eq!(stats.points_written, 2);
        assert_eq!(batches.lock().unwrap()[0].len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn parse_anomalies_are_counted() {
        let sink = RecordingSink::default();
        let batches = Arc::clone(&sink.batches);
        let scheduler = Scheduler::new(
            ScriptedSource::new(vec![Ok("192.168.1.5 8.8.8.8 NaN 3\n")]),
            Writer::new(sink, Duration::from_secs(5)),
            classifier(),
            Duration::from_secs(15),
        );

        let stats = run_for(scheduler, Duration::from_secs(16)).await;
        assert_eq!(stats.parse_anomalies, 1);
        assert_eq!(stats.entries_parsed, 1);
        let batches = batches.lock().unwrap();
        assert_eq!(batches[0].points[0].bytes, 0);
        assert_eq!(batches[0].points[0].packets, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_cycle_does_not_kill_loop() {
        let sink = RecordingSink {
            panic: true,
            ..Default::default()
        };
        let scheduler = Scheduler::new(
            ScriptedSource::new(vec![Ok(DUMP)]),
            Writer::new(sink, Duration::from_secs(5)),
            classifier(),
            Duration::from_secs(15),
        );

        let stats = run_for(scheduler, Duration::from_secs(46)).await;
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.fetches_ok, 3);
        assert_eq!(stats.points_written, 0);
    }
}
