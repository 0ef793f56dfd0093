//! Error tracking, recovery dispatch and trend statistics.
//!
//! The tracker keeps a history of every error it is told about, keyed by a
//! stable error code. Recoverable errors with a registered strategy trigger
//! that strategy on a background thread; outcomes come back over an
//! instance-scoped channel, so two trackers never see each other's events.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Severity;
use crate::timing;

/// One tracked error occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Stable grouping key, e.g. "layer-5/parsing".
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub recoverable: bool,
    pub timestamp_ms: u64,
    pub context: Option<BTreeMap<String, String>>,
}

impl ErrorRecord {
    pub fn new(code: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity,
            recoverable: severity < Severity::Error,
            timestamp_ms: timing::unix_ms(),
            context: None,
        }
    }

    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Result of one background recovery invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub code: String,
    pub succeeded: bool,
    pub timestamp_ms: u64,
}

/// Aggregate counters over everything tracked so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerStats {
    pub total: usize,
    pub recoverable: usize,
    pub by_code: BTreeMap<String, usize>,
    /// Successful recoveries over recoverable errors. Exactly 1.0 when no
    /// recoverable error has been tracked.
    pub recovery_rate: f64,
}

/// Time-bucketed error counts for trend reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendWindow {
    Hour,
    Day,
    Week,
}

impl TrendWindow {
    fn bucket_ms(self) -> u64 {
        match self {
            TrendWindow::Hour => 60 * 60 * 1000,
            TrendWindow::Day => 24 * 60 * 60 * 1000,
            TrendWindow::Week => 7 * 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendBucket {
    pub start_ms: u64,
    pub total: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_code: BTreeMap<String, usize>,
}

type RecoveryFn = Arc<dyn Fn(&ErrorRecord) -> bool + Send + Sync>;

/// Tracks errors and drives registered per-code recovery strategies.
pub struct ErrorTracker {
    records: Vec<ErrorRecord>,
    strategies: HashMap<String, RecoveryFn>,
    outcomes: Vec<RecoveryOutcome>,
    pending: usize,
    events_tx: Sender<RecoveryOutcome>,
    events_rx: Receiver<RecoveryOutcome>,
    handles: Vec<JoinHandle<()>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            records: Vec::new(),
            strategies: HashMap::new(),
            outcomes: Vec::new(),
            pending: 0,
            events_tx,
            events_rx,
            handles: Vec::new(),
        }
    }

    /// Register the recovery strategy for an error code. Replaces any
    /// previous strategy for the same code.
    pub fn register_strategy<F>(&mut self, code: impl Into<String>, strategy: F)
    where
        F: Fn(&ErrorRecord) -> bool + Send + Sync + 'static,
    {
        self.strategies.insert(code.into(), Arc::new(strategy));
    }

    /// Record an error. A recoverable error with a registered strategy
    /// kicks that strategy off on a background thread; its outcome arrives
    /// on this tracker's event channel.
    pub fn track(&mut self, record: ErrorRecord) {
        debug!(code = %record.code, severity = %record.severity.as_str(), "error tracked");
        if record.recoverable {
            if let Some(strategy) = self.strategies.get(&record.code).cloned() {
                let tx = self.events_tx.clone();
                let job = record.clone();
                let spawned = thread::Builder::new()
                    .name("renovar-recovery".to_string())
                    .spawn(move || {
                        let succeeded = strategy(&job);
                        let _ = tx.send(RecoveryOutcome {
                            code: job.code,
                            succeeded,
                            timestamp_ms: timing::unix_ms(),
                        });
                    });
                match spawned {
                    Ok(handle) => {
                        self.pending += 1;
                        self.handles.push(handle);
                    }
                    Err(e) => warn!(code = %record.code, error = %e, "recovery thread failed to spawn"),
                }
            }
        }
        self.records.push(record);
    }

    /// Fold any completed recovery outcomes into local state and reap the
    /// threads that produced them.
    pub fn drain_outcomes(&mut self) -> &[RecoveryOutcome] {
        while let Ok(outcome) = self.events_rx.try_recv() {
            self.pending = self.pending.saturating_sub(1);
            self.outcomes.push(outcome);
        }
        self.reap_finished();
        &self.outcomes
    }

    /// Join recovery threads that have already exited, keeping the rest.
    fn reap_finished(&mut self) {
        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                self.handles.push(handle);
            }
        }
    }

    /// Wait for all in-flight recovery strategies to report, up to the
    /// timeout. Returns true when none remain pending.
    pub fn flush(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.drain_outcomes();
        while self.pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.events_rx.recv_timeout(deadline - now) {
                Ok(outcome) => {
                    self.pending = self.pending.saturating_sub(1);
                    self.outcomes.push(outcome);
                }
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        // Nothing pending, so every thread has sent its outcome and is at
        // or past its final send.
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        true
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn history(&self, code: &str) -> Vec<&ErrorRecord> {
        self.records.iter().filter(|r| r.code == code).collect()
    }

    pub fn stats(&mut self) -> TrackerStats {
        self.drain_outcomes();
        let mut by_code: BTreeMap<String, usize> = BTreeMap::new();
        for record in &self.records {
            *by_code.entry(record.code.clone()).or_insert(0) += 1;
        }
        let recoverable = self.records.iter().filter(|r| r.recoverable).count();
        let successes = self.outcomes.iter().filter(|o| o.succeeded).count();
        let recovery_rate = if recoverable == 0 {
            1.0
        } else {
            (successes as f64 / recoverable as f64).min(1.0)
        };
        TrackerStats {
            total: self.records.len(),
            recoverable,
            by_code,
            recovery_rate,
        }
    }

    /// The `n` most frequent error codes, most frequent first. Ties break
    /// alphabetically for stable output.
    pub fn top_errors(&mut self, n: usize) -> Vec<(String, usize)> {
        let stats = self.stats();
        let mut entries: Vec<(String, usize)> = stats.by_code.into_iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries.truncate(n);
        entries
    }

    /// Bucket the history into fixed windows, oldest first.
    pub fn trend(&self, window: TrendWindow) -> Vec<TrendBucket> {
        let width = window.bucket_ms();
        let mut buckets: BTreeMap<u64, TrendBucket> = BTreeMap::new();
        for record in &self.records {
            let start_ms = (record.timestamp_ms / width) * width;
            let bucket = buckets.entry(start_ms).or_insert_with(|| TrendBucket {
                start_ms,
                total: 0,
                by_severity: BTreeMap::new(),
                by_code: BTreeMap::new(),
            });
            bucket.total += 1;
            *bucket
                .by_severity
                .entry(record.severity.as_str().to_string())
                .or_insert(0) += 1;
            *bucket.by_code.entry(record.code.clone()).or_insert(0) += 1;
        }
        buckets.into_values().collect()
    }

    /// Drop all history, outcomes and strategies after letting in-flight
    /// recoveries finish.
    pub fn clear(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        self.drain_outcomes();
        self.records.clear();
        self.outcomes.clear();
        self.strategies.clear();
        self.pending = 0;
        info!("error tracker cleared");
    }
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ErrorTracker {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(code: &str, severity: Severity, timestamp_ms: u64) -> ErrorRecord {
        ErrorRecord {
            timestamp_ms,
            ..ErrorRecord::new(code, "boom", severity)
        }
    }

    #[test]
    fn test_vacuous_recovery_rate_is_one() {
        let mut tracker = ErrorTracker::new();
        tracker.track(ErrorRecord::new("layer-5/syntax", "bad", Severity::Error));
        let stats = tracker.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.recoverable, 0);
        assert_eq!(stats.recovery_rate, 1.0);
    }

    #[test]
    fn test_registered_strategy_runs_in_background() {
        let mut tracker = ErrorTracker::new();
        tracker.register_strategy("layer-2/transformation", |record| {
            record.message.contains("entity")
        });
        tracker.track(ErrorRecord::new(
            "layer-2/transformation",
            "malformed entity",
            Severity::Warning,
        ));
        assert!(tracker.flush(Duration::from_secs(5)));
        let stats = tracker.stats();
        assert_eq!(stats.recoverable, 1);
        assert_eq!(stats.recovery_rate, 1.0);
    }

    #[test]
    fn test_failed_recovery_lowers_the_rate() {
        let mut tracker = ErrorTracker::new();
        tracker.register_strategy("flaky", |_| false);
        tracker.track(ErrorRecord::new("flaky", "first", Severity::Warning));
        tracker.track(
            ErrorRecord::new("flaky", "second", Severity::Warning).recoverable(true),
        );
        assert!(tracker.flush(Duration::from_secs(5)));
        let stats = tracker.stats();
        assert_eq!(stats.recoverable, 2);
        assert_eq!(stats.recovery_rate, 0.0);
    }

    #[test]
    fn test_unregistered_code_spawns_nothing() {
        let mut tracker = ErrorTracker::new();
        tracker.track(ErrorRecord::new("unseen", "oops", Severity::Warning));
        assert!(tracker.flush(Duration::from_millis(50)));
        assert!(tracker.drain_outcomes().is_empty());
    }

    #[test]
    fn test_history_and_top_errors() {
        let mut tracker = ErrorTracker::new();
        for _ in 0..3 {
            tracker.track(ErrorRecord::new("common", "x", Severity::Error));
        }
        tracker.track(ErrorRecord::new("rare", "y", Severity::Error));
        assert_eq!(tracker.history("common").len(), 3);
        let top = tracker.top_errors(2);
        assert_eq!(top[0], ("common".to_string(), 3));
        assert_eq!(top[1], ("rare".to_string(), 1));
    }

    #[test]
    fn test_trend_buckets_by_hour() {
        let hour = 60 * 60 * 1000;
        let mut tracker = ErrorTracker::new();
        tracker.track(record_at("a", Severity::Warning, hour + 10));
        tracker.track(record_at("a", Severity::Error, hour + 20));
        tracker.track(record_at("b", Severity::Error, 3 * hour + 5));
        let buckets = tracker.trend(TrendWindow::Hour);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].start_ms, hour);
        assert_eq!(buckets[0].total, 2);
        assert_eq!(buckets[0].by_severity.get("warning"), Some(&1));
        assert_eq!(buckets[1].by_code.get("b"), Some(&1));
    }

    #[test]
    fn test_week_window_merges_days() {
        let day = 24 * 60 * 60 * 1000;
        let mut tracker = ErrorTracker::new();
        tracker.track(record_at("a", Severity::Error, day));
        tracker.track(record_at("a", Severity::Error, 3 * day));
        assert_eq!(tracker.trend(TrendWindow::Day).len(), 2);
        assert_eq!(tracker.trend(TrendWindow::Week).len(), 1);
    }

    #[test]
    fn test_finished_recovery_threads_are_reaped() {
        let mut tracker = ErrorTracker::new();
        tracker.register_strategy("c", |_| true);
        for n in 0..3 {
            tracker.track(ErrorRecord::new("c", format!("err {n}"), Severity::Warning));
        }
        assert!(tracker.flush(Duration::from_secs(5)));
        assert!(tracker.handles.is_empty());
        // Draining after new work also reaps whatever has finished by then.
        tracker.track(ErrorRecord::new("c", "late", Severity::Warning));
        assert!(tracker.flush(Duration::from_secs(5)));
        tracker.drain_outcomes();
        assert!(tracker.handles.is_empty());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut tracker = ErrorTracker::new();
        tracker.register_strategy("c", |_| true);
        tracker.track(ErrorRecord::new("c", "x", Severity::Warning));
        tracker.clear();
        assert_eq!(tracker.records().len(), 0);
        let stats = tracker.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.recovery_rate, 1.0);
    }

    #[test]
    fn test_context_round_trips() {
        let record = ErrorRecord::new("c", "x", Severity::Warning)
            .with_context("file", "src/App.tsx")
            .with_context("layer", "5");
        let json = serde_json::to_string(&record).unwrap();
        let back: ErrorRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.context.unwrap().get("file").map(String::as_str), Some("src/App.tsx"));
    }
}
