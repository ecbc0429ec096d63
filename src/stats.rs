//! Per-probe statistics tracking, exposed via `Manager::stats()` and logged
//! at shutdown. Ambient bookkeeping, not a metrics-export pipeline — the
//! Non-goals exclude the latter, not internal counters used for logs.

use std::collections::HashMap;

/// Counters for a single probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeStats {
    pub events_processed: u64,
    pub events_dropped: u64,
    pub attach_failures: u64,
}

/// Totals across every probe in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatTotals {
    pub events_processed: u64,
    pub events_dropped: u64,
    pub attach_failures: u64,
}

/// Tracks statistics per probe id, keyed by the probe's instrumented
/// package name (unique within a loaded catalog).
#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: HashMap<String, ProbeStats>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&mut self, probe: &str) {
        self.stats.entry(probe.to_string()).or_default().events_processed += 1;
    }

    pub fn record_dropped(&mut self, probe: &str) {
        self.stats.entry(probe.to_string()).or_default().events_dropped += 1;
    }

    pub fn record_attach_failure(&mut self, probe: &str) {
        self.stats.entry(probe.to_string()).or_default().attach_failures += 1;
    }

    pub fn get(&self, probe: &str) -> ProbeStats {
        self.stats.get(probe).copied().unwrap_or_default()
    }

    pub fn totals(&self) -> StatTotals {
        self.stats.values().fold(
            StatTotals {
                events_processed: 0,
                events_dropped: 0,
                attach_failures: 0,
            },
            |acc, s| StatTotals {
                events_processed: acc.events_processed + s.events_processed,
                events_dropped: acc.events_dropped + s.events_dropped,
                attach_failures: acc.attach_failures + s.attach_failures,
            },
        )
    }

    /// Log a summary line per probe plus totals, sorted by events processed
    /// descending. Called at shutdown.
    pub fn log_summary(&self) {
        let mut sorted: Vec<_> = self.stats.iter().collect();
        sorted.sort_by(|a, b| b.1.events_processed.cmp(&a.1.events_processed));
        for (probe, s) in sorted {
            tracing::info!(
                probe,
                processed = s.events_processed,
                dropped = s.events_dropped,
                attach_failures = s.attach_failures,
                "probe statistics"
            );
        }
        let totals = self.totals();
        tracing::info!(
            processed = totals.events_processed,
            dropped = totals.events_dropped,
            attach_failures = totals.attach_failures,
            "total statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_processed_and_dropped_independently() {
        let mut tracker = StatsTracker::new();
        tracker.record_processed("http");
        tracker.record_processed("http");
        tracker.record_dropped("http");

        let stats = tracker.get("http");
        assert_eq!(stats.events_processed, 2);
        assert_eq!(stats.events_dropped, 1);
    }

    #[test]
    fn unknown_probe_returns_zeroed_stats() {
        let tracker = StatsTracker::new();
        assert_eq!(tracker.get("missing"), ProbeStats::default());
    }

    #[test]
    fn totals_sum_across_probes() {
        let mut tracker = StatsTracker::new();
        tracker.record_processed("http");
        tracker.record_processed("sql");
        tracker.record_attach_failure("kafka");

        let totals = tracker.totals();
        assert_eq!(totals.events_processed, 2);
        assert_eq!(totals.attach_failures, 1);
    }

    #[test]
    fn log_summary_does_not_panic_when_empty() {
        let tracker = StatsTracker::new();
        tracker.log_summary();
    }
}
