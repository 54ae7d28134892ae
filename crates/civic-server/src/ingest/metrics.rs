//! Metrics registry
//!
//! Counters, gauges and histograms updated by the dispatcher, scheduler and
//! control plane as their state changes. Exposed in the Prometheus text
//! format by `GET /metrics`. Nothing reads these values to make decisions.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::models::RunStatus;

pub const RUNS_TOTAL: &str = "civicsync_runs_total";
pub const RUN_DURATION_SECONDS: &str = "civicsync_run_duration_seconds";
pub const RUNNING_JOBS: &str = "civicsync_running_jobs";
pub const RECORDS_SEEN_TOTAL: &str = "civicsync_records_seen_total";
pub const RECORDS_UPSERTED_TOTAL: &str = "civicsync_records_upserted_total";
pub const RECORDS_SKIPPED_TOTAL: &str = "civicsync_records_skipped_total";
pub const RECORDS_FAILED_TOTAL: &str = "civicsync_records_failed_total";
pub const ADMIN_ACTIONS_TOTAL: &str = "civicsync_admin_actions_total";
pub const SCHEDULER_TICKS_TOTAL: &str = "civicsync_scheduler_ticks_total";
pub const RUNS_ORPHANED_TOTAL: &str = "civicsync_runs_orphaned_total";

/// Upper bounds of the run duration buckets, in seconds
const DURATION_BUCKETS: [f64; 10] = [1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0];

type Labels = Vec<(&'static str, String)>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    name: &'static str,
    labels: Labels,
}

impl SeriesKey {
    fn new(name: &'static str, labels: &[(&'static str, &str)]) -> Self {
        Self {
            name,
            labels: labels.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Histogram {
    buckets: [u64; DURATION_BUCKETS.len()],
    count: u64,
    sum: f64,
}

impl Histogram {
    fn observe(&mut self, value: f64) {
        for (bucket, bound) in self.buckets.iter_mut().zip(DURATION_BUCKETS) {
            if value <= bound {
                *bucket += 1;
            }
        }
        self.count += 1;
        self.sum += value;
    }
}

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: Mutex<BTreeMap<SeriesKey, u64>>,
    histograms: Mutex<BTreeMap<SeriesKey, Histogram>>,
    running_jobs: AtomicI64,
    scheduler_ticks: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_counter(&self, name: &'static str, labels: &[(&'static str, &str)], by: u64) {
        if by == 0 {
            return;
        }
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.entry(SeriesKey::new(name, labels)).or_default() += by;
    }

    /// Current value of a counter series, 0 if never incremented.
    pub fn counter_value(&self, name: &'static str, labels: &[(&'static str, &str)]) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters
            .get(&SeriesKey::new(name, labels))
            .copied()
            .unwrap_or(0)
    }

    pub fn observe_duration(&self, name: &'static str, labels: &[(&'static str, &str)], value: Duration) {
        let mut histograms = self.histograms.lock().unwrap_or_else(PoisonError::into_inner);
        histograms
            .entry(SeriesKey::new(name, labels))
            .or_default()
            .observe(value.as_secs_f64());
    }

    /// Number of observations recorded for a histogram series.
    pub fn histogram_count(&self, name: &'static str, labels: &[(&'static str, &str)]) -> u64 {
        let histograms = self.histograms.lock().unwrap_or_else(PoisonError::into_inner);
        histograms
            .get(&SeriesKey::new(name, labels))
            .map(|h| h.count)
            .unwrap_or(0)
    }

    pub fn run_started(&self) {
        self.running_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_finished(&self, job_id: &str, mode: &str, status: RunStatus, elapsed: Duration) {
        self.running_jobs.fetch_sub(1, Ordering::Relaxed);
        self.inc_counter(
            RUNS_TOTAL,
            &[("job_id", job_id), ("mode", mode), ("status", status.as_str())],
            1,
        );
        self.observe_duration(RUN_DURATION_SECONDS, &[("job_id", job_id)], elapsed);
    }

    /// Record a run that never started processing (cancelled while queued).
    pub fn run_abandoned(&self, job_id: &str, mode: &str, status: RunStatus) {
        self.inc_counter(
            RUNS_TOTAL,
            &[("job_id", job_id), ("mode", mode), ("status", status.as_str())],
            1,
        );
    }

    pub fn running_jobs(&self) -> i64 {
        self.running_jobs.load(Ordering::Relaxed)
    }

    pub fn record_batch(&self, job_id: &str, upserted: u64, failed: u64) {
        let labels = [("job_id", job_id)];
        self.inc_counter(RECORDS_UPSERTED_TOTAL, &labels, upserted);
        self.inc_counter(RECORDS_FAILED_TOTAL, &labels, failed);
    }

    pub fn record_seen(&self, job_id: &str, seen: u64) {
        self.inc_counter(RECORDS_SEEN_TOTAL, &[("job_id", job_id)], seen);
    }

    pub fn record_skipped(&self, job_id: &str, skipped: u64) {
        self.inc_counter(RECORDS_SKIPPED_TOTAL, &[("job_id", job_id)], skipped);
    }

    pub fn record_admin_action(&self, action: &str, result: &str) {
        self.inc_counter(ADMIN_ACTIONS_TOTAL, &[("action", action), ("result", result)], 1);
    }

    pub fn record_orphaned(&self, job_id: &str) {
        self.inc_counter(RUNS_ORPHANED_TOTAL, &[("job_id", job_id)], 1);
    }

    pub fn scheduler_tick(&self) {
        self.scheduler_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scheduler_ticks(&self) -> u64 {
        self.scheduler_ticks.load(Ordering::Relaxed)
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let mut last_name = "";
        for (key, value) in &counters {
            if key.name != last_name {
                let _ = writeln!(out, "# TYPE {} counter", key.name);
                last_name = key.name;
            }
            let _ = writeln!(out, "{}{} {}", key.name, format_labels(&key.labels, None), value);
        }

        let _ = writeln!(out, "# TYPE {SCHEDULER_TICKS_TOTAL} counter");
        let _ = writeln!(out, "{SCHEDULER_TICKS_TOTAL} {}", self.scheduler_ticks());

        let _ = writeln!(out, "# TYPE {RUNNING_JOBS} gauge");
        let _ = writeln!(out, "{RUNNING_JOBS} {}", self.running_jobs());

        let histograms = self.histograms.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let mut last_name = "";
        for (key, histogram) in &histograms {
            if key.name != last_name {
                let _ = writeln!(out, "# TYPE {} histogram", key.name);
                last_name = key.name;
            }
            for (bound, count) in DURATION_BUCKETS.iter().zip(histogram.buckets) {
                let le = bound.to_string();
                let _ = writeln!(
                    out,
                    "{}_bucket{} {}",
                    key.name,
                    format_labels(&key.labels, Some(&le)),
                    count
                );
            }
            let _ = writeln!(
                out,
                "{}_bucket{} {}",
                key.name,
                format_labels(&key.labels, Some("+Inf")),
                histogram.count
            );
            let labels = format_labels(&key.labels, None);
            let _ = writeln!(out, "{}_sum{} {}", key.name, labels, histogram.sum);
            let _ = writeln!(out, "{}_count{} {}", key.name, labels, histogram.count);
        }

        out
    }
}

fn format_labels(labels: &[(&'static str, String)], le: Option<&str>) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect();
    if let Some(le) = le {
        parts.push(format!("le=\"{le}\""));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
