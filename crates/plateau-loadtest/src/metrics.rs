//! Run-wide metrics aggregation.
//!
//! Every virtual user records into one shared [`LoadTestMetrics`]. Counters
//! are atomics, latency distributions are HDR histograms behind
//! `parking_lot` locks. Each outcome is counted globally and, when it was
//! classified into a phase, once more in that phase. Outcomes outside every
//! phase are counted as unphased so that
//! `sum(phase counts) + unphased == total` holds for every run.
//!
//! Latencies are stored in microseconds (1µs to 60s, 3 significant digits).
//! Values above the range saturate instead of being dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use prometheus::{Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Result;
use crate::phase::{GLOBAL_PHASE, NO_PHASE};
use crate::target::Endpoint;

/// Upper bound of the latency histograms (60s in microseconds)
const MAX_LATENCY_US: u64 = 60_000_000;

fn latency_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(1, MAX_LATENCY_US, 3).expect("static histogram bounds are valid")
}

fn as_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// One request, as seen by the aggregator
#[derive(Debug, Clone, Copy)]
pub struct RequestOutcome<'a> {
    pub endpoint: Endpoint,
    pub success: bool,
    pub duration: Duration,
    /// `None` when the request fell outside every phase window
    pub phase: Option<&'a str>,
}

#[derive(Debug)]
struct PhaseMetrics {
    count: AtomicU64,
    failed: AtomicU64,
    latency: Mutex<Histogram<u64>>,
}

impl PhaseMetrics {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            latency: Mutex::new(latency_histogram()),
        }
    }

    fn record(&self, duration: Duration, failed: bool) {
        self.count.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.latency.lock().saturating_record(as_micros(duration));
    }
}

#[derive(Debug, Default)]
struct CheckMetrics {
    passes: AtomicU64,
    fails: AtomicU64,
}

/// Pass/fail tally of one named check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCounts {
    pub passes: u64,
    pub fails: u64,
}

impl CheckCounts {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }
}

/// Load test metrics shared by all virtual users
#[derive(Debug)]
pub struct LoadTestMetrics {
    /// Total requests sent
    total_requests: AtomicU64,

    /// Requests judged failed (bad status, timeout, transport error)
    failed_requests: AtomicU64,

    /// Requests recorded outside every phase window
    unphased_requests: AtomicU64,

    add_requests: AtomicU64,
    remove_requests: AtomicU64,

    /// Completed workflow iterations
    iterations: AtomicU64,

    /// Latency histogram (microseconds)
    latency: Mutex<Histogram<u64>>,

    phases: RwLock<HashMap<String, PhaseMetrics>>,

    checks: RwLock<HashMap<String, CheckMetrics>>,

    /// Error counts by kind
    error_counts: RwLock<HashMap<String, u64>>,

    bootstrap_ok: AtomicU64,
    bootstrap_failed: AtomicU64,

    peak_vus: AtomicU64,

    start_time: RwLock<Option<Instant>>,
    end_time: RwLock<Option<Instant>>,
}

impl Default for LoadTestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadTestMetrics {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            unphased_requests: AtomicU64::new(0),
            add_requests: AtomicU64::new(0),
            remove_requests: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            latency: Mutex::new(latency_histogram()),
            phases: RwLock::new(HashMap::new()),
            checks: RwLock::new(HashMap::new()),
            error_counts: RwLock::new(HashMap::new()),
            bootstrap_ok: AtomicU64::new(0),
            bootstrap_failed: AtomicU64::new(0),
            peak_vus: AtomicU64::new(0),
            start_time: RwLock::new(None),
            end_time: RwLock::new(None),
        }
    }

    /// Metrics with the given phases registered up front, so that phases
    /// which never see traffic still show up in the report
    pub fn with_phases<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let metrics = Self::new();
        {
            let mut phases = metrics.phases.write();
            for name in names {
                phases.insert(name.to_string(), PhaseMetrics::new());
            }
        }
        metrics
    }

    pub fn mark_started(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    pub fn mark_finished(&self) {
        *self.end_time.write() = Some(Instant::now());
    }

    /// Count a request in the global stream
    pub fn record_global(&self, duration: Duration, failed: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.latency.lock().saturating_record(as_micros(duration));
    }

    /// Count a request in a phase stream
    pub fn record_phase(&self, phase: &str, duration: Duration) {
        self.record_phase_sample(phase, duration, false);
    }

    fn record_phase_sample(&self, phase: &str, duration: Duration, failed: bool) {
        {
            let phases = self.phases.read();
            if let Some(metrics) = phases.get(phase) {
                metrics.record(duration, failed);
                return;
            }
        }

        self.phases
            .write()
            .entry(phase.to_string())
            .or_insert_with(PhaseMetrics::new)
            .record(duration, failed);
    }

    /// Record one request outcome: always globally, and in its phase when
    /// it has one
    pub fn record(&self, outcome: &RequestOutcome<'_>) {
        self.record_global(outcome.duration, !outcome.success);

        match outcome.endpoint {
            Endpoint::Add => self.add_requests.fetch_add(1, Ordering::Relaxed),
            Endpoint::Remove => self.remove_requests.fetch_add(1, Ordering::Relaxed),
        };

        match outcome.phase {
            Some(phase) if phase != NO_PHASE => {
                self.record_phase_sample(phase, outcome.duration, !outcome.success)
            }
            _ => {
                self.unphased_requests.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_check(&self, name: &str, passed: bool) {
        let bump = |check: &CheckMetrics| {
            let counter = if passed { &check.passes } else { &check.fails };
            counter.fetch_add(1, Ordering::Relaxed);
        };

        {
            let checks = self.checks.read();
            if let Some(check) = checks.get(name) {
                bump(check);
                return;
            }
        }

        let mut checks = self.checks.write();
        bump(checks.entry(name.to_string()).or_default());
    }

    pub fn record_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: &str) {
        let mut errors = self.error_counts.write();
        *errors.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn record_bootstrap(&self, ok: bool) {
        if ok {
            self.bootstrap_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.bootstrap_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Track the highest number of concurrently active virtual users
    pub fn observe_vus(&self, active: usize) {
        self.peak_vus.fetch_max(active as u64, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Freeze the current state. Meant to be taken once every worker has
    /// stopped.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let duration = match (*self.start_time.read(), *self.end_time.read()) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };

        let phases = self
            .phases
            .read()
            .iter()
            .map(|(name, metrics)| {
                (
                    name.clone(),
                    PhaseSnapshot {
                        count: metrics.count.load(Ordering::Relaxed),
                        failed: metrics.failed.load(Ordering::Relaxed),
                        latency: metrics.latency.lock().clone(),
                    },
                )
            })
            .collect();

        let checks = self
            .checks
            .read()
            .iter()
            .map(|(name, check)| {
                (
                    name.clone(),
                    CheckCounts {
                        passes: check.passes.load(Ordering::Relaxed),
                        fails: check.fails.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            unphased_requests: self.unphased_requests.load(Ordering::Relaxed),
            add_requests: self.add_requests.load(Ordering::Relaxed),
            remove_requests: self.remove_requests.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            latency: self.latency.lock().clone(),
            phases,
            checks,
            error_counts: self
                .error_counts
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            bootstrap_ok: self.bootstrap_ok.load(Ordering::Relaxed),
            bootstrap_failed: self.bootstrap_failed.load(Ordering::Relaxed),
            peak_vus: self.peak_vus.load(Ordering::Relaxed),
            duration,
        }
    }
}

/// Frozen phase counters
#[derive(Debug, Clone)]
pub struct PhaseSnapshot {
    pub count: u64,
    pub failed: u64,
    pub latency: Histogram<u64>,
}

/// Frozen run metrics, consumed by the report
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub unphased_requests: u64,
    pub add_requests: u64,
    pub remove_requests: u64,
    pub iterations: u64,
    pub latency: Histogram<u64>,
    pub phases: BTreeMap<String, PhaseSnapshot>,
    pub checks: BTreeMap<String, CheckCounts>,
    pub error_counts: BTreeMap<String, u64>,
    pub bootstrap_ok: u64,
    pub bootstrap_failed: u64,
    pub peak_vus: u64,
    pub duration: Duration,
}

impl MetricsSnapshot {
    pub fn phase_total(&self) -> u64 {
        self.phases.values().map(|p| p.count).sum()
    }

    /// Prometheus text exposition of the final counters
    pub fn to_prometheus(&self) -> Result<String> {
        let registry = Registry::new();

        let requests = IntCounter::new("plateau_http_reqs_total", "Total requests sent")?;
        let failed = IntCounter::new("plateau_http_req_failed_total", "Failed requests")?;
        let phase_requests = IntCounterVec::new(
            Opts::new("plateau_phase_reqs_total", "Requests recorded per phase"),
            &["phase"],
        )?;
        let checks = IntCounterVec::new(
            Opts::new("plateau_checks_total", "Check results"),
            &["check", "result"],
        )?;
        let peak_vus = IntGauge::new("plateau_vus_max", "Peak concurrent virtual users")?;
        let durations = GaugeVec::new(
            Opts::new("plateau_http_req_duration_ms", "Request duration quantiles"),
            &["phase", "quantile"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(failed.clone()))?;
        registry.register(Box::new(phase_requests.clone()))?;
        registry.register(Box::new(checks.clone()))?;
        registry.register(Box::new(peak_vus.clone()))?;
        registry.register(Box::new(durations.clone()))?;

        requests.inc_by(self.total_requests);
        failed.inc_by(self.failed_requests);
        peak_vus.set(i64::try_from(self.peak_vus).unwrap_or(i64::MAX));

        phase_requests
            .with_label_values(&[NO_PHASE])
            .inc_by(self.unphased_requests);
        for (name, phase) in &self.phases {
            phase_requests.with_label_values(&[name.as_str()]).inc_by(phase.count);
        }

        for (name, counts) in &self.checks {
            checks.with_label_values(&[name.as_str(), "pass"]).inc_by(counts.passes);
            checks.with_label_values(&[name.as_str(), "fail"]).inc_by(counts.fails);
        }

        let quantiles = [("0.5", 0.5), ("0.95", 0.95), ("0.99", 0.99)];
        let streams = std::iter::once((GLOBAL_PHASE, &self.latency))
            .chain(self.phases.iter().map(|(n, p)| (n.as_str(), &p.latency)));
        for (phase, histogram) in streams {
            if histogram.is_empty() {
                continue;
            }
            for (label, q) in quantiles {
                durations
                    .with_label_values(&[phase, label])
                    .set(histogram.value_at_quantile(q) as f64 / 1000.0);
            }
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
