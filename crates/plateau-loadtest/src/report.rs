//! End-of-run report.
//!
//! [`RunReport`] reduces a [`MetricsSnapshot`] into the numbers a reader
//! cares about: per-phase and overall request counts, throughput, latency
//! percentiles and failure rates. Rendering is pure; printing is left to the
//! caller. Percentiles come straight from the HDR histograms (nearest rank at
//! three significant digits).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::metrics::MetricsSnapshot;
use crate::phase::PhaseWindow;
use crate::timeline::Timeline;

const RULE: &str = "══════════════════════════════════════════════════════════════";
const NO_DATA: &str = "no data";
/// Columns between the box borders, minus the padding spaces
const INNER_WIDTH: usize = 60;

/// Latency distribution in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    /// `None` for an empty histogram
    pub fn from_histogram(histogram: &Histogram<u64>) -> Option<Self> {
        if histogram.is_empty() {
            return None;
        }

        let ms = |us: u64| us as f64 / 1000.0;
        Some(Self {
            count: histogram.len(),
            avg_ms: histogram.mean() / 1000.0,
            min_ms: ms(histogram.min()),
            p50_ms: ms(histogram.value_at_quantile(0.50)),
            p90_ms: ms(histogram.value_at_quantile(0.90)),
            p95_ms: ms(histogram.value_at_quantile(0.95)),
            p99_ms: ms(histogram.value_at_quantile(0.99)),
            max_ms: ms(histogram.max()),
        })
    }
}

/// Numbers for one measurement window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub name: String,
    pub start_secs: f64,
    pub end_secs: f64,
    /// Target concurrency in the middle of the window
    pub target_vus: u32,
    pub requests: u64,
    /// `requests` in millions, as quoted for endurance runs
    pub million_requests: f64,
    pub failed_requests: u64,
    pub rate_divisor_secs: f64,
    /// `None` when the phase saw no traffic
    pub requests_per_sec: Option<f64>,
    pub failure_rate: Option<f64>,
    pub latency: Option<LatencyStats>,
}

/// Pass counts of one named check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
    pub pass_rate: f64,
}

/// Final report of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub peak_vus: u64,
    pub iterations: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub failure_rate: Option<f64>,
    pub requests_per_sec: Option<f64>,
    pub latency: Option<LatencyStats>,
    pub add_requests: u64,
    pub remove_requests: u64,
    pub unphased_requests: u64,
    pub phases: Vec<PhaseReport>,
    pub checks: Vec<CheckReport>,
    pub bootstrap_ok: u64,
    pub bootstrap_failed: u64,
    pub errors: BTreeMap<String, u64>,
}

fn ratio(part: u64, whole: u64) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64)
}

impl RunReport {
    /// Reduce the snapshot. Phases are listed in window order.
    pub fn from_snapshot(
        snapshot: &MetricsSnapshot,
        title: impl Into<String>,
        windows: &[PhaseWindow],
        timeline: &Timeline,
    ) -> Self {
        let phases = windows
            .iter()
            .map(|window| {
                let (requests, failed, latency) = snapshot
                    .phases
                    .get(&window.name)
                    .map(|p| (p.count, p.failed, LatencyStats::from_histogram(&p.latency)))
                    .unwrap_or((0, 0, None));
                let divisor = window.rate_divisor();
                // past the timeline end concurrency() yields the final target
                let midpoint = (window.start_secs + window.end_secs) / 2.0;
                let midpoint = Duration::try_from_secs_f64(midpoint).unwrap_or(Duration::MAX);

                PhaseReport {
                    name: window.name.clone(),
                    start_secs: window.start_secs,
                    end_secs: window.end_secs,
                    target_vus: timeline.concurrency(midpoint),
                    requests,
                    million_requests: requests as f64 / 1_000_000.0,
                    failed_requests: failed,
                    rate_divisor_secs: divisor,
                    requests_per_sec: (requests > 0).then(|| requests as f64 / divisor),
                    failure_rate: ratio(failed, requests),
                    latency,
                }
            })
            .collect();

        let checks = snapshot
            .checks
            .iter()
            .map(|(name, counts)| CheckReport {
                name: name.clone(),
                passes: counts.passes,
                fails: counts.fails,
                pass_rate: ratio(counts.passes, counts.total()).unwrap_or(0.0),
            })
            .collect();

        let duration_secs = snapshot.duration.as_secs_f64();

        Self {
            title: title.into(),
            generated_at: Utc::now(),
            duration_secs,
            peak_vus: snapshot.peak_vus,
            iterations: snapshot.iterations,
            total_requests: snapshot.total_requests,
            failed_requests: snapshot.failed_requests,
            failure_rate: ratio(snapshot.failed_requests, snapshot.total_requests),
            requests_per_sec: (duration_secs > 0.0 && snapshot.total_requests > 0)
                .then(|| snapshot.total_requests as f64 / duration_secs),
            latency: LatencyStats::from_histogram(&snapshot.latency),
            add_requests: snapshot.add_requests,
            remove_requests: snapshot.remove_requests,
            unphased_requests: snapshot.unphased_requests,
            phases,
            checks,
            bootstrap_ok: snapshot.bootstrap_ok,
            bootstrap_failed: snapshot.bootstrap_failed,
            errors: snapshot.error_counts.clone(),
        }
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Boxed text rendering, see the [`fmt::Display`] impl
    pub fn render(&self) -> String {
        self.to_string()
    }
}

/// `1234567` -> `1,234,567`
fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn clip(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

/// Label left, value right. The value keeps its full width when it fits;
/// the label is clipped to make room.
fn row(f: &mut fmt::Formatter<'_>, label: &str, value: impl fmt::Display) -> fmt::Result {
    let value = clip(&value.to_string(), INNER_WIDTH);
    let value_width = value.chars().count().max(28);
    let label_width = INNER_WIDTH - value_width;
    writeln!(
        f,
        "║ {:<lw$}{:>vw$} ║",
        clip(label, label_width),
        value,
        lw = label_width,
        vw = value_width
    )
}

fn heading(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    writeln!(f, "╠{}╣", RULE)?;
    writeln!(f, "║ {:<60} ║", clip(text, INNER_WIDTH))
}

fn rate(value: Option<f64>) -> String {
    value.map_or_else(|| NO_DATA.to_string(), |r| format!("{:.2}", r))
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| NO_DATA.to_string(), |r| format!("{:.2}%", r * 100.0))
}

fn latency_rows(f: &mut fmt::Formatter<'_>, latency: &Option<LatencyStats>) -> fmt::Result {
    match latency {
        Some(stats) => {
            row(f, "  avg", format!("{:.2} ms", stats.avg_ms))?;
            row(f, "  p50", format!("{:.2} ms", stats.p50_ms))?;
            row(f, "  p95", format!("{:.2} ms", stats.p95_ms))?;
            row(f, "  p99", format!("{:.2} ms", stats.p99_ms))?;
            row(f, "  max", format!("{:.2} ms", stats.max_ms))
        }
        None => row(f, "  latency", NO_DATA),
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔{}╗", RULE)?;
        writeln!(f, "║{:^62}║", clip(&self.title.to_uppercase(), 62))?;
        writeln!(f, "╠{}╣", RULE)?;
        row(f, "Duration", format!("{:.2} s", self.duration_secs))?;
        row(f, "Peak VUs", thousands(self.peak_vus))?;
        row(f, "Iterations", thousands(self.iterations))?;
        row(f, "Total requests", thousands(self.total_requests))?;
        row(f, "Failed requests", thousands(self.failed_requests))?;
        row(f, "Failure rate", percent(self.failure_rate))?;
        row(f, "Requests/s", rate(self.requests_per_sec))?;
        row(f, "Outside phases", thousands(self.unphased_requests))?;

        heading(f, "LATENCY (all requests)")?;
        latency_rows(f, &self.latency)?;

        for phase in &self.phases {
            heading(
                f,
                &format!(
                    "PHASE {} [{}s - {}s] @ {} VUs",
                    phase.name, phase.start_secs, phase.end_secs, phase.target_vus
                ),
            )?;
            if phase.requests == 0 {
                row(f, "  requests", NO_DATA)?;
                continue;
            }
            row(f, "  requests", thousands(phase.requests))?;
            row(f, "  million requests", format!("{:.1}M", phase.million_requests))?;
            row(f, "  requests/s", rate(phase.requests_per_sec))?;
            row(f, "  failure rate", percent(phase.failure_rate))?;
            latency_rows(f, &phase.latency)?;
        }

        if !self.checks.is_empty() {
            heading(f, "CHECKS")?;
            for check in &self.checks {
                row(
                    f,
                    &format!("  {}", check.name),
                    format!(
                        "{:.2}% ({} / {})",
                        check.pass_rate * 100.0,
                        thousands(check.passes),
                        thousands(check.passes + check.fails)
                    ),
                )?;
            }
        }

        heading(f, "SESSIONS")?;
        row(f, "Bootstrapped", thousands(self.bootstrap_ok))?;
        row(f, "Bootstrap failures", thousands(self.bootstrap_failed))?;

        if !self.errors.is_empty() {
            heading(f, "ERRORS")?;
            for (kind, count) in &self.errors {
                row(f, &format!("  {}", kind), thousands(*count))?;
            }
        }

        writeln!(f, "╚{}╝", RULE)
    }
}

/// Threshold verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdCheckResult {
    pub passes: bool,
    pub checks: Vec<ThresholdCheck>,
}

/// One evaluated threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdCheck {
    pub name: String,
    pub passed: bool,
    pub actual: String,
    pub expected: String,
}

impl ThresholdCheckResult {
    /// Evaluate the configured thresholds against the overall numbers.
    /// A latency threshold with no samples fails.
    pub fn evaluate(report: &RunReport, thresholds: &Thresholds) -> Self {
        let mut checks = Vec::new();

        if let Some(limit) = thresholds.p95_ms {
            let actual = report.latency.as_ref().map(|l| l.p95_ms);
            checks.push(ThresholdCheck {
                name: format!("http_req_duration p(95)<{}", limit),
                passed: actual.is_some_and(|p95| p95 < limit),
                actual: actual.map_or_else(|| NO_DATA.to_string(), |p95| format!("{:.2} ms", p95)),
                expected: format!("<{} ms", limit),
            });
        }

        if let Some(limit) = thresholds.max_failure_rate {
            let actual = report.failure_rate.unwrap_or(0.0);
            checks.push(ThresholdCheck {
                name: format!("http_req_failed rate<={}", limit),
                passed: actual <= limit,
                actual: format!("{:.4}", actual),
                expected: format!("<={}", limit),
            });
        }

        Self {
            passes: checks.iter().all(|c| c.passed),
            checks,
        }
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ThresholdCheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", RULE)?;
        writeln!(f, "{:^62}", "THRESHOLDS")?;
        writeln!(f, "{}", RULE)?;

        if self.checks.is_empty() {
            writeln!(f, "\n  (none configured)")?;
        }
        for check in &self.checks {
            let status = if check.passed { "✅ PASS" } else { "❌ FAIL" };
            writeln!(f, "\n  {} - {}", check.name, status)?;
            writeln!(f, "    Actual:   {}", check.actual)?;
            writeln!(f, "    Expected: {}", check.expected)?;
        }

        writeln!(f, "\n{}", RULE)?;
        if self.passes {
            writeln!(f, "  OVERALL: ✅ ALL THRESHOLDS PASS")?;
        } else {
            writeln!(f, "  OVERALL: ❌ SOME THRESHOLDS FAILED")?;
        }
        writeln!(f, "{}", RULE)
    }
}
