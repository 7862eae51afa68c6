//! Load test configuration.
//!
//! A run is described entirely by data: the stage list, the phase windows and
//! the workflow knobs. The two presets reproduce the progressive two-plateau
//! test and the 50-minute endurance test.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::phase::{PhaseClassifier, PhaseWindow};
use crate::session::DEFAULT_SESSION_COOKIE;
use crate::timeline::{StageSpec, Timeline};

/// Names accepted by [`LoadTestConfig::preset`]
pub const PRESETS: &[&str] = &["progressive", "endurance"];

/// Complete run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTestConfig {
    /// Scenario name, used as the report title
    pub name: String,

    /// Target base URL
    pub target_url: String,

    /// Virtual users alive before the first stage starts
    pub start_vus: u32,

    /// Run shape
    pub stages: Vec<StageSpec>,

    /// Measurement windows
    pub phases: Vec<PhaseWindow>,

    /// Cart item ids picked uniformly per iteration
    pub item_ids: Vec<u32>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Pause between workflow steps in milliseconds
    pub think_time_ms: u64,

    /// How often the scheduler re-evaluates the target concurrency
    pub scheduler_tick_ms: u64,

    /// Cookie carrying the session token
    pub session_cookie: String,

    /// Status code the checks expect
    pub expected_status: u16,

    /// Skip TLS certificate verification
    pub insecure_skip_tls_verify: bool,

    /// Idle connections kept per host
    pub max_idle_per_host: usize,

    pub thresholds: Thresholds,
}

/// Pass/fail criteria evaluated once the run is over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Upper bound on the overall p95 request duration (ms)
    pub p95_ms: Option<f64>,

    /// Upper bound on the overall failure rate (0.0 - 1.0)
    pub max_failure_rate: Option<f64>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            p95_ms: Some(100.0),
            max_failure_rate: None,
        }
    }
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self::progressive()
    }
}

impl LoadTestConfig {
    /// Ramp to 2K users, hold, ramp to 6K users, hold, ramp down
    pub fn progressive() -> Self {
        Self {
            name: "progressive load test".to_string(),
            target_url: "http://localhost:4000".to_string(),
            start_vus: 0,
            stages: vec![
                StageSpec::ramp(10.0, 2_000).named("ramp to 2k"),
                StageSpec::ramp(30.0, 2_000).named("plateau 2k"),
                StageSpec::ramp(10.0, 6_000).named("ramp to 6k"),
                StageSpec::ramp(30.0, 6_000).named("plateau 6k"),
                StageSpec::ramp(10.0, 0).named("ramp down"),
            ],
            phases: vec![
                PhaseWindow::new("plateau_2k", 10.0, 40.0),
                PhaseWindow::new("plateau_6k", 50.0, 80.0),
            ],
            item_ids: (1..=7).collect(),
            request_timeout_secs: 30,
            think_time_ms: 100,
            scheduler_tick_ms: 100,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            expected_status: 200,
            insecure_skip_tls_verify: true,
            max_idle_per_host: 512,
            thresholds: Thresholds::default(),
        }
    }

    /// Ramp to 2K users and hold for 50 minutes
    pub fn endurance() -> Self {
        Self {
            name: "50-minute endurance test".to_string(),
            stages: vec![
                StageSpec::ramp(10.0, 2_000).named("ramp up"),
                StageSpec::ramp(3_000.0, 2_000).named("plateau"),
                StageSpec::ramp(10.0, 0).named("ramp down"),
            ],
            phases: vec![PhaseWindow::new("plateau", 10.0, 3_010.0)],
            ..Self::progressive()
        }
    }

    pub fn preset(name: &str) -> std::result::Result<Self, ConfigError> {
        match name {
            "progressive" => Ok(Self::progressive()),
            "endurance" => Ok(Self::endurance()),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }

    /// Load and validate a TOML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> std::result::Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.timeline()?;
        self.classifier()?;
        if self.item_ids.is_empty() {
            return Err(ConfigError::NoItems);
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.scheduler_tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        Ok(())
    }

    pub fn timeline(&self) -> std::result::Result<Timeline, ConfigError> {
        Timeline::new(self.start_vus, self.stages.clone())
    }

    pub fn classifier(&self) -> std::result::Result<PhaseClassifier, ConfigError> {
        PhaseClassifier::new(self.phases.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn think_time(&self) -> Duration {
        Duration::from_millis(self.think_time_ms)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms)
    }
}
