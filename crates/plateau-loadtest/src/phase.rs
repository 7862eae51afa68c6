//! Measurement phases: named windows of elapsed time.
//!
//! Phases are independent of the stage shape. A plateau phase usually covers
//! only the hold part of a ramp so that ramp traffic does not skew the
//! plateau numbers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Phase reported for samples that fall outside every window
pub const NO_PHASE: &str = "none";

/// Label of the all-requests series in exported metrics
pub const GLOBAL_PHASE: &str = "global";

/// Closed window `[start_secs, end_secs]` of elapsed scenario time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseWindow {
    pub name: String,

    pub start_secs: f64,

    pub end_secs: f64,

    /// Seconds used to turn the phase count into req/s.
    /// Defaults to the window length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_divisor_secs: Option<f64>,
}

impl PhaseWindow {
    pub fn new(name: impl Into<String>, start_secs: f64, end_secs: f64) -> Self {
        Self {
            name: name.into(),
            start_secs,
            end_secs,
            rate_divisor_secs: None,
        }
    }

    pub fn with_rate_divisor(mut self, secs: f64) -> Self {
        self.rate_divisor_secs = Some(secs);
        self
    }

    /// Inclusive on both ends
    pub fn contains(&self, elapsed_secs: f64) -> bool {
        elapsed_secs >= self.start_secs && elapsed_secs <= self.end_secs
    }

    pub fn rate_divisor(&self) -> f64 {
        self.rate_divisor_secs
            .unwrap_or(self.end_secs - self.start_secs)
    }

    fn overlaps(&self, other: &PhaseWindow) -> bool {
        self.start_secs <= other.end_secs && other.start_secs <= self.end_secs
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name == NO_PHASE || self.name == GLOBAL_PHASE {
            return Err(ConfigError::ReservedPhaseName(self.name.clone()));
        }
        // both bounds must be representable as elapsed time
        let valid = Duration::try_from_secs_f64(self.start_secs).is_ok()
            && Duration::try_from_secs_f64(self.end_secs).is_ok()
            && self.end_secs >= self.start_secs;
        if !valid {
            return Err(ConfigError::InvalidPhaseWindow {
                name: self.name.clone(),
                start: self.start_secs,
                end: self.end_secs,
            });
        }
        let divisor = self.rate_divisor();
        if !divisor.is_finite() || divisor <= 0.0 {
            return Err(ConfigError::InvalidRateDivisor(self.name.clone()));
        }
        Ok(())
    }
}

/// Maps elapsed time to the first matching phase
#[derive(Debug, Clone, Default)]
pub struct PhaseClassifier {
    windows: Vec<PhaseWindow>,
}

impl PhaseClassifier {
    /// Validate the windows. Overlaps are allowed (declaration order decides)
    /// but logged.
    pub fn new(windows: Vec<PhaseWindow>) -> Result<Self, ConfigError> {
        for window in &windows {
            window.validate()?;
        }
        for (i, a) in windows.iter().enumerate() {
            for b in &windows[i + 1..] {
                if a.overlaps(b) {
                    warn!(
                        "Phase windows '{}' and '{}' overlap; '{}' wins on shared instants",
                        a.name, b.name, a.name
                    );
                }
            }
        }
        Ok(Self { windows })
    }

    /// Name of the first window containing `elapsed_secs`
    pub fn classify(&self, elapsed_secs: f64) -> Option<&str> {
        self.windows
            .iter()
            .find(|w| w.contains(elapsed_secs))
            .map(|w| w.name.as_str())
    }

    /// Like [`classify`](Self::classify) but yields [`NO_PHASE`] on a miss
    pub fn phase_name(&self, elapsed_secs: f64) -> &str {
        self.classify(elapsed_secs).unwrap_or(NO_PHASE)
    }

    pub fn windows(&self) -> &[PhaseWindow] {
        &self.windows
    }
}
