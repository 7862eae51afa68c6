//! Stage timeline: virtual-user concurrency as a function of elapsed time.
//!
//! A timeline is an ordered list of [`StageSpec`] segments. Each segment moves
//! the concurrency from the previous segment's target to its own target over
//! its duration, either by linear interpolation or by an immediate step:
//!
//! ```text
//! t = (elapsed - segment_start) / segment_duration
//! linear: vus(t) = round(prev + (target - prev) * t)
//! step:   vus(t) = target
//! ```
//!
//! A hold (plateau) is a segment whose target equals the previous target.
//! Zero-duration segments jump to their target instantly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How a segment moves from the previous target to its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RampStyle {
    /// Interpolate linearly across the segment (default)
    #[default]
    Linear,
    /// Jump to the target at the start of the segment
    Step,
}

/// One segment of the run shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Optional label, used in logs only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Segment length in seconds
    pub duration_secs: f64,

    /// Concurrency reached at the end of the segment
    pub target: u32,

    #[serde(default)]
    pub ramp: RampStyle,
}

impl StageSpec {
    /// Linear ramp to `target` over `duration_secs`
    pub fn ramp(duration_secs: f64, target: u32) -> Self {
        Self {
            name: None,
            duration_secs,
            target,
            ramp: RampStyle::Linear,
        }
    }

    /// Step to `target` and hold it for `duration_secs`
    pub fn step(duration_secs: f64, target: u32) -> Self {
        Self {
            ramp: RampStyle::Step,
            ..Self::ramp(duration_secs, target)
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Immutable, validated run shape
#[derive(Debug, Clone)]
pub struct Timeline {
    start_vus: u32,
    stages: Vec<StageSpec>,
    /// Per-stage durations, converted once
    durations: Vec<Duration>,
    total: Duration,
}

impl Timeline {
    /// Validate the stage list and build the timeline
    pub fn new(start_vus: u32, stages: Vec<StageSpec>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::NoStages);
        }
        let mut durations = Vec::with_capacity(stages.len());
        let mut total = Duration::ZERO;
        for (index, stage) in stages.iter().enumerate() {
            let invalid = || ConfigError::InvalidStageDuration {
                index,
                duration: stage.duration_secs,
            };
            // rejects negative, non-finite and unrepresentably large values
            let duration =
                Duration::try_from_secs_f64(stage.duration_secs).map_err(|_| invalid())?;
            total = total.checked_add(duration).ok_or_else(invalid)?;
            durations.push(duration);
        }

        Ok(Self {
            start_vus,
            stages,
            durations,
            total,
        })
    }

    /// Sum of all segment durations
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Highest concurrency the timeline ever asks for
    pub fn peak(&self) -> u32 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_vus, u32::max)
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Target concurrency at `elapsed`.
    ///
    /// Past the end of the timeline the final target is returned.
    pub fn concurrency(&self, elapsed: Duration) -> u32 {
        let mut previous = self.start_vus;
        let mut segment_start = Duration::ZERO;

        for (stage, &duration) in self.stages.iter().zip(&self.durations) {
            let segment_end = segment_start + duration;

            if elapsed < segment_end {
                return match stage.ramp {
                    RampStyle::Step => stage.target,
                    RampStyle::Linear => interpolate(
                        previous,
                        stage.target,
                        elapsed - segment_start,
                        duration,
                    ),
                };
            }

            previous = stage.target;
            segment_start = segment_end;
        }

        previous
    }

    /// Name of the segment active at `elapsed`, if it has one
    pub fn stage_name(&self, elapsed: Duration) -> Option<&str> {
        let mut segment_end = Duration::ZERO;
        for (stage, duration) in self.stages.iter().zip(&self.durations) {
            segment_end += *duration;
            if elapsed < segment_end {
                return stage.name.as_deref();
            }
        }
        None
    }
}

fn interpolate(from: u32, to: u32, elapsed: Duration, duration: Duration) -> u32 {
    // interpolation factor [0..1]
    let t = (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0);
    let from = from as f64;
    let vus = from + (to as f64 - from) * t;
    vus.round().max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_empty_timeline_rejected() {
        assert_eq!(Timeline::new(0, vec![]).unwrap_err(), ConfigError::NoStages);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let err = Timeline::new(0, vec![StageSpec::ramp(10.0, 5), StageSpec::ramp(-1.0, 0)])
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidStageDuration { index: 1, .. }
        ));
    }

    #[test]
    fn test_oversized_duration_rejected() {
        let err = Timeline::new(0, vec![StageSpec::ramp(1e20, 5)]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidStageDuration { index: 0, .. }
        ));

        let err = Timeline::new(0, vec![StageSpec::ramp(f64::NAN, 5)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStageDuration { .. }));
    }

    #[test]
    fn test_total_duration_overflow_rejected() {
        let err = Timeline::new(0, vec![StageSpec::ramp(1.5e19, 5), StageSpec::ramp(1.5e19, 0)])
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidStageDuration { index: 1, .. }
        ));
    }

    #[test]
    fn test_linear_ramp_then_hold() {
        let timeline =
            Timeline::new(0, vec![StageSpec::ramp(10.0, 2000), StageSpec::ramp(30.0, 2000)])
                .unwrap();

        assert_eq!(timeline.total_duration(), secs(40.0));
        assert_eq!(timeline.concurrency(secs(0.0)), 0);
        assert_eq!(timeline.concurrency(secs(2.5)), 500);
        assert_eq!(timeline.concurrency(secs(5.0)), 1000);
        assert_eq!(timeline.concurrency(secs(10.0)), 2000);
        assert_eq!(timeline.concurrency(secs(25.0)), 2000);
        assert_eq!(timeline.concurrency(secs(39.9)), 2000);
    }

    #[test]
    fn test_ramp_down() {
        let timeline = Timeline::new(
            0,
            vec![
                StageSpec::ramp(10.0, 100),
                StageSpec::ramp(10.0, 100),
                StageSpec::ramp(10.0, 0),
            ],
        )
        .unwrap();

        assert_eq!(timeline.concurrency(secs(25.0)), 50);
        assert_eq!(timeline.concurrency(secs(30.0)), 0);
        assert_eq!(timeline.peak(), 100);
    }

    #[test]
    fn test_step_segment_jumps_immediately() {
        let timeline =
            Timeline::new(10, vec![StageSpec::step(5.0, 40), StageSpec::ramp(5.0, 0)]).unwrap();

        assert_eq!(timeline.concurrency(secs(0.0)), 40);
        assert_eq!(timeline.concurrency(secs(4.99)), 40);
        assert_eq!(timeline.concurrency(secs(7.5)), 20);
    }

    #[test]
    fn test_zero_duration_segment_jumps() {
        let timeline =
            Timeline::new(0, vec![StageSpec::ramp(0.0, 50), StageSpec::ramp(10.0, 50)]).unwrap();

        assert_eq!(timeline.concurrency(secs(0.0)), 50);
        assert_eq!(timeline.concurrency(secs(9.0)), 50);
    }

    #[test]
    fn test_stage_names() {
        let timeline = Timeline::new(
            0,
            vec![
                StageSpec::ramp(10.0, 20).named("ramp-up"),
                StageSpec::ramp(10.0, 20).named("plateau"),
                StageSpec::ramp(5.0, 0),
            ],
        )
        .unwrap();

        assert_eq!(timeline.stage_name(secs(3.0)), Some("ramp-up"));
        assert_eq!(timeline.stage_name(secs(12.0)), Some("plateau"));
        assert_eq!(timeline.stage_name(secs(22.0)), None);
        assert_eq!(timeline.stage_name(secs(99.0)), None);
    }
}
