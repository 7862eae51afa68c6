//! # Plateau Load Testing
//!
//! Staged virtual-user load generation against a cart-style HTTP service.
//!
//! ## Features
//!
//! - **Stage Timeline**: ramp/hold segments describing concurrency over time
//! - **Lazy Sessions**: one session cookie per virtual user, fetched on first use
//! - **Phase Windows**: named time windows that scope metrics to a plateau
//! - **HDR Histograms**: global and per-phase latency distributions
//! - **Reports**: boxed text summary, JSON and Prometheus exports, thresholds
//!
//! ## Usage
//!
//! ```bash
//! # Two-plateau progressive test against a local service
//! cargo run --package plateau-loadtest -- run --preset progressive
//!
//! # 50-minute endurance test with a JSON report
//! cargo run --package plateau-loadtest -- run --preset endurance \
//!     --target https://shop.example.com --output report.json
//!
//! # Print a preset as a starting point for a custom config
//! cargo run --package plateau-loadtest -- config --preset progressive > plateau.toml
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod phase;
pub mod report;
pub mod runner;
pub mod session;
pub mod target;
pub mod timeline;
pub mod workflow;

pub use config::{LoadTestConfig, Thresholds, PRESETS};
pub use error::{ConfigError, LoadTestError, Result, SessionError, TargetError};
pub use metrics::{LoadTestMetrics, MetricsSnapshot, RequestOutcome};
pub use phase::{PhaseClassifier, PhaseWindow, GLOBAL_PHASE, NO_PHASE};
pub use report::{LatencyStats, PhaseReport, RunReport, ThresholdCheckResult};
pub use runner::LoadTestRunner;
pub use session::Session;
pub use target::{BootstrapResponse, CartTarget, Endpoint, HttpCartTarget};
pub use timeline::{RampStyle, StageSpec, Timeline};
pub use workflow::{CartWorkflow, Iteration};
