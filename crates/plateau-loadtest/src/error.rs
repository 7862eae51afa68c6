//! Load test error types

use thiserror::Error;

/// Result type for load test operations
pub type Result<T> = std::result::Result<T, LoadTestError>;

/// Top-level load test errors
#[derive(Error, Debug)]
pub enum LoadTestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    #[error("Metrics export error: {0}")]
    Export(#[from] prometheus::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration problems detected before any worker starts
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("At least one stage is required")]
    NoStages,

    #[error("Stage {index} has an invalid duration: {duration}")]
    InvalidStageDuration { index: usize, duration: f64 },

    #[error("Phase window '{name}' is invalid: [{start}, {end}]")]
    InvalidPhaseWindow { name: String, start: f64, end: f64 },

    #[error("Phase window '{0}' has a non-positive rate divisor")]
    InvalidRateDivisor(String),

    #[error("Phase name '{0}' is reserved")]
    ReservedPhaseName(String),

    #[error("Item id set is empty")]
    NoItems,

    #[error("Request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Scheduler tick must be greater than zero")]
    ZeroTick,

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Session bootstrap failures
#[derive(Error, Debug)]
pub enum SessionError {
    /// The entry point answered but no usable token was present
    #[error("No '{0}' cookie in bootstrap response")]
    MissingToken(String),

    #[error("Bootstrap request failed: {0}")]
    Bootstrap(#[from] TargetError),
}

/// Failures talking to the target service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TargetError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl TargetError {
    /// Short label used to bucket errors in the report
    pub fn kind(&self) -> &'static str {
        match self {
            TargetError::Timeout => "timeout",
            TargetError::Connect(_) => "connect",
            TargetError::Transport(_) => "transport",
        }
    }
}

impl From<reqwest::Error> for TargetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TargetError::Timeout
        } else if e.is_connect() {
            TargetError::Connect(e.to_string())
        } else {
            TargetError::Transport(e.to_string())
        }
    }
}
