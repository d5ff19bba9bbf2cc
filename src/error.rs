//! Error types shared across the tracking engine
//!
//! Library operations return [`TrackError`]. User-supplied callables
//! (tracked functions and call loggers) return `anyhow::Result` so that
//! arbitrary failures pass through the interception layer untouched.

use thiserror::Error;

/// Errors produced by the cache, lifecycle and backend layers
#[derive(Error, Debug)]
pub enum TrackError {
    /// A run-scoped operation was requested but no run could be resolved
    #[error("No run is active and no run id was given")]
    NoActiveRun,

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),

    #[error("Run {0} is already active; start the new run as nested")]
    RunAlreadyActive(String),

    /// Two values under the same key have incompatible container types
    #[error("Cannot merge {incoming} into {existing} under key '{key}'")]
    MergeTypeConflict {
        key: String,
        existing: &'static str,
        incoming: &'static str,
    },

    /// A setup entry signalled cooperative cancellation
    #[error("Run function '{entry}' was interrupted")]
    Interrupted { entry: String },

    #[error("Invalid path pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for tracking operations
pub type Result<T> = std::result::Result<T, TrackError>;
