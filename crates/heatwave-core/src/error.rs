//! Error types for the detection and clustering pipeline.
//!
//! Structural problems (shape mismatches, malformed series, bad configuration)
//! are reported before any graph work starts. Numerical non-convergence is
//! never an error: K-Means reports it through `ConvergenceStatus`.

use thiserror::Error;

use crate::grid::GridShape;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HeatwaveError>;

#[derive(Error, Debug)]
pub enum HeatwaveError {
    /// A daily field and its threshold field disagree on grid dimensions.
    #[error("grid shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: GridShape, found: GridShape },

    /// A component with no nodes reached the magnitude aggregator.
    #[error("event {event} has no nodes")]
    EmptyEvent { event: u32 },

    /// More clusters were requested than there are events to cluster.
    #[error("requested {requested} clusters but only {available} events are available")]
    InsufficientEvents { requested: usize, available: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Dates out of order, duplicated, or data of the wrong length.
    #[error("invalid temperature series: {0}")]
    InvalidSeries(String),

    #[error("malformed JSON input: {0}")]
    Json(#[from] serde_json::Error),
}
