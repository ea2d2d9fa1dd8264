//! Heatwave detection and taxonomy on gridded daily-maximum temperature.
//!
//! Exceeding (cell, day) records are linked into a spatio-temporal graph,
//! collapsed into connected components (events), scored with an HWMId-style
//! magnitude, and grouped into K-Means families and UPGMA subfamilies.

pub mod calendar;
pub mod climatology;
pub mod cluster;
pub mod config;
pub mod coords;
pub mod error;
pub mod exceedance;
pub mod graph;
pub mod grid;
pub mod magnitude;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{HeatwaveError, Result};
pub use grid::{GridPoint, GridShape, TemperatureCube, TemperatureSource};
pub use pipeline::{Detection, EventRecord, HeatwavePipeline, PipelineOutput};
