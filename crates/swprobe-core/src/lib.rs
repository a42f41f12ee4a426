//! swprobe core types
//!
//! The shapes every other swprobe crate agrees on: the detection result,
//! the detector configuration, and the error taxonomy surfaced to callers.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BrowserOptions, DetectorConfig};
pub use error::{DetectError, DetectResult};
pub use types::{DetectionResult, ScoreWeights};
