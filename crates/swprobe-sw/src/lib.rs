//! # swprobe SW
//!
//! Everything swprobe knows about service worker code itself:
//!
//! - [`FeatureAnalyzer`]: which events a worker script handles
//! - [`find_registration`]: how a page script registers its worker
//! - [`catalog`]: where workers conventionally live when registration is opaque

pub mod analyzer;
pub mod catalog;
pub mod registration;

pub use analyzer::{legacy_has_periodic_sync, FeatureAnalyzer, WorkerFeatures};
pub use catalog::{candidate_urls, is_script_content_type, SCRIPT_MIME_TYPES};
pub use registration::{best_registration, find_registration, known_library_worker, Registration};
