//! # swprobe Engine
//!
//! Finds out whether a web page registers a service worker, and what that
//! worker can do.
//!
//! ```text
//!                      ┌──────────────────────┐
//!    url ────────────► │ DetectionOrchestrator│ ──► SuccessCache (hit: done)
//!                      └──────────┬───────────┘
//!                    ┌────────────┴────────────┐
//!                    ▼                         ▼
//!              StaticProbe                DynamicProbe
//!         (HTML + scripts over HTTP)   (headless browser)
//!                    └──────── ResultRacer ────┘
//!                                  │
//!                       first positive, else browser
//! ```
//!
//! Probes never fail because nothing was found; a missing worker is a
//! negative [`DetectionResult`](swprobe_core::DetectionResult) carrying an
//! explanation.

pub mod cache;
pub mod dynamic_probe;
pub mod orchestrator;
pub mod probe;
pub mod static_probe;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheStats, SuccessCache};
pub use dynamic_probe::{BrowserLease, DynamicProbe, ProbeOutcome, WorkerIdentity};
pub use orchestrator::{validate_target, CachePolicy, DetectionOrchestrator};
pub use probe::Probe;
pub use static_probe::StaticProbe;
