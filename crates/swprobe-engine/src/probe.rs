//! The capability shared by every detection strategy.

use async_trait::async_trait;
use swprobe_core::{DetectResult, DetectionResult};
use url::Url;

/// A detection strategy.
///
/// A probe reports "no worker" as a negative [`DetectionResult`], never as an
/// error. `Err` is reserved for the detector itself being unable to work,
/// such as no browser being available.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn run(&self, url: &Url) -> DetectResult<DetectionResult>;
}
