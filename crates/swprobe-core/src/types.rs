//! Detection result and capability scoring

use serde::{Deserialize, Serialize};
use url::Url;

/// Outcome of one service worker detection.
///
/// `url` being present is what "has a service worker" means. A negative
/// result carries an explanation in `no_service_worker_found_details` and
/// default values for every capability field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    /// Absolute URL of the worker script.
    pub url: Option<Url>,

    /// Registration scope.
    pub scope: Option<Url>,

    /// The worker handles push, or the page holds a push subscription.
    pub has_push_registration: bool,

    /// The worker handles background sync.
    pub has_background_sync: bool,

    /// The worker handles periodic background sync.
    pub has_periodic_background_sync: bool,

    /// Why no worker was found.
    pub no_service_worker_found_details: Option<String>,

    /// Detection gave up because a time budget ran out.
    pub service_worker_detection_timed_out: bool,

    /// Weighted capability score, filled in by the orchestrator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

impl DetectionResult {
    /// A positive result for the worker at `url`.
    pub fn found(url: Url) -> Self {
        Self {
            url: Some(url),
            ..Default::default()
        }
    }

    /// A negative result with an explanation.
    pub fn not_found(details: impl Into<String>) -> Self {
        Self {
            no_service_worker_found_details: Some(details.into()),
            ..Default::default()
        }
    }

    /// A negative result caused by an exhausted time budget.
    pub fn timed_out(details: impl Into<String>) -> Self {
        Self {
            service_worker_detection_timed_out: true,
            ..Self::not_found(details)
        }
    }

    pub fn has_service_worker(&self) -> bool {
        self.url.is_some()
    }

    /// Set the scope.
    pub fn with_scope(mut self, scope: Option<Url>) -> Self {
        self.scope = scope;
        self
    }

    /// Compute and store the score using the given weights.
    pub fn scored(mut self, weights: &ScoreWeights) -> Self {
        self.score = Some(weights.score(&self));
        self
    }
}

/// Weights for each capability signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub has_worker: u32,
    pub has_scope: u32,
    pub periodic_sync: u32,
    pub push: u32,
    /// Reported on its own by the offline check, never part of [`score`](Self::score).
    pub offline: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            has_worker: 20,
            has_scope: 5,
            periodic_sync: 2,
            push: 1,
            offline: 2,
        }
    }
}

impl ScoreWeights {
    /// Sum of the weights of the signals present in `result`.
    ///
    /// A negative result always scores zero, whatever stray flags it carries.
    pub fn score(&self, result: &DetectionResult) -> u32 {
        if !result.has_service_worker() {
            return 0;
        }

        let signals = [
            (true, self.has_worker),
            (result.scope.is_some(), self.has_scope),
            (result.has_periodic_background_sync, self.periodic_sync),
            (result.has_push_registration, self.push),
        ];

        signals
            .iter()
            .filter(|(present, _)| *present)
            .map(|(_, weight)| weight)
            .sum()
    }

    /// Separate score for serving HTML from Cache Storage.
    pub fn offline_score(&self, supported: bool) -> u32 {
        if supported {
            self.offline
        } else {
            0
        }
    }
}
