//! Capability detection over service worker source text.
//!
//! Matching is structural and case-sensitive: an event handler counts only
//! when it is registered for the exact event name, either through
//! `addEventListener` (as a method call or at the start of a line) or by
//! assigning an `on<event>` property.

use regex::RegexSet;

lazy_static::lazy_static! {
    static ref PUSH: RegexSet = event_handler_patterns("push", &[]);
    static ref BACKGROUND_SYNC: RegexSet =
        event_handler_patterns("sync", &[r"\bBackgroundSyncPlugin\b"]);
    static ref PERIODIC_SYNC: RegexSet = event_handler_patterns("periodicsync", &[]);
}

fn event_handler_patterns(event: &str, extra: &[&str]) -> RegexSet {
    let mut patterns = vec![
        format!(r#"\.addEventListener\(\s*['"`]{event}['"`]"#),
        format!(r#"(?m)^\s*addEventListener\(\s*['"`]{event}['"`]"#),
        format!(r"\.on{event}\s*=(?:[^=]|$)"),
        format!(r"(?m)^\s*on{event}\s*=(?:[^=]|$)"),
    ];
    patterns.extend(extra.iter().map(|p| p.to_string()));

    RegexSet::new(&patterns).expect("event handler patterns are valid regexes")
}

/// Capabilities found in a worker's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerFeatures {
    pub push: bool,
    pub background_sync: bool,
    pub periodic_sync: bool,
}

/// Stateless capability matcher.
pub struct FeatureAnalyzer;

impl FeatureAnalyzer {
    /// Run every check over `source`.
    pub fn analyze(source: &str) -> WorkerFeatures {
        WorkerFeatures {
            push: Self::has_push(source),
            background_sync: Self::has_background_sync(source),
            periodic_sync: Self::has_periodic_sync(source),
        }
    }

    pub fn has_push(source: &str) -> bool {
        PUSH.is_match(source)
    }

    /// `sync` handlers, or Workbox's `BackgroundSyncPlugin`.
    pub fn has_background_sync(source: &str) -> bool {
        BACKGROUND_SYNC.is_match(source)
    }

    pub fn has_periodic_sync(source: &str) -> bool {
        PERIODIC_SYNC.is_match(source)
    }
}

/// The older plain substring check for periodic sync.
///
/// Every source it accepts is also accepted by
/// [`FeatureAnalyzer::has_periodic_sync`].
pub fn legacy_has_periodic_sync(source: &str) -> bool {
    source.contains(".addEventListener('periodicsync'")
        || source.contains(".addEventListener(\"periodicsync\"")
}
