//! Finding `navigator.serviceWorker.register(...)` calls in page scripts.

use regex::Regex;
use url::Url;

lazy_static::lazy_static! {
    /// A registration call with at least one argument.
    static ref REGISTER_CALL: Regex =
        Regex::new(r"navigator\s*\.\s*serviceWorker\s*\.\s*register\s*\(\s*[^\s)]")
            .expect("registration call regex is valid");

    /// A registration call whose first argument is a plain string literal.
    static ref REGISTER_LITERAL: Regex = Regex::new(
        r#"navigator\s*\.\s*serviceWorker\s*\.\s*register\s*\(\s*(?:'([^']+)'|"([^"]+)"|`([^`$]+)`)"#
    )
    .expect("registration literal regex is valid");
}

/// Script published by PWABuilder that registers its own conventional worker.
pub const PWA_UPDATE_HELPER: &str = "https://cdn.jsdelivr.net/npm/@pwabuilder/pwaupdate";

/// Worker path registered by [`PWA_UPDATE_HELPER`].
pub const PWA_UPDATE_HELPER_WORKER: &str = "/pwabuilder-sw.js";

/// What a script reveals about service worker registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The worker path was passed as a string literal.
    Literal(String),
    /// A registration call exists but its argument is computed at runtime.
    DynamicallyGenerated,
}

impl Registration {
    /// The literal worker path, if one was extracted.
    pub fn path(&self) -> Option<&str> {
        match self {
            Registration::Literal(path) => Some(path),
            Registration::DynamicallyGenerated => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Registration::DynamicallyGenerated)
    }
}

/// Scan one script for a registration call.
///
/// A literal argument anywhere in the script wins over calls whose argument
/// can't be read statically.
pub fn find_registration(script: &str) -> Option<Registration> {
    if !REGISTER_CALL.is_match(script) {
        return None;
    }

    let literal = REGISTER_LITERAL.captures_iter(script).find_map(|caps| {
        (1..=3)
            .filter_map(|group| caps.get(group))
            .map(|m| m.as_str().trim())
            .find(|path| !path.is_empty())
            .map(str::to_string)
    });

    Some(match literal {
        Some(path) => Registration::Literal(path),
        None => Registration::DynamicallyGenerated,
    })
}

/// Combine findings from several scripts, preferring literal paths.
pub fn best_registration<I>(findings: I) -> Option<Registration>
where
    I: IntoIterator<Item = Registration>,
{
    let mut best = None;
    for finding in findings {
        match finding {
            Registration::Literal(_) => return Some(finding),
            Registration::DynamicallyGenerated => best = Some(finding),
        }
    }
    best
}

/// Worker path implied by a well-known helper library, if `script` is one.
pub fn known_library_worker(script: &Url) -> Option<&'static str> {
    let mut bare = script.clone();
    bare.set_query(None);
    bare.set_fragment(None);
    let bare = bare.as_str().trim_end_matches('/');

    let is_helper = bare == PWA_UPDATE_HELPER
        || bare
            .strip_prefix(PWA_UPDATE_HELPER)
            .is_some_and(|rest| rest.starts_with('@'));

    is_helper.then_some(PWA_UPDATE_HELPER_WORKER)
}
