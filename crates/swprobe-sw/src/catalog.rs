//! Conventional service worker file names.

use url::Url;

/// Worker paths commonly used by frameworks and plugins.
pub const CONVENTIONAL_WORKER_NAMES: &[&str] = &[
    "/sw.js",
    "/service-worker.js",
    "/serviceworker.js",
    "/superpwa-sw.js",
    "/ngsw-worker.js",
    "/sw-amp.js",
    "/firebase-messaging-sw.js",
    "/pwabuilder-sw.js",
    "/serviceworker",
];

/// Media types a served worker script may carry.
pub const SCRIPT_MIME_TYPES: &[&str] = &["application/javascript", "text/javascript"];

/// Whether a `Content-Type` header value names a script type.
pub fn is_script_content_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    SCRIPT_MIME_TYPES
        .iter()
        .any(|mime| content_type.contains(mime))
}

/// The page's directory path without a trailing slash, or `None` at the root.
///
/// `/app/` and `/app/index.html` both give `/app`.
pub fn local_path_prefix(page: &Url) -> Option<String> {
    let path = page.path().trim_end_matches('/');
    let directory = match path.rsplit_once('/') {
        Some((parent, last)) if last.contains('.') => parent,
        _ => path,
    };

    (!directory.is_empty()).then(|| directory.to_string())
}

/// Absolute URLs to probe, directory-local names first.
pub fn candidate_urls(page: &Url) -> Vec<Url> {
    let mut paths: Vec<String> = Vec::with_capacity(CONVENTIONAL_WORKER_NAMES.len() * 2);

    if let Some(prefix) = local_path_prefix(page) {
        paths.extend(
            CONVENTIONAL_WORKER_NAMES
                .iter()
                .map(|name| format!("{prefix}{name}")),
        );
    }
    paths.extend(CONVENTIONAL_WORKER_NAMES.iter().map(|name| name.to_string()));

    let mut urls: Vec<Url> = Vec::with_capacity(paths.len());
    for path in paths {
        if let Ok(url) = page.join(&path) {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls
}
