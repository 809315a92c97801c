//! Utility functions and helpers.

pub mod http;

use sha2::{Digest, Sha256};
use url::Url;

/// Short, stable fingerprint of a secret for log output.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(&digest[..4])
}

/// Whether `final_url` is the root page of the site `requested` belongs to.
///
/// Upstream answers a missing subject by redirecting to its home page.
pub fn is_site_root(requested: &Url, final_url: &Url) -> bool {
    final_url.host_str() == requested.host_str()
        && requested.path() != "/"
        && matches!(final_url.path(), "" | "/")
}

/// Accept either a bare subject ID or a pasted profile URL.
///
/// For URLs the last non-empty path segment is taken.
pub fn normalize_subject_id(input: &str) -> String {
    let input = input.trim();
    match Url::parse(input) {
        Ok(url) if url.has_host() => url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .unwrap_or_default(),
        _ => input.to_string(),
    }
}

/// Normalize whitespace inside scraped text.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
