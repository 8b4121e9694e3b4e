//! Path normalization and protected-zone intersection.
//!
//! All functions are pure and total over arbitrary strings: malformed input is
//! normalized as far as possible, never rejected.

use std::collections::BTreeSet;

/// Canonical form: forward slashes, no leading `./` segments.
pub fn normalize(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

/// Normalize every path and collect into a sorted, deduplicated set.
pub fn normalize_all<I, S>(paths: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paths
        .into_iter()
        .map(|path| normalize(path.as_ref()))
        .collect()
}

/// Sorted intersection of the normalized `allowed` and `protected` sets.
pub fn conflicts<A, P>(allowed: A, protected: P) -> Vec<String>
where
    A: IntoIterator,
    A::Item: AsRef<str>,
    P: IntoIterator,
    P::Item: AsRef<str>,
{
    let allowed = normalize_all(allowed);
    let protected = normalize_all(protected);
    allowed.intersection(&protected).cloned().collect()
}

/// True when `grant` equals `path` or is a directory prefix of it.
pub fn covers(grant: &str, path: &str) -> bool {
    let grant = normalize(grant);
    let path = normalize(path);
    let trimmed = grant.trim_end_matches('/');
    if trimmed.is_empty() {
        return false;
    }
    path == trimmed || path.starts_with(&format!("{trimmed}/"))
}

/// Final component of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
