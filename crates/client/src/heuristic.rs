//! Freshness heuristics.
//!
//! A heuristic looks at a freshly fetched envelope (before it has an expiry)
//! and returns how many seconds it stays fresh. Zero or negative means the
//! response is not cached.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use stashfetch_core::Envelope;

/// Pluggable freshness policy.
pub type Heuristic<T> = Arc<dyn Fn(&Envelope<T>) -> i64 + Send + Sync>;

static MAX_AGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[\s,])max-age\s*=\s*([^,\s]*)").expect("max-age pattern is valid"));

/// Why no lifetime could be read from `Cache-Control`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaxAgeError {
    #[error("no cache-control header")]
    MissingHeader,

    #[error("cache-control has no max-age directive")]
    MissingDirective,

    #[error("invalid max-age value: {0:?}")]
    Invalid(String),
}

/// Read the `max-age` directive from lower-cased response headers.
pub fn parse_max_age(headers: &BTreeMap<String, String>) -> Result<u64, MaxAgeError> {
    let value = headers.get("cache-control").ok_or(MaxAgeError::MissingHeader)?;
    let captures = MAX_AGE.captures(value).ok_or(MaxAgeError::MissingDirective)?;
    let raw = captures.get(1).map_or("", |m| m.as_str()).trim_matches('"');
    raw.parse::<u64>().map_err(|_| MaxAgeError::Invalid(raw.to_string()))
}

/// Default policy: the response's `max-age`, or 0 when it cannot be read.
pub fn header_max_age_heuristic<T>(envelope: &Envelope<T>) -> i64 {
    match parse_max_age(&envelope.headers) {
        Ok(secs) => i64::try_from(secs).unwrap_or(i64::MAX),
        Err(reason) => {
            tracing::trace!(%reason, "response not cacheable by max-age");
            0
        }
    }
}

/// Policy that gives every response the same lifetime.
pub fn fixed_lifetime<T>(secs: i64) -> Heuristic<T> {
    Arc::new(move |_: &Envelope<T>| secs)
}
