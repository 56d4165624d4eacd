//! The cached unit: one HTTP response plus its freshness metadata.

pub mod codec;

use std::borrow::Cow;
use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

pub use codec::{CodecError, decode, encode};

/// Errors from decoding an envelope body as text.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    #[error("unknown text encoding: {0}")]
    UnknownEncoding(String),

    #[error("body is not valid {0}")]
    Malformed(String),
}

/// A cached or freshly fetched response.
///
/// `transformed` carries a caller-defined view computed from the raw
/// response when the envelope is built; it is never persisted and is
/// recomputed when an envelope is loaded back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T = ()> {
    /// When the response was obtained from the network.
    pub fetched_at: DateTime<Utc>,
    /// When the response stops being fresh. `None` until a lifetime is assigned.
    pub expires_at: Option<DateTime<Utc>>,
    pub status: u16,
    /// Lower-cased header name to value.
    pub headers: BTreeMap<String, String>,
    /// Label of the text encoding used by [`Envelope::text`].
    pub encoding: String,
    pub body: Bytes,
    pub transformed: T,
    /// Whether this envelope was served from the store.
    pub from_cache: bool,
}

impl Envelope {
    /// Build an envelope for a response fetched at `fetched_at`, with no expiry yet.
    ///
    /// Header names are lower-cased; later duplicates win.
    pub fn new<I, K, V>(fetched_at: DateTime<Utc>, status: u16, headers: I, encoding: impl Into<String>, body: Bytes) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.as_ref().to_ascii_lowercase(), value.into()))
            .collect();

        Self {
            fetched_at,
            expires_at: None,
            status,
            headers,
            encoding: encoding.into(),
            body,
            transformed: (),
            from_cache: false,
        }
    }
}

impl<T> Envelope<T> {
    /// Replace the derived view, keeping every response field.
    pub fn with_transformed<U>(self, transformed: U) -> Envelope<U> {
        Envelope {
            fetched_at: self.fetched_at,
            expires_at: self.expires_at,
            status: self.status,
            headers: self.headers,
            encoding: self.encoding,
            body: self.body,
            transformed,
            from_cache: self.from_cache,
        }
    }

    /// Look up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Whether the envelope may still be served at `now` without refetching.
    ///
    /// An envelope without an expiry is never fresh.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now < expires)
    }

    /// Decode the body with the envelope's encoding.
    pub fn text(&self) -> Result<Cow<'_, str>, TextError> {
        let label = if self.encoding.is_empty() { "utf-8" } else { self.encoding.as_str() };
        let encoding = encoding_rs::Encoding::for_label(label.as_bytes())
            .ok_or_else(|| TextError::UnknownEncoding(label.to_string()))?;

        encoding
            .decode_without_bom_handling_and_without_replacement(&self.body)
            .ok_or_else(|| TextError::Malformed(encoding.name().to_string()))
    }
}
