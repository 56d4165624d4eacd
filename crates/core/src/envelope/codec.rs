//! On-disk encoding of envelopes.
//!
//! A stored value is the zlib-compressed JSON array
//! `[key, fetched_epoch, expires_epoch, status, headers, encoding, base64_body]`.
//! Timestamps are whole seconds; the original key is embedded so a value read
//! back under a different key (e.g. a hash collision) is rejected.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

use super::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("body is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("record belongs to {found:?}, not {expected:?}")]
    KeyMismatch { expected: String, found: String },

    #[error("timestamp out of range: {0}")]
    Timestamp(i64),

    #[error("envelope has no expiry")]
    MissingExpiry,
}

#[derive(Serialize)]
struct RecordRef<'a>(&'a str, i64, i64, u16, &'a BTreeMap<String, String>, &'a str, String);

#[derive(Deserialize)]
struct Record(String, i64, i64, u16, BTreeMap<String, String>, String, String);

/// Encode `envelope` for storage under `key`.
///
/// The envelope must already carry an expiry.
pub fn encode<T>(key: &str, envelope: &Envelope<T>) -> Result<Vec<u8>, CodecError> {
    let expires_at = envelope.expires_at.ok_or(CodecError::MissingExpiry)?;

    let record = RecordRef(
        key,
        envelope.fetched_at.timestamp(),
        expires_at.timestamp(),
        envelope.status,
        &envelope.headers,
        &envelope.encoding,
        STANDARD.encode(&envelope.body),
    );
    let json = serde_json::to_vec(&record)?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Decode a stored value, checking it was written for `key`.
///
/// The result is marked as coming from the cache.
pub fn decode(key: &str, bytes: &[u8]) -> Result<Envelope, CodecError> {
    let mut json = Vec::new();
    ZlibDecoder::new(bytes).read_to_end(&mut json)?;

    let Record(found, fetched, expires, status, headers, encoding, body) = serde_json::from_slice(&json)?;
    if found != key {
        return Err(CodecError::KeyMismatch { expected: key.to_string(), found });
    }

    Ok(Envelope {
        fetched_at: from_epoch(fetched)?,
        expires_at: Some(from_epoch(expires)?),
        status,
        headers,
        encoding,
        body: Bytes::from(STANDARD.decode(body)?),
        transformed: (),
        from_cache: true,
    })
}

fn from_epoch(secs: i64) -> Result<DateTime<Utc>, CodecError> {
    DateTime::from_timestamp(secs, 0).ok_or(CodecError::Timestamp(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Envelope {
        let mut env = Envelope::new(
            Utc.timestamp_opt(1_700_000_000, 750_000_000).unwrap(),
            200,
            [("Content-Type", "text/plain; charset=utf-8"), ("Cache-Control", "max-age=60")],
            "utf-8",
            Bytes::from_static(b"\x00binary\xffbody"),
        );
        env.expires_at = Some(Utc.timestamp_opt(1_700_000_060, 750_000_000).unwrap());
        env
    }

    #[test]
    fn test_round_trip_truncates_to_seconds() {
        let env = sample();
        let decoded = decode("http://x", &encode("http://x", &env).unwrap()).unwrap();

        assert_eq!(decoded.fetched_at.timestamp(), 1_700_000_000);
        assert_eq!(decoded.fetched_at.timestamp_subsec_nanos(), 0);
        assert_eq!(decoded.expires_at.map(|e| e.timestamp()), Some(1_700_000_060));
        assert_eq!(decoded.status, 200);
        assert_eq!(decoded.headers, env.headers);
        assert_eq!(decoded.encoding, "utf-8");
        assert_eq!(decoded.body, env.body);
        assert!(decoded.from_cache);
    }

    #[test]
    fn test_wire_layout() {
        let bytes = encode("http://x", &sample()).unwrap();
        let mut json = Vec::new();
        ZlibDecoder::new(&bytes[..]).read_to_end(&mut json).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        let fields = value.as_array().unwrap();
        assert_eq!(fields.len(), 7);
        assert_eq!(fields[0], "http://x");
        assert_eq!(fields[1], 1_700_000_000);
        assert_eq!(fields[3], 200);
        assert_eq!(fields[4]["cache-control"], "max-age=60");
        assert_eq!(fields[6], STANDARD.encode(b"\x00binary\xffbody"));
    }

    #[test]
    fn test_key_mismatch_rejected() {
        let bytes = encode("http://b", &sample()).unwrap();
        let err = decode("http://a", &bytes).unwrap_err();
        assert!(matches!(err, CodecError::KeyMismatch { ref found, .. } if found == "http://b"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(decode("k", b"not zlib at all"), Err(CodecError::Compression(_))));

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"[\"k\", 1]").unwrap();
        let short = encoder.finish().unwrap();
        assert!(matches!(decode("k", &short), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_missing_expiry_rejected() {
        let mut env = sample();
        env.expires_at = None;
        assert!(matches!(encode("k", &env), Err(CodecError::MissingExpiry)));
    }
}
