//! Client code for stashfetch.
//!
//! This crate provides the cache-aware HTTP client together with the rate
//! limiter, freshness heuristics, and transports it is built from.

pub mod cached;
pub mod heuristic;
pub mod limiter;
pub mod transport;

pub use cached::{CachedClient, CachedClientBuilder, FetchError, Transform};
pub use heuristic::{Heuristic, MaxAgeError, fixed_lifetime, header_max_age_heuristic, parse_max_age};
pub use limiter::{RateLimiter, Window};
pub use transport::{
    ReqwestTransport, RequestOptions, Transport, TransportConfig, TransportError, TransportResponse,
};
