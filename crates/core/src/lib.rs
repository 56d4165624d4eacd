//! Core types and shared functionality for stashfetch.
//!
//! This crate provides:
//! - Durable key-value stores (SQLite with a batching writer, file-per-key)
//! - The response envelope and its on-disk encoding
//! - Unified error types
//! - Configuration structures

pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::Envelope;
pub use error::Error;
pub use store::{FileStore, KeyValueStore, Store, StoreConfig};
