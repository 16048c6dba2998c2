//! # courier-store
//!
//! Storage backends for the courier messaging server.
//!
//! Every backend implements [`DataStorage`].  Two are provided:
//!
//! - [`CachedStorage`]: an in-memory TTL cache of users, groups and relation
//!   slices, trimmed by a background sweeper thread.
//! - [`JsonStorage`]: the whole store in one JSON file, loaded on `open()`
//!   and written back on `flush()`/`close()`.
//!
//! [`StoreConfig::from_env`] picks and configures a backend from
//! `COURIER_*` environment variables.

pub mod cache;
pub mod config;
pub mod json;
pub mod storage;

mod error;

pub use cache::CachedStorage;
pub use config::{CacheConfig, JsonConfig, StorageKind, StoreConfig};
pub use error::{Error, ErrorCode, Result, StorageError, SystemError};
pub use json::JsonStorage;
pub use storage::DataStorage;
