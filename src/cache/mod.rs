//! Named, versioned cache stores holding request/response pairs.
//!
//! Stores are persisted in SQLite so cached responses outlive the process.
//! A store is created on first use and destroyed as a whole when its
//! generation is garbage collected.

mod storage;
mod types;

pub use storage::{CacheStorage, SqliteStorage};
pub use types::{CacheKey, CachedResponse};

pub(crate) use storage::parse_datetime;
