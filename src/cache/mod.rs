//! Partitioned response cache for offline support.
//!
//! This module provides:
//! - Named partitions keyed by request identity (method + URL)
//! - SQLite persistence, shared safely between concurrent requests
//! - The cache-first / network-first / offline-fallback strategies
//! - Fire-and-forget write-back of successful responses

mod layer;
mod partition;
mod storage;
mod traits;
mod writes;

pub use layer::{cache_first, network_first, network_first_or_offline, OfflinePage};
pub use partition::{carries_version, Partition, PartitionKind};
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
pub use writes::CacheWrites;
