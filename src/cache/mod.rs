//! Local persistence and the cache-through read path.
//!
//! This module is agnostic of the fleet domain:
//! - `LocalStore` keeps last-known-good JSON per key and an ordered write queue
//! - `CacheLayer` wraps any fetch so that offline failures fall back to the cache

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CachedEntry, LocalStore, NewMutation, QueuedMutation, SqliteStore};
pub use traits::{CacheResult, CacheSource, QueryKey};
