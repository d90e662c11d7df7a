//! Offline-first sync core for coffee machine fleet maintenance.
//!
//! - [`cache`]: durable local store and the cache-through read path
//! - [`sync`]: offline write queue, background replay and region sync
//! - [`api`]: the backend as seen by the client, and the [`FleetClient`] facade

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod sync;

pub use api::FleetClient;
pub use error::{Result, StoreError, SyncError};
