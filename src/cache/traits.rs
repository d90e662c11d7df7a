//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};

/// Something that names one cached read resource.
pub trait QueryKey {
  /// Stable storage key; unique per logical resource
  fn cache_key(&self) -> String;

  /// Human-readable description for logs.
  fn description(&self) -> String {
    self.cache_key()
  }
}

impl QueryKey for str {
  fn cache_key(&self) -> String {
    self.to_string()
  }
}

impl QueryKey for String {
  fn cache_key(&self) -> String {
    self.clone()
  }
}

/// A read answered by the cache layer, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// Time the served value was written locally; `None` for network reads
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Fallback value read from the store while offline.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  pub fn is_offline(&self) -> bool {
    self.source == CacheSource::Offline
  }
}

/// Origin of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  Network,
  /// Offline mode - network unavailable, serving last cached value
  Offline,
}
