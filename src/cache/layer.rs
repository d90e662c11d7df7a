//! Cache layer that orchestrates caching logic with network fetching.

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::LocalStore;
use super::traits::{CacheResult, QueryKey};
use crate::error::{Result, SyncError};
use crate::sync::Connectivity;

/// Cache-through read path.
///
/// Every read goes to the network first. A successful response overwrites the
/// cached value for its key; a failed one is answered from the cache only when
/// the client is offline. Authentication failures are never masked.
pub struct CacheLayer<S: LocalStore + ?Sized> {
  storage: Arc<S>,
  connectivity: Connectivity,
}

impl<S: LocalStore + ?Sized> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<S>, connectivity: Connectivity) -> Self {
    Self {
      storage,
      connectivity,
    }
  }

  /// Fetch through the cache.
  ///
  /// 1. Try the network; on success store the result under `key` and return it
  /// 2. On auth failure, propagate it as-is
  /// 3. On any other failure while offline, serve the last cached value
  /// 4. Offline with nothing cached yields `NotFoundInCache`
  pub async fn fetch<K, T, F, Fut>(&self, key: &K, fetcher: F) -> Result<CacheResult<T>>
  where
    K: QueryKey + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let cache_key = key.cache_key();

    match fetcher().await {
      Ok(data) => {
        self.storage.put(&cache_key, &serde_json::to_value(&data)?)?;
        debug!(key = %cache_key, "refreshed cache from network");
        Ok(CacheResult::from_network(data))
      }
      Err(err) if err.is_auth() => Err(err),
      Err(err) if !self.connectivity.is_online() => match self.storage.get(&cache_key)? {
        Some(entry) => {
          warn!(
            resource = %key.description(),
            cached_at = %entry.cached_at,
            error = %err,
            "serving cached data while offline"
          );
          let data = serde_json::from_value(entry.value)?;
          Ok(CacheResult::offline(data, entry.cached_at))
        }
        None => {
          warn!(resource = %key.description(), error = %err, "offline with nothing cached");
          Err(SyncError::NotFoundInCache { key: cache_key })
        }
      },
      Err(err) => Err(err),
    }
  }

  /// Overwrite the cached value for `key` without a network round trip.
  pub fn store<K, T>(&self, key: &K, data: &T) -> Result<()>
  where
    K: QueryKey + ?Sized,
    T: Serialize,
  {
    self
      .storage
      .put(&key.cache_key(), &serde_json::to_value(data)?)?;
    Ok(())
  }

  /// Last cached value for `key`, if any.
  pub fn cached<K, T>(&self, key: &K) -> Result<Option<T>>
  where
    K: QueryKey + ?Sized,
    T: DeserializeOwned,
  {
    match self.storage.get(&key.cache_key())? {
      Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
      None => Ok(None),
    }
  }
}

impl<S: LocalStore + ?Sized> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      connectivity: self.connectivity.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use serde_json::{json, Value};

  fn layer(online: bool) -> CacheLayer<SqliteStore> {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    CacheLayer::new(store, Connectivity::new(online))
  }

  #[tokio::test]
  async fn network_result_is_cached() {
    let cache = layer(true);
    let result = cache
      .fetch("parts", || async { Ok(json!([{ "id": 1 }])) })
      .await
      .unwrap();

    assert_eq!(result.source, crate::cache::CacheSource::Network);
    let cached: Option<Value> = cache.cached("parts").unwrap();
    assert_eq!(cached, Some(json!([{ "id": 1 }])));
  }

  #[tokio::test]
  async fn online_failure_is_not_masked() {
    let cache = layer(true);
    cache.store("parts", &json!([])).unwrap();

    let err = cache
      .fetch::<_, Value, _, _>("parts", || async {
        Err(SyncError::Network("connection refused".into()))
      })
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
  }

  #[tokio::test]
  async fn offline_miss_reports_key() {
    let cache = layer(false);
    let err = cache
      .fetch::<_, Value, _, _>("users", || async {
        Err(SyncError::Network("offline".into()))
      })
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::NotFoundInCache { key } if key == "users"));
  }

  #[tokio::test]
  async fn auth_failure_skips_fallback() {
    let cache = layer(false);
    cache.store("users", &json!([{ "id": 1 }])).unwrap();

    let err = cache
      .fetch::<_, Value, _, _>("users", || async { Err(SyncError::Auth { status: 401 }) })
      .await
      .unwrap_err();
    assert!(err.is_auth());
  }
}
