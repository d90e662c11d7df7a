//! Durable local store: cached reads plus the ordered mutation queue.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::api::Method;
use crate::error::{StoreError, StoreResult};

/// Last-known-good value for one cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
  pub key: String,
  pub value: Value,
  /// When the value was written
  pub cached_at: DateTime<Utc>,
}

/// A write to be appended to the queue. The store assigns the sequence id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMutation {
  pub resource_path: String,
  pub method: Method,
  pub payload: Option<Value>,
  /// Headers as they were at enqueue time, auth token included
  pub headers: BTreeMap<String, String>,
}

/// A write that could not be sent while offline.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMutation {
  /// Strictly increasing, never reused
  pub seq: i64,
  pub resource_path: String,
  pub method: Method,
  pub payload: Option<Value>,
  pub headers: BTreeMap<String, String>,
  pub enqueued_at: DateTime<Utc>,
}

/// Storage shared by the interactive context and the replay worker.
///
/// Implementations must be durable and must append/remove queue entries with
/// single atomic statements so two processes can share one store.
pub trait LocalStore: Send + Sync {
  /// Last stored value for a cache key.
  fn get(&self, key: &str) -> StoreResult<Option<CachedEntry>>;

  /// Create or overwrite the entry for a key.
  fn put(&self, key: &str, value: &Value) -> StoreResult<()>;

  /// Append a mutation and return its sequence id.
  fn enqueue_mutation(&self, mutation: &NewMutation) -> StoreResult<i64>;

  /// All pending mutations, oldest first.
  fn list_queued_mutations(&self) -> StoreResult<Vec<QueuedMutation>>;

  /// Delete one mutation. Removing an absent id is not an error.
  fn remove_mutation(&self, seq: i64) -> StoreResult<()>;

  fn count_queued_mutations(&self) -> StoreResult<u64>;

  /// Delete every cached entry whose key starts with `prefix`.
  fn remove_prefixed(&self, prefix: &str) -> StoreResult<usize>;

  /// Drop every cached entry and queued mutation (logout).
  fn clear(&self) -> StoreResult<()>;

  /// Take or renew the drain lease for `holder`, valid for `ttl`.
  ///
  /// Returns false while a different holder's lease has not expired. This is
  /// what keeps two processes sharing one store from draining at once.
  fn acquire_drain_lease(&self, holder: &str, ttl: Duration) -> StoreResult<bool>;

  /// Give the lease back. A no-op if `holder` no longer owns it.
  fn release_drain_lease(&self, holder: &str) -> StoreResult<()>;
}

/// SQLite-backed local store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open_default() -> StoreResult<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the store at `path` and bring its schema up to date.
  pub fn open(path: &Path) -> StoreResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(path).map_err(|source| StoreError::Open {
      path: path.display().to_string(),
      source,
    })?;
    conn.busy_timeout(Duration::from_secs(5))?;
    // journal_mode returns the resulting mode as a row
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

    Self::from_connection(conn)
  }

  /// Non-persistent store.
  pub fn open_in_memory() -> StoreResult<Self> {
    let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
      path: ":memory:".to_string(),
      source,
    })?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> StoreResult<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> StoreResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(StoreError::NoDataDir)?;

    Ok(data_dir.join("fleetsync").join("offline.db"))
  }

  /// Schema version currently applied.
  pub fn schema_version(&self) -> StoreResult<usize> {
    let conn = self.lock()?;
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version as usize)
  }

  /// Apply every migration newer than the stored `user_version`.
  fn run_migrations(&self) -> StoreResult<()> {
    let conn = self.lock()?;
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
      let version = index as i64 + 1;
      let tx = conn.unchecked_transaction()?;
      tx.execute_batch(sql)?;
      tx.pragma_update(None, "user_version", version)?;
      tx.commit()?;
      debug!(version, "applied local store migration");
    }

    Ok(())
  }

  fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

/// Additive migrations; index + 1 is the resulting `user_version`.
pub(crate) const MIGRATIONS: &[&str] = &[
  r#"
-- Last-known-good read results, one row per logical resource
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL
);
"#,
  r#"
-- Writes made while offline, replayed in seq order
CREATE TABLE IF NOT EXISTS mutation_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_path TEXT NOT NULL,
    method TEXT NOT NULL,
    payload BLOB,
    headers BLOB NOT NULL,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mutation_queue_enqueued
    ON mutation_queue(enqueued_at);
"#,
  r#"
-- Single-row lock held by whoever is draining the queue
CREATE TABLE IF NOT EXISTS drain_lease (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    holder TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
"#,
];

impl LocalStore for SqliteStore {
  fn get(&self, key: &str) -> StoreResult<Option<CachedEntry>> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, cached_at FROM cache_entries WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    match row {
      Some((data, cached_at)) => Ok(Some(CachedEntry {
        key: key.to_string(),
        value: serde_json::from_slice(&data)?,
        cached_at: parse_datetime(&cached_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, key: &str, value: &Value) -> StoreResult<()> {
    let data = serde_json::to_vec(value)?;
    let conn = self.lock()?;

    conn.execute(
      "INSERT OR REPLACE INTO cache_entries (key, data, cached_at) VALUES (?, ?, ?)",
      params![key, data, Utc::now().to_rfc3339()],
    )?;

    Ok(())
  }

  fn enqueue_mutation(&self, mutation: &NewMutation) -> StoreResult<i64> {
    let payload = mutation
      .payload
      .as_ref()
      .map(serde_json::to_vec)
      .transpose()?;
    let headers = serde_json::to_vec(&mutation.headers)?;
    let conn = self.lock()?;

    conn.execute(
      "INSERT INTO mutation_queue (resource_path, method, payload, headers, enqueued_at)
       VALUES (?, ?, ?, ?, ?)",
      params![
        mutation.resource_path,
        mutation.method.as_str(),
        payload,
        headers,
        Utc::now().to_rfc3339()
      ],
    )?;
    // Same connection and still under the lock
    let seq = conn.last_insert_rowid();

    debug!(seq, method = %mutation.method, path = %mutation.resource_path, "queued mutation");
    Ok(seq)
  }

  fn list_queued_mutations(&self) -> StoreResult<Vec<QueuedMutation>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT seq, resource_path, method, payload, headers, enqueued_at
       FROM mutation_queue
       ORDER BY seq ASC",
    )?;

    let rows = stmt.query_map([], RawMutation::from_row)?;
    let mut mutations = Vec::new();
    for row in rows {
      mutations.push(row?.decode()?);
    }

    Ok(mutations)
  }

  fn remove_mutation(&self, seq: i64) -> StoreResult<()> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM mutation_queue WHERE seq = ?", params![seq])?;
    Ok(())
  }

  fn count_queued_mutations(&self) -> StoreResult<u64> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM mutation_queue", [], |row| row.get(0))?;
    Ok(count as u64)
  }

  fn remove_prefixed(&self, prefix: &str) -> StoreResult<usize> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1",
      params![prefix],
    )?;
    Ok(removed)
  }

  fn clear(&self) -> StoreResult<()> {
    let conn = self.lock()?;
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM cache_entries", [])?;
    tx.execute("DELETE FROM mutation_queue", [])?;
    tx.commit()?;
    Ok(())
  }

  fn acquire_drain_lease(&self, holder: &str, ttl: Duration) -> StoreResult<bool> {
    let now = Utc::now().timestamp_millis();
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let expires_at = now.saturating_add(ttl_ms);
    let conn = self.lock()?;

    // One statement: either insert, take over an expired lease, or renew our own
    let changed = conn.execute(
      "INSERT INTO drain_lease (id, holder, expires_at) VALUES (1, ?1, ?2)
       ON CONFLICT(id) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
       WHERE drain_lease.holder = excluded.holder OR drain_lease.expires_at <= ?3",
      params![holder, expires_at, now],
    )?;

    Ok(changed == 1)
  }

  fn release_drain_lease(&self, holder: &str) -> StoreResult<()> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM drain_lease WHERE holder = ?", params![holder])?;
    Ok(())
  }
}

/// Queue row before JSON decoding.
struct RawMutation {
  seq: i64,
  resource_path: String,
  method: String,
  payload: Option<Vec<u8>>,
  headers: Vec<u8>,
  enqueued_at: String,
}

impl RawMutation {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      seq: row.get(0)?,
      resource_path: row.get(1)?,
      method: row.get(2)?,
      payload: row.get(3)?,
      headers: row.get(4)?,
      enqueued_at: row.get(5)?,
    })
  }

  fn decode(self) -> StoreResult<QueuedMutation> {
    let method = self.method.parse::<Method>().map_err(|_| {
      StoreError::Corrupt(format!(
        "unknown method '{}' for queued mutation {}",
        self.method, self.seq
      ))
    })?;

    Ok(QueuedMutation {
      seq: self.seq,
      resource_path: self.resource_path,
      method,
      payload: self
        .payload
        .as_deref()
        .map(serde_json::from_slice)
        .transpose()?,
      headers: serde_json::from_slice(&self.headers)?,
      enqueued_at: parse_datetime(&self.enqueued_at)?,
    })
  }
}

/// Parse an RFC 3339 timestamp written by this store.
fn parse_datetime(s: &str) -> StoreResult<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|_| StoreError::Timestamp(s.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn mutation(path: &str, method: Method) -> NewMutation {
    NewMutation {
      resource_path: path.to_string(),
      method,
      payload: Some(json!({ "name": path })),
      headers: BTreeMap::from([("Authorization".to_string(), "Bearer t".to_string())]),
    }
  }

  #[test]
  fn get_returns_none_for_unknown_key() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.get("allData").unwrap().is_none());
  }

  #[test]
  fn put_overwrites_existing_entry() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.put("parts", &json!([1])).unwrap();
    store.put("parts", &json!([1, 2])).unwrap();

    let entry = store.get("parts").unwrap().unwrap();
    assert_eq!(entry.key, "parts");
    assert_eq!(entry.value, json!([1, 2]));
  }

  #[test]
  fn queue_is_listed_in_enqueue_order() {
    let store = SqliteStore::open_in_memory().unwrap();
    let a = store
      .enqueue_mutation(&mutation("/api/parts", Method::Post))
      .unwrap();
    let b = store
      .enqueue_mutation(&mutation("/api/parts/1", Method::Put))
      .unwrap();
    let c = store
      .enqueue_mutation(&mutation("/api/parts/1", Method::Delete))
      .unwrap();
    assert!(a < b && b < c);

    let listed = store.list_queued_mutations().unwrap();
    let seqs: Vec<i64> = listed.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![a, b, c]);
    assert_eq!(listed[1].method, Method::Put);
    assert_eq!(listed[0].headers["Authorization"], "Bearer t");
    assert_eq!(store.count_queued_mutations().unwrap(), 3);
  }

  #[test]
  fn removed_ids_are_not_reused() {
    let store = SqliteStore::open_in_memory().unwrap();
    let first = store
      .enqueue_mutation(&mutation("/api/parts", Method::Post))
      .unwrap();
    store.remove_mutation(first).unwrap();
    // Removing twice is a no-op
    store.remove_mutation(first).unwrap();

    let second = store
      .enqueue_mutation(&mutation("/api/parts", Method::Post))
      .unwrap();
    assert!(second > first);
    assert_eq!(store.count_queued_mutations().unwrap(), 1);
  }

  #[test]
  fn delete_without_payload_round_trips() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut m = mutation("/api/points/7", Method::Delete);
    m.payload = None;
    store.enqueue_mutation(&m).unwrap();

    let listed = store.list_queued_mutations().unwrap();
    assert_eq!(listed[0].payload, None);
  }

  #[test]
  fn clear_drops_cache_and_queue() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.put("users", &json!([])).unwrap();
    store
      .enqueue_mutation(&mutation("/api/users", Method::Post))
      .unwrap();

    store.clear().unwrap();
    assert!(store.get("users").unwrap().is_none());
    assert_eq!(store.count_queued_mutations().unwrap(), 0);
  }

  #[test]
  fn remove_prefixed_only_touches_matching_keys() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.put("idMap:offline_1", &json!(501)).unwrap();
    store.put("idMap:offline_2", &json!(502)).unwrap();
    store.put("allData", &json!({})).unwrap();

    assert_eq!(store.remove_prefixed("idMap:").unwrap(), 2);
    assert!(store.get("idMap:offline_1").unwrap().is_none());
    assert!(store.get("allData").unwrap().is_some());
  }

  #[test]
  fn drain_lease_is_exclusive_until_released() {
    let store = SqliteStore::open_in_memory().unwrap();
    let ttl = Duration::from_secs(60);

    assert!(store.acquire_drain_lease("a", ttl).unwrap());
    // Renewal by the owner succeeds, a second holder is refused
    assert!(store.acquire_drain_lease("a", ttl).unwrap());
    assert!(!store.acquire_drain_lease("b", ttl).unwrap());

    // Only the owner can release
    store.release_drain_lease("b").unwrap();
    assert!(!store.acquire_drain_lease("b", ttl).unwrap());
    store.release_drain_lease("a").unwrap();
    assert!(store.acquire_drain_lease("b", ttl).unwrap());
  }

  #[test]
  fn expired_drain_lease_can_be_taken_over() {
    let store = SqliteStore::open_in_memory().unwrap();

    assert!(store.acquire_drain_lease("crashed", Duration::ZERO).unwrap());
    std::thread::sleep(Duration::from_millis(5));
    assert!(store
      .acquire_drain_lease("next", Duration::from_secs(60))
      .unwrap());
  }

  #[test]
  fn drain_lease_is_shared_between_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");
    let cli = SqliteStore::open(&path).unwrap();
    let worker = SqliteStore::open(&path).unwrap();
    let ttl = Duration::from_secs(60);

    assert!(worker.acquire_drain_lease("worker", ttl).unwrap());
    assert!(!cli.acquire_drain_lease("cli", ttl).unwrap());
    worker.release_drain_lease("worker").unwrap();
    assert!(cli.acquire_drain_lease("cli", ttl).unwrap());
  }

  #[test]
  fn upgrade_from_cache_only_schema_keeps_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    {
      let conn = Connection::open(&path).unwrap();
      conn.execute_batch(MIGRATIONS[0]).unwrap();
      conn.pragma_update(None, "user_version", 1i64).unwrap();
      conn
        .execute(
          "INSERT INTO cache_entries (key, data, cached_at) VALUES (?, ?, ?)",
          params!["allData", b"{\"regions\":[]}".to_vec(), Utc::now().to_rfc3339()],
        )
        .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.schema_version().unwrap(), MIGRATIONS.len());
    assert_eq!(
      store.get("allData").unwrap().unwrap().value,
      json!({ "regions": [] })
    );
    store
      .enqueue_mutation(&mutation("/api/regions", Method::Post))
      .unwrap();
    assert_eq!(store.count_queued_mutations().unwrap(), 1);
  }

  #[test]
  fn queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("offline.db");

    let seq = {
      let store = SqliteStore::open(&path).unwrap();
      store
        .enqueue_mutation(&mutation("/api/machines", Method::Post))
        .unwrap()
    };

    let reopened = SqliteStore::open(&path).unwrap();
    let listed = reopened.list_queued_mutations().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].seq, seq);
    assert_eq!(listed[0].resource_path, "/api/machines");
  }
}
