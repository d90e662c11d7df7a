//! Fleet client with transparent caching and offline writes.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{CacheLayer, CacheResult, LocalStore, QueuedMutation};
use crate::error::Result;
use crate::sync::{
  sync_region, Connectivity, OfflineWriter, ReplayEngine, ReplayHandle, ReplayWorker, SyncEvent,
  WriteKind, WriteOutcome,
};

use super::cache::FleetQueryKey;
use super::client::ApiClient;
use super::types::{
  AggregateDataset, EntityId, EntityType, MachineDetails, MaintenanceRecord, Part, User,
};

/// The surface the UI talks to.
///
/// Reads are cache-backed, writes are queue-backed when offline, and the
/// replay engine shares the same store. The store is opened once by the
/// caller and injected here.
pub struct FleetClient {
  api: ApiClient,
  store: Arc<dyn LocalStore>,
  cache: CacheLayer<dyn LocalStore>,
  writer: OfflineWriter<dyn LocalStore>,
  engine: Arc<ReplayEngine<dyn LocalStore>>,
  connectivity: Connectivity,
  replay: Option<ReplayHandle>,
}

impl FleetClient {
  pub fn new(api: ApiClient, store: Arc<dyn LocalStore>, connectivity: Connectivity) -> Self {
    let cache = CacheLayer::new(Arc::clone(&store), connectivity.clone());
    let writer = OfflineWriter::new(Arc::clone(&store), api.clone(), connectivity.clone());
    let engine = Arc::new(ReplayEngine::new(
      Arc::clone(&store),
      Arc::clone(api.transport()),
    ));

    Self {
      api,
      store,
      cache,
      writer,
      engine,
      connectivity,
      replay: None,
    }
  }

  /// Spawn the background replay worker and route offline writes to it.
  pub fn start_replay_worker(&mut self, retry_interval: Option<Duration>) -> JoinHandle<()> {
    let (handle, task) = ReplayWorker::new(Arc::clone(&self.engine), self.connectivity.clone())
      .with_retry_interval(retry_interval)
      .spawn();
    self.writer.set_replay(handle.clone());
    self.replay = Some(handle);
    task
  }

  pub fn replay_handle(&self) -> Option<&ReplayHandle> {
    self.replay.as_ref()
  }

  pub fn replay_engine(&self) -> &Arc<ReplayEngine<dyn LocalStore>> {
    &self.engine
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn api(&self) -> &ApiClient {
    &self.api
  }

  /// Subscribe to "sync complete" and "drain halted" notifications.
  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.engine.subscribe()
  }

  // -- reads --------------------------------------------------------------

  pub async fn get_all_data(&self) -> Result<CacheResult<AggregateDataset>> {
    self
      .cache
      .fetch(&FleetQueryKey::AllData, || self.api.get_all_data())
      .await
  }

  pub async fn get_machine_details(&self, id: &EntityId) -> Result<CacheResult<MachineDetails>> {
    let key = FleetQueryKey::MachineDetails { id: id.clone() };
    self
      .cache
      .fetch(&key, || self.api.get_machine_details(id))
      .await
  }

  pub async fn get_parts(&self) -> Result<CacheResult<Vec<Part>>> {
    self
      .cache
      .fetch(&FleetQueryKey::Parts, || self.api.get_parts())
      .await
  }

  pub async fn get_users(&self) -> Result<CacheResult<Vec<User>>> {
    self
      .cache
      .fetch(&FleetQueryKey::Users, || self.api.get_users())
      .await
  }

  /// Refresh one region and merge it into the cached dataset.
  pub async fn sync_region(&self, region_id: &EntityId) -> Result<AggregateDataset> {
    sync_region(&self.api, &self.cache, region_id).await
  }

  // -- writes -------------------------------------------------------------

  pub async fn create_entity<T: DeserializeOwned>(
    &self,
    entity: EntityType,
    payload: Value,
  ) -> Result<WriteOutcome<T>> {
    self
      .writer
      .submit(WriteKind::Create, &collection(entity), Some(payload))
      .await
  }

  pub async fn update_entity<T: DeserializeOwned>(
    &self,
    entity: EntityType,
    id: &EntityId,
    payload: Value,
  ) -> Result<WriteOutcome<T>> {
    self
      .writer
      .submit(WriteKind::Update(id.clone()), &collection(entity), Some(payload))
      .await
  }

  /// Online, the outcome carries whatever body the server answered with
  /// (`null` when empty); queued deletes report `null`.
  pub async fn delete_entity(
    &self,
    entity: EntityType,
    id: &EntityId,
  ) -> Result<WriteOutcome<Value>> {
    self
      .writer
      .submit(WriteKind::Delete(id.clone()), &collection(entity), None)
      .await
  }

  pub async fn add_maintenance_record(
    &self,
    record: Value,
  ) -> Result<WriteOutcome<MaintenanceRecord>> {
    self
      .writer
      .submit(WriteKind::Create, "/maintenanceRecords", Some(record))
      .await
  }

  // -- local state --------------------------------------------------------

  /// Writes still waiting for replay, oldest first.
  pub fn pending_mutations(&self) -> Result<Vec<QueuedMutation>> {
    Ok(self.store.list_queued_mutations()?)
  }

  pub fn pending_count(&self) -> Result<u64> {
    Ok(self.store.count_queued_mutations()?)
  }

  /// Drop a queued write after a halted drain.
  pub fn discard_mutation(&self, seq: i64) -> Result<()> {
    info!(seq, "discarding queued mutation");
    Ok(self.store.remove_mutation(seq)?)
  }

  /// Forget all cached data and queued writes (logout).
  pub fn clear_local_state(&self) -> Result<()> {
    info!("clearing local store");
    Ok(self.store.clear()?)
  }
}

fn collection(entity: EntityType) -> String {
  format!("/{}", entity.as_str())
}
