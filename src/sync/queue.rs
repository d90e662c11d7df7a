//! Offline write path: send when online, queue durably when offline.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::connectivity::Connectivity;
use super::worker::ReplayHandle;
use crate::api::{ApiClient, EntityId, Method};
use crate::cache::{LocalStore, NewMutation};
use crate::error::Result;

/// Shape of a write, used to build the request and the optimistic result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteKind {
  Create,
  Update(EntityId),
  Delete(EntityId),
}

impl WriteKind {
  pub fn method(&self) -> Method {
    match self {
      Self::Create => Method::Post,
      Self::Update(_) => Method::Put,
      Self::Delete(_) => Method::Delete,
    }
  }

  /// Endpoint for a collection, e.g. `/parts` or `/parts/42`.
  pub fn endpoint(&self, collection: &str) -> String {
    match self {
      Self::Create => collection.to_string(),
      Self::Update(id) | Self::Delete(id) => format!("{}/{}", collection, id),
    }
  }
}

/// Result of a write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
  /// Sent and confirmed by the server
  Applied(T),
  /// Durably queued for replay; `optimistic` stands in for the server result
  Queued { seq: i64, optimistic: T },
}

impl<T> WriteOutcome<T> {
  pub fn value(&self) -> &T {
    match self {
      Self::Applied(value) | Self::Queued { optimistic: value, .. } => value,
    }
  }

  pub fn is_queued(&self) -> bool {
    matches!(self, Self::Queued { .. })
  }
}

/// Wraps write endpoints with the offline queue.
pub struct OfflineWriter<S: LocalStore + ?Sized> {
  store: Arc<S>,
  client: ApiClient,
  connectivity: Connectivity,
  replay: Option<ReplayHandle>,
}

impl<S: LocalStore + ?Sized> OfflineWriter<S> {
  pub fn new(store: Arc<S>, client: ApiClient, connectivity: Connectivity) -> Self {
    Self {
      store,
      client,
      connectivity,
      replay: None,
    }
  }

  /// Ask the replay worker to drain after every offline enqueue.
  pub fn set_replay(&mut self, replay: ReplayHandle) {
    self.replay = Some(replay);
  }

  /// Perform a write against `collection` (e.g. `/parts`).
  ///
  /// Online, the request goes straight to the server and any rejection is
  /// returned to the caller. Offline, the request is appended to the queue and
  /// an optimistic result is returned as soon as it is durably stored.
  pub async fn submit<T: DeserializeOwned>(
    &self,
    kind: WriteKind,
    collection: &str,
    payload: Option<Value>,
  ) -> Result<WriteOutcome<T>> {
    let endpoint = kind.endpoint(collection);

    if self.connectivity.is_online() {
      let mut request = self.client.request(kind.method(), &endpoint);
      if let Some(body) = payload {
        request = request.with_body(body);
      }
      let result = self.client.execute(&request).await?;
      return Ok(WriteOutcome::Applied(result));
    }

    let mutation = NewMutation {
      resource_path: self.client.path(&endpoint),
      method: kind.method(),
      payload: payload.clone(),
      headers: self.client.headers(),
    };
    // A store failure must reach the caller: nothing was queued
    let seq = self.store.enqueue_mutation(&mutation)?;
    info!(seq, method = %mutation.method, path = %mutation.resource_path, "offline: write queued");

    self.request_drain();

    let optimistic = serde_json::from_value(optimistic_result(&kind, seq, payload)?)?;
    Ok(WriteOutcome::Queued { seq, optimistic })
  }

  fn request_drain(&self) {
    match &self.replay {
      Some(replay) => {
        if !replay.request_drain() {
          warn!("replay worker is not running; queued write waits for the next drain");
        }
      }
      None => debug!("no replay worker attached"),
    }
  }
}

/// What the server would most likely have answered.
fn optimistic_result(kind: &WriteKind, seq: i64, payload: Option<Value>) -> Result<Value> {
  let id = match kind {
    WriteKind::Create => serde_json::to_value(EntityId::Local(seq))?,
    WriteKind::Update(id) => serde_json::to_value(id)?,
    WriteKind::Delete(_) => return Ok(Value::Null),
  };

  Ok(match payload {
    Some(Value::Object(mut fields)) => {
      fields.insert("id".to_string(), id);
      Value::Object(fields)
    }
    Some(other) => other,
    None => serde_json::json!({ "id": id }),
  })
}
