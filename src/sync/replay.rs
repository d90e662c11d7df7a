//! Replays queued mutations against the server in sequence order.
//!
//! A drain walks the queue oldest-first and stops at the first mutation that
//! does not succeed. Nothing behind a failed mutation is ever sent, so a later
//! write can never land before the write it depended on.
//!
//! Only one drain runs against a store at a time: an in-process flag guards
//! the engine, and a lease row in the store guards against other processes
//! (the CLI and a separate worker) sharing the same file.
//!
//! ```text
//! Idle -> Draining -> Idle      (queue empty, or transient failure)
//!                  -> Stopped   (server rejected a mutation with a 4xx)
//! ```

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{ApiRequest, ApiResponse, EntityId, Method, Transport, ID_MAP_PREFIX};
use crate::cache::{LocalStore, QueuedMutation};
use crate::error::Result;

/// How long a drain lease stays valid without renewal. Renewed before every
/// mutation, so it only expires when the holder died mid-drain.
const DRAIN_LEASE_TTL: Duration = Duration::from_secs(60);

static NEXT_ENGINE: AtomicU64 = AtomicU64::new(0);

/// Notifications published to every interested listener.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
  /// A drain replayed mutations and left the queue empty
  SyncComplete { replayed: usize },
  /// A drain stopped with mutations still queued
  DrainHalted { seq: i64, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayState {
  Idle,
  Draining,
  /// The server rejected `seq`; it and everything behind it stay queued
  Stopped { seq: i64, status: u16 },
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainReport {
  /// Queue is empty
  Completed { replayed: usize },
  /// Halted on a client error for `seq`
  Stopped {
    replayed: usize,
    seq: i64,
    status: u16,
  },
  /// Halted on a transport failure or server error for `seq`; retry later
  Interrupted {
    replayed: usize,
    seq: i64,
    reason: String,
  },
  /// Another drain was in progress; nothing was done
  AlreadyDraining,
}

impl DrainReport {
  pub fn replayed(&self) -> usize {
    match self {
      Self::Completed { replayed }
      | Self::Stopped { replayed, .. }
      | Self::Interrupted { replayed, .. } => *replayed,
      Self::AlreadyDraining => 0,
    }
  }
}

pub struct ReplayEngine<S: LocalStore + ?Sized> {
  store: Arc<S>,
  transport: Arc<dyn Transport>,
  events: broadcast::Sender<SyncEvent>,
  draining: AtomicBool,
  /// Lease holder name, unique per engine and process
  holder: String,
  state: Mutex<ReplayState>,
}

impl<S: LocalStore + ?Sized> ReplayEngine<S> {
  pub fn new(store: Arc<S>, transport: Arc<dyn Transport>) -> Self {
    let (events, _rx) = broadcast::channel(32);
    Self {
      store,
      transport,
      events,
      draining: AtomicBool::new(false),
      holder: format!(
        "pid{}-engine{}",
        std::process::id(),
        NEXT_ENGINE.fetch_add(1, Ordering::Relaxed)
      ),
      state: Mutex::new(ReplayState::Idle),
    }
  }

  /// Listen for sync notifications.
  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events.subscribe()
  }

  pub(crate) fn events(&self) -> broadcast::Sender<SyncEvent> {
    self.events.clone()
  }

  pub fn state(&self) -> ReplayState {
    match self.state.lock() {
      Ok(state) => state.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  fn set_state(&self, next: ReplayState) {
    match self.state.lock() {
      Ok(mut state) => *state = next,
      Err(poisoned) => *poisoned.into_inner() = next,
    }
  }

  /// Run one drain pass.
  ///
  /// Returns `AlreadyDraining` without touching the queue when another pass
  /// is in flight, here or in another process sharing the store. An in-flight
  /// request is always allowed to finish.
  pub async fn drain(&self) -> Result<DrainReport> {
    let Some(_guard) = DrainGuard::acquire(&self.draining) else {
      warn!("drain requested while another drain is running; ignoring");
      return Ok(DrainReport::AlreadyDraining);
    };
    if !self.store.acquire_drain_lease(&self.holder, DRAIN_LEASE_TTL)? {
      info!("another process is draining the queue; ignoring");
      return Ok(DrainReport::AlreadyDraining);
    }

    self.set_state(ReplayState::Draining);
    let result = self.drain_queue().await;

    if let Err(e) = self.store.release_drain_lease(&self.holder) {
      warn!(error = %e, "failed to release drain lease; it will expire");
    }

    let next = match &result {
      Ok(DrainReport::Stopped { seq, status, .. }) => ReplayState::Stopped {
        seq: *seq,
        status: *status,
      },
      _ => ReplayState::Idle,
    };
    self.set_state(next);

    match &result {
      Ok(DrainReport::Stopped { seq, status, .. }) => {
        self.publish(SyncEvent::DrainHalted {
          seq: *seq,
          reason: format!("rejected by server ({})", status),
        });
      }
      Ok(DrainReport::Interrupted { seq, reason, .. }) => {
        self.publish(SyncEvent::DrainHalted {
          seq: *seq,
          reason: reason.clone(),
        });
      }
      _ => {}
    }

    result
  }

  async fn drain_queue(&self) -> Result<DrainReport> {
    let mut replayed = 0;

    // Re-list after each pass so writes queued mid-drain go out too
    loop {
      let pending = self.store.list_queued_mutations()?;
      if pending.is_empty() {
        break;
      }
      info!(pending = pending.len(), "draining mutation queue");

      for mutation in pending {
        if !self.store.acquire_drain_lease(&self.holder, DRAIN_LEASE_TTL)? {
          warn!(seq = mutation.seq, "drain lease taken over; stopping");
          return Ok(DrainReport::Interrupted {
            replayed,
            seq: mutation.seq,
            reason: "drain lease lost".to_string(),
          });
        }
        let request = self.prepare(&mutation)?;

        match self.transport.send(&request).await {
          Ok(response) if response.is_success() => {
            self.record_id_mapping(&mutation, &response)?;
            self.store.remove_mutation(mutation.seq)?;
            replayed += 1;
            debug!(seq = mutation.seq, status = response.status, "replayed mutation");
          }
          Ok(response) if (400..500).contains(&response.status) => {
            warn!(
              seq = mutation.seq,
              status = response.status,
              path = %mutation.resource_path,
              "server rejected queued mutation; stopping drain"
            );
            return Ok(DrainReport::Stopped {
              replayed,
              seq: mutation.seq,
              status: response.status,
            });
          }
          Ok(response) => {
            warn!(seq = mutation.seq, status = response.status, "server error during drain");
            return Ok(DrainReport::Interrupted {
              replayed,
              seq: mutation.seq,
              reason: format!("server error ({})", response.status),
            });
          }
          Err(err) => {
            warn!(seq = mutation.seq, error = %err, "network failure during drain");
            return Ok(DrainReport::Interrupted {
              replayed,
              seq: mutation.seq,
              reason: err.to_string(),
            });
          }
        }
      }
    }

    // Nothing queued can refer to a temporary id any more
    let dropped = self.store.remove_prefixed(ID_MAP_PREFIX)?;
    if dropped > 0 {
      debug!(dropped, "dropped temporary id mappings");
    }

    if replayed > 0 {
      info!(replayed, "mutation queue drained");
      self.publish(SyncEvent::SyncComplete { replayed });
    }
    Ok(DrainReport::Completed { replayed })
  }

  fn publish(&self, event: SyncEvent) {
    // No receivers is fine
    let _ = self.events.send(event);
  }

  /// Rebuild the original request, resolving temporary ids that have since
  /// been confirmed by the server.
  fn prepare(&self, mutation: &QueuedMutation) -> Result<ApiRequest> {
    let path = mutation
      .resource_path
      .split('/')
      .map(|segment| -> Result<String> {
        match self.resolve(segment)? {
          Some(Value::String(id)) => Ok(id),
          Some(other) => Ok(other.to_string()),
          None => Ok(segment.to_string()),
        }
      })
      .collect::<Result<Vec<_>>>()?
      .join("/");

    let mut request = ApiRequest::new(mutation.method, path).with_headers(mutation.headers.clone());
    if let Some(payload) = &mutation.payload {
      let mut body = payload.clone();
      self.resolve_value(&mut body)?;
      request = request.with_body(body);
    }
    Ok(request)
  }

  fn resolve_value(&self, value: &mut Value) -> Result<()> {
    match value {
      Value::String(s) => {
        if let Some(resolved) = self.resolve(s)? {
          *value = resolved;
        }
      }
      Value::Array(items) => {
        for item in items {
          self.resolve_value(item)?;
        }
      }
      Value::Object(fields) => {
        for field in fields.values_mut() {
          self.resolve_value(field)?;
        }
      }
      _ => {}
    }
    Ok(())
  }

  /// Server id recorded for a temporary id, if `token` is one.
  fn resolve(&self, token: &str) -> Result<Option<Value>> {
    let EntityId::Local(seq) = EntityId::from(token) else {
      return Ok(None);
    };
    Ok(
      self
        .store
        .get(&id_map_key(seq))?
        .map(|entry| entry.value),
    )
  }

  fn record_id_mapping(&self, mutation: &QueuedMutation, response: &ApiResponse) -> Result<()> {
    if mutation.method != Method::Post {
      return Ok(());
    }
    // Non-JSON bodies carry no id to map
    let Ok(body) = response.json() else {
      return Ok(());
    };
    if let Some(id) = body.get("id") {
      debug!(local = %EntityId::Local(mutation.seq), remote = %id, "temporary id confirmed");
      self.store.put(&id_map_key(mutation.seq), id)?;
    }
    Ok(())
  }
}

fn id_map_key(seq: i64) -> String {
  format!("{}{}", ID_MAP_PREFIX, EntityId::Local(seq))
}

/// Holds the single-drain flag for the lifetime of a pass.
struct DrainGuard<'a> {
  flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self { flag })
  }
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.flag.store(false, Ordering::Release);
  }
}
