//! Background replay service.
//!
//! The worker owns a `ReplayEngine` and runs on its own task, independent of
//! whoever queued the writes. It drains when asked through its inbox, when
//! connectivity comes back, and optionally on a fixed interval.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::connectivity::Connectivity;
use super::replay::{DrainReport, ReplayEngine, SyncEvent};
use crate::cache::LocalStore;

/// Messages accepted by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCommand {
  Drain,
  Shutdown,
}

/// Cloneable handle to a running worker.
#[derive(Clone)]
pub struct ReplayHandle {
  tx: mpsc::UnboundedSender<ReplayCommand>,
  events: broadcast::Sender<SyncEvent>,
}

impl ReplayHandle {
  /// Ask for a drain. Returns false if the worker has stopped.
  pub fn request_drain(&self) -> bool {
    self.tx.send(ReplayCommand::Drain).is_ok()
  }

  /// Listen for `SyncComplete` / `DrainHalted`.
  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events.subscribe()
  }

  pub fn shutdown(&self) {
    let _ = self.tx.send(ReplayCommand::Shutdown);
  }
}

pub struct ReplayWorker<S: LocalStore + ?Sized> {
  engine: Arc<ReplayEngine<S>>,
  connectivity: Connectivity,
  retry_interval: Option<Duration>,
}

impl<S: LocalStore + ?Sized + 'static> ReplayWorker<S> {
  pub fn new(engine: Arc<ReplayEngine<S>>, connectivity: Connectivity) -> Self {
    Self {
      engine,
      connectivity,
      retry_interval: None,
    }
  }

  /// Also drain every `interval`. The first tick fires immediately.
  pub fn with_retry_interval(mut self, interval: Option<Duration>) -> Self {
    self.retry_interval = interval.filter(|d| !d.is_zero());
    self
  }

  /// Start the worker on the current tokio runtime.
  pub fn spawn(self) -> (ReplayHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    // Subscribe before spawning so a reconnect right after this call is seen
    let online_rx = self.connectivity.subscribe();
    let handle = ReplayHandle {
      tx,
      events: self.engine.events(),
    };
    let task = tokio::spawn(self.run(rx, online_rx));
    (handle, task)
  }

  async fn run(
    self,
    mut rx: mpsc::UnboundedReceiver<ReplayCommand>,
    mut online_rx: watch::Receiver<bool>,
  ) {
    let mut watching = true;
    let mut ticker = self.retry_interval.map(|period| {
      let mut interval = tokio::time::interval(period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
      interval
    });

    info!("replay worker started");
    loop {
      tokio::select! {
        command = rx.recv() => match command {
          Some(ReplayCommand::Drain) => debug!("drain requested"),
          Some(ReplayCommand::Shutdown) | None => break,
        },
        changed = online_rx.changed(), if watching => match changed {
          Ok(()) => {
            if !*online_rx.borrow_and_update() {
              continue;
            }
            debug!("back online, draining");
          }
          Err(_) => {
            watching = false;
            continue;
          }
        },
        _ = next_tick(&mut ticker) => debug!("periodic drain"),
      }

      // Coalesce triggers that piled up; one drain covers them all
      let mut shutdown = false;
      while let Ok(command) = rx.try_recv() {
        if command == ReplayCommand::Shutdown {
          shutdown = true;
        }
      }
      if shutdown {
        break;
      }

      if !self.connectivity.is_online() {
        debug!("offline, skipping drain");
        continue;
      }

      match self.engine.drain().await {
        Ok(DrainReport::Completed { replayed }) if replayed > 0 => {
          info!(replayed, "background sync complete")
        }
        Ok(report) => debug!(?report, "drain finished"),
        Err(e) => error!(error = %e, "drain failed"),
      }
    }
    info!("replay worker stopped");
  }
}

async fn next_tick(ticker: &mut Option<Interval>) {
  match ticker {
    Some(interval) => {
      interval.tick().await;
    }
    None => pending::<()>().await,
  }
}
