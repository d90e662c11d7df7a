use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared online/offline flag.
///
/// Clones observe the same state. Subscribers are woken on every transition,
/// which is how the replay worker learns that connectivity came back.
#[derive(Clone, Debug)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the current state; subscribers are only notified on a change.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      info!(online, "connectivity changed");
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}
