//! Offline write path, background replay and region sync.

mod connectivity;
mod queue;
mod region;
mod replay;
mod worker;

pub use connectivity::Connectivity;
pub use queue::{OfflineWriter, WriteKind, WriteOutcome};
pub use region::{merge_region, sync_region};
pub use replay::{DrainReport, ReplayEngine, ReplayState, SyncEvent};
pub use worker::{ReplayCommand, ReplayHandle, ReplayWorker};
