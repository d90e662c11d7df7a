//! Cache keys for fleet read endpoints.

use crate::cache::QueryKey;

use super::types::EntityId;

/// Prefix for per-machine detail entries.
pub const MACHINE_DETAILS_PREFIX: &str = "machineDetails:";

/// Prefix for temporary-id mappings recorded during replay.
pub const ID_MAP_PREFIX: &str = "idMap:";

/// One cached read resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FleetQueryKey {
  /// The full aggregate dataset
  AllData,
  /// A single machine with its maintenance history
  MachineDetails { id: EntityId },
  Parts,
  Users,
}

impl QueryKey for FleetQueryKey {
  fn cache_key(&self) -> String {
    match self {
      Self::AllData => "allData".to_string(),
      Self::MachineDetails { id } => format!("{}{}", MACHINE_DETAILS_PREFIX, id),
      Self::Parts => "parts".to_string(),
      Self::Users => "users".to_string(),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::AllData => "all data".to_string(),
      Self::MachineDetails { id } => format!("machine {} details", id),
      Self::Parts => "parts".to_string(),
      Self::Users => "users".to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn machine_keys_do_not_collide() {
    let a = FleetQueryKey::MachineDetails {
      id: EntityId::from(1),
    };
    let b = FleetQueryKey::MachineDetails {
      id: EntityId::from(11),
    };
    assert_eq!(a.cache_key(), "machineDetails:1");
    assert_ne!(a.cache_key(), b.cache_key());
    assert_ne!(
      FleetQueryKey::AllData.cache_key(),
      FleetQueryKey::Parts.cache_key()
    );
  }
}
