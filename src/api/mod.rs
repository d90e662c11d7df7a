//! Client side of the fleet REST backend.

mod cache;
mod cached_client;
mod client;
mod transport;
mod types;

pub use cache::{FleetQueryKey, ID_MAP_PREFIX, MACHINE_DETAILS_PREFIX};
pub use cached_client::FleetClient;
pub use client::ApiClient;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
pub use types::{
  AggregateDataset, EntityId, EntityType, Machine, MachineDetails, MaintenanceRecord, Part, Point,
  Region, RegionSyncPayload, Role, User, LOCAL_ID_PREFIX,
};
