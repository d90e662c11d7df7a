//! Partial region sync: refresh one region and merge it into the cached dataset.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::api::{AggregateDataset, ApiClient, EntityId, FleetQueryKey, RegionSyncPayload};
use crate::cache::{CacheLayer, LocalStore};
use crate::error::Result;

/// Machine detail prefetches in flight at once.
const DETAIL_PREFETCH_CONCURRENCY: usize = 4;

/// Refresh one region from the network and merge it into the cached dataset.
///
/// Machine details for every machine in the region are cached on the way so
/// they can be browsed offline; a failed detail fetch is logged and skipped.
/// Without a cached dataset to merge into, this falls back to a full fetch.
pub async fn sync_region<S: LocalStore + ?Sized>(
  api: &ApiClient,
  cache: &CacheLayer<S>,
  region_id: &EntityId,
) -> Result<AggregateDataset> {
  let fresh = api.get_region_sync(region_id).await?;

  stream::iter(fresh.machines.iter().map(|m| m.id.clone()))
    .for_each_concurrent(DETAIL_PREFETCH_CONCURRENCY, |machine_id| async move {
      let key = FleetQueryKey::MachineDetails {
        id: machine_id.clone(),
      };
      if let Err(e) = cache
        .fetch(&key, || api.get_machine_details(&machine_id))
        .await
      {
        warn!(machine = %machine_id, error = %e, "could not cache machine details; skipping");
      }
    })
    .await;

  let Some(previous) = cache.cached::<_, AggregateDataset>(&FleetQueryKey::AllData)? else {
    info!(region = %region_id, "no cached dataset to merge into; fetching everything");
    let full = cache
      .fetch(&FleetQueryKey::AllData, || api.get_all_data())
      .await?;
    return Ok(full.data);
  };

  let machines_before = previous.machines.len();
  let merged = merge_region(previous, region_id, fresh);
  cache.store(&FleetQueryKey::AllData, &merged)?;

  info!(
    region = %region_id,
    machines_before,
    machines_after = merged.machines.len(),
    records = merged.maintenance_records.len(),
    "region merged into cached dataset"
  );
  Ok(merged)
}

/// Replace `region_id`'s slice of `previous` with `fresh`.
///
/// Points and machines of other regions are kept as they are. Maintenance
/// records are dropped when their machine belonged to the region in the
/// previous snapshot, since records carry no region of their own. Everything in
/// `fresh` is appended, so entities deleted on the server disappear.
pub fn merge_region(
  previous: AggregateDataset,
  region_id: &EntityId,
  fresh: RegionSyncPayload,
) -> AggregateDataset {
  let stale_machines: HashSet<EntityId> = previous
    .machines
    .iter()
    .filter(|m| &m.region_id == region_id)
    .map(|m| m.id.clone())
    .collect();

  let AggregateDataset {
    regions,
    points,
    machines,
    users,
    maintenance_records,
    parts,
  } = previous;

  let mut points: Vec<_> = points
    .into_iter()
    .filter(|p| &p.region_id != region_id)
    .collect();
  let mut machines: Vec<_> = machines
    .into_iter()
    .filter(|m| &m.region_id != region_id)
    .collect();
  let mut maintenance_records: Vec<_> = maintenance_records
    .into_iter()
    .filter(|r| !stale_machines.contains(&r.machine_id))
    .collect();

  points.extend(fresh.points);
  machines.extend(fresh.machines);
  maintenance_records.extend(fresh.maintenance_records);

  AggregateDataset {
    regions,
    points,
    machines,
    users,
    maintenance_records,
    parts,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn dataset() -> AggregateDataset {
    serde_json::from_value(json!({
      "regions": [{ "id": 1, "name": "A" }, { "id": 2, "name": "B" }],
      "points": [
        { "id": 10, "name": "A-hall", "regionId": 1 },
        { "id": 20, "name": "B-hall", "regionId": 2 }
      ],
      "machines": [
        { "id": 100, "serialNumber": "A1", "regionId": 1, "pointId": 10 },
        { "id": 101, "serialNumber": "A2", "regionId": 1, "pointId": 10 },
        { "id": 200, "serialNumber": "B1", "regionId": 2, "pointId": 20 }
      ],
      "users": [{ "id": 5, "username": "tech", "role": "technician", "regionId": 1 }],
      "maintenanceRecords": [
        { "id": 1000, "machineId": 100 },
        { "id": 1001, "machineId": 101 },
        { "id": 2000, "machineId": 200 }
      ],
      "parts": [{ "id": 7, "sku": "X1", "name": "Filter" }]
    }))
    .unwrap()
  }

  #[test]
  fn other_regions_are_untouched() {
    let before = dataset();
    let fresh: RegionSyncPayload = serde_json::from_value(json!({
      "points": [{ "id": 10, "name": "A-hall renamed", "regionId": 1 }],
      "machines": [{ "id": 100, "serialNumber": "A1", "regionId": 1, "pointId": 10 }],
      "maintenanceRecords": [{ "id": 1002, "machineId": 100 }]
    }))
    .unwrap();

    let merged = merge_region(before.clone(), &EntityId::from(1), fresh);

    let region_b = EntityId::from(2);
    let b_before: Vec<_> = before.machines.iter().filter(|m| m.region_id == region_b).collect();
    let b_after: Vec<_> = merged.machines.iter().filter(|m| m.region_id == region_b).collect();
    assert_eq!(b_before, b_after);
    assert!(merged.maintenance_records.iter().any(|r| r.id == EntityId::from(2000)));
    assert_eq!(merged.point(&EntityId::from(20)), before.point(&EntityId::from(20)));
    assert_eq!(merged.regions, before.regions);
    assert_eq!(merged.users, before.users);
    assert_eq!(merged.parts, before.parts);
  }

  #[test]
  fn deleted_machines_and_their_records_disappear() {
    let fresh: RegionSyncPayload = serde_json::from_value(json!({
      "points": [{ "id": 10, "name": "A-hall", "regionId": 1 }],
      "machines": [{ "id": 100, "serialNumber": "A1", "regionId": 1, "pointId": 10 }],
      "maintenanceRecords": [{ "id": 1000, "machineId": 100 }]
    }))
    .unwrap();

    let merged = merge_region(dataset(), &EntityId::from(1), fresh);

    assert!(merged.machine(&EntityId::from(101)).is_none());
    assert!(!merged
      .maintenance_records
      .iter()
      .any(|r| r.machine_id == EntityId::from(101)));
    let ids: Vec<_> = merged
      .maintenance_records
      .iter()
      .map(|r| r.id.to_string())
      .collect();
    assert_eq!(ids, vec!["2000", "1000"]);
  }

  #[test]
  fn empty_fresh_payload_clears_region() {
    let merged = merge_region(dataset(), &EntityId::from(1), RegionSyncPayload::default());
    assert!(merged.machines.iter().all(|m| m.region_id == EntityId::from(2)));
    assert_eq!(merged.points.len(), 1);
    assert_eq!(merged.maintenance_records.len(), 1);
  }
}
