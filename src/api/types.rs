//! Fleet domain types as served by the backend.
//!
//! Unknown fields are kept in `extra` so that a cached value serializes back to
//! what the server sent.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Prefix that marks identifiers minted locally for offline creates.
pub const LOCAL_ID_PREFIX: &str = "offline_";

/// Identifier of a fleet entity.
///
/// `Local` ids belong to entities created offline and not yet confirmed by the
/// server; they render as `offline_<seq>` where `seq` is the queue sequence id
/// of the create. Everything else is `Remote`.
///
/// A remote id remembers whether the server sent it as a JSON number so it
/// serializes back the same way. Equality ignores that: `42` and `"42"` name
/// the same entity.
#[derive(Debug, Clone)]
pub enum EntityId {
  Local(i64),
  Remote { id: String, numeric: bool },
}

impl EntityId {
  pub fn is_local(&self) -> bool {
    matches!(self, Self::Local(_))
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Local(seq) => write!(f, "{}{}", LOCAL_ID_PREFIX, seq),
      Self::Remote { id, .. } => f.write_str(id),
    }
  }
}

impl FromStr for EntityId {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let local = s
      .strip_prefix(LOCAL_ID_PREFIX)
      .and_then(|seq| seq.parse::<i64>().ok());
    Ok(match local {
      Some(seq) => Self::Local(seq),
      None => Self::Remote {
        id: s.to_string(),
        numeric: false,
      },
    })
  }
}

impl From<i64> for EntityId {
  fn from(id: i64) -> Self {
    Self::Remote {
      id: id.to_string(),
      numeric: true,
    }
  }
}

impl From<&str> for EntityId {
  fn from(id: &str) -> Self {
    match id.parse() {
      Ok(parsed) => parsed,
      Err(never) => match never {},
    }
  }
}

impl PartialEq for EntityId {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for EntityId {}

impl Hash for EntityId {
  fn hash<H: Hasher>(&self, state: &mut H) {
    match self {
      Self::Local(seq) => {
        0u8.hash(state);
        seq.hash(state);
      }
      Self::Remote { id, .. } => {
        1u8.hash(state);
        id.hash(state);
      }
    }
  }
}

impl PartialOrd for EntityId {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for EntityId {
  fn cmp(&self, other: &Self) -> Ordering {
    match (self, other) {
      (Self::Local(a), Self::Local(b)) => a.cmp(b),
      (Self::Local(_), Self::Remote { .. }) => Ordering::Less,
      (Self::Remote { .. }, Self::Local(_)) => Ordering::Greater,
      (Self::Remote { id: a, .. }, Self::Remote { id: b, .. }) => a.cmp(b),
    }
  }
}

impl Serialize for EntityId {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Self::Remote { id, numeric: true } => match id.parse::<i64>() {
        Ok(n) => serializer.serialize_i64(n),
        Err(_) => serializer.serialize_str(id),
      },
      Self::Remote { id, numeric: false } => serializer.serialize_str(id),
      Self::Local(_) => serializer.collect_str(self),
    }
  }
}

impl<'de> Deserialize<'de> for EntityId {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
      Int(i64),
      Str(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
      RawId::Int(n) => Self::from(n),
      RawId::Str(s) => Self::from(s.as_str()),
    })
  }
}

/// Entity collections exposed through the generic CRUD endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
  Regions,
  Users,
  Points,
  Machines,
  Parts,
}

impl EntityType {
  pub const ALL: [EntityType; 5] = [
    Self::Regions,
    Self::Users,
    Self::Points,
    Self::Machines,
    Self::Parts,
  ];

  /// Path segment under the API prefix.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Regions => "regions",
      Self::Users => "users",
      Self::Points => "points",
      Self::Machines => "machines",
      Self::Parts => "parts",
    }
  }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EntityType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|t| t.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| format!("unknown entity type '{}'", s))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
  pub id: EntityId,
  #[serde(default)]
  pub name: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Point of service inside a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
  pub id: EntityId,
  #[serde(default)]
  pub name: String,
  pub region_id: EntityId,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
  pub id: EntityId,
  #[serde(default)]
  pub serial_number: String,
  pub region_id: EntityId,
  #[serde(default)]
  pub point_id: Option<EntityId>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: EntityId,
  #[serde(default)]
  pub username: String,
  #[serde(default)]
  pub role: Role,
  #[serde(default)]
  pub region_id: Option<EntityId>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Admin,
  #[default]
  Technician,
}

/// One maintenance visit on a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceRecord {
  pub id: EntityId,
  pub machine_id: EntityId,
  #[serde(default)]
  pub user_id: Option<EntityId>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
  pub id: EntityId,
  #[serde(default)]
  pub sku: String,
  #[serde(default)]
  pub name: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// The full normalized read model ("AllData").
///
/// Foreign keys may point at entities outside the cached slice; lookups return
/// `None` rather than failing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateDataset {
  #[serde(default)]
  pub regions: Vec<Region>,
  #[serde(default)]
  pub points: Vec<Point>,
  #[serde(default)]
  pub machines: Vec<Machine>,
  #[serde(default)]
  pub users: Vec<User>,
  #[serde(default)]
  pub maintenance_records: Vec<MaintenanceRecord>,
  #[serde(default)]
  pub parts: Vec<Part>,
}

impl AggregateDataset {
  pub fn region(&self, id: &EntityId) -> Option<&Region> {
    self.regions.iter().find(|r| &r.id == id)
  }

  pub fn point(&self, id: &EntityId) -> Option<&Point> {
    self.points.iter().find(|p| &p.id == id)
  }

  pub fn machine(&self, id: &EntityId) -> Option<&Machine> {
    self.machines.iter().find(|m| &m.id == id)
  }

  /// Region name for display, with a placeholder for regions outside the slice.
  pub fn region_label(&self, id: &EntityId) -> String {
    self
      .region(id)
      .map(|r| r.name.clone())
      .unwrap_or_else(|| format!("region {} (not loaded)", id))
  }

  /// Point name for display, with a placeholder for points outside the slice.
  pub fn point_label(&self, id: &EntityId) -> String {
    self
      .point(id)
      .map(|p| p.name.clone())
      .unwrap_or_else(|| format!("point {} (not loaded)", id))
  }
}

/// One machine plus its maintenance history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDetails {
  #[serde(flatten)]
  pub machine: Machine,
  #[serde(default)]
  pub maintenance_records: Vec<MaintenanceRecord>,
}

/// Region-scoped incremental payload from `GET /regions/{id}/sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSyncPayload {
  #[serde(default)]
  pub points: Vec<Point>,
  #[serde(default)]
  pub machines: Vec<Machine>,
  #[serde(default)]
  pub maintenance_records: Vec<MaintenanceRecord>,
}
