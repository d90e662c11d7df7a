use async_trait::async_trait;
use fleetsync::api::{AggregateDataset, ApiClient, ApiRequest, ApiResponse, Transport};
use fleetsync::cache::{LocalStore, SqliteStore};
use fleetsync::sync::Connectivity;
use fleetsync::{FleetClient, Result, SyncError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse> + Send + Sync>;

/// Transport that records every request and answers from a swappable handler.
pub struct MockTransport {
  handler: Mutex<Handler>,
  requests: Mutex<Vec<ApiRequest>>,
}

#[allow(dead_code)]
impl MockTransport {
  pub fn new(handler: impl Fn(&ApiRequest) -> Result<ApiResponse> + Send + Sync + 'static) -> Arc<Self> {
    Arc::new(Self {
      handler: Mutex::new(Box::new(handler)),
      requests: Mutex::new(Vec::new()),
    })
  }

  /// Answers every request with 201 and an echo of the body plus a server id.
  pub fn accept_all() -> Arc<Self> {
    Self::new(|req| {
      let mut body = req.body.clone().unwrap_or_else(|| json!({}));
      if let Value::Object(fields) = &mut body {
        fields.entry("id").or_insert(json!(9000));
      }
      Ok(json_response(201, body))
    })
  }

  /// Fails every request as if the network were down.
  pub fn unreachable() -> Arc<Self> {
    Self::new(|_| Err(SyncError::Network("connection refused".into())))
  }

  pub fn set_handler(
    &self,
    handler: impl Fn(&ApiRequest) -> Result<ApiResponse> + Send + Sync + 'static,
  ) {
    *self.handler.lock().unwrap() = Box::new(handler);
  }

  pub fn requests(&self) -> Vec<ApiRequest> {
    self.requests.lock().unwrap().clone()
  }

  /// "METHOD path" for every request sent so far.
  pub fn request_lines(&self) -> Vec<String> {
    self
      .requests()
      .iter()
      .map(|r| format!("{} {}", r.method, r.path))
      .collect()
  }

  pub fn clear_requests(&self) {
    self.requests.lock().unwrap().clear();
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
    self.requests.lock().unwrap().push(request.clone());
    let handler = self.handler.lock().unwrap();
    (*handler)(request)
  }
}

pub fn json_response(status: u16, body: Value) -> ApiResponse {
  ApiResponse {
    status,
    body: serde_json::to_vec(&body).unwrap(),
  }
}

fn client(transport: Arc<MockTransport>, online: bool) -> (FleetClient, Arc<SqliteStore>) {
  let store = Arc::new(SqliteStore::open_in_memory().unwrap());
  let api = ApiClient::new(transport, "/api", Some("token-1".to_string()));
  let shared: Arc<dyn LocalStore> = store.clone();
  let client = FleetClient::new(api, shared, Connectivity::new(online));
  (client, store)
}

#[allow(dead_code)]
pub fn online_client(transport: Arc<MockTransport>) -> (FleetClient, Arc<SqliteStore>) {
  client(transport, true)
}

#[allow(dead_code)]
pub fn offline_client(transport: Arc<MockTransport>) -> (FleetClient, Arc<SqliteStore>) {
  client(transport, false)
}

/// Two regions, A (id 1) and B (id 2), with points, machines and records.
#[allow(dead_code)]
pub fn fixture_dataset() -> AggregateDataset {
  serde_json::from_value(json!({
    "regions": [{ "id": 1, "name": "North" }, { "id": 2, "name": "South" }],
    "points": [
      { "id": 10, "name": "Station hall", "regionId": 1 },
      { "id": 20, "name": "Harbour cafe", "regionId": 2 }
    ],
    "machines": [
      { "id": 100, "serialNumber": "N-100", "regionId": 1, "pointId": 10 },
      { "id": 101, "serialNumber": "N-101", "regionId": 1, "pointId": 10 },
      { "id": 200, "serialNumber": "S-200", "regionId": 2, "pointId": 20 }
    ],
    "users": [{ "id": 5, "username": "tech", "role": "technician", "regionId": 1 }],
    "maintenanceRecords": [
      { "id": 1000, "machineId": 100, "description": "descaled" },
      { "id": 1001, "machineId": 101, "description": "grinder swap" },
      { "id": 2000, "machineId": 200, "description": "gasket" }
    ],
    "parts": [{ "id": 7, "sku": "X1", "name": "Filter" }]
  }))
  .unwrap()
}
