use fleetsync::api::{ApiClient, ApiRequest, EntityId, HttpTransport, Method, Transport};
use fleetsync::SyncError;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

fn can_bind_localhost() -> bool {
  TcpListener::bind("127.0.0.1:0").is_ok()
}

#[tokio::test]
async fn client_reads_through_http() {
  if !can_bind_localhost() {
    eprintln!("Skipping httpmock tests: cannot bind to localhost");
    return;
  }

  let server = MockServer::start();
  let details = server.mock(|when, then| {
    when
      .method(GET)
      .path("/api/machines/100/details")
      .header("Authorization", "Bearer secret");
    then.status(200).json_body(json!({
      "id": 100,
      "serialNumber": "N-100",
      "regionId": 1,
      "maintenanceRecords": [{ "id": 1000, "machineId": 100 }]
    }));
  });

  let transport = Arc::new(HttpTransport::new(&server.base_url(), Some(Duration::from_secs(5))).unwrap());
  let api = ApiClient::new(transport, "/api", Some("secret".to_string()));

  let machine = api.get_machine_details(&EntityId::from(100)).await.unwrap();

  details.assert();
  assert_eq!(machine.machine.serial_number, "N-100");
  assert_eq!(machine.maintenance_records.len(), 1);
}

#[tokio::test]
async fn error_statuses_come_back_as_responses() {
  if !can_bind_localhost() {
    eprintln!("Skipping httpmock tests: cannot bind to localhost");
    return;
  }

  let server = MockServer::start();
  let create = server.mock(|when, then| {
    when
      .method(POST)
      .path("/api/parts")
      .json_body(json!({ "sku": "X1" }));
    then.status(422).json_body(json!({ "error": "sku taken" }));
  });

  let transport = HttpTransport::new(&server.base_url(), None).unwrap();
  let request = ApiRequest::new(Method::Post, "/api/parts").with_body(json!({ "sku": "X1" }));

  let response = transport.send(&request).await.unwrap();

  create.assert();
  assert_eq!(response.status, 422);
  assert_eq!(response.json().unwrap(), json!({ "error": "sku taken" }));
  assert!(matches!(
    response.error_for_status(),
    Err(SyncError::Client { status: 422, .. })
  ));
}

#[tokio::test]
async fn base_url_path_is_kept() {
  if !can_bind_localhost() {
    eprintln!("Skipping httpmock tests: cannot bind to localhost");
    return;
  }

  let server = MockServer::start();
  let parts = server.mock(|when, then| {
    when.method(GET).path("/cmm/api/parts");
    then.status(200).json_body(json!([{ "id": 7, "sku": "X1", "name": "Filter" }]));
  });

  let transport = Arc::new(HttpTransport::new(&server.url("/cmm"), None).unwrap());
  let api = ApiClient::new(transport, "/api", None);

  let fetched = api.get_parts().await.unwrap();

  parts.assert();
  assert_eq!(fetched.len(), 1);
}

#[tokio::test]
async fn connectivity_check_treats_any_status_as_online() {
  if !can_bind_localhost() {
    eprintln!("Skipping httpmock tests: cannot bind to localhost");
    return;
  }

  let server = MockServer::start();
  server.mock(|when, then| {
    when.method(GET).path("/api/auth/me");
    then.status(401);
  });

  let transport = Arc::new(HttpTransport::new(&server.base_url(), None).unwrap());
  let api = ApiClient::new(transport, "/api", None);

  assert!(api.check_connectivity().await.unwrap());
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
  let port = match TcpListener::bind("127.0.0.1:0") {
    Ok(listener) => listener.local_addr().unwrap().port(),
    Err(_) => return,
  };
  // Listener is dropped here, so nothing accepts on `port`
  let transport = Arc::new(
    HttpTransport::new(&format!("http://127.0.0.1:{}", port), Some(Duration::from_secs(2))).unwrap(),
  );
  let api = ApiClient::new(transport.clone(), "/api", None);

  let err = transport
    .send(&ApiRequest::new(Method::Get, "/api/data"))
    .await
    .unwrap_err();
  assert!(matches!(err, SyncError::Network(_)));
  assert!(!api.check_connectivity().await.unwrap());
}

#[test]
fn invalid_base_url_is_rejected() {
  assert!(matches!(
    HttpTransport::new("not a url", None),
    Err(SyncError::Protocol(_))
  ));
}
