use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::api::transport::{ApiRequest, Method, Transport};
use crate::api::types::{
  AggregateDataset, EntityId, MachineDetails, Part, RegionSyncPayload, User,
};
use crate::error::{Result, SyncError};

/// Raw (uncached) client for the fleet backend.
#[derive(Clone)]
pub struct ApiClient {
  transport: Arc<dyn Transport>,
  api_prefix: String,
  token: Option<String>,
}

impl ApiClient {
  pub fn new(transport: Arc<dyn Transport>, api_prefix: &str, token: Option<String>) -> Self {
    Self {
      transport,
      api_prefix: api_prefix.trim_end_matches('/').to_string(),
      token,
    }
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  /// Full resource path for an endpoint, e.g. `/parts` -> `/api/parts`.
  pub fn path(&self, endpoint: &str) -> String {
    format!("{}{}", self.api_prefix, endpoint)
  }

  /// Headers sent with every request, bearer token included.
  pub fn headers(&self) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    if let Some(token) = &self.token {
      headers.insert("Authorization".to_string(), format!("Bearer {}", token));
    }
    headers
  }

  pub fn request(&self, method: Method, endpoint: &str) -> ApiRequest {
    ApiRequest::new(method, self.path(endpoint)).with_headers(self.headers())
  }

  /// Send a request and decode a successful JSON body.
  pub async fn execute<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
    debug!(method = %request.method, path = %request.path, "sending request");
    let response = self.transport.send(request).await?.error_for_status()?;
    Ok(serde_json::from_value(response.json()?)?)
  }

  /// Check reachability. Any HTTP response, even a 401, means online.
  pub async fn check_connectivity(&self) -> Result<bool> {
    match self.transport.send(&self.request(Method::Get, "/auth/me")).await {
      Ok(_) => Ok(true),
      Err(SyncError::Network(_)) => Ok(false),
      Err(e) => Err(e),
    }
  }

  /// Get the full dataset visible to the caller
  pub async fn get_all_data(&self) -> Result<AggregateDataset> {
    self.execute(&self.request(Method::Get, "/data")).await
  }

  /// Get one machine with its maintenance history
  pub async fn get_machine_details(&self, id: &EntityId) -> Result<MachineDetails> {
    let endpoint = format!("/machines/{}/details", id);
    self.execute(&self.request(Method::Get, &endpoint)).await
  }

  pub async fn get_parts(&self) -> Result<Vec<Part>> {
    self.execute(&self.request(Method::Get, "/parts")).await
  }

  pub async fn get_users(&self) -> Result<Vec<User>> {
    self.execute(&self.request(Method::Get, "/users")).await
  }

  /// Get the region-scoped incremental payload
  pub async fn get_region_sync(&self, region_id: &EntityId) -> Result<RegionSyncPayload> {
    let endpoint = format!("/regions/{}/sync", region_id);
    self.execute(&self.request(Method::Get, &endpoint)).await
  }
}
