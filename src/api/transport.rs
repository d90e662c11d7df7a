//! HTTP transport seam between the sync core and the backend.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Self::Get),
      "POST" => Ok(Self::Post),
      "PUT" => Ok(Self::Put),
      "DELETE" => Ok(Self::Delete),
      other => Err(SyncError::Protocol(format!("unsupported method '{}'", other))),
    }
  }
}

/// A request addressed by path relative to the server root (e.g. `/api/parts`).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
  pub headers: BTreeMap<String, String>,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      body: None,
      headers: BTreeMap::new(),
    }
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
    self.headers = headers;
    self
  }
}

/// Any HTTP response, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl ApiResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Body as JSON; an empty body reads as `null`.
  pub fn json(&self) -> Result<Value> {
    if self.body.iter().all(u8::is_ascii_whitespace) {
      return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&self.body)?)
  }

  /// Turn a non-2xx response into the matching error.
  pub fn error_for_status(self) -> Result<Self> {
    if self.is_success() {
      Ok(self)
    } else {
      let body = String::from_utf8_lossy(&self.body).into_owned();
      Err(SyncError::from_status(self.status, body))
    }
  }
}

/// Sends requests to the backend.
///
/// `Err` means no HTTP response was obtained at all (`SyncError::Network`);
/// every status code, including 4xx/5xx, comes back as `Ok(ApiResponse)`.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  http: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  /// `base_url` may carry a path (`https://host/fleet`); request paths are
  /// resolved below it. `timeout` is the transport's own timeout; `None` keeps
  /// reqwest's default.
  pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
    let mut base_url = Url::parse(base_url)
      .map_err(|e| SyncError::Protocol(format!("invalid server URL '{}': {}", base_url, e)))?;
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let http = builder
      .build()
      .map_err(|e| SyncError::Protocol(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { http, base_url })
  }

  fn url(&self, path: &str) -> Result<Url> {
    // Relative join keeps the base path
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| SyncError::Protocol(format!("invalid path '{}': {}", path, e)))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
    let url = self.url(&request.path)?;
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut req = self.http.request(method, url);
    for (name, value) in &request.headers {
      req = req.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      req = req.json(body);
    }

    let response = req
      .send()
      .await
      .map_err(|e| SyncError::Network(e.to_string()))?;
    let status = response.status().as_u16();
    let body = response
      .bytes()
      .await
      .map_err(|e| SyncError::Network(e.to_string()))?;

    Ok(ApiResponse {
      status,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn request_paths_resolve_below_the_base_path() {
    let transport = HttpTransport::new("https://fleet.example.com/cmm", None).unwrap();
    assert_eq!(
      transport.url("/api/data").unwrap().as_str(),
      "https://fleet.example.com/cmm/api/data"
    );

    let root = HttpTransport::new("https://fleet.example.com", None).unwrap();
    assert_eq!(
      root.url("/api/parts").unwrap().as_str(),
      "https://fleet.example.com/api/parts"
    );
  }
}
