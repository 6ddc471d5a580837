//! `reqwest`-backed transport for the Linode API.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::{HttpResponse, Method, TokenSupplier, Transport, TransportError};

/// HTTP transport that joins request paths onto an API base URL.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  tokens: Arc<dyn TokenSupplier>,
}

impl HttpTransport {
  pub fn new(
    base_url: Url,
    timeout: Duration,
    tokens: Arc<dyn TokenSupplier>,
  ) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("linode-manager/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| TransportError::Network(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      tokens,
    })
  }

  /// Resolve an API path such as `/linodes?page=2` against the base URL.
  ///
  /// The base URL's own path (`/v4`) is kept, unlike `Url::join` with an
  /// absolute path.
  pub fn url_for(&self, path: &str) -> Result<Url, TransportError> {
    let joined = format!(
      "{}/{}",
      self.base_url.as_str().trim_end_matches('/'),
      path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| TransportError::Network(format!("Invalid URL {}: {}", joined, e)))
  }

  async fn send(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
  ) -> Result<HttpResponse, TransportError> {
    let url = self.url_for(path)?;
    let method = match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut request = self
      .client
      .request(method, url)
      .header(reqwest::header::ACCEPT, "application/json");
    if let Some(token) = self.tokens.token() {
      request = request.bearer_auth(token);
    }
    if let Some(body) = body {
      let bytes = serde_json::to_vec(body)
        .map_err(|e| TransportError::Network(format!("Failed to encode request body: {}", e)))?;
      request = request
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(bytes);
    }

    let response = request
      .send()
      .await
      .map_err(|e| TransportError::Network(e.to_string()))?;

    let status = response.status();
    let headers: HashMap<String, String> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| TransportError::Network(format!("Failed to read response body: {}", e)))?;

    let response = HttpResponse {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    };

    if response.is_success() {
      Ok(response)
    } else {
      Err(TransportError::Status(response))
    }
  }
}

impl Transport for HttpTransport {
  fn request<'a>(
    &'a self,
    method: Method,
    path: &'a str,
    body: Option<&'a Value>,
  ) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
    self.send(method, path, body).boxed()
  }
}
