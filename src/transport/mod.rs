//! The HTTP boundary: what the cache needs from a transport, and the
//! token supplier the transport consults on every call.

mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpTransport;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Request methods the API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    })
  }
}

/// A fully read HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub status_text: String,
  /// Header names are lowercased
  pub headers: HashMap<String, String>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  /// Whether the body claims (or, lacking a content type, might be) JSON.
  pub fn looks_like_json(&self) -> bool {
    self
      .header("content-type")
      .map(|ct| ct.contains("json"))
      .unwrap_or(true)
  }

  pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
    serde_json::from_slice(&self.body)
  }

  /// Body as JSON, or `None` when absent or malformed.
  pub fn json_value(&self) -> Option<Value> {
    if self.body.is_empty() || !self.looks_like_json() {
      return None;
    }
    self.json().ok()
  }
}

/// Why a transport call failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  /// No response: connection failure, DNS, timeout
  #[error("network error: {0}")]
  Network(String),

  /// The server answered outside 200-299
  #[error("{}: {}", .0.status, .0.status_text)]
  Status(HttpResponse),
}

impl TransportError {
  pub fn response(&self) -> Option<&HttpResponse> {
    match self {
      TransportError::Status(response) => Some(response),
      TransportError::Network(_) => None,
    }
  }

  pub fn status(&self) -> Option<u16> {
    self.response().map(|r| r.status)
  }
}

/// The raw request primitive the cache is built on.
///
/// Implementations resolve with the response for 2xx statuses and fail with
/// [`TransportError::Status`] for anything else. Timeouts are theirs to
/// enforce.
pub trait Transport: Send + Sync + 'static {
  fn request<'a>(
    &'a self,
    method: Method,
    path: &'a str,
    body: Option<&'a Value>,
  ) -> BoxFuture<'a, Result<HttpResponse, TransportError>>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
  fn request<'a>(
    &'a self,
    method: Method,
    path: &'a str,
    body: Option<&'a Value>,
  ) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
    (**self).request(method, path, body)
  }
}

/// Supplies the API token attached to each request.
pub trait TokenSupplier: Send + Sync {
  fn token(&self) -> Option<String>;
}

/// A token fixed at startup.
#[derive(Clone)]
pub struct StaticToken(pub String);

impl TokenSupplier for StaticToken {
  fn token(&self) -> Option<String> {
    Some(self.0.clone())
  }
}

impl fmt::Debug for StaticToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("StaticToken(..)")
  }
}

/// A token read from the environment on every request, so rotating the
/// variable takes effect without a restart.
#[derive(Debug, Clone)]
pub struct EnvToken {
  vars: Vec<String>,
}

impl EnvToken {
  pub fn new<I, S>(vars: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      vars: vars.into_iter().map(Into::into).collect(),
    }
  }
}

impl TokenSupplier for EnvToken {
  fn token(&self) -> Option<String> {
    self
      .vars
      .iter()
      .find_map(|var| std::env::var(var).ok().filter(|token| !token.trim().is_empty()))
  }
}
