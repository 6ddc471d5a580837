//! Error types returned by the cache and its mutations.

use thiserror::Error;

use crate::error_set::ErrorSet;
use crate::transport::{HttpResponse, TransportError};

/// A rejected mutation whose body carried field-level validation messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
  pub response: HttpResponse,
  pub errors: ErrorSet,
}

/// Errors from fetches and mutations.
///
/// Cloneable so a coalesced fetch can hand the same failure to every caller
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
  /// Network failure or non-2xx response
  #[error(transparent)]
  Transport(#[from] TransportError),

  /// Non-2xx response with a `{field, reason}` body
  #[error("validation failed: {}", .0.errors)]
  Validation(Box<ValidationFailure>),

  /// 2xx response whose body does not have the expected shape
  #[error("unexpected response from {path}: {reason}")]
  Decode { path: String, reason: String },

  /// The cache was asked for something that cannot exist
  #[error("cache invariant violated: {0}")]
  InvariantViolation(String),
}

impl ApiError {
  /// Classify a mutation failure: a 400 or 422 carrying a validation body
  /// becomes [`ApiError::Validation`], everything else stays a transport
  /// failure.
  pub fn from_mutation(error: TransportError) -> Self {
    if let TransportError::Status(response) = &error {
      if !matches!(response.status, 400 | 422) {
        return ApiError::Transport(error);
      }
      if let Some(errors) = ErrorSet::parse_validation(response) {
        return ApiError::Validation(Box::new(ValidationFailure {
          response: response.clone(),
          errors,
        }));
      }
    }
    ApiError::Transport(error)
  }

  pub(crate) fn decode(path: &str, reason: impl ToString) -> Self {
    ApiError::Decode {
      path: path.to_string(),
      reason: reason.to_string(),
    }
  }

  /// The raw failed response, when the server answered at all.
  pub fn response(&self) -> Option<&HttpResponse> {
    match self {
      ApiError::Transport(err) => err.response(),
      ApiError::Validation(failure) => Some(&failure.response),
      _ => None,
    }
  }

  pub fn status(&self) -> Option<u16> {
    self.response().map(|r| r.status)
  }

  pub fn is_not_found(&self) -> bool {
    self.status() == Some(404)
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, ApiError::Validation(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn failed(status: u16, body: &str) -> TransportError {
    TransportError::Status(HttpResponse {
      status,
      status_text: "Bad Request".to_string(),
      body: body.as_bytes().to_vec(),
      ..Default::default()
    })
  }

  #[test]
  fn test_classifies_validation_bodies() {
    let err = ApiError::from_mutation(failed(400, r#"[{"field": "label", "reason": "required"}]"#));
    assert!(err.is_validation());
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.to_string(), "validation failed: label: required");
  }

  #[test]
  fn test_other_failures_stay_transport() {
    let err = ApiError::from_mutation(failed(404, r#"{"errors": [{"reason": "Not found"}]}"#));
    assert!(matches!(err, ApiError::Transport(_)));
    assert!(err.is_not_found());

    let err = ApiError::from_mutation(TransportError::Network("timed out".into()));
    assert_eq!(err.status(), None);
    assert_eq!(err.to_string(), "network error: timed out");
  }
}
