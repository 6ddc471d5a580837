//! Field-keyed error messages for forms, reduced from API failures.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ApiError;
use crate::transport::{HttpResponse, TransportError};

/// One entry of an API validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldError {
  #[serde(default)]
  pub field: Option<String>,
  pub reason: String,
}

/// Validation messages grouped by form field, plus messages that belong to no
/// field in particular.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorSet {
  fields: BTreeMap<String, Vec<String>>,
  general: Vec<String>,
}

impl ErrorSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Messages for `field`, in the order the server sent them.
  pub fn field(&self, field: &str) -> &[String] {
    self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn fields(&self) -> impl Iterator<Item = (&str, &[String])> {
    self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
  }

  pub fn general(&self) -> &[String] {
    &self.general
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty() && self.general.is_empty()
  }

  pub fn push_field(&mut self, field: impl Into<String>, message: impl Into<String>) {
    self.fields.entry(field.into()).or_default().push(message.into());
  }

  pub fn push_general(&mut self, message: impl Into<String>) {
    self.general.push(message.into());
  }

  /// Route messages for fields the form does not render into the general list.
  pub fn restrict_to(mut self, known: &[&str]) -> Self {
    let unknown: Vec<String> = self
      .fields
      .keys()
      .filter(|field| !known.contains(&field.as_str()))
      .cloned()
      .collect();
    for field in unknown {
      if let Some(messages) = self.fields.remove(&field) {
        self.general.extend(messages);
      }
    }
    self
  }

  /// Group a validation array. Entries without a field name are general.
  pub fn from_field_errors(errors: impl IntoIterator<Item = FieldError>) -> Self {
    let mut set = Self::new();
    for error in errors {
      match error.field.filter(|f| !f.trim().is_empty()) {
        Some(field) => set.push_field(field, error.reason),
        None => set.push_general(error.reason),
      }
    }
    set
  }

  /// Extract a validation array from a failed response, if it has one.
  ///
  /// Accepts a bare `[{field, reason}]` array or an object carrying it under
  /// `errors`. Returns `None` for any other shape, and for an empty array.
  pub fn parse_validation(response: &HttpResponse) -> Option<Self> {
    let body = response.json_value()?;
    let entries = match body {
      Value::Array(entries) => entries,
      Value::Object(mut map) => match map.remove("errors")? {
        Value::Array(entries) => entries,
        _ => return None,
      },
      _ => return None,
    };
    if entries.is_empty() {
      return None;
    }
    let errors: Vec<FieldError> = serde_json::from_value(Value::Array(entries)).ok()?;
    Some(Self::from_field_errors(errors))
  }

  /// Reduce a failed response: its validation array, or the status line.
  pub fn from_response(response: &HttpResponse) -> Self {
    Self::parse_validation(response).unwrap_or_else(|| {
      let mut set = Self::new();
      set.push_general(status_line(response));
      set
    })
  }
}

impl fmt::Display for ErrorSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut parts: Vec<String> = self.general.clone();
    for (field, messages) in &self.fields {
      for message in messages {
        parts.push(format!("{}: {}", field, message));
      }
    }
    f.write_str(&parts.join("; "))
  }
}

fn status_line(response: &HttpResponse) -> String {
  if response.status_text.is_empty() {
    response.status.to_string()
  } else {
    format!("{}: {}", response.status, response.status_text)
  }
}

/// Reduce any failure into an [`ErrorSet`]. Never fails.
pub fn reduce(error: &ApiError) -> ErrorSet {
  match error {
    ApiError::Validation(failure) => failure.errors.clone(),
    ApiError::Transport(TransportError::Status(response)) => ErrorSet::from_response(response),
    other => {
      let mut set = ErrorSet::new();
      set.push_general(other.to_string());
      set
    }
  }
}

/// Like [`reduce`], keeping only the fields a form knows how to show.
pub fn reduce_for_fields(error: &ApiError, known: &[&str]) -> ErrorSet {
  reduce(error).restrict_to(known)
}
