//! Request payloads and conversions between wire snapshots and typed values.
//!
//! Responses are decoded straight into the types in [`super::types`]; the
//! structs here only describe what we send.

use serde::{de::DeserializeOwned, Serialize};

use super::types::{ConfigHelpers, LinodeConfig};

/// Re-serialize a value through JSON to convert between compatible types.
/// Used to decode cached snapshots into typed resources and to encode
/// payloads for the cache's untyped mutation calls.
pub fn reserialize<T: DeserializeOwned>(value: impl Serialize) -> serde_json::Result<T> {
  serde_json::from_value(serde_json::to_value(value)?)
}

/// Body of `POST /linodes`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewLinode {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub group: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub region: Option<String>,
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub plan: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub distribution: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub root_pass: Option<String>,
  #[serde(skip_serializing_if = "std::ops::Not::not")]
  pub backups: bool,
}

impl NewLinode {
  pub fn with_label(&self, label: impl Into<String>) -> Self {
    Self {
      label: Some(label.into()),
      ..self.clone()
    }
  }
}

/// Labels for a batch of new Linodes.
///
/// Blank entries after the first are filled in as `<first>-<index>`; a blank
/// first label is left for the server to reject.
pub fn batch_labels(labels: &[String]) -> Vec<String> {
  let first = labels.first().map(|l| l.trim()).unwrap_or_default();
  labels
    .iter()
    .enumerate()
    .map(|(i, label)| {
      let label = label.trim();
      if label.is_empty() && i > 0 && !first.is_empty() {
        format!("{}-{}", first, i)
      } else {
        label.to_string()
      }
    })
    .collect()
}

/// Body of `POST`/`PUT /linodes/{id}/configs[/{config}]`
///
/// Unset fields are left out, so a `PUT` only changes what is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub comments: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub kernel: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ram_limit: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub run_level: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub virt_mode: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub helpers: Option<ConfigHelpers>,
}

impl ConfigUpdate {
  /// Form fields a config edit can report errors against.
  pub const FIELDS: &'static [&'static str] = &[
    "label",
    "comments",
    "kernel",
    "ram_limit",
    "run_level",
    "virt_mode",
    "helpers",
  ];

  /// Start an edit from the config's current state. The kernel is left
  /// unset: the API rejects it echoed back.
  pub fn from_config(config: &LinodeConfig) -> Self {
    Self {
      label: Some(config.label.clone()),
      comments: Some(config.comments.clone()),
      kernel: None,
      ram_limit: Some(config.ram_limit),
      run_level: Some(config.run_level.clone()),
      virt_mode: Some(config.virt_mode.clone()),
      helpers: Some(config.helpers),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_batch_labels_fill_blanks() {
    let labels: Vec<String> = ["web", "", "  ", "db"].iter().map(|s| s.to_string()).collect();
    assert_eq!(batch_labels(&labels), ["web", "web-1", "web-2", "db"]);
  }

  #[test]
  fn test_batch_labels_blank_first() {
    let labels = vec![String::new(), String::new()];
    assert_eq!(batch_labels(&labels), ["", ""]);
  }

  #[test]
  fn test_new_linode_omits_unset_fields() {
    let payload = NewLinode {
      group: Some("prod".to_string()),
      ..Default::default()
    }
    .with_label("web");
    assert_eq!(
      serde_json::to_value(&payload).unwrap(),
      json!({"label": "web", "group": "prod"})
    );
  }

  #[test]
  fn test_config_update_from_config() {
    let config: LinodeConfig = serde_json::from_value(json!({
      "id": 12345,
      "label": "Test config",
      "kernel": {"id": "linode/latest_64", "label": "Latest 64 bit"},
      "ram_limit": 1024,
      "helpers": {"disable_update_db": true}
    }))
    .unwrap();

    let update = ConfigUpdate::from_config(&config);
    assert_eq!(
      serde_json::to_value(&update).unwrap(),
      json!({
        "label": "Test config",
        "comments": "",
        "ram_limit": 1024,
        "run_level": "default",
        "virt_mode": "paravirt",
        "helpers": {
          "disable_update_db": true,
          "enable_distro_helper": true,
          "enable_network_helper": true,
          "enable_modules_dep_helper": true
        }
      })
    );
  }
}
