use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A virtual machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linode {
  pub id: u64,
  #[serde(default)]
  pub label: String,
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub group: Option<String>,
  #[serde(default)]
  pub region: Option<String>,
  #[serde(default, rename = "type")]
  pub plan: Option<String>,
  // Everything else the API sends, kept so snapshots round-trip
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Linode {
  pub fn is_running(&self) -> bool {
    self.status == "running"
  }
}

/// Boot configuration profile of a Linode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinodeConfig {
  pub id: u64,
  #[serde(default)]
  pub label: String,
  #[serde(default)]
  pub comments: String,
  pub kernel: Option<KernelRef>,
  /// MB, 0 = no limit
  #[serde(default)]
  pub ram_limit: u64,
  #[serde(default = "default_run_level")]
  pub run_level: String,
  #[serde(default = "default_virt_mode")]
  pub virt_mode: String,
  #[serde(default)]
  pub helpers: ConfigHelpers,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

fn default_run_level() -> String {
  "default".to_string()
}

fn default_virt_mode() -> String {
  "paravirt".to_string()
}

/// Boot helpers toggled on a config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigHelpers {
  pub disable_update_db: bool,
  pub enable_distro_helper: bool,
  pub enable_network_helper: bool,
  pub enable_modules_dep_helper: bool,
}

impl Default for ConfigHelpers {
  fn default() -> Self {
    Self {
      disable_update_db: false,
      enable_distro_helper: true,
      enable_network_helper: true,
      enable_modules_dep_helper: true,
    }
  }
}

/// Kernel as embedded in a config: either a bare id or a kernel object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KernelRef {
  Id(String),
  Kernel {
    id: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
  },
}

impl KernelRef {
  pub fn id(&self) -> &str {
    match self {
      KernelRef::Id(id) | KernelRef::Kernel { id, .. } => id,
    }
  }
}

/// Storage volume attached to a Linode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinodeDisk {
  pub id: u64,
  #[serde(default)]
  pub label: String,
  /// MB
  #[serde(default)]
  pub size: u64,
  #[serde(default)]
  pub filesystem: String,
  #[serde(default)]
  pub status: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl LinodeDisk {
  /// Whether the disk holds a filesystem whose root password can be reset.
  /// Swap and raw disks have none.
  pub fn accepts_root_password(&self) -> bool {
    !matches!(self.filesystem.as_str(), "swap" | "raw")
  }
}

/// Bootable kernel offered by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
  pub id: String,
  #[serde(default)]
  pub label: String,
  #[serde(default)]
  pub version: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Kernel {
  /// Name shown in pickers. The rolling "latest" kernels get friendly names.
  pub fn display_name(&self) -> &str {
    match self.id.as_str() {
      "linode/latest" => "Latest 32-bit kernel",
      "linode/latest_64" => "Latest 64-bit kernel",
      _ if self.label.is_empty() => &self.id,
      _ => &self.label,
    }
  }
}
