//! Cache addressing for Linode types.

use crate::cache::{EntityId, NestedResource, Resource, RootResource};

use super::types::{Kernel, Linode, LinodeConfig, LinodeDisk};

// ============================================================================
// Top-level collections
// ============================================================================

impl Resource for Linode {
  fn entity_id(&self) -> EntityId {
    EntityId::Int(self.id)
  }
}

impl RootResource for Linode {
  const KIND: &'static str = "linodes";
}

impl Resource for Kernel {
  fn entity_id(&self) -> EntityId {
    EntityId::Str(self.id.clone())
  }
}

impl RootResource for Kernel {
  const KIND: &'static str = "kernels";
}

// ============================================================================
// Relations of a Linode
// ============================================================================

impl Resource for LinodeConfig {
  fn entity_id(&self) -> EntityId {
    EntityId::Int(self.id)
  }
}

impl NestedResource for LinodeConfig {
  type Parent = Linode;
  const RELATION: &'static str = "configs";
}

impl Resource for LinodeDisk {
  fn entity_id(&self) -> EntityId {
    EntityId::Int(self.id)
  }
}

impl NestedResource for LinodeDisk {
  type Parent = Linode;
  const RELATION: &'static str = "disks";
}
