//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// An immutable snapshot of one server resource, exactly as the server sent it.
///
/// Snapshots are replaced wholesale; nothing ever edits one in place.
pub type Entity = Arc<Value>;

/// Identifier of an entity, unique within its collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
  Int(u64),
  Str(String),
}

impl EntityId {
  /// Read the `id` field of a wire entity.
  pub fn of(entity: &Value) -> Option<Self> {
    match entity.get("id")? {
      Value::Number(n) => n.as_u64().map(EntityId::Int),
      Value::String(s) if !s.is_empty() => Some(EntityId::Str(s.clone())),
      _ => None,
    }
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EntityId::Int(id) => write!(f, "{}", id),
      EntityId::Str(id) => f.write_str(id),
    }
  }
}

impl From<u64> for EntityId {
  fn from(id: u64) -> Self {
    EntityId::Int(id)
  }
}

impl From<&str> for EntityId {
  fn from(id: &str) -> Self {
    EntityId::Str(id.to_string())
  }
}

impl From<String> for EntityId {
  fn from(id: String) -> Self {
    EntityId::Str(id)
  }
}

/// Address of a collection in the store.
///
/// Top-level collections are addressed by resource type (`linodes`, `kernels`);
/// nested collections hang off one parent entity under a relation name
/// (`linodes/1234/configs`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionPath {
  Root {
    kind: String,
  },
  Nested {
    kind: String,
    parent: EntityId,
    relation: String,
  },
}

impl CollectionPath {
  pub fn root(kind: impl Into<String>) -> Self {
    CollectionPath::Root { kind: kind.into() }
  }

  /// Nested collection under entity `parent` of this top-level collection.
  ///
  /// Nesting is one level deep; calling this on a nested path re-roots the
  /// relation under the same top-level type.
  pub fn nested(&self, parent: impl Into<EntityId>, relation: impl Into<String>) -> Self {
    CollectionPath::Nested {
      kind: self.kind().to_string(),
      parent: parent.into(),
      relation: relation.into(),
    }
  }

  /// Top-level resource type this path lives under.
  pub fn kind(&self) -> &str {
    match self {
      CollectionPath::Root { kind } | CollectionPath::Nested { kind, .. } => kind,
    }
  }

  /// The parent collection and parent id, for nested paths.
  pub fn parent(&self) -> Option<(CollectionPath, &EntityId)> {
    match self {
      CollectionPath::Root { .. } => None,
      CollectionPath::Nested { kind, parent, .. } => Some((CollectionPath::root(kind.clone()), parent)),
    }
  }

  /// API path of the collection, e.g. `/linodes/1234/configs`.
  pub fn api_path(&self) -> String {
    match self {
      CollectionPath::Root { kind } => format!("/{}", kind),
      CollectionPath::Nested {
        kind,
        parent,
        relation,
      } => format!("/{}/{}/{}", kind, parent, relation),
    }
  }

  /// API path of one page of the collection.
  pub fn page_path(&self, page: u32) -> String {
    format!("{}?page={}", self.api_path(), page)
  }

  /// API path of a single entity in the collection.
  pub fn entity_path(&self, id: &EntityId) -> String {
    format!("{}/{}", self.api_path(), id)
  }

  /// Name of the entity list in a page response (`linodes`, `configs`).
  pub fn plural(&self) -> &str {
    match self {
      CollectionPath::Root { kind } => kind,
      CollectionPath::Nested { relation, .. } => relation,
    }
  }
}

impl fmt::Display for CollectionPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.api_path().trim_start_matches('/'))
  }
}

/// Trait for typed resources that live in the cache.
///
/// Implementors name the collection they belong to and their id; the cache
/// itself stores the raw wire snapshot and decodes on read.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier for this entity within its collection
  fn entity_id(&self) -> EntityId;
}

/// A resource stored at the top level of the store.
pub trait RootResource: Resource {
  /// Collection name, which is also the API path segment (e.g. "linodes")
  const KIND: &'static str;

  fn collection() -> CollectionPath {
    CollectionPath::root(Self::KIND)
  }
}

/// A resource stored as a relation of a parent entity.
pub trait NestedResource: Resource {
  type Parent: RootResource;

  /// Relation name on the parent (e.g. "configs")
  const RELATION: &'static str;

  fn collection(parent: impl Into<EntityId>) -> CollectionPath {
    <Self::Parent as RootResource>::collection().nested(parent, Self::RELATION)
  }
}

/// Indicates whether an `ensure_*` call needed the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Served from the store without a request
  Cache,
  /// This call issued the request
  Network,
  /// Joined a request another caller already had in flight
  Coalesced,
}
