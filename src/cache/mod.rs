//! Resource cache for the API.
//!
//! This module keeps one in-memory store of everything fetched so far and
//! decides when the network needs to be touched:
//! - Collections are cached per page, with the server's page counts
//! - Nested collections (a linode's configs) hang off their parent entity
//! - Concurrent requests for the same page or entity share one call
//! - Mutations write the server's response back into the store
//! - Subscribers hear about every change to the resources they watch

mod api_types;
mod layer;
mod mutation;
pub mod pagination;
mod storage;
mod subscribe;
mod traits;

pub use api_types::PageEnvelope;
pub use layer::CacheLayer;
pub use pagination::LoadState;
pub use storage::{Collection, Store, Upsert};
pub use subscribe::{ResourceKey, StoreEvent, SubscriptionId};
pub use traits::{
  CacheSource, CollectionPath, Entity, EntityId, NestedResource, Resource, RootResource,
};
