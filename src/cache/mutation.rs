//! Mutations: create, update, delete and entity actions.
//!
//! The store only ever receives what the server answered. A failed mutation
//! leaves the store untouched and hands the failure back for the caller to
//! reduce into form errors.

use serde_json::Value;

use super::layer::{decode_entity, CacheLayer};
use super::subscribe::StoreEvent;
use super::traits::{CollectionPath, Entity, EntityId};
use crate::error::ApiError;
use crate::transport::{HttpResponse, Method, Transport, TransportError};

impl<T: Transport> CacheLayer<T> {
  /// `POST` a new entity into the collection and cache the server's copy.
  pub async fn create(&self, path: &CollectionPath, payload: &Value) -> Result<Entity, ApiError> {
    let api_path = path.api_path();
    let response = self.mutate(Method::Post, &api_path, Some(payload)).await?;
    let entity = decode_entity(&api_path, &response)?;
    self.inner.apply_upsert(path, entity.clone());
    tracing::info!("Created {}/{}", path, display_id(&entity));
    Ok(entity)
  }

  /// `PUT` an entity and replace the cached snapshot with the server's copy.
  pub async fn update(
    &self,
    path: &CollectionPath,
    id: &EntityId,
    payload: &Value,
  ) -> Result<Entity, ApiError> {
    let api_path = path.entity_path(id);
    let response = self.mutate(Method::Put, &api_path, Some(payload)).await?;
    let entity = decode_entity(&api_path, &response)?;
    self.inner.apply_upsert(path, entity.clone());
    tracing::info!("Updated {}/{}", path, id);
    Ok(entity)
  }

  /// `DELETE` an entity and drop it from the store.
  pub async fn remove(&self, path: &CollectionPath, id: &EntityId) -> Result<(), ApiError> {
    let api_path = path.entity_path(id);
    self.mutate(Method::Delete, &api_path, None).await?;
    let (removed, dropped) = {
      let mut store = self.inner.store.lock();
      let dropped = store.nested_paths(path, id);
      (store.remove(path, id), dropped)
    };
    if removed.is_some() {
      self.inner.subscribers.notify(&StoreEvent::EntityRemoved {
        path: path.clone(),
        id: id.clone(),
      });
      for nested in dropped {
        self
          .inner
          .subscribers
          .notify(&StoreEvent::CollectionDropped { path: nested });
      }
    }
    tracing::info!("Deleted {}/{}", path, id);
    Ok(())
  }

  /// `POST` to an action endpoint of an entity (`/linodes/1234/boot`), then
  /// refetch the entity so the cache reflects its new state.
  pub async fn action(
    &self,
    path: &CollectionPath,
    id: &EntityId,
    action: &str,
    payload: Option<&Value>,
  ) -> Result<Entity, ApiError> {
    let api_path = format!("{}/{}", path.entity_path(id), action);
    self.mutate(Method::Post, &api_path, payload).await?;
    tracing::info!("Requested {} of {}/{}", action, path, id);
    self.load_entity(path, id, true).await
  }

  async fn mutate(
    &self,
    method: Method,
    api_path: &str,
    payload: Option<&Value>,
  ) -> Result<HttpResponse, ApiError> {
    tracing::debug!("{} {}", method, api_path);
    self
      .inner
      .transport
      .request(method, api_path, payload)
      .await
      .map_err(|e: TransportError| {
        tracing::warn!("{} {} failed: {}", method, api_path, e);
        ApiError::from_mutation(e)
      })
  }
}

fn display_id(entity: &Entity) -> String {
  EntityId::of(entity)
    .map(|id| id.to_string())
    .unwrap_or_default()
}
