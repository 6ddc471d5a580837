//! Typed Linode client over the resource cache.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::cache::{
  CacheLayer, CollectionPath, Entity, EntityId, NestedResource, Resource, RootResource,
};
use crate::config::Config;
use crate::error::ApiError;
use crate::transport::{EnvToken, HttpTransport, Transport};

use super::api_types::{batch_labels, reserialize, ConfigUpdate, NewLinode};
use super::types::{Kernel, Linode, LinodeConfig, LinodeDisk};

/// Outcome of creating several Linodes in a row.
#[derive(Debug)]
pub struct BatchCreate {
  /// Linodes created before the first failure, in request order
  pub created: Vec<Linode>,
  /// The failure that stopped the batch, labelled
  pub failure: Option<(String, ApiError)>,
}

/// Linode API client with every read going through the cache.
///
/// Reads return typed values decoded from the cached snapshots; writes go
/// through the cache's mutation calls so the store follows the server.
pub struct LinodeClient<T: Transport = HttpTransport> {
  cache: CacheLayer<T>,
}

impl LinodeClient<HttpTransport> {
  /// Create a client for the configured API, reading the token from the
  /// environment on every request.
  pub fn new(config: &Config) -> Result<Self> {
    Config::get_api_token()?;
    let base_url = Url::parse(&config.api.url)
      .map_err(|e| eyre!("Invalid API url {}: {}", config.api.url, e))?;
    let transport = HttpTransport::new(
      base_url,
      Duration::from_secs(config.api.timeout_secs),
      Arc::new(EnvToken::new(Config::TOKEN_VARS.iter().copied())),
    )
    .map_err(|e| eyre!("Failed to create API client for {}: {}", config.api.url, e))?;

    Ok(Self::from_transport(transport))
  }
}

impl<T: Transport> LinodeClient<T> {
  pub fn from_transport(transport: T) -> Self {
    Self {
      cache: CacheLayer::new(transport),
    }
  }

  /// The underlying cache, for subscriptions and untyped reads.
  pub fn cache(&self) -> &CacheLayer<T> {
    &self.cache
  }

  // --------------------------------------------------------------------------
  // Linodes
  // --------------------------------------------------------------------------

  /// One page of Linodes, fetched only if not cached yet.
  pub async fn linodes_page(&self, page: u32) -> Result<Vec<Linode>, ApiError> {
    let path = Linode::collection();
    self.cache.ensure_collection_page(&path, page).await?;
    decode_all(&path, self.cache.page(&path, page))
  }

  pub async fn all_linodes(&self) -> Result<Vec<Linode>, ApiError> {
    let path = Linode::collection();
    self.cache.ensure_fully_loaded(&path).await?;
    decode_all(&path, self.cache.entities(&path))
  }

  pub async fn linode(&self, id: u64) -> Result<Linode, ApiError> {
    let path = Linode::collection();
    let entity = self.cache.ensure_entity(&path, &id.into()).await?;
    decode(&path, &entity)
  }

  pub async fn create_linode(&self, payload: &NewLinode) -> Result<Linode, ApiError> {
    let path = Linode::collection();
    let entity = self.cache.create(&path, &encode(payload)?).await?;
    decode(&path, &entity)
  }

  /// Create one Linode per label from the same template, one at a time.
  /// Stops at the first failure.
  pub async fn create_linodes(&self, template: &NewLinode, labels: &[String]) -> BatchCreate {
    let mut created = Vec::new();
    for label in batch_labels(labels) {
      match self.create_linode(&template.with_label(label.clone())).await {
        Ok(linode) => created.push(linode),
        Err(e) => {
          return BatchCreate {
            created,
            failure: Some((label, e)),
          }
        }
      }
    }
    BatchCreate {
      created,
      failure: None,
    }
  }

  pub async fn rename_linode(&self, id: u64, label: &str) -> Result<Linode, ApiError> {
    let path = Linode::collection();
    let entity = self
      .cache
      .update(&path, &id.into(), &json!({ "label": label }))
      .await?;
    decode(&path, &entity)
  }

  pub async fn delete_linode(&self, id: u64) -> Result<(), ApiError> {
    self.cache.remove(&Linode::collection(), &id.into()).await
  }

  pub async fn boot(&self, id: u64) -> Result<Linode, ApiError> {
    self.power(id, "boot").await
  }

  pub async fn reboot(&self, id: u64) -> Result<Linode, ApiError> {
    self.power(id, "reboot").await
  }

  pub async fn shutdown(&self, id: u64) -> Result<Linode, ApiError> {
    self.power(id, "shutdown").await
  }

  async fn power(&self, id: u64, action: &str) -> Result<Linode, ApiError> {
    let path = Linode::collection();
    let entity = self.cache.action(&path, &id.into(), action, None).await?;
    decode(&path, &entity)
  }

  // --------------------------------------------------------------------------
  // Configs and disks
  // --------------------------------------------------------------------------

  pub async fn linode_configs_page(&self, linode_id: u64, page: u32) -> Result<Vec<LinodeConfig>, ApiError> {
    self.nested_page::<LinodeConfig>(linode_id, page).await
  }

  pub async fn linode_configs(&self, linode_id: u64) -> Result<Vec<LinodeConfig>, ApiError> {
    self.nested_all::<LinodeConfig>(linode_id).await
  }

  /// One config, resolving its Linode first.
  pub async fn linode_config(&self, linode_id: u64, config_id: u64) -> Result<LinodeConfig, ApiError> {
    let path = LinodeConfig::collection(linode_id);
    let entity = self.cache.ensure_entity(&path, &config_id.into()).await?;
    decode(&path, &entity)
  }

  pub async fn create_config(
    &self,
    linode_id: u64,
    payload: &ConfigUpdate,
  ) -> Result<LinodeConfig, ApiError> {
    let path = LinodeConfig::collection(linode_id);
    let entity = self.cache.create(&path, &encode(payload)?).await?;
    decode(&path, &entity)
  }

  pub async fn update_config(
    &self,
    linode_id: u64,
    config_id: u64,
    payload: &ConfigUpdate,
  ) -> Result<LinodeConfig, ApiError> {
    let path = LinodeConfig::collection(linode_id);
    let entity = self
      .cache
      .update(&path, &config_id.into(), &encode(payload)?)
      .await?;
    decode(&path, &entity)
  }

  pub async fn delete_config(&self, linode_id: u64, config_id: u64) -> Result<(), ApiError> {
    self
      .cache
      .remove(&LinodeConfig::collection(linode_id), &config_id.into())
      .await
  }

  pub async fn linode_disks_page(&self, linode_id: u64, page: u32) -> Result<Vec<LinodeDisk>, ApiError> {
    self.nested_page::<LinodeDisk>(linode_id, page).await
  }

  pub async fn linode_disks(&self, linode_id: u64) -> Result<Vec<LinodeDisk>, ApiError> {
    self.nested_all::<LinodeDisk>(linode_id).await
  }

  /// Disks of a Linode that can have their root password reset.
  pub async fn root_password_disks(&self, linode_id: u64) -> Result<Vec<LinodeDisk>, ApiError> {
    let disks = self.linode_disks(linode_id).await?;
    Ok(disks.into_iter().filter(LinodeDisk::accepts_root_password).collect())
  }

  /// Set the root password of a disk.
  ///
  /// A running Linode is shut down first and booted again afterwards, also
  /// when the reset itself fails; the reset failure is what gets returned.
  pub async fn reset_root_password(
    &self,
    linode_id: u64,
    disk_id: u64,
    password: &str,
  ) -> Result<LinodeDisk, ApiError> {
    let linode = self.linode(linode_id).await?;
    let power_cycle = linode.is_running();
    if power_cycle {
      self.shutdown(linode_id).await?;
    }

    let path = LinodeDisk::collection(linode_id);
    let reset = self
      .cache
      .action(&path, &disk_id.into(), "rootpass", Some(&json!({ "password": password })))
      .await
      .and_then(|entity| decode::<LinodeDisk>(&path, &entity));

    if power_cycle {
      if let Err(e) = self.boot(linode_id).await {
        tracing::warn!("Failed to boot linode {} after password reset: {}", linode.entity_id(), e);
        if reset.is_ok() {
          return Err(e);
        }
      }
    }

    let disk = reset?;
    tracing::info!(
      "Reset root password of disk {} on linode {}",
      disk.entity_id(),
      linode.entity_id()
    );
    Ok(disk)
  }

  async fn nested_page<R: NestedResource>(&self, parent: u64, page: u32) -> Result<Vec<R>, ApiError> {
    let path = R::collection(parent);
    self
      .cache
      .ensure_nested_collection(&<R::Parent as RootResource>::collection(), &parent.into(), R::RELATION, page)
      .await?;
    decode_all(&path, self.cache.page(&path, page))
  }

  async fn nested_all<R: NestedResource>(&self, parent: u64) -> Result<Vec<R>, ApiError> {
    let path = R::collection(parent);
    self
      .cache
      .ensure_nested_fully_loaded(&<R::Parent as RootResource>::collection(), &parent.into(), R::RELATION)
      .await?;
    decode_all(&path, self.cache.entities(&path))
  }

  // --------------------------------------------------------------------------
  // Kernels
  // --------------------------------------------------------------------------

  pub async fn all_kernels(&self) -> Result<Vec<Kernel>, ApiError> {
    let path = Kernel::collection();
    self.cache.ensure_fully_loaded(&path).await?;
    decode_all(&path, self.cache.entities(&path))
  }
}

fn decode<R: Resource>(path: &CollectionPath, entity: &Entity) -> Result<R, ApiError> {
  reserialize(&**entity).map_err(|e| {
    let id = EntityId::of(entity).map(|id| id.to_string()).unwrap_or_default();
    ApiError::decode(&format!("{}/{}", path.api_path(), id), e)
  })
}

fn decode_all<R: Resource>(path: &CollectionPath, entities: Vec<Entity>) -> Result<Vec<R>, ApiError> {
  entities.iter().map(|entity| decode(path, entity)).collect()
}

fn encode(payload: &impl Serialize) -> Result<Value, ApiError> {
  serde_json::to_value(payload).map_err(|e| ApiError::InvariantViolation(format!("unencodable payload: {}", e)))
}
