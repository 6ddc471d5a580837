//! Cache layer that decides when to hit the network and merges what comes back.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::api_types::{parse_entity, PageEnvelope};
use super::pagination::{self, LoadState, PageLookup};
use super::storage::{Collection, Store, Upsert};
use super::subscribe::{ResourceKey, StoreEvent, SubscriptionId, Subscribers};
use super::traits::{CacheSource, CollectionPath, Entity, EntityId};
use crate::error::ApiError;
use crate::transport::{HttpResponse, Method, Transport};

/// Identity of a request that concurrent callers share.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FetchKey {
  Page(CollectionPath, u32),
  Entity(CollectionPath, EntityId),
}

type SharedFetch = Shared<BoxFuture<'static, Result<Option<Entity>, ApiError>>>;

/// Requests currently on the wire, each tagged with the generation that
/// started it. A forced refresh replaces the entry under a newer generation;
/// the superseded request then neither clears the entry nor writes its
/// snapshot.
#[derive(Default)]
struct InFlight {
  last_generation: u64,
  fetches: HashMap<FetchKey, (u64, SharedFetch)>,
}

impl InFlight {
  fn join(&self, key: &FetchKey) -> Option<SharedFetch> {
    self.fetches.get(key).map(|(_, fetch)| fetch.clone())
  }

  fn next_generation(&mut self) -> u64 {
    self.last_generation += 1;
    self.last_generation
  }

  fn is_current(&self, key: &FetchKey, generation: u64) -> bool {
    self
      .fetches
      .get(key)
      .is_some_and(|(current, _)| *current == generation)
  }

  fn finish(&mut self, key: &FetchKey, generation: u64) {
    if self.is_current(key, generation) {
      self.fetches.remove(key);
    }
  }
}

pub(super) struct Inner<T> {
  pub(super) transport: T,
  pub(super) store: Mutex<Store>,
  inflight: Mutex<InFlight>,
  pub(super) subscribers: Subscribers,
}

/// Cache layer in front of a [`Transport`].
///
/// The store is the single source of truth for whether a request is needed:
/// pages and entities already cached are served without touching the
/// network, and concurrent requests for the same page or entity collapse into
/// one call. Failures are never retried here.
pub struct CacheLayer<T: Transport> {
  pub(super) inner: Arc<Inner<T>>,
}

impl<T: Transport> CacheLayer<T> {
  /// Create a cache layer with an empty store.
  pub fn new(transport: T) -> Self {
    Self {
      inner: Arc::new(Inner {
        transport,
        store: Mutex::new(Store::new()),
        inflight: Mutex::new(InFlight::default()),
        subscribers: Subscribers::new(),
      }),
    }
  }

  pub fn transport(&self) -> &T {
    &self.inner.transport
  }

  // --------------------------------------------------------------------------
  // Synchronous reads
  // --------------------------------------------------------------------------

  /// Run `f` against the store. Keep it short: the store is locked meanwhile.
  pub fn read<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
    f(&self.inner.store.lock())
  }

  /// A cached top-level entity.
  pub fn get(&self, kind: &str, id: &EntityId) -> Option<Entity> {
    self.read(|store| store.get(kind, id))
  }

  /// A cached nested collection of a top-level entity.
  pub fn get_nested(&self, kind: &str, id: &EntityId, relation: &str) -> Option<Collection> {
    self.read(|store| store.get_nested(kind, id, relation).cloned())
  }

  pub fn entity(&self, path: &CollectionPath, id: &EntityId) -> Option<Entity> {
    self.read(|store| store.entity(path, id))
  }

  pub fn collection(&self, path: &CollectionPath) -> Option<Collection> {
    self.read(|store| store.collection(path).cloned())
  }

  pub fn load_state(&self, path: &CollectionPath) -> LoadState {
    self.read(|store| {
      store
        .collection(path)
        .map(LoadState::of)
        .unwrap_or(LoadState::Unknown)
    })
  }

  /// Entities delivered on one page, in id order.
  pub fn page(&self, path: &CollectionPath, page: u32) -> Vec<Entity> {
    self.read(|store| {
      store
        .collection(path)
        .map(|c| c.page(page))
        .unwrap_or_default()
    })
  }

  /// Every cached entity of a collection, in id order.
  pub fn entities(&self, path: &CollectionPath) -> Vec<Entity> {
    self.read(|store| {
      store
        .collection(path)
        .map(|c| c.entities().cloned().collect())
        .unwrap_or_default()
    })
  }

  /// Drop every cached collection.
  pub fn reset(&self) {
    self.inner.store.lock().reset();
    self.inner.subscribers.notify(&StoreEvent::Reset);
  }

  // --------------------------------------------------------------------------
  // Subscriptions
  // --------------------------------------------------------------------------

  pub fn subscribe<F>(&self, key: ResourceKey, callback: F) -> SubscriptionId
  where
    F: Fn(&StoreEvent) + Send + Sync + 'static,
  {
    self.inner.subscribers.subscribe(key, callback)
  }

  pub fn subscribe_channel(
    &self,
    key: ResourceKey,
  ) -> (SubscriptionId, mpsc::UnboundedReceiver<StoreEvent>) {
    self.inner.subscribers.channel(key)
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    self.inner.subscribers.unsubscribe(id)
  }

  // --------------------------------------------------------------------------
  // Fetch orchestration
  // --------------------------------------------------------------------------

  /// Make sure `page` of the collection is in the store.
  ///
  /// 1. Already fetched - return without a request
  /// 2. Someone else is fetching it - wait for their request
  /// 3. Otherwise - fetch it and merge the response
  pub async fn ensure_collection_page(
    &self,
    path: &CollectionPath,
    page: u32,
  ) -> Result<CacheSource, ApiError> {
    let key = FetchKey::Page(path.clone(), page);
    let (fetch, source) = {
      let mut inflight = self.inner.inflight.lock();
      match inflight.join(&key) {
        Some(fetch) => {
          tracing::trace!("Joining in-flight fetch of {} page {}", path, page);
          (fetch, CacheSource::Coalesced)
        }
        None => {
          let lookup = {
            let store = self.inner.store.lock();
            pagination::lookup_page(store.collection(path), page)
          };
          match lookup {
            PageLookup::Cached => {
              tracing::trace!("Cache hit for {} page {}", path, page);
              return Ok(CacheSource::Cache);
            }
            PageLookup::OutOfRange { total_pages } => {
              let message = format!("{} has {} pages, page {} requested", path, total_pages, page);
              tracing::error!("{}", message);
              return Err(ApiError::InvariantViolation(message));
            }
            PageLookup::Missing => {}
          }
          let generation = inflight.next_generation();
          let fetch = self.share(key.clone(), generation, self.fetch_page(path.clone(), page));
          inflight.fetches.insert(key, (generation, fetch.clone()));
          (fetch, CacheSource::Network)
        }
      }
    };
    fetch.await?;
    Ok(source)
  }

  /// Fetch every page of the collection that is not cached yet, one after
  /// another. Returns how many requests this call issued or joined.
  pub async fn ensure_fully_loaded(&self, path: &CollectionPath) -> Result<usize, ApiError> {
    let mut fetched = 0;
    let mut previous = None;
    loop {
      let next = self.read(|store| pagination::next_unfetched_page(store.collection(path)));
      let Some(page) = next else {
        return Ok(fetched);
      };
      if previous == Some(page) {
        let message = format!("{} page {} was fetched but did not merge", path, page);
        tracing::error!("{}", message);
        return Err(ApiError::InvariantViolation(message));
      }
      if self.ensure_collection_page(path, page).await? != CacheSource::Cache {
        fetched += 1;
      }
      previous = Some(page);
    }
  }

  /// Return a cached entity, fetching it (and, for nested paths, its parent
  /// first) when missing.
  pub async fn ensure_entity(&self, path: &CollectionPath, id: &EntityId) -> Result<Entity, ApiError> {
    if let Some((parent_path, parent_id)) = path.parent() {
      self.load_entity(&parent_path, parent_id, false).await?;
    }
    self.load_entity(path, id, false).await
  }

  /// Resolve the parent entity, then make sure `page` of its relation is
  /// cached.
  pub async fn ensure_nested_collection(
    &self,
    parent: &CollectionPath,
    id: &EntityId,
    relation: &str,
    page: u32,
  ) -> Result<CacheSource, ApiError> {
    self.ensure_entity(parent, id).await?;
    self
      .ensure_collection_page(&parent.nested(id.clone(), relation), page)
      .await
  }

  /// Resolve the parent entity, then load every page of its relation.
  pub async fn ensure_nested_fully_loaded(
    &self,
    parent: &CollectionPath,
    id: &EntityId,
    relation: &str,
  ) -> Result<usize, ApiError> {
    self.ensure_entity(parent, id).await?;
    self
      .ensure_fully_loaded(&parent.nested(id.clone(), relation))
      .await
  }

  /// Fetch an entity, coalescing with any in-flight fetch of it.
  ///
  /// With `force` the request always goes out: neither a cached snapshot nor
  /// a request already in flight (which may predate a mutation) satisfies it.
  /// The forced request takes over the in-flight slot, so later lookups join
  /// it instead of the older one.
  pub(super) async fn load_entity(
    &self,
    path: &CollectionPath,
    id: &EntityId,
    force: bool,
  ) -> Result<Entity, ApiError> {
    let key = FetchKey::Entity(path.clone(), id.clone());
    let fetch = {
      let mut inflight = self.inner.inflight.lock();
      match inflight.join(&key) {
        Some(fetch) if !force => {
          tracing::trace!("Joining in-flight fetch of {}/{}", path, id);
          fetch
        }
        _ => {
          if !force {
            if let Some(entity) = self.entity(path, id) {
              tracing::trace!("Cache hit for {}/{}", path, id);
              return Ok(entity);
            }
          }
          let generation = inflight.next_generation();
          let fetch = self.share(
            key.clone(),
            generation,
            self.fetch_entity(path.clone(), id.clone(), generation),
          );
          inflight.fetches.insert(key, (generation, fetch.clone()));
          fetch
        }
      }
    };
    fetch
      .await?
      .ok_or_else(|| ApiError::InvariantViolation(format!("fetch of {}/{} returned nothing", path, id)))
  }

  /// Wrap a fetch so concurrent callers can share it and it leaves the
  /// in-flight table when done, whoever drives it to completion.
  fn share<F>(&self, key: FetchKey, generation: u64, fetch: F) -> SharedFetch
  where
    F: Future<Output = Result<Option<Entity>, ApiError>> + Send + 'static,
  {
    let inner = Arc::clone(&self.inner);
    async move {
      let result = fetch.await;
      inner.inflight.lock().finish(&key, generation);
      result
    }
    .boxed()
    .shared()
  }

  fn fetch_page(
    &self,
    path: CollectionPath,
    page: u32,
  ) -> impl Future<Output = Result<Option<Entity>, ApiError>> + Send + 'static {
    let inner = Arc::clone(&self.inner);
    async move {
      let api_path = path.page_path(page);
      tracing::debug!("Fetching {}", api_path);
      let response = inner.transport.request(Method::Get, &api_path, None).await?;
      let body: Value = response
        .json()
        .map_err(|e| ApiError::decode(&api_path, e))?;
      let envelope =
        PageEnvelope::parse(body, path.plural()).map_err(|e| ApiError::decode(&api_path, e))?;
      let total_pages = envelope.total_pages;

      // Totals are kept even when the page itself turns out to be past the
      // end, so the next lookup is range-checked against them.
      let merged = inner.store.lock().upsert_page(
        &path,
        envelope.entities,
        page,
        total_pages,
        envelope.total_results,
      );
      if !merged {
        tracing::debug!("Dropping {}: parent entity is no longer cached", api_path);
        return Ok(None);
      }
      inner.subscribers.notify(&StoreEvent::PageMerged {
        path: path.clone(),
        page,
      });
      // A known-empty collection answers every page, as `lookup_page` does.
      if total_pages > 0 && page > total_pages {
        let message = format!("{} has {} pages, page {} requested", path, total_pages, page);
        tracing::error!("{}", message);
        return Err(ApiError::InvariantViolation(message));
      }
      Ok(None)
    }
  }

  fn fetch_entity(
    &self,
    path: CollectionPath,
    id: EntityId,
    generation: u64,
  ) -> impl Future<Output = Result<Option<Entity>, ApiError>> + Send + 'static {
    let inner = Arc::clone(&self.inner);
    async move {
      let api_path = path.entity_path(&id);
      tracing::debug!("Fetching {}", api_path);
      let response = inner.transport.request(Method::Get, &api_path, None).await?;
      let entity = decode_entity(&api_path, &response)?;
      let key = FetchKey::Entity(path.clone(), id);
      if inner.inflight.lock().is_current(&key, generation) {
        inner.apply_upsert(&path, entity.clone());
      } else {
        tracing::debug!("Not caching {}: a newer fetch superseded it", api_path);
      }
      Ok(Some(entity))
    }
  }
}

impl<T> Inner<T> {
  /// Write one snapshot and tell subscribers about it.
  pub(super) fn apply_upsert(&self, path: &CollectionPath, entity: Entity) -> Upsert {
    let id = EntityId::of(&entity);
    let outcome = self.store.lock().upsert_entity(path, entity);
    match (outcome, id) {
      (Upsert::Ignored, _) | (_, None) => {
        tracing::debug!("Dropping snapshot for {}: parent entity is no longer cached", path);
      }
      (_, Some(id)) => self.subscribers.notify(&StoreEvent::EntityUpserted {
        path: path.clone(),
        id,
      }),
    }
    outcome
  }
}

/// Decode a single-entity response body.
pub(super) fn decode_entity(api_path: &str, response: &HttpResponse) -> Result<Entity, ApiError> {
  let body: Value = response
    .json()
    .map_err(|e| ApiError::decode(api_path, e))?;
  parse_entity(body).map_err(|e| ApiError::decode(api_path, e))
}

impl<T: Transport> Clone for CacheLayer<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::mock::MockTransport;
  use serde_json::json;

  fn linodes() -> CollectionPath {
    CollectionPath::root("linodes")
  }

  fn page_body(ids: std::ops::RangeInclusive<u64>, total_pages: u32, total_results: u64) -> Value {
    let linodes: Vec<Value> = ids
      .map(|id| json!({ "id": id, "label": format!("linode{}", id) }))
      .collect();
    json!({
      "total_pages": total_pages,
      "total_results": total_results,
      "linodes": linodes,
    })
  }

  fn cache() -> (Arc<MockTransport>, CacheLayer<Arc<MockTransport>>) {
    let mock = Arc::new(MockTransport::new());
    (mock.clone(), CacheLayer::new(mock))
  }

  #[tokio::test]
  async fn test_first_page_fetch() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=1", page_body(1..=10, 3, 25));

    assert_eq!(cache.load_state(&linodes()), LoadState::Unknown);
    let source = cache.ensure_collection_page(&linodes(), 1).await.unwrap();
    assert_eq!(source, CacheSource::Network);

    let collection = cache.collection(&linodes()).unwrap();
    assert_eq!(collection.total_pages(), Some(3));
    assert_eq!(collection.total_results(), 25);
    assert_eq!(collection.len(), 10);
    assert_eq!(collection.pages_fetched().iter().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(cache.load_state(&linodes()), LoadState::PartiallyLoaded);
  }

  #[tokio::test]
  async fn test_second_call_is_cache_hit() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=1", page_body(1..=2, 1, 2));

    cache.ensure_collection_page(&linodes(), 1).await.unwrap();
    let source = cache.ensure_collection_page(&linodes(), 1).await.unwrap();

    assert_eq!(source, CacheSource::Cache);
    assert_eq!(mock.call_count(), 1);
  }

  #[tokio::test]
  async fn test_concurrent_page_requests_coalesce() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=1", page_body(1..=2, 2, 4));
    mock.hold();

    let path = linodes();
    let first = cache.ensure_collection_page(&path, 1);
    let second = cache.ensure_collection_page(&path, 1);
    let release = async {
      tokio::task::yield_now().await;
      mock.release();
    };
    let (a, b, _) = tokio::join!(first, second, release);

    assert_eq!(a.unwrap(), CacheSource::Network);
    assert_eq!(b.unwrap(), CacheSource::Coalesced);
    assert_eq!(mock.count(Method::Get, "/linodes?page=1"), 1);
    assert_eq!(cache.collection(&linodes()).unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_coalesced_failure_reaches_every_caller() {
    let (mock, cache) = cache();
    mock.fail(Method::Get, "/linodes?page=1", 500, json!({}));

    let path = linodes();
    let (a, b) = tokio::join!(
      cache.ensure_collection_page(&path, 1),
      cache.ensure_collection_page(&path, 1)
    );
    assert_eq!(a.unwrap_err().status(), Some(500));
    assert_eq!(b.unwrap_err().status(), Some(500));
    assert_eq!(mock.call_count(), 1);

    // Failures are not cached: the next call tries again.
    mock.reply(Method::Get, "/linodes?page=1", page_body(1..=1, 1, 1));
    assert_eq!(
      cache.ensure_collection_page(&linodes(), 1).await.unwrap(),
      CacheSource::Network
    );
  }

  #[tokio::test]
  async fn test_distinct_pages_do_not_coalesce() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=1", page_body(1..=2, 2, 4));
    mock.reply(Method::Get, "/linodes?page=2", page_body(3..=4, 2, 4));

    let path = linodes();
    let (a, b) = tokio::join!(
      cache.ensure_collection_page(&path, 1),
      cache.ensure_collection_page(&path, 2)
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(mock.call_count(), 2);
    assert_eq!(cache.load_state(&linodes()), LoadState::FullyLoaded);
  }

  #[tokio::test]
  async fn test_pages_fetched_only_grows() {
    let (mock, cache) = cache();
    for page in 1..=4u32 {
      let start = u64::from(page) * 10;
      mock.reply(
        Method::Get,
        &format!("/linodes?page={}", page),
        page_body(start..=start + 1, 4, 8),
      );
    }

    let mut seen = 0;
    for page in [2, 1, 2, 4, 3, 1] {
      cache.ensure_collection_page(&linodes(), page).await.unwrap();
      let fetched = cache.collection(&linodes()).unwrap().pages_fetched().len();
      assert!(fetched >= seen);
      seen = fetched;
    }
    assert_eq!(seen, 4);
    assert_eq!(mock.call_count(), 4);
  }

  #[tokio::test]
  async fn test_fully_loaded_fetches_only_missing_pages() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=1", page_body(1..=10, 3, 25));
    mock.reply(Method::Get, "/linodes?page=2", page_body(11..=20, 3, 25));
    mock.reply(Method::Get, "/linodes?page=3", page_body(21..=25, 3, 25));
    cache.ensure_collection_page(&linodes(), 1).await.unwrap();
    cache.ensure_collection_page(&linodes(), 3).await.unwrap();
    let before = mock.call_count();

    let fetched = cache.ensure_fully_loaded(&linodes()).await.unwrap();

    assert_eq!(fetched, 1);
    assert_eq!(mock.call_count() - before, 1);
    assert_eq!(mock.calls().last().unwrap().path, "/linodes?page=2");
    assert_eq!(cache.entities(&linodes()).len(), 25);
  }

  #[tokio::test]
  async fn test_fully_loaded_from_unknown() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=1", page_body(1..=1, 2, 2));
    mock.reply(Method::Get, "/linodes?page=2", page_body(2..=2, 2, 2));

    assert_eq!(cache.ensure_fully_loaded(&linodes()).await.unwrap(), 2);
    assert_eq!(cache.ensure_fully_loaded(&linodes()).await.unwrap(), 0);
    assert_eq!(mock.call_count(), 2);
  }

  #[tokio::test]
  async fn test_fully_loaded_stops_on_empty_collection() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=1", page_body(1..=0, 0, 0));

    assert_eq!(cache.ensure_fully_loaded(&linodes()).await.unwrap(), 1);
    assert_eq!(cache.load_state(&linodes()), LoadState::FullyLoaded);
    assert_eq!(
      cache.ensure_collection_page(&linodes(), 1).await.unwrap(),
      CacheSource::Cache
    );
    assert_eq!(mock.call_count(), 1);
  }

  #[tokio::test]
  async fn test_out_of_range_page_is_invariant_violation() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=1", page_body(1..=1, 2, 2));
    cache.ensure_collection_page(&linodes(), 1).await.unwrap();

    let err = cache.ensure_collection_page(&linodes(), 3).await.unwrap_err();
    assert!(matches!(err, ApiError::InvariantViolation(_)));
    let err = cache.ensure_collection_page(&linodes(), 0).await.unwrap_err();
    assert!(matches!(err, ApiError::InvariantViolation(_)));
    assert_eq!(mock.call_count(), 1);
  }

  #[tokio::test]
  async fn test_page_past_the_end_of_unknown_collection() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=5", page_body(1..=0, 3, 25));

    let err = cache.ensure_collection_page(&linodes(), 5).await.unwrap_err();
    assert!(matches!(err, ApiError::InvariantViolation(_)));

    // The totals from the response are kept, so the retry is refused locally.
    let collection = cache.collection(&linodes()).unwrap();
    assert_eq!(collection.total_pages(), Some(3));
    assert!(collection.pages_fetched().is_empty());
    let err = cache.ensure_collection_page(&linodes(), 5).await.unwrap_err();
    assert!(matches!(err, ApiError::InvariantViolation(_)));
    assert_eq!(mock.call_count(), 1);
  }

  #[tokio::test]
  async fn test_malformed_page_is_decode_error() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=1", json!({"linodes": []}));

    let err = cache.ensure_collection_page(&linodes(), 1).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode { .. }));
    assert_eq!(cache.load_state(&linodes()), LoadState::Unknown);
  }

  #[tokio::test]
  async fn test_ensure_entity_fetches_once() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes/1234", json!({"id": 1234, "label": "web"}));

    let entity = cache.ensure_entity(&linodes(), &1234.into()).await.unwrap();
    assert_eq!(entity["label"], "web");
    let again = cache.ensure_entity(&linodes(), &1234.into()).await.unwrap();
    assert_eq!(again, entity);
    assert_eq!(mock.calls().iter().map(|c| c.path.as_str()).collect::<Vec<_>>(), ["/linodes/1234"]);
    assert!(cache.get("linodes", &1234.into()).is_some());
  }

  #[tokio::test]
  async fn test_concurrent_entity_lookups_coalesce() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes/1234", json!({"id": 1234, "label": "web"}));
    mock.hold();

    let path = linodes();
    let id = EntityId::from(1234u64);
    let release = async {
      tokio::task::yield_now().await;
      mock.release();
    };
    let (a, b, _) = tokio::join!(
      cache.ensure_entity(&path, &id),
      cache.ensure_entity(&path, &id),
      release
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(mock.count(Method::Get, "/linodes/1234"), 1);
    assert_eq!(mock.call_count(), 1);
  }

  #[tokio::test]
  async fn test_concurrent_nested_lookups_share_parent_fetch() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes/1234", json!({"id": 1234}));
    mock.reply(
      Method::Get,
      "/linodes/1234/configs/12345",
      json!({"id": 12345, "label": "Test config"}),
    );
    mock.hold();

    let configs = linodes().nested(1234, "configs");
    let id = EntityId::from(12345u64);
    let release = async {
      tokio::task::yield_now().await;
      mock.release();
    };
    let (a, b, _) = tokio::join!(
      cache.ensure_entity(&configs, &id),
      cache.ensure_entity(&configs, &id),
      release
    );

    assert_eq!(a.unwrap()["label"], "Test config");
    assert_eq!(b.unwrap()["label"], "Test config");
    assert_eq!(mock.count(Method::Get, "/linodes/1234"), 1);
    assert_eq!(mock.count(Method::Get, "/linodes/1234/configs/12345"), 1);
    assert!(cache.get("linodes", &1234.into()).is_some());
  }

  #[tokio::test]
  async fn test_forced_load_does_not_join_older_fetch() {
    let (mock, cache) = cache();
    let gate = mock.reply_gated(
      Method::Get,
      "/linodes/1234",
      json!({"id": 1234, "status": "offline"}),
    );
    mock.reply(Method::Get, "/linodes/1234", json!({"id": 1234, "status": "booting"}));

    let older = tokio::spawn({
      let cache = cache.clone();
      async move { cache.ensure_entity(&linodes(), &1234.into()).await }
    });
    while mock.call_count() == 0 {
      tokio::task::yield_now().await;
    }

    let fresh = cache.load_entity(&linodes(), &1234.into(), true).await.unwrap();
    assert_eq!(fresh["status"], "booting");

    // The older request still answers its own caller but does not overwrite
    // the newer snapshot.
    gate.open();
    let stale = older.await.unwrap().unwrap();
    assert_eq!(stale["status"], "offline");
    assert_eq!(cache.get("linodes", &1234.into()).unwrap()["status"], "booting");
    assert_eq!(mock.count(Method::Get, "/linodes/1234"), 2);
  }

  #[tokio::test]
  async fn test_ensure_entity_propagates_not_found() {
    let (mock, cache) = cache();

    let err = cache.ensure_entity(&linodes(), &9.into()).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(cache.get("linodes", &9.into()).is_none());
    assert_eq!(mock.call_count(), 1);
  }

  #[tokio::test]
  async fn test_nested_collection_resolves_parent_first() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes/1238", json!({"id": 1238, "label": "db"}));
    mock.reply(
      Method::Get,
      "/linodes/1238/configs?page=1",
      json!({
        "total_pages": 1,
        "total_results": 2,
        "configs": [{"id": 12345, "label": "Test config"}, {"id": 12346, "label": "Other"}]
      }),
    );

    cache
      .ensure_nested_collection(&linodes(), &1238.into(), "configs", 1)
      .await
      .unwrap();

    let paths: Vec<String> = mock.calls().into_iter().map(|c| c.path).collect();
    assert_eq!(paths, ["/linodes/1238", "/linodes/1238/configs?page=1"]);
    let configs = cache.get_nested("linodes", &1238.into(), "configs").unwrap();
    assert_eq!(configs.len(), 2);

    // Cached now, at both levels.
    cache
      .ensure_nested_collection(&linodes(), &1238.into(), "configs", 1)
      .await
      .unwrap();
    assert_eq!(mock.call_count(), 2);
  }

  #[tokio::test]
  async fn test_nested_collection_fails_without_parent() {
    let (mock, cache) = cache();

    let err = cache
      .ensure_nested_collection(&linodes(), &77.into(), "disks", 1)
      .await
      .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(mock.count(Method::Get, "/linodes/77/disks?page=1"), 0);
  }

  #[tokio::test]
  async fn test_nested_entity_resolves_parent_first() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes/1234", json!({"id": 1234}));
    mock.reply(
      Method::Get,
      "/linodes/1234/configs/12345",
      json!({"id": 12345, "label": "Test config"}),
    );

    let configs = linodes().nested(1234, "configs");
    let config = cache.ensure_entity(&configs, &12345.into()).await.unwrap();
    assert_eq!(config["label"], "Test config");
    assert!(cache.entity(&configs, &12345.into()).is_some());
  }

  #[tokio::test]
  async fn test_subscribers_see_page_merges() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=1", page_body(1..=1, 1, 1));
    let (_, mut rx) = cache.subscribe_channel(ResourceKey::Collection(linodes()));

    cache.ensure_collection_page(&linodes(), 1).await.unwrap();

    assert_eq!(
      rx.try_recv().unwrap(),
      StoreEvent::PageMerged {
        path: linodes(),
        page: 1
      }
    );
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_subscriber_can_read_cache_during_notify() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes/5", json!({"id": 5, "label": "five"}));
    let seen = Arc::new(Mutex::new(None));

    let reader = cache.clone();
    let slot = seen.clone();
    cache.subscribe(ResourceKey::Entity(linodes(), 5.into()), move |_| {
      *slot.lock() = reader.get("linodes", &5.into());
    });
    cache.ensure_entity(&linodes(), &5.into()).await.unwrap();

    assert_eq!(seen.lock().as_ref().unwrap()["label"], "five");
  }

  #[tokio::test]
  async fn test_reset_returns_to_unknown() {
    let (mock, cache) = cache();
    mock.reply(Method::Get, "/linodes?page=1", page_body(1..=1, 1, 1));
    cache.ensure_collection_page(&linodes(), 1).await.unwrap();

    cache.reset();
    assert_eq!(cache.load_state(&linodes()), LoadState::Unknown);
    cache.ensure_collection_page(&linodes(), 1).await.unwrap();
    assert_eq!(mock.call_count(), 2);
  }
}
