//! In-memory resource store: collections, nested relations and page cursors.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::traits::{CollectionPath, Entity, EntityId};

/// A cached collection of one resource type.
///
/// Besides the entities themselves, a collection tracks which pages of the
/// server-side listing have been merged and which page each entity arrived on.
#[derive(Debug, Clone, Default)]
pub struct Collection {
  entities: BTreeMap<EntityId, Entity>,
  /// Page each entity was delivered on, when known
  page_of: HashMap<EntityId, u32>,
  total_pages: Option<u32>,
  total_results: u64,
  pages_fetched: BTreeSet<u32>,
  /// Most recently merged page
  last_page: Option<u32>,
  fetched_at: Option<DateTime<Utc>>,
  /// Nested collections keyed by (parent id, relation name)
  relations: HashMap<(EntityId, String), Collection>,
}

impl Collection {
  pub fn get(&self, id: &EntityId) -> Option<&Entity> {
    self.entities.get(id)
  }

  pub fn contains(&self, id: &EntityId) -> bool {
    self.entities.contains_key(id)
  }

  /// Entities in id order.
  pub fn entities(&self) -> impl Iterator<Item = &Entity> {
    self.entities.values()
  }

  pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
    self.entities.keys()
  }

  pub fn len(&self) -> usize {
    self.entities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entities.is_empty()
  }

  /// Total page count, `None` before the first page was fetched.
  pub fn total_pages(&self) -> Option<u32> {
    self.total_pages
  }

  /// Total page count using `-1` for "unknown", as the API documents it.
  pub fn total_pages_or_sentinel(&self) -> i64 {
    self.total_pages.map(i64::from).unwrap_or(-1)
  }

  pub fn total_results(&self) -> u64 {
    self.total_results
  }

  pub fn pages_fetched(&self) -> &BTreeSet<u32> {
    &self.pages_fetched
  }

  /// Page the entity was delivered on (or attributed to, for created ones).
  pub fn page_of(&self, id: &EntityId) -> Option<u32> {
    self.page_of.get(id).copied()
  }

  /// Entities recorded on `page`, in id order.
  pub fn page(&self, page: u32) -> Vec<Entity> {
    self
      .entities
      .iter()
      .filter(|(id, _)| self.page_of.get(*id) == Some(&page))
      .map(|(_, entity)| entity.clone())
      .collect()
  }

  /// When a page was last merged into this collection.
  pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
    self.fetched_at
  }

  pub fn is_fully_loaded(&self) -> bool {
    matches!(self.total_pages, Some(total) if self.pages_fetched.len() as u64 >= u64::from(total))
  }

  pub fn relation(&self, parent: &EntityId, relation: &str) -> Option<&Collection> {
    self.relations.get(&(parent.clone(), relation.to_string()))
  }

  /// Merge one page of a listing.
  ///
  /// The response's page count and result count replace whatever was stored.
  /// Entities previously delivered on this page but missing from the new
  /// response are dropped, as are pages beyond a shrunken page count.
  pub(crate) fn merge_page(
    &mut self,
    entities: Vec<Entity>,
    page: u32,
    total_pages: u32,
    total_results: u64,
  ) {
    self.total_pages = Some(total_pages);
    self.total_results = total_results;

    let beyond: Vec<u32> = self
      .pages_fetched
      .range(total_pages.saturating_add(1)..)
      .copied()
      .collect();
    for stale in beyond {
      self.pages_fetched.remove(&stale);
      self.drop_page_members(stale, &[]);
    }
    if self.last_page.is_some_and(|last| last > total_pages) {
      self.last_page = self.pages_fetched.iter().next_back().copied();
    }

    if page == 0 || page > total_pages {
      return;
    }

    let incoming: Vec<(EntityId, Entity)> = entities
      .into_iter()
      .filter_map(|entity| EntityId::of(&entity).map(|id| (id, entity)))
      .collect();
    let keep: Vec<EntityId> = incoming.iter().map(|(id, _)| id.clone()).collect();
    self.drop_page_members(page, &keep);

    for (id, entity) in incoming {
      self.page_of.insert(id.clone(), page);
      self.entities.insert(id, entity);
    }
    self.pages_fetched.insert(page);
    self.last_page = Some(page);
    self.fetched_at = Some(Utc::now());
  }

  /// Replace one entity snapshot. Returns true if the entity is new.
  ///
  /// A new entity bumps `total_results` and is attributed to the most recently
  /// fetched page. That placement is approximate: the server decides the real
  /// page, and the next fetch of that page corrects it.
  pub(crate) fn upsert(&mut self, id: EntityId, entity: Entity) -> bool {
    if let Some(existing) = self.entities.get_mut(&id) {
      *existing = entity;
      return false;
    }
    if let Some(page) = self.last_page {
      self.page_of.insert(id.clone(), page);
    }
    self.entities.insert(id, entity);
    self.total_results += 1;
    true
  }

  /// Remove one entity and everything nested under it.
  pub(crate) fn remove(&mut self, id: &EntityId) -> Option<Entity> {
    let removed = self.evict(id)?;
    self.total_results = self.total_results.saturating_sub(1);
    Some(removed)
  }

  fn evict(&mut self, id: &EntityId) -> Option<Entity> {
    let removed = self.entities.remove(id)?;
    self.page_of.remove(id);
    self.relations.retain(|(parent, _), _| parent != id);
    Some(removed)
  }

  fn drop_page_members(&mut self, page: u32, keep: &[EntityId]) {
    let stale: Vec<EntityId> = self
      .page_of
      .iter()
      .filter(|(id, p)| **p == page && !keep.contains(id))
      .map(|(id, _)| id.clone())
      .collect();
    for id in stale {
      self.evict(&id);
    }
  }

  fn relation_mut(&mut self, parent: &EntityId, relation: &str) -> Option<&mut Collection> {
    if !self.entities.contains_key(parent) {
      return None;
    }
    Some(
      self
        .relations
        .entry((parent.clone(), relation.to_string()))
        .or_default(),
    )
  }
}

/// Result of writing one entity into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
  Inserted,
  Replaced,
  /// The target was unreachable (parent entity gone) or the entity had no id
  Ignored,
}

/// The resource store: top-level resource type → collection.
///
/// All operations are synchronous; the store knows nothing about the network.
#[derive(Debug, Default)]
pub struct Store {
  collections: HashMap<String, Collection>,
}

impl Store {
  pub fn new() -> Self {
    Self::default()
  }

  /// Look up a top-level entity.
  pub fn get(&self, kind: &str, id: &EntityId) -> Option<Entity> {
    self.collections.get(kind)?.get(id).cloned()
  }

  /// Look up a nested collection of a top-level entity.
  pub fn get_nested(&self, kind: &str, id: &EntityId, relation: &str) -> Option<&Collection> {
    self.collections.get(kind)?.relation(id, relation)
  }

  /// Look up any collection by path.
  pub fn collection(&self, path: &CollectionPath) -> Option<&Collection> {
    match path {
      CollectionPath::Root { kind } => self.collections.get(kind),
      CollectionPath::Nested {
        kind,
        parent,
        relation,
      } => self.get_nested(kind, parent, relation),
    }
  }

  /// Look up an entity in any collection.
  pub fn entity(&self, path: &CollectionPath, id: &EntityId) -> Option<Entity> {
    self.collection(path)?.get(id).cloned()
  }

  /// Merge a fetched page. Returns false when the target collection is
  /// unreachable because its parent entity is no longer cached.
  pub fn upsert_page(
    &mut self,
    path: &CollectionPath,
    entities: Vec<Entity>,
    page: u32,
    total_pages: u32,
    total_results: u64,
  ) -> bool {
    match self.collection_mut(path) {
      Some(collection) => {
        collection.merge_page(entities, page, total_pages, total_results);
        true
      }
      None => false,
    }
  }

  /// Replace a single entity snapshot.
  pub fn upsert_entity(&mut self, path: &CollectionPath, entity: Entity) -> Upsert {
    let Some(id) = EntityId::of(&entity) else {
      return Upsert::Ignored;
    };
    match self.collection_mut(path) {
      Some(collection) => {
        if collection.upsert(id, entity) {
          Upsert::Inserted
        } else {
          Upsert::Replaced
        }
      }
      None => Upsert::Ignored,
    }
  }

  /// Nested collections cached under a top-level entity, ordered by
  /// relation name.
  pub fn nested_paths(&self, path: &CollectionPath, id: &EntityId) -> Vec<CollectionPath> {
    let CollectionPath::Root { kind } = path else {
      return Vec::new();
    };
    let Some(collection) = self.collections.get(kind) else {
      return Vec::new();
    };
    let mut relations: Vec<&str> = collection
      .relations
      .keys()
      .filter(|(parent, _)| parent == id)
      .map(|(_, relation)| relation.as_str())
      .collect();
    relations.sort_unstable();
    relations
      .into_iter()
      .map(|relation| path.nested(id.clone(), relation))
      .collect()
  }

  /// Remove an entity, returning its last snapshot.
  pub fn remove(&mut self, path: &CollectionPath, id: &EntityId) -> Option<Entity> {
    match path {
      CollectionPath::Root { kind } => self.collections.get_mut(kind)?.remove(id),
      CollectionPath::Nested {
        kind,
        parent,
        relation,
      } => self
        .collections
        .get_mut(kind)?
        .relations
        .get_mut(&(parent.clone(), relation.clone()))?
        .remove(id),
    }
  }

  /// Drop everything, returning every collection to Unknown.
  pub fn reset(&mut self) {
    self.collections.clear();
  }

  fn collection_mut(&mut self, path: &CollectionPath) -> Option<&mut Collection> {
    match path {
      CollectionPath::Root { kind } => Some(self.collections.entry(kind.clone()).or_default()),
      CollectionPath::Nested {
        kind,
        parent,
        relation,
      } => self.collections.get_mut(kind)?.relation_mut(parent, relation),
    }
  }
}
