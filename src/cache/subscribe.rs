//! Publish/subscribe for store changes.
//!
//! Subscribers register for a resource key (a collection, or one entity in a
//! collection) and are called synchronously after every store mutation that
//! touches that key. Callbacks run after the store lock is released, so they
//! may read the cache freely.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::traits::{CollectionPath, EntityId};

/// What a subscriber listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
  Collection(CollectionPath),
  Entity(CollectionPath, EntityId),
}

/// A change that was just applied to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
  PageMerged { path: CollectionPath, page: u32 },
  EntityUpserted { path: CollectionPath, id: EntityId },
  EntityRemoved { path: CollectionPath, id: EntityId },
  /// A nested collection went away with its parent entity
  CollectionDropped { path: CollectionPath },
  /// Everything was dropped
  Reset,
}

impl StoreEvent {
  fn keys(&self) -> Vec<ResourceKey> {
    match self {
      StoreEvent::PageMerged { path, .. } | StoreEvent::CollectionDropped { path } => {
        vec![ResourceKey::Collection(path.clone())]
      }
      StoreEvent::EntityUpserted { path, id } | StoreEvent::EntityRemoved { path, id } => vec![
        ResourceKey::Entity(path.clone(), id.clone()),
        ResourceKey::Collection(path.clone()),
      ],
      StoreEvent::Reset => Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Clone)]
enum Sink {
  Callback(Callback),
  Channel(mpsc::UnboundedSender<StoreEvent>),
}

impl Sink {
  fn deliver(&self, event: &StoreEvent) {
    match self {
      Sink::Callback(callback) => callback(event),
      // Receiver gone: pruned on the next notify.
      Sink::Channel(tx) => {
        let _ = tx.send(event.clone());
      }
    }
  }

  fn is_closed(&self) -> bool {
    matches!(self, Sink::Channel(tx) if tx.is_closed())
  }
}

#[derive(Default)]
struct Registry {
  next_id: u64,
  by_key: HashMap<ResourceKey, Vec<(SubscriptionId, Sink)>>,
}

/// Subscriber registry keyed by resource.
#[derive(Default)]
pub struct Subscribers {
  registry: Mutex<Registry>,
}

impl Subscribers {
  pub fn new() -> Self {
    Self::default()
  }

  /// Call `callback` after every change to `key`.
  pub fn subscribe<F>(&self, key: ResourceKey, callback: F) -> SubscriptionId
  where
    F: Fn(&StoreEvent) + Send + Sync + 'static,
  {
    self.register(key, Sink::Callback(Arc::new(callback)))
  }

  /// Receive changes to `key` on a channel. Dropping the receiver ends the
  /// subscription.
  pub fn channel(&self, key: ResourceKey) -> (SubscriptionId, mpsc::UnboundedReceiver<StoreEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (self.register(key, Sink::Channel(tx)), rx)
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut registry = self.registry.lock();
    let mut found = false;
    registry.by_key.retain(|_, sinks| {
      let before = sinks.len();
      sinks.retain(|(sid, _)| *sid != id);
      found |= sinks.len() != before;
      !sinks.is_empty()
    });
    found
  }

  pub fn len(&self) -> usize {
    self.registry.lock().by_key.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Deliver `event` to everyone subscribed to a key it touches.
  pub fn notify(&self, event: &StoreEvent) {
    let sinks: Vec<Sink> = {
      let mut registry = self.registry.lock();
      registry.by_key.retain(|_, sinks| {
        sinks.retain(|(_, sink)| !sink.is_closed());
        !sinks.is_empty()
      });
      let selected: Vec<Sink> = match event {
        StoreEvent::Reset => registry
          .by_key
          .values()
          .flatten()
          .map(|(_, sink)| sink.clone())
          .collect(),
        _ => {
          let mut touched = Vec::new();
          for key in event.keys() {
            if let Some(sinks) = registry.by_key.get(&key) {
              touched.extend(sinks.iter().map(|(_, sink)| sink.clone()));
            }
          }
          touched
        }
      };
      selected
    };
    for sink in sinks {
      sink.deliver(event);
    }
  }

  fn register(&self, key: ResourceKey, sink: Sink) -> SubscriptionId {
    let mut registry = self.registry.lock();
    let id = SubscriptionId(registry.next_id);
    registry.next_id += 1;
    registry.by_key.entry(key).or_default().push((id, sink));
    id
  }
}
