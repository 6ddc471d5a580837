//! Page cursor policy: where a collection stands and which page comes next.

use super::storage::Collection;

/// Load state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
  /// Nothing fetched yet; page count unknown
  Unknown,
  /// Some, but not all, pages fetched
  PartiallyLoaded,
  /// Every page fetched (trivially so for an empty collection)
  FullyLoaded,
}

impl LoadState {
  pub fn of(collection: &Collection) -> Self {
    match collection.total_pages() {
      None => LoadState::Unknown,
      Some(total) if collection.pages_fetched().len() as u64 >= u64::from(total) => {
        LoadState::FullyLoaded
      }
      Some(_) => LoadState::PartiallyLoaded,
    }
  }
}

/// Outcome of checking a page request against cached state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLookup {
  /// The page is already in the store
  Cached,
  /// The page has to be fetched
  Missing,
  /// The page number cannot exist
  OutOfRange { total_pages: u32 },
}

/// Decide whether `page` needs a fetch.
///
/// A missing collection behaves like an Unknown one.
pub fn lookup_page(collection: Option<&Collection>, page: u32) -> PageLookup {
  if page == 0 {
    return PageLookup::OutOfRange {
      total_pages: collection.and_then(Collection::total_pages).unwrap_or(0),
    };
  }
  let Some(collection) = collection else {
    return PageLookup::Missing;
  };
  match collection.total_pages() {
    // A known-empty collection has nothing left to fetch.
    Some(0) => PageLookup::Cached,
    Some(total) if page > total => PageLookup::OutOfRange { total_pages: total },
    _ if collection.pages_fetched().contains(&page) => PageLookup::Cached,
    _ => PageLookup::Missing,
  }
}

/// Lowest page that still has to be fetched to load the whole collection.
///
/// Returns `None` once the collection is fully loaded.
pub fn next_unfetched_page(collection: Option<&Collection>) -> Option<u32> {
  let Some(collection) = collection else {
    return Some(1);
  };
  match collection.total_pages() {
    None => Some(1),
    Some(total) => (1..=total).find(|page| !collection.pages_fetched().contains(page)),
  }
}
