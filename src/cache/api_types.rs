//! Wire shapes shared by every collection endpoint.

use serde_json::{Map, Value};

use super::traits::{Entity, EntityId};
use std::sync::Arc;

/// One page of a collection listing.
#[derive(Debug, Clone)]
pub struct PageEnvelope {
  pub total_pages: u32,
  pub total_results: u64,
  pub entities: Vec<Entity>,
}

impl PageEnvelope {
  /// Parse a list response.
  ///
  /// The entity array sits under the collection's plural name (`linodes`,
  /// `configs`) or under `data`; page counts may be snake or camel case.
  pub fn parse(body: Value, plural: &str) -> Result<Self, String> {
    let Value::Object(mut map) = body else {
      return Err("list response is not an object".to_string());
    };

    let total_pages = count(&map, &["total_pages", "totalPages"])?
      .ok_or_else(|| "missing total_pages".to_string())?;
    let total_pages =
      u32::try_from(total_pages).map_err(|_| format!("total_pages {} out of range", total_pages))?;

    let items = match map.remove(plural).or_else(|| map.remove("data")) {
      Some(Value::Array(items)) => items,
      Some(_) => return Err(format!("`{}` is not an array", plural)),
      None => return Err(format!("missing `{}` array", plural)),
    };

    let entities = items
      .into_iter()
      .map(|item| {
        if EntityId::of(&item).is_none() {
          return Err("entity without an id".to_string());
        }
        Ok(Arc::new(item))
      })
      .collect::<Result<Vec<_>, _>>()?;

    let total_results =
      count(&map, &["total_results", "totalResults"])?.unwrap_or(entities.len() as u64);

    Ok(Self {
      total_pages,
      total_results,
      entities,
    })
  }
}

/// Parse a single-entity response.
pub fn parse_entity(body: Value) -> Result<Entity, String> {
  if !body.is_object() {
    return Err("entity response is not an object".to_string());
  }
  if EntityId::of(&body).is_none() {
    return Err("entity without an id".to_string());
  }
  Ok(Arc::new(body))
}

fn count(map: &Map<String, Value>, keys: &[&str]) -> Result<Option<u64>, String> {
  for key in keys {
    if let Some(value) = map.get(*key) {
      return value
        .as_u64()
        .map(Some)
        .ok_or_else(|| format!("`{}` is not a non-negative integer", key));
    }
  }
  Ok(None)
}
