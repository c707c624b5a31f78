//! Persistent structured store: entity records, parent-keyed collections,
//! and the pending-mutation queue.
//!
//! The store is the single owner of all persisted data. The sync
//! coordinator references pending mutations by id and routes every local
//! write back through this module, so collection-append logic has exactly
//! one implementation.

mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Logical table holding restaurant entity records.
pub const RESTAURANTS: &str = "restaurants";
/// Logical table holding review collections keyed by restaurant id.
pub const REVIEWS: &str = "reviews";

/// A write issued while offline, as queued for replay.
///
/// The variants mirror the remote service's write endpoints: creating a
/// child document in a collection, and flipping a flag on a single entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationKind {
  CreateReview {
    restaurant_id: String,
    payload: Value,
  },
  SetFavorite {
    restaurant_id: String,
    is_favorite: bool,
  },
}

impl MutationKind {
  /// Short label stored alongside the payload for inspection.
  pub fn label(&self) -> &'static str {
    match self {
      MutationKind::CreateReview { .. } => "create_review",
      MutationKind::SetFavorite { .. } => "set_favorite",
    }
  }
}

/// A queued mutation with its store-assigned identity.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
  pub id: i64,
  pub kind: MutationKind,
  pub created_at: DateTime<Utc>,
}

/// Transactional key-value/document store over SQLite.
pub struct StructuredStore {
  conn: Mutex<Connection>,
}

impl StructuredStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::Store(format!("failed to create data directory: {}", e)))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| Error::Store(format!("failed to open {}: {}", path.display(), e)))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open an in-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Store("could not determine data directory".to_string()))?;

    Ok(data_dir.join("outpost").join("data.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn.execute_batch(schema::SCHEMA)?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Store(format!("lock poisoned: {}", e)))
  }

  // ==========================================================================
  // Entity records
  // ==========================================================================

  /// Point read of an entity document by id.
  pub fn get_entity(&self, table: &str, id: &str) -> Result<Option<Value>> {
    let conn = self.lock()?;
    let raw: Option<Vec<u8>> = conn
      .query_row(
        "SELECT doc FROM entities WHERE table_name = ?1 AND id = ?2",
        params![table, id],
        |row| row.get(0),
      )
      .optional()?;

    match raw {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  /// Last-write-wins upsert of an entity document, keyed by its `id` field.
  ///
  /// Returns the extracted key.
  pub fn put_entity(&self, table: &str, doc: &Value) -> Result<String> {
    let id = entity_key(doc)
      .ok_or_else(|| Error::Store(format!("document for table {} has no id field", table)))?;

    let raw = serde_json::to_vec(doc)?;
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO entities (table_name, id, doc, updated_at)
       VALUES (?1, ?2, ?3, datetime('now'))
       ON CONFLICT(table_name, id) DO UPDATE SET
         doc = excluded.doc, updated_at = excluded.updated_at",
      params![table, id, raw],
    )?;

    Ok(id)
  }

  /// All entity documents in a table.
  ///
  /// Numeric ids sort numerically, other ids lexically after them.
  pub fn list_entities(&self, table: &str) -> Result<Vec<Value>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT doc FROM entities WHERE table_name = ?1
       ORDER BY CAST(id AS INTEGER), id",
    )?;

    let rows: Vec<Vec<u8>> = stmt
      .query_map(params![table], |row| row.get(0))?
      .collect::<std::result::Result<_, _>>()?;

    let mut docs = Vec::with_capacity(rows.len());
    for raw in rows {
      docs.push(serde_json::from_slice(&raw)?);
    }
    Ok(docs)
  }

  // ==========================================================================
  // Parent-keyed collections
  // ==========================================================================

  /// The full ordered sequence for a parent, or None if never populated.
  pub fn get_collection(&self, table: &str, parent: &str) -> Result<Option<Vec<Value>>> {
    let conn = self.lock()?;
    let raw: Option<Vec<u8>> = conn
      .query_row(
        "SELECT doc FROM collections WHERE table_name = ?1 AND parent_id = ?2",
        params![table, parent],
        |row| row.get(0),
      )
      .optional()?;

    match raw {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  /// Whole-collection replace, used on first read-through population.
  pub fn put_collection(&self, table: &str, parent: &str, items: &[Value]) -> Result<()> {
    let raw = serde_json::to_vec(items)?;
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO collections (table_name, parent_id, doc, updated_at)
       VALUES (?1, ?2, ?3, datetime('now'))
       ON CONFLICT(table_name, parent_id) DO UPDATE SET
         doc = excluded.doc, updated_at = excluded.updated_at",
      params![table, parent, raw],
    )?;
    Ok(())
  }

  /// Append one item to a parent's sequence, treating absent as empty.
  ///
  /// The read and the write-back happen inside a single transaction while
  /// holding the connection lock, so two concurrent appends to the same
  /// parent cannot drop each other's item.
  pub fn append_to_collection(&self, table: &str, parent: &str, item: &Value) -> Result<usize> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    let raw: Option<Vec<u8>> = tx
      .query_row(
        "SELECT doc FROM collections WHERE table_name = ?1 AND parent_id = ?2",
        params![table, parent],
        |row| row.get(0),
      )
      .optional()?;

    let mut items: Vec<Value> = match raw {
      Some(bytes) => serde_json::from_slice(&bytes)?,
      None => Vec::new(),
    };
    items.push(item.clone());

    let raw = serde_json::to_vec(&items)?;
    tx.execute(
      "INSERT INTO collections (table_name, parent_id, doc, updated_at)
       VALUES (?1, ?2, ?3, datetime('now'))
       ON CONFLICT(table_name, parent_id) DO UPDATE SET
         doc = excluded.doc, updated_at = excluded.updated_at",
      params![table, parent, raw],
    )?;
    tx.commit()?;

    Ok(items.len())
  }

  // ==========================================================================
  // Pending-mutation queue
  // ==========================================================================

  /// Queue a write for later replay. The store assigns the id.
  pub fn enqueue_mutation(&self, kind: &MutationKind) -> Result<PendingMutation> {
    let created_at = Utc::now();
    let payload = serde_json::to_vec(kind)?;

    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO pending_mutations (kind, payload, created_at) VALUES (?1, ?2, ?3)",
      params![kind.label(), payload, created_at.to_rfc3339()],
    )?;
    let id = conn.last_insert_rowid();

    Ok(PendingMutation {
      id,
      kind: kind.clone(),
      created_at,
    })
  }

  /// Remove a replayed mutation. Removing an id that is already gone is a
  /// no-op, because replay triggers may fire after the fact.
  pub fn dequeue_mutation(&self, id: i64) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn.execute("DELETE FROM pending_mutations WHERE id = ?1", params![id])?;
    Ok(removed > 0)
  }

  /// All queued mutations in FIFO order.
  pub fn list_pending_mutations(&self) -> Result<Vec<PendingMutation>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT id, payload, created_at FROM pending_mutations ORDER BY created_at, id",
    )?;

    let rows: Vec<(i64, Vec<u8>, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
      .collect::<std::result::Result<_, _>>()?;

    let mut pending = Vec::with_capacity(rows.len());
    for (id, payload, created_at) in rows {
      let kind: MutationKind = serde_json::from_slice(&payload)?;
      let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Store(format!("bad created_at on mutation {}: {}", id, e)))?
        .with_timezone(&Utc);
      pending.push(PendingMutation {
        id,
        kind,
        created_at,
      });
    }
    Ok(pending)
  }
}

/// Extract the key from a document's `id` field.
///
/// The reviews service uses numeric ids; string ids pass through unchanged.
pub fn entity_key(doc: &Value) -> Option<String> {
  match doc.get("id") {
    Some(Value::String(s)) => Some(s.clone()),
    Some(Value::Number(n)) => Some(n.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Arc;

  #[test]
  fn test_entity_roundtrip() {
    let store = StructuredStore::open_in_memory().unwrap();
    let doc = json!({"id": 3, "name": "Kang Ho Dong Baekjeong", "is_favorite": false});

    let key = store.put_entity("restaurants", &doc).unwrap();
    assert_eq!(key, "3");

    let loaded = store.get_entity("restaurants", "3").unwrap();
    assert_eq!(loaded, Some(doc));
    assert_eq!(store.get_entity("restaurants", "99").unwrap(), None);
  }

  #[test]
  fn test_put_entity_without_id_is_store_error() {
    let store = StructuredStore::open_in_memory().unwrap();
    let err = store
      .put_entity("restaurants", &json!({"name": "nameless"}))
      .unwrap_err();
    assert!(matches!(err, Error::Store(_)));
  }

  #[test]
  fn test_list_entities_orders_numeric_ids() {
    let store = StructuredStore::open_in_memory().unwrap();
    for id in [10, 2, 1] {
      store
        .put_entity("restaurants", &json!({"id": id}))
        .unwrap();
    }

    let ids: Vec<i64> = store
      .list_entities("restaurants")
      .unwrap()
      .iter()
      .map(|d| d["id"].as_i64().unwrap())
      .collect();
    assert_eq!(ids, vec![1, 2, 10]);
  }

  #[test]
  fn test_collection_populate_then_read() {
    let store = StructuredStore::open_in_memory().unwrap();
    assert_eq!(store.get_collection("reviews", "5").unwrap(), None);

    let fetched = vec![json!({"id": 1, "restaurant_id": 5, "rating": 4})];
    store.put_collection("reviews", "5", &fetched).unwrap();

    let loaded = store.get_collection("reviews", "5").unwrap();
    assert_eq!(loaded, Some(fetched));
  }

  #[test]
  fn test_concurrent_appends_both_survive() {
    let store = Arc::new(StructuredStore::open_in_memory().unwrap());
    store
      .put_collection("reviews", "5", &[json!({"id": 1})])
      .unwrap();

    let handles: Vec<_> = ["left", "right"]
      .iter()
      .map(|tag| {
        let store = Arc::clone(&store);
        let item = json!({"comments": tag});
        std::thread::spawn(move || store.append_to_collection("reviews", "5", &item).unwrap())
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    let items = store.get_collection("reviews", "5").unwrap().unwrap();
    assert_eq!(items.len(), 3);
    let comments: Vec<_> = items.iter().filter_map(|i| i.get("comments")).collect();
    assert!(comments.contains(&&json!("left")));
    assert!(comments.contains(&&json!("right")));
  }

  #[test]
  fn test_append_treats_absent_as_empty() {
    let store = StructuredStore::open_in_memory().unwrap();
    let len = store
      .append_to_collection("reviews", "7", &json!({"rating": 5}))
      .unwrap();
    assert_eq!(len, 1);
  }

  #[test]
  fn test_queue_is_fifo_and_dequeue_is_idempotent() {
    let store = StructuredStore::open_in_memory().unwrap();
    let first = store
      .enqueue_mutation(&MutationKind::SetFavorite {
        restaurant_id: "1".to_string(),
        is_favorite: true,
      })
      .unwrap();
    let second = store
      .enqueue_mutation(&MutationKind::CreateReview {
        restaurant_id: "1".to_string(),
        payload: json!({"rating": 5}),
      })
      .unwrap();

    let pending = store.list_pending_mutations().unwrap();
    assert_eq!(
      pending.iter().map(|m| m.id).collect::<Vec<_>>(),
      vec![first.id, second.id]
    );

    assert!(store.dequeue_mutation(first.id).unwrap());
    // A late trigger removing the same id again is a no-op
    assert!(!store.dequeue_mutation(first.id).unwrap());
    assert_eq!(store.list_pending_mutations().unwrap().len(), 1);
  }
}
