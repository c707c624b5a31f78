//! SQLite implementation of the asset cache storage.

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

use super::traits::{AssetStorage, StoredAsset};

/// Schema for the asset cache tables.
const ASSET_SCHEMA: &str = r#"
-- One row per physical cache bucket
CREATE TABLE IF NOT EXISTS buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Opaque response blobs keyed by request URL within a bucket
CREATE TABLE IF NOT EXISTS assets (
    bucket TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, url_hash)
);

CREATE INDEX IF NOT EXISTS idx_assets_url ON assets(url_hash);
"#;

/// SQLite-backed asset storage.
pub struct SqliteAssetStorage {
  conn: Mutex<Connection>,
}

impl SqliteAssetStorage {
  /// Open or create the asset database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open or create the asset database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::Store(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| Error::Store(format!("failed to open {}: {}", path.display(), e)))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Open an in-memory asset database, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Store("could not determine data directory".to_string()))?;

    Ok(data_dir.join("outpost").join("assets.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn.execute_batch(ASSET_SCHEMA)?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Store(format!("lock poisoned: {}", e)))
  }
}

/// SHA-256 hex digest of a request URL, for stable fixed-length keys.
fn url_hash(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

impl AssetStorage for SqliteAssetStorage {
  fn register_bucket(&self, bucket: &str) -> Result<bool> {
    let conn = self.lock()?;
    let inserted = conn.execute(
      "INSERT OR IGNORE INTO buckets (name) VALUES (?1)",
      params![bucket],
    )?;
    Ok(inserted > 0)
  }

  fn put(&self, bucket: &str, url: &str, asset: &StoredAsset) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO assets (bucket, url_hash, url, status, content_type, body, cached_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
       ON CONFLICT(bucket, url_hash) DO UPDATE SET
         status = excluded.status,
         content_type = excluded.content_type,
         body = excluded.body,
         cached_at = excluded.cached_at",
      params![
        bucket,
        url_hash(url),
        url,
        asset.status,
        asset.content_type,
        asset.body
      ],
    )?;
    Ok(())
  }

  fn get(&self, bucket: &str, url: &str) -> Result<Option<StoredAsset>> {
    let conn = self.lock()?;
    let row: Option<(u16, Option<String>, Vec<u8>)> = conn
      .query_row(
        "SELECT status, content_type, body FROM assets
         WHERE bucket = ?1 AND url_hash = ?2",
        params![bucket, url_hash(url)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()?;

    Ok(row.map(|(status, content_type, body)| StoredAsset {
      status,
      content_type,
      body,
    }))
  }

  fn get_any(&self, url: &str) -> Result<Option<StoredAsset>> {
    let conn = self.lock()?;
    let row: Option<(u16, Option<String>, Vec<u8>)> = conn
      .query_row(
        "SELECT status, content_type, body FROM assets
         WHERE url_hash = ?1 ORDER BY bucket LIMIT 1",
        params![url_hash(url)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()?;

    Ok(row.map(|(status, content_type, body)| StoredAsset {
      status,
      content_type,
      body,
    }))
  }

  fn list_buckets(&self, prefix: &str) -> Result<Vec<String>> {
    let pattern = format!("{}-%", prefix);
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT name FROM buckets WHERE name LIKE ?1
       UNION
       SELECT DISTINCT bucket FROM assets WHERE bucket LIKE ?1
       ORDER BY 1",
    )?;

    let names = stmt
      .query_map(params![pattern], |row| row.get(0))?
      .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
  }

  fn delete_bucket(&self, bucket: &str) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM assets WHERE bucket = ?1", params![bucket])?;
    tx.execute("DELETE FROM buckets WHERE name = ?1", params![bucket])?;
    tx.commit()?;
    Ok(())
  }
}
