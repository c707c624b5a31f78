//! Storage trait and core types for the tiered asset cache.

use crate::error::Result;

/// A cached response body with the metadata needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

/// Where an asset lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetSource {
  /// Served from a cache bucket
  Cache,
  /// Fetched from the network (and populated on read-through)
  Network,
}

/// Trait for asset cache storage backends.
///
/// A bucket is one physical cache instance; the tier manager names buckets
/// `{prefix}-{label}-{version}` and rotates them by version.
pub trait AssetStorage: Send + Sync {
  /// Record a bucket as existing. Returns true if it was newly created.
  fn register_bucket(&self, bucket: &str) -> Result<bool>;

  /// Store an asset keyed by request URL within a bucket.
  fn put(&self, bucket: &str, url: &str, asset: &StoredAsset) -> Result<()>;

  /// Look up an asset by request URL within a bucket.
  fn get(&self, bucket: &str, url: &str) -> Result<Option<StoredAsset>>;

  /// Look up an asset by request URL across every bucket.
  fn get_any(&self, url: &str) -> Result<Option<StoredAsset>>;

  /// All bucket names under a prefix, including strays that have entries
  /// but no registration row.
  fn list_buckets(&self, prefix: &str) -> Result<Vec<String>>;

  /// Delete a bucket and everything in it.
  fn delete_bucket(&self, bucket: &str) -> Result<()>;
}
