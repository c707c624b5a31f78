//! Tier manager that orchestrates versioned asset buckets.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{Error, Result};

use super::storage::SqliteAssetStorage;
use super::traits::{AssetSource, AssetStorage, StoredAsset};

/// Logical asset tiers, one per kind of static content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierLabel {
  /// App shell: html, css, js
  Static,
  /// Map tiles and markers
  Maps,
  /// Photo assets
  Images,
}

impl TierLabel {
  pub fn as_str(&self) -> &'static str {
    match self {
      TierLabel::Static => "static",
      TierLabel::Maps => "maps",
      TierLabel::Images => "imgs",
    }
  }
}

/// A named, versioned asset bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSpec {
  pub prefix: String,
  pub label: TierLabel,
  pub version: String,
}

impl TierSpec {
  /// The physical bucket name, e.g. `rest-rev-app-static-v6`.
  pub fn bucket_name(&self) -> String {
    format!("{}-{}-{}", self.prefix, self.label.as_str(), self.version)
  }

  /// Tier specs for the current config, in allow-list order.
  pub fn current(config: &CacheConfig) -> [TierSpec; 3] {
    let spec = |label: TierLabel, version: &str| TierSpec {
      prefix: config.prefix.clone(),
      label,
      version: version.to_string(),
    };
    [
      spec(TierLabel::Static, &config.static_version),
      spec(TierLabel::Maps, &config.maps_version),
      spec(TierLabel::Images, &config.images_version),
    ]
  }
}

/// Manages named, versioned byte-caches with read-through population and
/// version-based garbage collection.
///
/// There is no size-bounded eviction of individual entries. The only
/// eviction mechanism is version rotation at deploy time: a bucket whose
/// name drops out of the allow-list is deleted wholesale.
pub struct TieredCacheManager<S: AssetStorage = SqliteAssetStorage> {
  storage: Arc<S>,
}

impl<S: AssetStorage> TieredCacheManager<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Idempotently create/open the versioned bucket and, on first creation,
  /// populate it with the given seed resources.
  ///
  /// Seeds are fetched concurrently. Any unreachable seed makes this return
  /// `Error::SeedFetch` listing the failures, but every seed that did fetch
  /// is kept: the tier stays partially populated and usable.
  pub async fn ensure_tier<F, Fut>(
    &self,
    tier: &TierSpec,
    seed_urls: &[String],
    fetcher: F,
  ) -> Result<()>
  where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<StoredAsset>>,
  {
    let bucket = tier.bucket_name();
    let created = self.storage.register_bucket(&bucket)?;
    if !created {
      return Ok(());
    }
    if seed_urls.is_empty() {
      return Ok(());
    }

    debug!(%bucket, seeds = seed_urls.len(), "seeding new cache tier");
    let fetches = seed_urls.iter().map(|url| {
      let fut = fetcher(url.clone());
      async move { (url.clone(), fut.await) }
    });

    let mut failed = Vec::new();
    for (url, fetched) in join_all(fetches).await {
      match fetched {
        Ok(asset) => {
          if let Err(e) = self.storage.put(&bucket, &url, &asset) {
            warn!(%bucket, %url, error = %e, "failed to store seed resource");
            failed.push(url);
          }
        }
        Err(e) => {
          warn!(%bucket, %url, error = %e, "failed to fetch seed resource");
          failed.push(url);
        }
      }
    }

    if failed.is_empty() {
      Ok(())
    } else {
      Err(Error::SeedFetch {
        tier: bucket,
        failed,
      })
    }
  }

  /// Pure cache probe, no side effects.
  pub fn lookup(&self, tier: &TierSpec, url: &str) -> Result<Option<StoredAsset>> {
    self.storage.get(&tier.bucket_name(), url)
  }

  /// Probe every bucket, used by the passthrough strategy.
  pub fn lookup_any(&self, url: &str) -> Result<Option<StoredAsset>> {
    self.storage.get_any(url)
  }

  /// Serve the cached asset if present; on miss, invoke the fetcher, store
  /// the result keyed by `url`, and serve it.
  ///
  /// On fetch failure the error propagates and nothing is populated.
  pub async fn read_through<F, Fut>(
    &self,
    tier: &TierSpec,
    url: &str,
    fetcher: F,
  ) -> Result<(StoredAsset, AssetSource)>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredAsset>>,
  {
    let bucket = tier.bucket_name();
    if let Some(hit) = self.storage.get(&bucket, url)? {
      return Ok((hit, AssetSource::Cache));
    }

    let fetched = fetcher().await?;
    self.storage.put(&bucket, url, &fetched)?;
    Ok((fetched, AssetSource::Network))
  }

  /// Delete every bucket under the app prefix whose name is not in the
  /// allow-list. Invoked once at startup; calling it again with the same
  /// allow-list removes nothing further.
  ///
  /// Returns the names of the buckets removed.
  pub fn garbage_collect(&self, prefix: &str, allow_list: &[String]) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for bucket in self.storage.list_buckets(prefix)? {
      if !allow_list.contains(&bucket) {
        self.storage.delete_bucket(&bucket)?;
        removed.push(bucket);
      }
    }
    Ok(removed)
  }
}

impl<S: AssetStorage> Clone for TieredCacheManager<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn tier(label: TierLabel, version: &str) -> TierSpec {
    TierSpec {
      prefix: "app".to_string(),
      label,
      version: version.to_string(),
    }
  }

  fn asset(body: &str) -> StoredAsset {
    StoredAsset {
      status: 200,
      content_type: Some("text/css".to_string()),
      body: body.as_bytes().to_vec(),
    }
  }

  fn manager() -> TieredCacheManager<SqliteAssetStorage> {
    TieredCacheManager::new(SqliteAssetStorage::open_in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_ensure_tier_seeds_once() {
    let manager = manager();
    let spec = tier(TierLabel::Static, "v1");
    let fetches = AtomicUsize::new(0);

    let seeds = vec!["http://site/a".to_string(), "http://site/b".to_string()];
    manager
      .ensure_tier(&spec, &seeds, |_url| {
        fetches.fetch_add(1, Ordering::SeqCst);
        async { Ok(asset("seed")) }
      })
      .await
      .unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert!(manager.lookup(&spec, "http://site/a").unwrap().is_some());

    // Second call is idempotent: the tier exists, nothing refetches
    manager
      .ensure_tier(&spec, &seeds, |_url| {
        fetches.fetch_add(1, Ordering::SeqCst);
        async { Ok(asset("seed")) }
      })
      .await
      .unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_ensure_tier_partial_seed_failure_keeps_tier_usable() {
    let manager = manager();
    let spec = tier(TierLabel::Static, "v1");
    let seeds = vec![
      "http://site/good".to_string(),
      "http://site/unreachable".to_string(),
    ];

    let err = manager
      .ensure_tier(&spec, &seeds, |url| async move {
        if url.ends_with("unreachable") {
          Err(Error::Network("connection refused".to_string()))
        } else {
          Ok(asset("seed"))
        }
      })
      .await
      .unwrap_err();

    match err {
      Error::SeedFetch { failed, .. } => {
        assert_eq!(failed, vec!["http://site/unreachable".to_string()])
      }
      other => panic!("expected SeedFetch, got {:?}", other),
    }
    // The seed that did fetch is served
    assert!(manager.lookup(&spec, "http://site/good").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_read_through_populates_on_miss_only() {
    let manager = manager();
    let spec = tier(TierLabel::Images, "v1");
    manager.ensure_tier(&spec, &[], |_| async { Ok(asset("")) }).await.unwrap();
    let fetches = AtomicUsize::new(0);

    let (first, source) = manager
      .read_through(&spec, "http://site/images/1.jpg", || {
        fetches.fetch_add(1, Ordering::SeqCst);
        async { Ok(asset("jpeg")) }
      })
      .await
      .unwrap();
    assert_eq!(source, AssetSource::Network);
    assert_eq!(first.body, b"jpeg");

    let (second, source) = manager
      .read_through(&spec, "http://site/images/1.jpg", || {
        fetches.fetch_add(1, Ordering::SeqCst);
        async { Ok(asset("refetched")) }
      })
      .await
      .unwrap();
    assert_eq!(source, AssetSource::Cache);
    assert_eq!(second.body, b"jpeg");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_read_through_fetch_failure_does_not_populate() {
    let manager = manager();
    let spec = tier(TierLabel::Maps, "v1");

    let err = manager
      .read_through(&spec, "http://tiles/4/8/7.jpg", || async {
        Err(Error::Network("offline".to_string()))
      })
      .await;
    assert!(err.is_err());
    assert!(manager.lookup(&spec, "http://tiles/4/8/7.jpg").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_garbage_collect_is_idempotent() {
    let manager = manager();
    let old = tier(TierLabel::Static, "v1");
    let new = tier(TierLabel::Static, "v2");
    for spec in [&old, &new] {
      manager.ensure_tier(spec, &[], |_| async { Ok(asset("")) }).await.unwrap();
    }

    let allow = vec![new.bucket_name()];
    let removed = manager.garbage_collect("app", &allow).unwrap();
    assert_eq!(removed, vec![old.bucket_name()]);

    // Same allow-list again: same surviving set, nothing more to remove
    let removed = manager.garbage_collect("app", &allow).unwrap();
    assert!(removed.is_empty());
  }

  #[tokio::test]
  async fn test_garbage_collect_leaves_foreign_buckets() {
    let storage = SqliteAssetStorage::open_in_memory().unwrap();
    storage.register_bucket("other-app-static-v1").unwrap();
    let manager = TieredCacheManager::new(storage);

    let removed = manager.garbage_collect("app", &[]).unwrap();
    assert!(removed.is_empty());
  }
}
