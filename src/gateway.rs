//! Strategy execution: answers every intercepted request exactly once.
//!
//! The gateway owns the tier manager, the structured store, the sync
//! coordinator and the remote client. Each request is classified by the
//! router and runs one strategy; internal failures degrade toward a direct
//! network attempt rather than leaving the request unanswered.

use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{
  AssetSource, SqliteAssetStorage, StoredAsset, TierLabel, TierSpec, TieredCacheManager,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::remote::types::ReviewDraft;
use crate::remote::RemoteClient;
use crate::router::{Request, Router, Strategy};
use crate::store::{MutationKind, PendingMutation, StructuredStore, RESTAURANTS, REVIEWS};
use crate::sync::{ReplayTransport, SyncCoordinator};

/// Where a response body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
  /// Fresh from the network
  Network,
  /// Served from an asset cache bucket
  AssetCache,
  /// Served from the structured store
  Store,
  /// Applied locally while offline, pending replay
  LocalEcho,
}

/// The response envelope handed back to the originating request.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub origin: Origin,
}

impl Response {
  fn from_asset(asset: StoredAsset, source: AssetSource) -> Self {
    let origin = match source {
      AssetSource::Cache => Origin::AssetCache,
      AssetSource::Network => Origin::Network,
    };
    Self {
      status: asset.status,
      content_type: asset.content_type,
      body: asset.body,
      origin,
    }
  }

  fn json(value: &Value, origin: Origin) -> Result<Self> {
    Ok(Self {
      status: 200,
      content_type: Some("application/json".to_string()),
      body: serde_json::to_vec(value)?,
      origin,
    })
  }

  fn with_status(mut self, status: u16) -> Self {
    self.status = status;
    self
  }
}

/// Replays queued mutations through the remote client.
pub struct RemoteReplay {
  remote: RemoteClient,
}

impl ReplayTransport for RemoteReplay {
  fn replay<'a>(&'a self, mutation: &'a PendingMutation) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      match &mutation.kind {
        MutationKind::CreateReview { payload, .. } => {
          self.remote.create_review(payload).await?;
        }
        MutationKind::SetFavorite {
          restaurant_id,
          is_favorite,
        } => {
          self.remote.set_favorite(restaurant_id, *is_favorite).await?;
        }
      }
      Ok(())
    })
  }
}

/// The offline-first gateway between the client app and the reviews
/// service.
pub struct Gateway {
  config: Config,
  router: Router,
  cache: TieredCacheManager<SqliteAssetStorage>,
  store: Arc<StructuredStore>,
  sync: Arc<SyncCoordinator<RemoteReplay>>,
  remote: RemoteClient,
  tiers: [TierSpec; 3],
}

impl Gateway {
  /// Open the gateway with its databases at the default locations.
  pub fn open(config: Config) -> Result<Self> {
    let assets = SqliteAssetStorage::open()?;
    let store = StructuredStore::open()?;
    Self::with_components(config, assets, store)
  }

  /// Wire the gateway from explicitly opened components.
  pub fn with_components(
    config: Config,
    assets: SqliteAssetStorage,
    store: StructuredStore,
  ) -> Result<Self> {
    let router = Router::new(&config)?;
    let remote = RemoteClient::new(&config.remote)?;
    let store = Arc::new(store);
    let sync = Arc::new(SyncCoordinator::new(
      Arc::clone(&store),
      RemoteReplay {
        remote: remote.clone(),
      },
    ));
    let tiers = TierSpec::current(&config.cache);

    Ok(Self {
      config,
      router,
      cache: TieredCacheManager::new(assets),
      store,
      sync,
      remote,
      tiers,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn store(&self) -> &StructuredStore {
    &self.store
  }

  pub fn sync(&self) -> &Arc<SyncCoordinator<RemoteReplay>> {
    &self.sync
  }

  pub fn classify(&self, request: &Request) -> Strategy {
    self.router.classify(request)
  }

  fn tier(&self, label: TierLabel) -> &TierSpec {
    match label {
      TierLabel::Static => &self.tiers[0],
      TierLabel::Maps => &self.tiers[1],
      TierLabel::Images => &self.tiers[2],
    }
  }

  /// The install/activate lifecycle: ensure the current tiers exist, seed
  /// the shell tier on first creation, then drop buckets that fell out of
  /// the allow-list.
  ///
  /// Nothing here is fatal. A partial seeding leaves the tier serving what
  /// it got; a broken cache store degrades every request to network-only.
  pub async fn startup(&self) {
    for spec in &self.tiers {
      let seeds = if spec.label == TierLabel::Static {
        self.config.shell_seed_urls()
      } else {
        Vec::new()
      };
      let fetch = |url: String| {
        let remote = self.remote.clone();
        async move {
          let url =
            Url::parse(&url).map_err(|e| Error::Network(format!("bad seed url {}: {}", url, e)))?;
          remote.fetch_raw(Method::GET, &url, None).await
        }
      };

      match self.cache.ensure_tier(spec, &seeds, fetch).await {
        Ok(()) => {}
        Err(Error::SeedFetch { tier, failed }) => {
          warn!(%tier, missing = failed.len(), "cache tier seeded partially");
        }
        Err(e) => warn!(error = %e, "cache tier unavailable"),
      }
    }

    match self.collect_garbage() {
      Ok(removed) if !removed.is_empty() => {
        info!(removed = removed.len(), "dropped stale cache buckets");
      }
      Ok(_) => {}
      Err(e) => warn!(error = %e, "cache garbage collection failed"),
    }
  }

  /// Delete cache buckets under the app prefix that are not current.
  pub fn collect_garbage(&self) -> Result<Vec<String>> {
    let allow: Vec<String> = self.tiers.iter().map(|t| t.bucket_name()).collect();
    self.cache.garbage_collect(&self.config.cache.prefix, &allow)
  }

  /// Answer one intercepted request.
  pub async fn handle(&self, request: Request) -> Result<Response> {
    match self.router.classify(&request) {
      Strategy::Asset { tier } => self.serve_asset(tier, &request).await,
      Strategy::Shell => self.serve_shell(&request).await,
      Strategy::Restaurants => self.serve_restaurants().await,
      Strategy::Reviews { restaurant_id } => self.serve_reviews(&restaurant_id).await,
      Strategy::CreateReview => self.create_review(&request).await,
      Strategy::SetFavorite {
        restaurant_id,
        is_favorite,
      } => self.set_favorite(&restaurant_id, is_favorite).await,
      Strategy::Passthrough => self.passthrough(&request).await,
    }
  }

  async fn serve_asset(&self, label: TierLabel, request: &Request) -> Result<Response> {
    let spec = self.tier(label);
    let fetch = || {
      let remote = self.remote.clone();
      let url = request.url.clone();
      async move { remote.fetch_raw(Method::GET, &url, None).await }
    };

    match self.cache.read_through(spec, request.url.as_str(), fetch).await {
      Ok((asset, source)) => Ok(Response::from_asset(asset, source)),
      Err(Error::Store(reason)) => {
        warn!(%reason, "asset cache unavailable; serving from network");
        let asset = self.remote.fetch_raw(Method::GET, &request.url, None).await?;
        Ok(Response::from_asset(asset, AssetSource::Network))
      }
      Err(e) => Err(e),
    }
  }

  /// Cache-first shell: serve the seeded page if present, else fetch. The
  /// page was seeded without its query string, so the probe drops it too.
  async fn serve_shell(&self, request: &Request) -> Result<Response> {
    let mut key = request.url.clone();
    key.set_query(None);
    key.set_fragment(None);

    match self.cache.lookup(self.tier(TierLabel::Static), key.as_str()) {
      Ok(Some(asset)) => return Ok(Response::from_asset(asset, AssetSource::Cache)),
      Ok(None) => {}
      Err(e) => warn!(error = %e, "shell cache unavailable"),
    }
    self.network_only(request).await
  }

  async fn serve_restaurants(&self) -> Result<Response> {
    match self.store.list_entities(RESTAURANTS) {
      Ok(docs) if !docs.is_empty() => {
        return Response::json(&Value::Array(docs), Origin::Store);
      }
      Ok(_) => {}
      Err(e) => {
        warn!(error = %e, "entity store unavailable; serving from network");
        let docs = self.remote.list_restaurants().await?;
        return Response::json(&Value::Array(docs), Origin::Network);
      }
    }

    let docs = self.remote.list_restaurants().await?;
    if let Err(e) = self.populate_restaurants(&docs) {
      warn!(error = %e, "restaurant list not cached locally");
    }
    Response::json(&Value::Array(docs), Origin::Network)
  }

  fn populate_restaurants(&self, docs: &[Value]) -> Result<()> {
    for doc in docs {
      self.store.put_entity(RESTAURANTS, doc)?;
    }
    Ok(())
  }

  async fn serve_reviews(&self, restaurant_id: &str) -> Result<Response> {
    match self.store.get_collection(REVIEWS, restaurant_id) {
      Ok(Some(items)) if !items.is_empty() => {
        return Response::json(&Value::Array(items), Origin::Store);
      }
      Ok(_) => {}
      Err(e) => {
        warn!(error = %e, "collection store unavailable; serving from network");
        let items = self.remote.list_reviews(restaurant_id).await?;
        return Response::json(&Value::Array(items), Origin::Network);
      }
    }

    let items = self.remote.list_reviews(restaurant_id).await?;
    if let Err(e) = self.store.put_collection(REVIEWS, restaurant_id, &items) {
      warn!(error = %e, "review collection not cached locally");
    }
    Response::json(&Value::Array(items), Origin::Network)
  }

  /// Write-through review creation. Online, the service's response (with
  /// its assigned id) is appended to the local collection; offline, the
  /// write is queued and echoed locally.
  async fn create_review(&self, request: &Request) -> Result<Response> {
    let raw = request.body.as_deref().unwrap_or_default();
    let draft: ReviewDraft = match serde_json::from_slice(raw) {
      Ok(draft) => draft,
      // Not a review we understand; let the service answer.
      Err(_) => return self.network_only(request).await,
    };
    let restaurant_id = draft.restaurant_id.to_string();
    let payload = serde_json::to_value(&draft)?;

    match self.remote.create_review(&payload).await {
      Ok(created) => {
        if let Err(e) = self.store.append_to_collection(REVIEWS, &restaurant_id, &created) {
          warn!(error = %e, "created review not cached locally");
        }
        Ok(Response::json(&created, Origin::Network)?.with_status(201))
      }
      Err(Error::Network(reason)) => {
        info!(%reason, "review submission failed; recording offline");
        let (_, local) = self.sync.record_offline(MutationKind::CreateReview {
          restaurant_id,
          payload,
        })?;
        Ok(Response::json(&local, Origin::LocalEcho)?.with_status(201))
      }
      Err(e) => Err(e),
    }
  }

  /// Write-through favorite flag update.
  async fn set_favorite(&self, restaurant_id: &str, is_favorite: bool) -> Result<Response> {
    match self.remote.set_favorite(restaurant_id, is_favorite).await {
      Ok(updated) => {
        if let Err(e) = self.store.put_entity(RESTAURANTS, &updated) {
          warn!(error = %e, "updated restaurant not cached locally");
        }
        Response::json(&updated, Origin::Network)
      }
      Err(Error::Network(reason)) => {
        info!(%reason, "favorite update failed; recording offline");
        let (_, local) = self.sync.record_offline(MutationKind::SetFavorite {
          restaurant_id: restaurant_id.to_string(),
          is_favorite,
        })?;
        Response::json(&local, Origin::LocalEcho)
      }
      Err(e) => Err(e),
    }
  }

  /// Serve from any cache bucket if present, else network. No population.
  async fn passthrough(&self, request: &Request) -> Result<Response> {
    match self.cache.lookup_any(request.url.as_str()) {
      Ok(Some(asset)) => return Ok(Response::from_asset(asset, AssetSource::Cache)),
      Ok(None) => {}
      Err(e) => warn!(error = %e, "cache unavailable for passthrough"),
    }
    self.network_only(request).await
  }

  /// The last resort: a direct network attempt.
  async fn network_only(&self, request: &Request) -> Result<Response> {
    let asset = self
      .remote
      .fetch_raw(request.method.clone(), &request.url, request.body.clone())
      .await?;
    Ok(Response::from_asset(asset, AssetSource::Network))
  }
}
