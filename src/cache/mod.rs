//! Named, versioned byte-caches for static shell and image assets.
//!
//! This module provides the tiered cache layer:
//! - Buckets named `{prefix}-{label}-{version}`, one current bucket per tier
//! - Read-through population keyed by request URL
//! - Wholesale version-rotation garbage collection, never per-entry eviction

mod storage;
mod tiers;
mod traits;

pub use storage::SqliteAssetStorage;
pub use tiers::{TierLabel, TierSpec, TieredCacheManager};
pub use traits::{AssetSource, AssetStorage, StoredAsset};
