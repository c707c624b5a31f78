use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub remote: RemoteConfig,
  #[serde(default)]
  pub site: SiteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub routes: RouteConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

/// The remote data service the gateway fronts.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the reviews service
  #[serde(default = "default_remote_url")]
  pub url: String,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      url: default_remote_url(),
    }
  }
}

/// The site whose requests are intercepted.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
  /// Origin the app shell is served from
  #[serde(default = "default_site_origin")]
  pub origin: String,
  /// Path of the single-page-detail shell route
  #[serde(default = "default_shell_route")]
  pub shell_route: String,
  /// Path prefix of locally served photo assets
  #[serde(default = "default_image_prefix")]
  pub image_prefix: String,
}

impl Default for SiteConfig {
  fn default() -> Self {
    Self {
      origin: default_site_origin(),
      shell_route: default_shell_route(),
      image_prefix: default_image_prefix(),
    }
  }
}

/// Cache tier namespace and versions.
///
/// Bumping a version at deploy time rotates that tier: the old bucket drops
/// out of the allow-list and is deleted wholesale on the next startup.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Application-scoped bucket name prefix
  #[serde(default = "default_cache_prefix")]
  pub prefix: String,
  #[serde(default = "default_version")]
  pub static_version: String,
  #[serde(default = "default_version")]
  pub maps_version: String,
  #[serde(default = "default_version")]
  pub images_version: String,
  /// Shell paths seeded into the static tier on first creation,
  /// resolved against `site.origin`
  #[serde(default = "default_seed_paths")]
  pub seed_paths: Vec<String>,
  /// Absolute URLs seeded into the static tier on first creation
  #[serde(default = "default_seed_urls")]
  pub seed_urls: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: default_cache_prefix(),
      static_version: default_version(),
      maps_version: default_version(),
      images_version: default_version(),
      seed_paths: default_seed_paths(),
      seed_urls: default_seed_urls(),
    }
  }
}

/// URL patterns for the asset classification rules.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
  /// Origins serving map tiles and markers
  #[serde(default = "default_map_origins")]
  pub map_origins: Vec<String>,
  /// Path prefixes of map marker images served from CDN
  #[serde(default = "default_map_paths")]
  pub map_paths: Vec<String>,
}

impl Default for RouteConfig {
  fn default() -> Self {
    Self {
      map_origins: default_map_origins(),
      map_paths: default_map_paths(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Seconds between recurring replay triggers in watch mode
  #[serde(default = "default_replay_interval")]
  pub replay_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      replay_interval_secs: default_replay_interval(),
    }
  }
}

fn default_remote_url() -> String {
  "http://localhost:1337".to_string()
}

fn default_site_origin() -> String {
  "http://localhost:8000".to_string()
}

fn default_shell_route() -> String {
  "/restaurant.html".to_string()
}

fn default_image_prefix() -> String {
  "/images/".to_string()
}

fn default_cache_prefix() -> String {
  "rest-rev-app".to_string()
}

fn default_version() -> String {
  "v6".to_string()
}

fn default_seed_paths() -> Vec<String> {
  [
    "/",
    "/restaurant.html",
    "/js/main.js",
    "/js/dbHelper.js",
    "/js/restaurantInfo.js",
    "/css/styles.css",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_seed_urls() -> Vec<String> {
  [
    "https://unpkg.com/leaflet@1.3.1/dist/leaflet.css",
    "https://unpkg.com/leaflet@1.3.1/dist/leaflet.js",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_map_origins() -> Vec<String> {
  vec!["https://api.tiles.mapbox.com".to_string()]
}

fn default_map_paths() -> Vec<String> {
  vec!["/leaflet@1.3.1/dist/images/".to_string()]
}

fn default_replay_interval() -> u64 {
  300
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./outpost.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/outpost/config.yaml
  ///
  /// Every field has a default, so a missing config file yields a complete
  /// configuration pointed at the local dev servers.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("outpost.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("outpost").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// All static-tier seed resources as absolute URLs.
  pub fn shell_seed_urls(&self) -> Vec<String> {
    let origin = self.site.origin.trim_end_matches('/');
    self
      .cache
      .seed_paths
      .iter()
      .map(|p| format!("{}{}", origin, p))
      .chain(self.cache.seed_urls.iter().cloned())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_complete() {
    let config = Config::default();
    assert_eq!(config.remote.url, "http://localhost:1337");
    assert_eq!(config.cache.prefix, "rest-rev-app");
    assert_eq!(config.cache.static_version, "v6");
    assert_eq!(config.site.shell_route, "/restaurant.html");
    assert!(!config.routes.map_origins.is_empty());
  }

  #[test]
  fn test_partial_yaml_fills_defaults() {
    let config: Config = serde_yaml::from_str(
      "remote:\n  url: http://reviews.example.com\ncache:\n  static_version: v7\n",
    )
    .unwrap();
    assert_eq!(config.remote.url, "http://reviews.example.com");
    assert_eq!(config.cache.static_version, "v7");
    // Untouched sections keep their defaults
    assert_eq!(config.cache.maps_version, "v6");
    assert_eq!(config.site.origin, "http://localhost:8000");
  }

  #[test]
  fn test_shell_seed_urls_resolve_relative_paths() {
    let config = Config::default();
    let seeds = config.shell_seed_urls();
    assert!(seeds.contains(&"http://localhost:8000/restaurant.html".to_string()));
    assert!(seeds.contains(&"https://unpkg.com/leaflet@1.3.1/dist/leaflet.js".to_string()));
  }
}
