//! Request classification: an ordered table of (predicate, strategy) rules.
//!
//! Classification is stateless between calls. Each intercepted request is
//! matched against the rules in a fixed precedence order; the first match
//! wins and the final rule is a catch-all passthrough.

use reqwest::Method;
use url::Url;

use crate::cache::TierLabel;
use crate::config::Config;
use crate::error::{Error, Result};

/// An intercepted data-access request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      body: None,
    }
  }
}

/// What to do with a classified request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
  /// Cache-first asset with read-through population into a tier
  Asset { tier: TierLabel },
  /// Serve the shell route from the static cache if present, else network.
  /// No population.
  Shell,
  /// Read-through over the full restaurant list
  Restaurants,
  /// Read-through over one restaurant's reviews
  Reviews { restaurant_id: String },
  /// Create a new review; queued for replay when offline
  CreateReview,
  /// Flip a restaurant's favorite flag; queued for replay when offline
  SetFavorite {
    restaurant_id: String,
    is_favorite: bool,
  },
  /// Serve from any cache bucket if present, else network. No population.
  Passthrough,
}

type Matcher = Box<dyn Fn(&Request) -> Option<Strategy> + Send + Sync>;

struct Rule {
  name: &'static str,
  matcher: Matcher,
}

/// The classification table, built once from config.
pub struct Router {
  rules: Vec<Rule>,
}

impl Router {
  pub fn new(config: &Config) -> Result<Self> {
    let remote = Url::parse(&config.remote.url)
      .map_err(|e| Error::Network(format!("bad remote url {}: {}", config.remote.url, e)))?;
    let remote_authority = authority(&remote);

    let map_origins = config.routes.map_origins.clone();
    let map_paths = config.routes.map_paths.clone();
    let image_prefix = config.site.image_prefix.clone();
    let shell_route = config.site.shell_route.clone();

    // Precedence order matters: earlier rules shadow later ones.
    let rules: Vec<Rule> = vec![
      Rule {
        name: "map-imagery",
        matcher: Box::new(move |req| {
          let origin = req.url.origin().ascii_serialization();
          let from_tile_host = map_origins.iter().any(|o| origin.starts_with(o.as_str()));
          let marker_path = map_paths.iter().any(|p| req.url.path().starts_with(p.as_str()));
          (from_tile_host || marker_path).then_some(Strategy::Asset {
            tier: TierLabel::Maps,
          })
        }),
      },
      Rule {
        name: "photo-imagery",
        matcher: Box::new(move |req| {
          req
            .url
            .path()
            .starts_with(image_prefix.as_str())
            .then_some(Strategy::Asset {
              tier: TierLabel::Images,
            })
        }),
      },
      Rule {
        name: "shell",
        matcher: Box::new(move |req| (req.url.path() == shell_route).then_some(Strategy::Shell)),
      },
      Rule {
        name: "restaurants",
        matcher: {
          let remote_authority = remote_authority.clone();
          Box::new(move |req| {
            (authority(&req.url) == remote_authority
              && req.method == Method::GET
              && req.url.path().trim_end_matches('/') == "/restaurants")
              .then_some(Strategy::Restaurants)
          })
        },
      },
      Rule {
        name: "reviews",
        matcher: {
          let remote_authority = remote_authority.clone();
          Box::new(move |req| {
            if authority(&req.url) != remote_authority || !req.url.path().starts_with("/reviews") {
              return None;
            }
            if req.method == Method::POST {
              Some(Strategy::CreateReview)
            } else if req.method == Method::GET {
              // A reviews query without a parent key falls through to
              // the passthrough rule.
              let restaurant_id = query_param(&req.url, "restaurant_id")?;
              Some(Strategy::Reviews { restaurant_id })
            } else {
              None
            }
          })
        },
      },
      Rule {
        name: "favorite-update",
        matcher: Box::new(move |req| {
          if authority(&req.url) != remote_authority {
            return None;
          }
          if req.method != Method::PUT && req.method != Method::PATCH {
            return None;
          }
          let restaurant_id = req
            .url
            .path()
            .strip_prefix("/restaurants/")?
            .trim_end_matches('/')
            .to_string();
          if restaurant_id.is_empty() {
            return None;
          }
          let is_favorite = query_param(&req.url, "is_favorite")? == "true";
          Some(Strategy::SetFavorite {
            restaurant_id,
            is_favorite,
          })
        }),
      },
      Rule {
        name: "passthrough",
        matcher: Box::new(|_req| Some(Strategy::Passthrough)),
      },
    ];

    Ok(Self { rules })
  }

  /// Classify one request. Evaluated independently of prior requests.
  pub fn classify(&self, request: &Request) -> Strategy {
    for rule in &self.rules {
      if let Some(strategy) = (rule.matcher)(request) {
        tracing::debug!(url = %request.url, rule = rule.name, "classified request");
        return strategy;
      }
    }
    // The passthrough rule always matches; this is unreachable in practice.
    Strategy::Passthrough
  }
}

/// Host plus effective port, the part of the URL the service rules match on.
fn authority(url: &Url) -> String {
  match (url.host_str(), url.port_or_known_default()) {
    (Some(host), Some(port)) => format!("{}:{}", host, port),
    (Some(host), None) => host.to_string(),
    _ => String::new(),
  }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
  url
    .query_pairs()
    .find(|(k, _)| k == name)
    .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn router() -> Router {
    Router::new(&Config::default()).unwrap()
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn with_method(method: Method, url: &str) -> Request {
    Request {
      method,
      url: Url::parse(url).unwrap(),
      body: None,
    }
  }

  #[test]
  fn test_map_tiles_match_first() {
    let strategy = router().classify(&get(
      "https://api.tiles.mapbox.com/v4/mapbox.streets/16/19293/24641.jpg70",
    ));
    assert_eq!(
      strategy,
      Strategy::Asset {
        tier: TierLabel::Maps
      }
    );
  }

  #[test]
  fn test_leaflet_markers_are_map_imagery() {
    let strategy = router().classify(&get(
      "https://unpkg.com/leaflet@1.3.1/dist/images/marker-icon.png",
    ));
    assert_eq!(
      strategy,
      Strategy::Asset {
        tier: TierLabel::Maps
      }
    );
  }

  #[test]
  fn test_local_images_match_photo_tier() {
    let strategy = router().classify(&get("http://localhost:8000/images/3-270.jpg"));
    assert_eq!(
      strategy,
      Strategy::Asset {
        tier: TierLabel::Images
      }
    );
  }

  #[test]
  fn test_shell_route() {
    let strategy = router().classify(&get("http://localhost:8000/restaurant.html?id=5"));
    assert_eq!(strategy, Strategy::Shell);
  }

  #[test]
  fn test_restaurant_list() {
    let strategy = router().classify(&get("http://localhost:1337/restaurants"));
    assert_eq!(strategy, Strategy::Restaurants);
  }

  #[test]
  fn test_restaurant_list_requires_remote_host() {
    let strategy = router().classify(&get("http://localhost:8000/restaurants"));
    assert_eq!(strategy, Strategy::Passthrough);
  }

  #[test]
  fn test_reviews_get_keys_on_parent() {
    let strategy = router().classify(&get("http://localhost:1337/reviews?restaurant_id=5"));
    assert_eq!(
      strategy,
      Strategy::Reviews {
        restaurant_id: "5".to_string()
      }
    );
  }

  #[test]
  fn test_reviews_get_without_parent_falls_through() {
    let strategy = router().classify(&get("http://localhost:1337/reviews"));
    assert_eq!(strategy, Strategy::Passthrough);
  }

  #[test]
  fn test_reviews_post_is_a_mutation() {
    let strategy = router().classify(&with_method(Method::POST, "http://localhost:1337/reviews/"));
    assert_eq!(strategy, Strategy::CreateReview);
  }

  #[test]
  fn test_favorite_put_is_a_mutation() {
    let strategy = router().classify(&with_method(
      Method::PUT,
      "http://localhost:1337/restaurants/3?is_favorite=true",
    ));
    assert_eq!(
      strategy,
      Strategy::SetFavorite {
        restaurant_id: "3".to_string(),
        is_favorite: true
      }
    );
  }

  #[test]
  fn test_favorite_put_false() {
    let strategy = router().classify(&with_method(
      Method::PUT,
      "http://localhost:1337/restaurants/3?is_favorite=false",
    ));
    assert_eq!(
      strategy,
      Strategy::SetFavorite {
        restaurant_id: "3".to_string(),
        is_favorite: false
      }
    );
  }

  #[test]
  fn test_unmatched_is_passthrough() {
    let strategy = router().classify(&get("https://fonts.example.com/roboto.woff2"));
    assert_eq!(strategy, Strategy::Passthrough);
  }
}
