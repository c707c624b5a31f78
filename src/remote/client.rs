use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::cache::StoredAsset;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};

/// Thin client for the reviews service REST API.
#[derive(Clone)]
pub struct RemoteClient {
  http: reqwest::Client,
  base: Url,
}

impl RemoteClient {
  pub fn new(config: &RemoteConfig) -> Result<Self> {
    let base = Url::parse(&config.url)
      .map_err(|e| Error::Network(format!("bad remote url {}: {}", config.url, e)))?;
    Ok(Self {
      http: reqwest::Client::new(),
      base,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| Error::Network(format!("bad endpoint {}: {}", path, e)))
  }

  /// GET /restaurants
  pub async fn list_restaurants(&self) -> Result<Vec<Value>> {
    let url = self.endpoint("/restaurants")?;
    let response = self.http.get(url.clone()).send().await?;
    if !response.status().is_success() {
      return Err(Error::Network(format!(
        "GET {} returned {}",
        url,
        response.status()
      )));
    }
    Ok(response.json().await?)
  }

  /// GET /reviews?restaurant_id={id}
  pub async fn list_reviews(&self, restaurant_id: &str) -> Result<Vec<Value>> {
    let mut url = self.endpoint("/reviews")?;
    url
      .query_pairs_mut()
      .append_pair("restaurant_id", restaurant_id);
    let response = self.http.get(url.clone()).send().await?;
    if !response.status().is_success() {
      return Err(Error::Network(format!(
        "GET {} returned {}",
        url,
        response.status()
      )));
    }
    Ok(response.json().await?)
  }

  /// POST /reviews/. The service responds with the created review,
  /// including its assigned id.
  pub async fn create_review(&self, draft: &Value) -> Result<Value> {
    let url = self.endpoint("/reviews/")?;
    let response = self.http.post(url.clone()).json(draft).send().await?;
    if !response.status().is_success() {
      return Err(Error::Network(format!(
        "POST {} returned {}",
        url,
        response.status()
      )));
    }
    Ok(response.json().await?)
  }

  /// PUT /restaurants/{id}?is_favorite={bool}. Responds with the updated
  /// restaurant.
  pub async fn set_favorite(&self, restaurant_id: &str, is_favorite: bool) -> Result<Value> {
    let mut url = self.endpoint(&format!("/restaurants/{}", restaurant_id))?;
    url
      .query_pairs_mut()
      .append_pair("is_favorite", if is_favorite { "true" } else { "false" });
    let response = self.http.put(url.clone()).send().await?;
    if !response.status().is_success() {
      return Err(Error::Network(format!(
        "PUT {} returned {}",
        url,
        response.status()
      )));
    }
    Ok(response.json().await?)
  }

  /// Fetch an arbitrary resource, for asset tiers and passthrough.
  ///
  /// A non-success status counts as a network failure, so read-through
  /// callers never populate a tier with an error page.
  pub async fn fetch_raw(
    &self,
    method: Method,
    url: &Url,
    body: Option<Vec<u8>>,
  ) -> Result<StoredAsset> {
    let mut request = self.http.request(method.clone(), url.clone());
    if let Some(body) = body {
      request = request.body(body);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(Error::Network(format!(
        "{} {} returned {}",
        method, url, status
      )));
    }

    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response.bytes().await?.to_vec();

    Ok(StoredAsset {
      status: status.as_u16(),
      content_type,
      body,
    })
  }
}
