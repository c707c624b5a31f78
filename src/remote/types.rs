use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A restaurant record as served by the reviews service.
///
/// The store keeps documents opaque; this typed view exists for CLI output
/// and carries unrecognized fields through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Restaurant {
  pub id: i64,
  pub name: String,
  #[serde(default)]
  pub neighborhood: Option<String>,
  #[serde(default)]
  pub cuisine_type: Option<String>,
  /// The service historically serves this as either a bool or the strings
  /// "true"/"false"
  #[serde(default)]
  pub is_favorite: Option<Value>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Restaurant {
  pub fn is_favorite(&self) -> bool {
    match &self.is_favorite {
      Some(Value::Bool(b)) => *b,
      Some(Value::String(s)) => s == "true",
      _ => false,
    }
  }
}

/// A review record as served by the reviews service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
  #[serde(default)]
  pub id: Option<i64>,
  pub restaurant_id: i64,
  pub name: String,
  pub rating: i64,
  pub comments: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A new review as submitted by the client, before the service assigns
/// an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDraft {
  pub restaurant_id: i64,
  pub name: String,
  pub rating: i64,
  pub comments: String,
}
