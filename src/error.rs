//! Error taxonomy for the gateway core.
//!
//! None of these errors are fatal to the process: every failure degrades to
//! serving what is available locally, or to retrying on a later trigger.

use thiserror::Error;

/// Errors produced by the caching and sync core.
#[derive(Debug, Error)]
pub enum Error {
  /// A fetch to the remote service failed or returned a non-success status.
  #[error("network request failed: {0}")]
  Network(String),

  /// A local store transaction failed. The affected request degrades to
  /// network-only behavior; the table itself stays intact.
  #[error("store operation failed: {0}")]
  Store(String),

  /// One or more seed resources could not be fetched while populating a
  /// cache tier. The tier remains partially populated and usable.
  #[error("failed to seed cache tier {tier}: {failed:?}")]
  SeedFetch { tier: String, failed: Vec<String> },

  /// A queued mutation's network replay failed; the entry stays queued for
  /// the next trigger.
  #[error("replay of mutation {id} failed: {reason}")]
  Replay { id: i64, reason: String },
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    Error::Store(e.to_string())
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Error::Store(e.to_string())
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    Error::Network(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
