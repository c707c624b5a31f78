//! Offline write queue and replay coordination.
//!
//! Mutation lifecycle: created when a write fails to reach the network,
//! queued durably in the structured store, replayed on a connectivity
//! trigger, and removed only after the remote service acknowledges the
//! replay. A failed replay leaves the entry queued for the next trigger;
//! there is no backoff and no retry cap.

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::{MutationKind, PendingMutation, StructuredStore, RESTAURANTS, REVIEWS};

/// Network write path used to replay queued mutations.
///
/// A trait seam so tests can script acknowledgments and failures; the
/// production implementation wraps the remote client.
pub trait ReplayTransport: Send + Sync {
  /// Re-issue the queued write against the remote service.
  fn replay<'a>(&'a self, mutation: &'a PendingMutation) -> BoxFuture<'a, Result<()>>;
}

/// Outcome of one replay pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
  pub replayed: usize,
  pub failed: usize,
}

/// Handle that fires the replay loop, e.g. when connectivity returns.
#[derive(Clone)]
pub struct ReplayTrigger {
  tx: mpsc::UnboundedSender<()>,
}

impl ReplayTrigger {
  /// Request a replay pass. Returns false if the trigger task is gone.
  pub fn fire(&self) -> bool {
    self.tx.send(()).is_ok()
  }
}

/// Persists writes issued while offline, replays them on triggers, and
/// broadcasts status messages to observers.
pub struct SyncCoordinator<T: ReplayTransport> {
  store: Arc<StructuredStore>,
  transport: T,
  status_tx: broadcast::Sender<String>,
  // Serializes replay passes: a second trigger re-runs after, not during,
  // the one in flight.
  replay_lock: tokio::sync::Mutex<()>,
}

impl<T: ReplayTransport> SyncCoordinator<T> {
  pub fn new(store: Arc<StructuredStore>, transport: T) -> Self {
    let (status_tx, _) = broadcast::channel(16);
    Self {
      store,
      transport,
      status_tx,
      replay_lock: tokio::sync::Mutex::new(()),
    }
  }

  /// Observe sync status messages. No acknowledgment is expected; slow or
  /// dropped observers miss messages rather than blocking the coordinator.
  pub fn subscribe(&self) -> broadcast::Receiver<String> {
    self.status_tx.subscribe()
  }

  /// Queue a write that could not reach the network, apply its effect
  /// locally so the caller sees it immediately, and notify observers.
  ///
  /// Returns the queued mutation and the locally applied document.
  pub fn record_offline(&self, kind: MutationKind) -> Result<(PendingMutation, Value)> {
    let mutation = self.store.enqueue_mutation(&kind)?;
    let local = self.apply_locally(&kind)?;

    let message = match &kind {
      MutationKind::CreateReview { .. } => "Review saved offline and queued for sync",
      MutationKind::SetFavorite { .. } => "Favorite change saved offline and queued for sync",
    };
    info!(id = mutation.id, kind = kind.label(), "queued offline write");
    let _ = self.status_tx.send(message.to_string());

    Ok((mutation, local))
  }

  /// Apply a mutation's effect through the store's own write path, which
  /// keeps collection-append logic in one place.
  fn apply_locally(&self, kind: &MutationKind) -> Result<Value> {
    match kind {
      MutationKind::CreateReview {
        restaurant_id,
        payload,
      } => {
        // Echo the fields the service would set; the real id arrives only
        // with the replay acknowledgment.
        let now = Utc::now().to_rfc3339();
        let mut doc = payload.clone();
        if let Value::Object(map) = &mut doc {
          map.insert("createdAt".to_string(), json!(now));
          map.insert("updatedAt".to_string(), json!(now));
        }
        self.store.append_to_collection(REVIEWS, restaurant_id, &doc)?;
        Ok(doc)
      }
      MutationKind::SetFavorite {
        restaurant_id,
        is_favorite,
      } => {
        let mut doc = match self.store.get_entity(RESTAURANTS, restaurant_id)? {
          Some(doc) => doc,
          // Nothing cached for this restaurant yet; create the minimal
          // record so the flag survives.
          None => match restaurant_id.parse::<i64>() {
            Ok(n) => json!({ "id": n }),
            Err(_) => json!({ "id": restaurant_id }),
          },
        };
        if let Value::Object(map) = &mut doc {
          map.insert("is_favorite".to_string(), json!(is_favorite));
        }
        self.store.put_entity(RESTAURANTS, &doc)?;
        Ok(doc)
      }
    }
  }

  /// Replay all queued mutations in FIFO order.
  ///
  /// Each entry is removed exactly when its replay is acknowledged; a
  /// failure leaves the entry queued and the loop continues, so one bad
  /// entry never blocks the rest.
  pub async fn replay_all(&self) -> Result<ReplayReport> {
    let _guard = self.replay_lock.lock().await;

    let pending = self.store.list_pending_mutations()?;
    if pending.is_empty() {
      return Ok(ReplayReport::default());
    }
    debug!(pending = pending.len(), "replaying queued mutations");

    let mut report = ReplayReport::default();
    for mutation in pending {
      match self.replay_one(&mutation).await {
        Ok(()) => {
          self.store.dequeue_mutation(mutation.id)?;
          report.replayed += 1;
        }
        Err(e) => {
          warn!(error = %e, "leaving mutation queued");
          report.failed += 1;
        }
      }
    }

    if report.replayed > 0 {
      let _ = self
        .status_tx
        .send(format!("Synced {} offline change(s)", report.replayed));
    }
    Ok(report)
  }

  async fn replay_one(&self, mutation: &PendingMutation) -> Result<()> {
    self
      .transport
      .replay(mutation)
      .await
      .map_err(|e| Error::Replay {
        id: mutation.id,
        reason: e.to_string(),
      })
  }
}

impl<T: ReplayTransport + 'static> SyncCoordinator<T> {
  /// Arrange for `replay_all` to run whenever the returned trigger fires
  /// or the recurring interval elapses.
  ///
  /// Activation is at-least-once: a trigger may fire with nothing queued,
  /// or after an entry was already removed, and the pass is simply empty.
  pub fn spawn_replay_trigger(self: &Arc<Self>, interval: Duration) -> ReplayTrigger {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let coordinator = Arc::clone(self);

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      // The first tick completes immediately; consume it so the loop waits.
      ticker.tick().await;

      loop {
        tokio::select! {
          received = rx.recv() => {
            if received.is_none() {
              break;
            }
          }
          _ = ticker.tick() => {}
        }
        if let Err(e) = coordinator.replay_all().await {
          warn!(error = %e, "replay pass failed");
        }
      }
    });

    ReplayTrigger { tx }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex as StdMutex;

  /// Transport that records replay order and fails scripted comments.
  struct ScriptedTransport {
    fail_comments: Vec<&'static str>,
    seen: StdMutex<Vec<i64>>,
  }

  impl ScriptedTransport {
    fn new(fail_comments: Vec<&'static str>) -> Self {
      Self {
        fail_comments,
        seen: StdMutex::new(Vec::new()),
      }
    }
  }

  impl ReplayTransport for ScriptedTransport {
    fn replay<'a>(&'a self, mutation: &'a PendingMutation) -> BoxFuture<'a, Result<()>> {
      Box::pin(async move {
        self.seen.lock().unwrap().push(mutation.id);
        let comments = match &mutation.kind {
          MutationKind::CreateReview { payload, .. } => {
            payload.get("comments").and_then(|c| c.as_str()).unwrap_or("")
          }
          MutationKind::SetFavorite { .. } => "",
        };
        if self.fail_comments.contains(&comments) {
          Err(Error::Network("connection refused".to_string()))
        } else {
          Ok(())
        }
      })
    }
  }

  fn coordinator(fail_comments: Vec<&'static str>) -> SyncCoordinator<ScriptedTransport> {
    let store = Arc::new(StructuredStore::open_in_memory().unwrap());
    SyncCoordinator::new(store, ScriptedTransport::new(fail_comments))
  }

  fn review_kind(comments: &str) -> MutationKind {
    MutationKind::CreateReview {
      restaurant_id: "5".to_string(),
      payload: json!({"restaurant_id": 5, "rating": 5, "comments": comments}),
    }
  }

  #[tokio::test]
  async fn test_record_offline_queues_applies_and_notifies() {
    let sync = coordinator(vec![]);
    let mut status = sync.subscribe();

    let (mutation, local) = sync.record_offline(review_kind("great")).unwrap();
    assert_eq!(mutation.kind, review_kind("great"));
    assert_eq!(local["comments"], json!("great"));
    assert!(local.get("createdAt").is_some());

    // The write is visible locally right away
    let items = sync.store.get_collection(REVIEWS, "5").unwrap().unwrap();
    assert_eq!(items.len(), 1);

    let pending = sync.store.list_pending_mutations().unwrap();
    assert_eq!(pending.len(), 1);

    let message = status.try_recv().unwrap();
    assert!(message.contains("offline"));
  }

  #[tokio::test]
  async fn test_queue_drains_to_empty_on_universal_success() {
    let sync = coordinator(vec![]);
    for comments in ["a", "b", "c"] {
      sync.record_offline(review_kind(comments)).unwrap();
    }

    let report = sync.replay_all().await.unwrap();
    assert_eq!(report, ReplayReport { replayed: 3, failed: 0 });
    assert!(sync.store.list_pending_mutations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_partial_failure_isolation() {
    let sync = coordinator(vec!["b"]);
    for comments in ["a", "b", "c"] {
      sync.record_offline(review_kind(comments)).unwrap();
    }

    let report = sync.replay_all().await.unwrap();
    assert_eq!(report, ReplayReport { replayed: 2, failed: 1 });

    let pending = sync.store.list_pending_mutations().unwrap();
    assert_eq!(pending.len(), 1);
    match &pending[0].kind {
      MutationKind::CreateReview { payload, .. } => {
        assert_eq!(payload["comments"], json!("b"));
      }
      other => panic!("unexpected kind: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_replay_is_fifo() {
    let sync = coordinator(vec![]);
    let ids: Vec<i64> = ["first", "second", "third"]
      .iter()
      .map(|c| sync.record_offline(review_kind(c)).unwrap().0.id)
      .collect();

    sync.replay_all().await.unwrap();
    assert_eq!(*sync.transport.seen.lock().unwrap(), ids);
  }

  #[tokio::test]
  async fn test_replay_with_empty_queue_is_noop() {
    let sync = coordinator(vec![]);
    sync.record_offline(review_kind("great")).unwrap();

    let first = sync.replay_all().await.unwrap();
    assert_eq!(first.replayed, 1);

    // A late trigger after the entry was removed
    let second = sync.replay_all().await.unwrap();
    assert_eq!(second, ReplayReport::default());
  }

  #[tokio::test]
  async fn test_set_favorite_offline_creates_minimal_record() {
    let sync = coordinator(vec![]);
    let (_, local) = sync
      .record_offline(MutationKind::SetFavorite {
        restaurant_id: "3".to_string(),
        is_favorite: true,
      })
      .unwrap();
    assert_eq!(local, json!({"id": 3, "is_favorite": true}));

    let stored = sync.store.get_entity(RESTAURANTS, "3").unwrap().unwrap();
    assert_eq!(stored["is_favorite"], json!(true));
  }

  #[tokio::test]
  async fn test_set_favorite_offline_preserves_existing_fields() {
    let sync = coordinator(vec![]);
    sync
      .store
      .put_entity(RESTAURANTS, &json!({"id": 3, "name": "Kang Ho Dong Baekjeong"}))
      .unwrap();

    sync
      .record_offline(MutationKind::SetFavorite {
        restaurant_id: "3".to_string(),
        is_favorite: true,
      })
      .unwrap();

    let stored = sync.store.get_entity(RESTAURANTS, "3").unwrap().unwrap();
    assert_eq!(stored["name"], json!("Kang Ho Dong Baekjeong"));
    assert_eq!(stored["is_favorite"], json!(true));
  }
}
