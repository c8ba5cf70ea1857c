//! Durable queue of actions performed while offline.

use chrono::Utc;
use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::replay::{ActionReplayer, ReplayError};
use super::store::PendingStore;
use super::types::{
  ActionPayload, DrainReport, DrainStatus, ItemOutcome, PendingAction, PendingSummary, SyncStats,
};

/// What happened to a submitted action.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
  /// Delivered immediately
  Sent,
  /// Deferred until the next drain
  Queued(PendingAction),
  /// Refused by the target; retrying would not help
  Rejected(ReplayError),
}

/// Pending-action queue with per-item retry bookkeeping.
pub struct SyncQueue<P: PendingStore> {
  store: Arc<P>,
  replayer: Arc<dyn ActionReplayer>,
  online: AtomicBool,
  /// Held for the duration of a drain
  draining: Mutex<()>,
}

impl<P: PendingStore> SyncQueue<P> {
  pub fn new(store: Arc<P>, replayer: Arc<dyn ActionReplayer>) -> Self {
    Self {
      store,
      replayer,
      online: AtomicBool::new(true),
      draining: Mutex::new(()),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  pub fn enqueue(&self, action: ActionPayload) -> Result<PendingAction> {
    let item = PendingAction::new(action);
    self.store.upsert_pending(&item)?;
    debug!(id = %item.id, kind = %item.action.kind, "Queued pending action");
    Ok(item)
  }

  /// Deliver now when online. Queue while offline or after a transient
  /// failure; permanent rejections go back to the caller.
  pub async fn submit(&self, action: ActionPayload) -> Result<SubmitOutcome> {
    if !self.is_online() {
      return Ok(SubmitOutcome::Queued(self.enqueue(action)?));
    }

    let mut item = PendingAction::new(action);
    match self.replayer.replay(&item).await {
      Ok(()) => Ok(SubmitOutcome::Sent),
      Err(e) if e.is_transient() => {
        warn!(kind = %item.action.kind, error = %e, "Action failed, queueing for sync");
        item.last_error = Some(e.to_string());
        self.store.upsert_pending(&item)?;
        Ok(SubmitOutcome::Queued(item))
      }
      Err(e) => {
        warn!(kind = %item.action.kind, error = %e, "Action rejected");
        Ok(SubmitOutcome::Rejected(e))
      }
    }
  }

  /// Replay every pending item, oldest first.
  ///
  /// A failed item keeps its place with an incremented retry count and does
  /// not stop the remaining items. Replay failures never surface as errors;
  /// only failing to load the queue does.
  pub async fn drain(&self) -> Result<DrainReport> {
    let Ok(_guard) = self.draining.try_lock() else {
      debug!("Drain already in progress");
      return Ok(DrainReport::skipped(DrainStatus::Busy));
    };

    if !self.is_online() {
      debug!("Offline, skipping drain");
      return Ok(DrainReport::skipped(DrainStatus::Offline));
    }

    let items = self.store.all_pending()?;
    let mut outcomes = Vec::with_capacity(items.len());

    for mut item in items {
      debug!(id = %item.id, kind = %item.action.kind, "Replaying pending action");
      match self.replayer.replay(&item).await {
        Ok(()) => {
          if let Err(e) = self.store.delete_pending(&item.id) {
            warn!(id = %item.id, error = %e, "Failed to remove synced action");
          }
          outcomes.push(ItemOutcome::Synced { id: item.id });
        }
        Err(e) => {
          item.record_failure(e.to_string());
          match self.store.record_retry(&item) {
            Ok(true) => {}
            Ok(false) => debug!(id = %item.id, "Action removed during replay"),
            Err(e) => warn!(id = %item.id, error = %e, "Failed to record retry"),
          }
          outcomes.push(ItemOutcome::Pending {
            id: item.id,
            retry_count: item.retry_count,
            error: e.to_string(),
          });
        }
      }
    }

    let report = DrainReport {
      status: DrainStatus::Completed,
      outcomes,
    };

    if report.failed() == 0 {
      if let Err(e) = self.store.set_last_synced_at(Utc::now()) {
        warn!(error = %e, "Failed to record sync time");
      }
    }

    info!(
      synced = report.synced(),
      failed = report.failed(),
      "Drained pending actions"
    );
    Ok(report)
  }

  pub fn stats(&self) -> Result<SyncStats> {
    let items = self.store.all_pending()?;
    let last_synced_at = self.store.last_synced_at()?;
    Ok(SyncStats::compute(&items, last_synced_at, Utc::now()))
  }

  /// Pending items as read-only summaries, oldest first.
  pub fn summaries(&self) -> Result<impl Iterator<Item = PendingSummary>> {
    let items = self.store.all_pending()?;
    Ok(items.into_iter().map(|item| item.summary()))
  }

  /// Discard all pending items. Callers confirm with the user first.
  ///
  /// Waits for a running drain so no discarded item is replayed or
  /// written back afterwards.
  pub async fn clear(&self) -> Result<usize> {
    let _guard = self.draining.lock().await;
    let removed = self.store.clear_pending()?;
    info!(removed, "Cleared pending actions");
    Ok(removed)
  }
}
