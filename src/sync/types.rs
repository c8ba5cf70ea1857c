//! Pending action items and derived sync statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A deferred user operation: a discriminating type plus arbitrary data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub data: Value,
}

impl ActionPayload {
  pub fn new(kind: &str, data: Value) -> Self {
    Self {
      kind: kind.to_string(),
      data,
    }
  }
}

/// One queued action awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
  pub id: Uuid,
  pub created_at: DateTime<Utc>,
  pub action: ActionPayload,
  /// Failed replay attempts so far; never decreases
  pub retry_count: u32,
  pub last_error: Option<String>,
}

impl PendingAction {
  pub fn new(action: ActionPayload) -> Self {
    Self {
      id: Uuid::new_v4(),
      created_at: Utc::now(),
      action,
      retry_count: 0,
      last_error: None,
    }
  }

  pub fn record_failure(&mut self, error: String) {
    self.retry_count = self.retry_count.saturating_add(1);
    self.last_error = Some(error);
  }

  pub fn summary(&self) -> PendingSummary {
    PendingSummary {
      id: self.id,
      kind: self.action.kind.clone(),
      created_at: self.created_at,
      retry_count: self.retry_count,
      last_error: self.last_error.clone(),
    }
  }
}

/// Read-only view of a pending item for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingSummary {
  pub id: Uuid,
  #[serde(rename = "type")]
  pub kind: String,
  pub created_at: DateTime<Utc>,
  pub retry_count: u32,
  pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
  pub pending_count: usize,
  pub has_retries: bool,
  pub oldest_pending: Option<DateTime<Utc>>,
  pub minutes_since_last_sync: Option<i64>,
}

impl SyncStats {
  pub fn compute(
    items: &[PendingAction],
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      pending_count: items.len(),
      has_retries: items.iter().map(|i| i.retry_count).max().unwrap_or(0) > 0,
      oldest_pending: items.iter().map(|i| i.created_at).min(),
      minutes_since_last_sync: last_synced_at.map(|t| (now - t).num_minutes()),
    }
  }
}

/// Result of replaying one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ItemOutcome {
  Synced {
    id: Uuid,
  },
  Pending {
    id: Uuid,
    retry_count: u32,
    error: String,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainStatus {
  Completed,
  /// No connectivity; nothing was attempted
  Offline,
  /// Another drain is already running
  Busy,
}

/// Aggregate outcome of a drain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainReport {
  pub status: DrainStatus,
  pub outcomes: Vec<ItemOutcome>,
}

impl DrainReport {
  pub fn skipped(status: DrainStatus) -> Self {
    Self {
      status,
      outcomes: Vec::new(),
    }
  }

  pub fn synced(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|o| matches!(o, ItemOutcome::Synced { .. }))
      .count()
  }

  pub fn failed(&self) -> usize {
    self.outcomes.len() - self.synced()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  #[test]
  fn test_stats_on_empty_queue() {
    let stats = SyncStats::compute(&[], None, Utc::now());
    assert_eq!(stats.pending_count, 0);
    assert!(!stats.has_retries);
    assert!(stats.oldest_pending.is_none());
    assert!(stats.minutes_since_last_sync.is_none());
  }

  #[test]
  fn test_stats_reflect_items() {
    let now = Utc::now();
    let mut old = PendingAction::new(ActionPayload::new("assign", Value::Null));
    old.created_at = now - Duration::hours(2);
    let mut failed = PendingAction::new(ActionPayload::new("survey", Value::Null));
    failed.record_failure("HTTP 502".to_string());

    let stats = SyncStats::compute(&[failed, old.clone()], Some(now - Duration::minutes(45)), now);
    assert_eq!(stats.pending_count, 2);
    assert!(stats.has_retries);
    assert_eq!(stats.oldest_pending, Some(old.created_at));
    assert_eq!(stats.minutes_since_last_sync, Some(45));
  }

  #[test]
  fn test_payload_wire_format() {
    let payload: ActionPayload =
      serde_json::from_str(r#"{"type":"updatePlan","data":{"id":7}}"#).unwrap();
    assert_eq!(payload.kind, "updatePlan");
    assert_eq!(payload.data["id"], 7);
  }
}
