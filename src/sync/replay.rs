//! Replaying queued actions against the network.

use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use super::types::PendingAction;
use crate::http::{Fetcher, Request};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
  /// The request never produced a response
  #[error("Network error: {0}")]
  Network(String),
  #[error("HTTP {0}")]
  Rejected(u16),
  #[error("Invalid action: {0}")]
  Invalid(String),
}

impl ReplayError {
  /// Whether a later attempt may succeed. Client errors other than 408 and
  /// 429 are permanent.
  pub fn is_transient(&self) -> bool {
    match self {
      ReplayError::Network(_) => true,
      ReplayError::Rejected(status) => matches!(status, 408 | 429 | 500..=599),
      ReplayError::Invalid(_) => false,
    }
  }
}

/// Sends one pending action to its target.
///
/// Delivery is at-least-once, so the target must tolerate duplicates.
#[async_trait]
pub trait ActionReplayer: Send + Sync {
  async fn replay(&self, item: &PendingAction) -> Result<(), ReplayError>;
}

/// POSTs actions as JSON to a sync endpoint, keyed for idempotency by item id.
pub struct HttpReplayer {
  fetcher: Arc<dyn Fetcher>,
  endpoint: Url,
}

impl HttpReplayer {
  pub fn new(fetcher: Arc<dyn Fetcher>, endpoint: Url) -> Self {
    Self { fetcher, endpoint }
  }
}

#[async_trait]
impl ActionReplayer for HttpReplayer {
  async fn replay(&self, item: &PendingAction) -> Result<(), ReplayError> {
    let body = serde_json::to_vec(&serde_json::json!({
      "id": item.id,
      "type": item.action.kind,
      "data": item.action.data,
    }))
    .map_err(|e| ReplayError::Invalid(e.to_string()))?;

    let request = Request::post_json(self.endpoint.clone(), body)
      .with_header("Idempotency-Key", &item.id.to_string());

    let response = self
      .fetcher
      .fetch(&request)
      .await
      .map_err(|e| ReplayError::Network(e.to_string()))?;
    if (200..300).contains(&response.status) {
      Ok(())
    } else {
      Err(ReplayError::Rejected(response.status))
    }
  }
}
