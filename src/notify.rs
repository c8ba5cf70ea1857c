//! Push notifications and the client host collaborator.

use async_trait::async_trait;
use color_eyre::Result;
use serde::Serialize;
use tracing::info;

use crate::config::NotificationConfig;

pub const DEFAULT_PUSH_BODY: &str = "New update available";
pub const VIBRATE_PATTERN: [u32; 3] = [100, 50, 100];
pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

/// A notification button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub actions: Vec<NotificationAction>,
}

impl Notification {
  /// Build the notification shown for a push payload.
  pub fn from_push(config: &NotificationConfig, payload: Option<&str>) -> Self {
    let body = payload
      .filter(|p| !p.trim().is_empty())
      .unwrap_or(DEFAULT_PUSH_BODY);

    Self {
      title: config.title.clone(),
      body: body.to_string(),
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: VIBRATE_PATTERN.to_vec(),
      actions: vec![
        NotificationAction {
          action: ACTION_VIEW.to_string(),
          title: "View".to_string(),
        },
        NotificationAction {
          action: ACTION_DISMISS.to_string(),
          title: "Dismiss".to_string(),
        },
      ],
    }
  }
}

/// The runtime hosting the worker: open client sessions, notifications,
/// and windows.
#[async_trait]
pub trait ClientHost: Send + Sync {
  /// Take control of already-open clients without a reload.
  async fn claim_clients(&self) -> Result<()>;

  async fn show_notification(&self, notification: Notification) -> Result<()>;

  async fn open_window(&self, url: &str) -> Result<()>;
}

/// Host used by the CLI, where there are no clients to control.
pub struct LoggingHost;

#[async_trait]
impl ClientHost for LoggingHost {
  async fn claim_clients(&self) -> Result<()> {
    info!("Claimed open clients");
    Ok(())
  }

  async fn show_notification(&self, notification: Notification) -> Result<()> {
    info!(title = %notification.title, body = %notification.body, "Notification");
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    info!(url, "Open window");
    Ok(())
  }
}
