//! Boundary interception layer.
//!
//! The worker owns the cache stores. It classifies intercepted requests and
//! routes them through a caching strategy, runs the install/activate
//! lifecycle, answers control messages, and reacts to background sync and
//! push events. Every host callback arrives as one variant of [`Event`].

mod control;
mod lifecycle;

pub use control::{ControlMessage, ControlReply};
pub use lifecycle::LifecycleState;

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cache::CacheStorage;
use crate::classify::{Classifier, TrafficClass};
use crate::config::{CacheNames, Config};
use crate::http::{Fetcher, Request, Response};
use crate::notify::{ClientHost, Notification, ACTION_VIEW};
use crate::strategy::{Strategy, StrategyEngine};
use crate::sync::{HttpReplayer, PendingStore, SyncQueue};

/// Events delivered by the host runtime.
#[derive(Debug)]
pub enum Event {
  Install,
  Activate,
  Fetch {
    request: Request,
    respond_with: oneshot::Sender<FetchOutcome>,
  },
  Message {
    message: ControlMessage,
    reply: Option<oneshot::Sender<ControlReply>>,
  },
  Sync {
    tag: String,
  },
  Push {
    payload: Option<String>,
  },
  NotificationClick {
    action: Option<String>,
  },
}

impl Event {
  pub fn name(&self) -> &'static str {
    match self {
      Event::Install => "install",
      Event::Activate => "activate",
      Event::Fetch { .. } => "fetch",
      Event::Message { .. } => "message",
      Event::Sync { .. } => "sync",
      Event::Push { .. } => "push",
      Event::NotificationClick { .. } => "notificationclick",
    }
  }
}

/// How an intercepted request is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  Respond(Response),
  /// Not intercepted; the host performs the request itself
  Passthrough,
}

pub struct ServiceWorker<S: CacheStorage + PendingStore + 'static> {
  config: Config,
  names: CacheNames,
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  classifier: Classifier,
  engine: StrategyEngine<S>,
  queue: SyncQueue<S>,
  host: Arc<dyn ClientHost>,
  state: Mutex<LifecycleState>,
}

impl<S: CacheStorage + PendingStore + 'static> ServiceWorker<S> {
  /// Create a worker for one deployed generation.
  ///
  /// Pending actions replay against `sync.endpoint` over the same fetcher.
  pub fn new(
    config: Config,
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
    host: Arc<dyn ClientHost>,
  ) -> Result<Self> {
    let endpoint = config.resolve(&config.sync.endpoint)?;
    let replayer = Arc::new(HttpReplayer::new(Arc::clone(&fetcher), endpoint));

    Ok(Self {
      names: config.cache_names(),
      classifier: Classifier::new(&config.cache),
      engine: StrategyEngine::new(Arc::clone(&storage), Arc::clone(&fetcher)),
      queue: SyncQueue::new(Arc::clone(&storage), replayer),
      config,
      storage,
      fetcher,
      host,
      state: Mutex::new(LifecycleState::Parsed),
    })
  }

  /// Replace the action replayer.
  #[cfg(test)]
  pub fn with_replayer(mut self, replayer: Arc<dyn crate::sync::ActionReplayer>) -> Self {
    self.queue = SyncQueue::new(Arc::clone(&self.storage), replayer);
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
    &self.fetcher
  }

  pub fn engine(&self) -> &StrategyEngine<S> {
    &self.engine
  }

  pub fn queue(&self) -> &SyncQueue<S> {
    &self.queue
  }

  pub fn state(&self) -> Result<LifecycleState> {
    self
      .state
      .lock()
      .map(|s| *s)
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn set_state(&self, next: LifecycleState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    debug!(from = ?*state, to = ?next, "Lifecycle transition");
    *state = next;
    Ok(())
  }

  /// Dispatch one host event.
  pub async fn handle(&self, event: Event) -> Result<()> {
    match event {
      Event::Install => self.install().await,
      Event::Activate => self.activate().await.map(|_| ()),
      Event::Fetch {
        request,
        respond_with,
      } => {
        let outcome = self.fetch(&request).await;
        if respond_with.send(outcome).is_err() {
          debug!(url = %request.url, "Fetch caller went away before the response");
        }
        Ok(())
      }
      Event::Message { message, reply } => {
        if let Some(response) = self.on_message(message).await? {
          if let Some(reply) = reply {
            if reply.send(response).is_err() {
              debug!("Reply channel closed");
            }
          }
        }
        Ok(())
      }
      Event::Sync { tag } => {
        if tag == self.config.sync.tag {
          self.queue.drain().await.map(|_| ())
        } else {
          debug!(tag = %tag, "Ignoring sync event with unknown tag");
          Ok(())
        }
      }
      Event::Push { payload } => {
        let notification = Notification::from_push(&self.config.notifications, payload.as_deref());
        self.host.show_notification(notification).await
      }
      Event::NotificationClick { action } => {
        if action.as_deref() == Some(ACTION_VIEW) {
          self.host.open_window("/").await
        } else {
          Ok(())
        }
      }
    }
  }

  /// Intercept a request. Only same-origin GETs are served by the caches.
  pub async fn fetch(&self, request: &Request) -> FetchOutcome {
    if request.method != Method::GET || request.url.origin() != self.config.origin.origin() {
      return FetchOutcome::Passthrough;
    }

    let class = self.classifier.classify(&request.url);
    let store = match class {
      TrafficClass::Static => &self.names.static_store,
      TrafficClass::Api | TrafficClass::Other => &self.names.dynamic_store,
    };
    let strategy = Strategy::for_class(class);
    debug!(url = %request.url, ?class, ?strategy, "Intercepted request");

    FetchOutcome::Respond(self.engine.execute(strategy, request, store).await)
  }

  /// Answer a control message. `None` for messages without a reply.
  pub async fn on_message(&self, message: ControlMessage) -> Result<Option<ControlReply>> {
    match message {
      ControlMessage::SkipWaiting => {
        self.skip_waiting().await?;
        Ok(None)
      }
      ControlMessage::GetCacheStats => Ok(Some(ControlReply::CacheStats(self.cache_stats()?))),
      ControlMessage::ClearCache { cache_name } => {
        let success = match self.storage.delete_store(&cache_name) {
          Ok(existed) => existed,
          Err(e) => {
            warn!(cache_name = %cache_name, error = %e, "Failed to clear cache");
            false
          }
        };
        Ok(Some(ControlReply::CacheCleared { success }))
      }
      ControlMessage::PrefetchResources { urls } => {
        Ok(Some(ControlReply::PrefetchComplete(self.prefetch(&urls).await)))
      }
    }
  }
}
