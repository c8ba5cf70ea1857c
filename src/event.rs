use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::error;

use crate::cache::CacheStorage;
use crate::http::Request;
use crate::sync::PendingStore;
use crate::worker::{ControlMessage, ControlReply, Event, FetchOutcome, ServiceWorker};

/// Delivers host events to a worker, one concurrent handler per event.
pub struct EventLoop {
  tx: mpsc::UnboundedSender<Event>,
  task: JoinHandle<()>,
}

impl EventLoop {
  /// Spawn the dispatch loop for the given worker.
  pub fn spawn<S>(worker: Arc<ServiceWorker<S>>) -> Self
  where
    S: CacheStorage + PendingStore + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let task = tokio::spawn(async move {
      let mut handlers = JoinSet::new();

      while let Some(event) = rx.recv().await {
        let worker = Arc::clone(&worker);
        handlers.spawn(async move {
          let name = event.name();
          if let Err(e) = worker.handle(event).await {
            error!(event = name, error = %e, "Event handler failed");
          }
        });

        while handlers.try_join_next().is_some() {}
      }

      // Channel closed: let in-flight handlers finish
      while handlers.join_next().await.is_some() {}
    });

    Self { tx, task }
  }

  pub fn send(&self, event: Event) -> Result<()> {
    self
      .tx
      .send(event)
      .map_err(|_| eyre!("Event loop has shut down"))
  }

  /// Dispatch a fetch event and wait for its response.
  pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
    let (respond_with, rx) = oneshot::channel();
    self.send(Event::Fetch {
      request,
      respond_with,
    })?;
    rx.await
      .map_err(|_| eyre!("Fetch handler dropped without responding"))
  }

  /// Post a control message and wait for its reply, if it has one.
  pub async fn post_message(&self, message: ControlMessage) -> Result<Option<ControlReply>> {
    let (reply, rx) = oneshot::channel();
    self.send(Event::Message {
      message,
      reply: Some(reply),
    })?;
    Ok(rx.await.ok())
  }

  /// Stop accepting events and wait for running handlers.
  pub async fn shutdown(self) -> Result<()> {
    drop(self.tx);
    self
      .task
      .await
      .map_err(|e| eyre!("Event loop panicked: {}", e))
  }
}
