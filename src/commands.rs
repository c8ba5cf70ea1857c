use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::cache::CacheStorage;
use crate::event::EventLoop;
use crate::http::{Request, Response};
use crate::notify::Notification;
use crate::sync::{ActionPayload, PendingStore, SubmitOutcome};
use crate::worker::{ControlMessage, Event, FetchOutcome, ServiceWorker};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Pre-warm the static store and activate this version
  Install,
  /// Garbage-collect stores from other versions
  Activate,
  /// Route a request through the caching strategies
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
  },
  /// Entry counts and estimated sizes of all stores
  Stats,
  /// Delete one store
  Clear { cache_name: String },
  /// Fetch resources into the dynamic store
  Prefetch {
    #[arg(required = true)]
    urls: Vec<String>,
  },
  /// Show a notification as if delivered by push
  Push { payload: Option<String> },
  /// React to a notification button, as the host would on a click
  Click {
    /// `view` opens the app; anything else is ignored
    action: Option<String>,
  },
  /// Manage actions waiting for connectivity
  Queue {
    #[command(subcommand)]
    command: QueueCommand,
  },
}

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
  /// Queue an action for later replay
  Add {
    /// Action type
    kind: String,
    /// JSON data for the action
    data: Option<String>,
  },
  /// Send an action now, queueing it if that fails
  Submit {
    /// Action type
    kind: String,
    /// JSON data for the action
    data: Option<String>,
  },
  /// List pending actions, oldest first
  List,
  /// Pending count, retries, and time since last sync
  Stats,
  /// Replay pending actions now
  Sync,
  /// Discard every pending action
  Clear {
    /// Confirm that pending actions will be lost
    #[arg(long)]
    yes: bool,
  },
}

/// Execute a command against the worker, printing results as JSON.
pub async fn run<S>(
  command: Command,
  worker: &Arc<ServiceWorker<S>>,
  events: &EventLoop,
) -> Result<()>
where
  S: CacheStorage + PendingStore + 'static,
{
  match command {
    Command::Install => lifecycle(worker, Event::Install).await,
    Command::Activate => lifecycle(worker, Event::Activate).await,
    Command::Fetch { url } => {
      let request = Request::get(worker_url(worker, &url)?);
      let (response, intercepted) = match events.fetch(request.clone()).await? {
        FetchOutcome::Respond(response) => (response, true),
        FetchOutcome::Passthrough => (worker.fetcher().fetch(&request).await?, false),
      };
      print(&describe(&response, intercepted))
    }
    Command::Stats => reply(events, ControlMessage::GetCacheStats).await,
    Command::Clear { cache_name } => reply(events, ControlMessage::ClearCache { cache_name }).await,
    Command::Prefetch { urls } => reply(events, ControlMessage::PrefetchResources { urls }).await,
    Command::Push { payload } => {
      let shown = Notification::from_push(&worker.config().notifications, payload.as_deref());
      events.send(Event::Push { payload })?;
      print(&shown)
    }
    Command::Click { action } => events.send(Event::NotificationClick { action }),
    Command::Queue { command } => run_queue(command, worker).await,
  }
}

async fn run_queue<S>(command: QueueCommand, worker: &Arc<ServiceWorker<S>>) -> Result<()>
where
  S: CacheStorage + PendingStore + 'static,
{
  let queue = worker.queue();

  match command {
    QueueCommand::Add { kind, data } => {
      let item = queue.enqueue(ActionPayload::new(&kind, action_data(data)?))?;
      print(&item.summary())
    }
    QueueCommand::Submit { kind, data } => {
      let action = ActionPayload::new(&kind, action_data(data)?);
      match queue.submit(action).await? {
        SubmitOutcome::Sent => print(&json!({ "sent": true })),
        SubmitOutcome::Queued(item) => print(&json!({ "sent": false, "queued": item.summary() })),
        SubmitOutcome::Rejected(e) => Err(eyre!("Action '{}' was rejected: {}", kind, e)),
      }
    }
    QueueCommand::List => print(&queue.summaries()?.collect::<Vec<_>>()),
    QueueCommand::Stats => print(&queue.stats()?),
    QueueCommand::Sync => {
      let tag = worker.config().sync.tag.clone();
      worker.handle(Event::Sync { tag }).await?;
      print(&queue.stats()?)
    }
    QueueCommand::Clear { yes } => {
      if !yes {
        return Err(eyre!("Refusing to discard pending actions without --yes"));
      }
      let removed = queue.clear().await?;
      print(&json!({ "removed": removed }))
    }
  }
}

/// Run a lifecycle event to completion and report the resulting state.
async fn lifecycle<S>(worker: &Arc<ServiceWorker<S>>, event: Event) -> Result<()>
where
  S: CacheStorage + PendingStore + 'static,
{
  worker.handle(event).await?;
  let stores: Vec<String> = worker.cache_stats()?.into_keys().collect();
  print(&json!({ "state": format!("{:?}", worker.state()?), "stores": stores }))
}

fn action_data(raw: Option<String>) -> Result<Value> {
  match raw {
    Some(raw) => serde_json::from_str(&raw).map_err(|e| eyre!("Invalid action data: {}", e)),
    None => Ok(Value::Null),
  }
}

async fn reply(events: &EventLoop, message: ControlMessage) -> Result<()> {
  match events.post_message(message).await? {
    Some(reply) => print(&reply),
    None => Err(eyre!("Worker did not reply; see the log for details")),
  }
}

fn worker_url<S>(worker: &ServiceWorker<S>, raw: &str) -> Result<url::Url>
where
  S: CacheStorage + PendingStore + 'static,
{
  match url::Url::parse(raw) {
    Ok(url) => Ok(url),
    Err(_) => worker.config().resolve(raw),
  }
}

fn describe(response: &Response, intercepted: bool) -> Value {
  json!({
    "intercepted": intercepted,
    "status": response.status,
    "headers": response.headers,
    "bytes": response.body.len(),
  })
}

fn print<T: Serialize>(value: &T) -> Result<()> {
  let out =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", out);
  Ok(())
}
