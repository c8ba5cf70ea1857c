//! Install, activate, and takeover.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{error, info, warn};

use super::ServiceWorker;
use crate::cache::{CacheKey, CacheStorage};
use crate::http::Request;
use crate::sync::PendingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Parsed,
  Installing,
  /// Installed and waiting to supersede the previous generation
  Installed,
  Activating,
  Active,
  /// Install failed; this generation never becomes active
  Redundant,
}

impl<S: CacheStorage + PendingStore + 'static> ServiceWorker<S> {
  /// Pre-warm the static store, then take over immediately.
  ///
  /// All-or-nothing: if any manifest fetch fails nothing is written and the
  /// worker becomes redundant. The host decides whether to retry.
  pub async fn install(&self) -> Result<()> {
    self.set_state(LifecycleState::Installing)?;

    match self.precache().await {
      Ok(count) => {
        info!(count, store = %self.names.static_store, "Precached critical assets");
        self.set_state(LifecycleState::Installed)?;
        self.skip_waiting().await
      }
      Err(e) => {
        error!(error = %e, "Install failed");
        self.set_state(LifecycleState::Redundant)?;
        Err(e)
      }
    }
  }

  async fn precache(&self) -> Result<usize> {
    let store = &self.names.static_store;
    self.storage.open_store(store)?;

    let requests = self
      .config
      .cache
      .precache
      .iter()
      .map(|u| self.config.resolve(u).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    let responses = try_join_all(requests.iter().map(|request| async move {
      let response = self.fetcher.fetch(request).await?;
      if !response.is_ok() {
        return Err(eyre!(
          "Failed to precache {}: HTTP {}",
          request.url,
          response.status
        ));
      }
      Ok((CacheKey::from_request(request), response))
    }))
    .await?;

    self.storage.put_all(store, &responses)?;
    Ok(responses.len())
  }

  /// Promote an installed, waiting worker to active. No-op in other states.
  pub async fn skip_waiting(&self) -> Result<()> {
    if self.state()? == LifecycleState::Installed {
      self.activate().await?;
    }
    Ok(())
  }

  /// Garbage-collect stores of other generations and claim open clients.
  ///
  /// Returns the names of the deleted stores.
  pub async fn activate(&self) -> Result<Vec<String>> {
    self.set_state(LifecycleState::Activating)?;

    let deleted = self.delete_stale_generations();

    if let Err(e) = self.host.claim_clients().await {
      warn!(error = %e, "Failed to claim clients");
    }

    self.set_state(LifecycleState::Active)?;
    info!(deleted = deleted.len(), version = %self.config.version, "Activated");
    Ok(deleted)
  }

  fn delete_stale_generations(&self) -> Vec<String> {
    let names = match self.storage.store_names() {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "Failed to list stores");
        return Vec::new();
      }
    };
    let allow_list = self.names.allow_list();

    names
      .into_iter()
      .filter(|name| !allow_list.contains(&name.as_str()))
      .filter_map(|name| match self.storage.delete_store(&name) {
        Ok(_) => {
          info!(store = %name, "Deleted stale cache");
          Some(name)
        }
        Err(e) => {
          warn!(store = %name, error = %e, "Failed to delete stale cache");
          None
        }
      })
      .collect()
  }
}
