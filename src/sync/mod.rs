//! Pending-action sync queue.
//!
//! Actions attempted while offline are persisted and replayed in enqueue
//! order once connectivity returns. Each failed replay bumps the item's retry
//! count and records the error; the drain always runs to completion.

mod queue;
mod replay;
mod store;
mod types;

pub use queue::{SubmitOutcome, SyncQueue};
pub use replay::HttpReplayer;
pub use store::{PendingStore, PENDING_SCHEMA};
pub use types::ActionPayload;

#[cfg(test)]
pub use replay::{ActionReplayer, ReplayError};
#[cfg(test)]
pub use types::PendingAction;
