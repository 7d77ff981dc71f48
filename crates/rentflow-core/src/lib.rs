//! rentflow-core - Offline-first core for Rentflow
//!
//! This crate contains the entity models, the local libSQL store with its
//! operation queue, the sync engine that replays queued mutations against the
//! remote data service, the pull/preload service and the per-entity
//! repositories used by the Rentflow clients.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod remote;
pub mod repository;
pub mod state;
pub mod sync;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use models::{EntityRecord, RecordId, Table};
pub use repository::{MutationOutcome, MutationStatus, Repositories};
pub use sync::{PullReport, SyncCoordinator, SyncReport};
