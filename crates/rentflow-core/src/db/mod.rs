//! Local store layer for Rentflow

pub(crate) mod connection;
mod migrations;
mod queue;
mod settings_repository;
pub(crate) mod store;

pub use connection::Database;
pub use migrations::CURRENT_VERSION;
pub use queue::{OperationQueue, QueueClaim};
pub use settings_repository::{LibSqlSettingsRepository, SettingsRepository};
pub use store::{LocalStore, RemapSummary};

use crate::error::Result;
use crate::models::SyncMetadata;

impl LocalStore {
    /// Load the cached sync metadata
    pub async fn load_metadata(&self) -> Result<SyncMetadata> {
        let db = self.lock().await;
        LibSqlSettingsRepository::new(db.connection()).load().await
    }

    /// Persist the cached sync metadata
    pub async fn save_metadata(&self, metadata: &SyncMetadata) -> Result<()> {
        let db = self.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .save(metadata)
            .await
    }
}
