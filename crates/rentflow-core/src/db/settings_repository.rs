//! Sync metadata repository over the local `settings` table

use crate::error::Result;
use crate::models::SyncMetadata;
use libsql::Connection;

const USER_ID_KEY: &str = "sync.user_id";
const BRANCH_ID_KEY: &str = "sync.branch_id";
const LAST_PULL_KEY: &str = "sync.last_pull_at";

/// Trait for metadata storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Load metadata from the database
    async fn load(&self) -> Result<SyncMetadata>;

    /// Save metadata to the database
    async fn save(&self, metadata: &SyncMetadata) -> Result<()>;
}

/// libSQL implementation of `SettingsRepository`
pub struct LibSqlSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for LibSqlSettingsRepository<'_> {
    async fn load(&self) -> Result<SyncMetadata> {
        let mut metadata = SyncMetadata::default();

        if let Some(value) = self.get_setting(USER_ID_KEY).await? {
            metadata.user_id = Some(value);
        }

        if let Some(value) = self.get_setting(BRANCH_ID_KEY).await? {
            metadata.branch_id = value.parse().ok();
        }

        if let Some(value) = self.get_setting(LAST_PULL_KEY).await? {
            metadata.last_pull_at = value.parse().ok();
        }

        Ok(metadata)
    }

    async fn save(&self, metadata: &SyncMetadata) -> Result<()> {
        self.set_setting(USER_ID_KEY, metadata.user_id.clone())
            .await?;
        self.set_setting(
            BRANCH_ID_KEY,
            metadata.branch_id.as_ref().map(ToString::to_string),
        )
        .await?;
        self.set_setting(
            LAST_PULL_KEY,
            metadata.last_pull_at.map(|at| at.to_string()),
        )
        .await?;
        Ok(())
    }
}

impl LibSqlSettingsRepository<'_> {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set_setting(&self, key: &str, value: Option<String>) -> Result<()> {
        match value {
            Some(value) => {
                self.conn
                    .execute(
                        "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                        [key, value.as_str()],
                    )
                    .await?;
            }
            None => {
                self.conn
                    .execute("DELETE FROM settings WHERE key = ?", [key])
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::RecordId;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_default_metadata() {
        let db = setup().await;
        let repo = LibSqlSettingsRepository::new(db.connection());

        let metadata = repo.load().await.unwrap();
        assert_eq!(metadata, SyncMetadata::default());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_and_load_metadata() {
        let db = setup().await;
        let repo = LibSqlSettingsRepository::new(db.connection());

        let metadata = SyncMetadata {
            user_id: Some("user-1".to_string()),
            branch_id: Some(RecordId::confirmed("branch-9")),
            last_pull_at: Some(1_700_000_000_000),
        };
        repo.save(&metadata).await.unwrap();
        assert_eq!(repo.load().await.unwrap(), metadata);

        // Clearing a value removes the row
        repo.save(&SyncMetadata::default()).await.unwrap();
        assert_eq!(repo.load().await.unwrap(), SyncMetadata::default());
    }
}
