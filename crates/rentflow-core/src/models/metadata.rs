//! Local-only sync metadata

use serde::{Deserialize, Serialize};

use super::RecordId;

/// Values cached on the device between sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// User the cached values belong to
    pub user_id: Option<String>,
    /// Branch of that user, as last resolved from the server
    pub branch_id: Option<RecordId>,
    /// Completion time of the last successful pull (Unix ms)
    pub last_pull_at: Option<i64>,
}
