//! Operation queue item model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{EntityRecord, RecordId, Table};

/// Kind of mutation recorded in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Replay class: all inserts, then all updates, then all deletes
    #[must_use]
    pub const fn class(self) -> u8 {
        match self {
            Self::Insert => 0,
            Self::Update => 1,
            Self::Delete => 2,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// A pending remote mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Unique queue-entry id
    pub id: String,
    pub operation: Operation,
    /// Full record snapshot at enqueue time
    pub data: EntityRecord,
    /// Creation time (Unix ms)
    pub timestamp: i64,
    /// Failed replay attempts so far
    pub retries: u32,
}

impl QueueItem {
    #[must_use]
    pub fn new(operation: Operation, data: EntityRecord, timestamp: i64) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            operation,
            data,
            timestamp,
            retries: 0,
        }
    }

    #[must_use]
    pub const fn table(&self) -> Table {
        self.data.table()
    }

    #[must_use]
    pub fn record_id(&self) -> &RecordId {
        self.data.id()
    }
}
