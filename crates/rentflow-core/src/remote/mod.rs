//! Remote data service interface
//!
//! The backend is treated as a row-oriented CRUD service over named tables.
//! Its schema and authorization rules are opaque to this crate.

mod query;
mod rest;

pub use query::{Filter, Order, Query};
pub use rest::RestRemoteService;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{RecordId, Table};

/// Errors returned by a remote data service
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Remote call timed out")]
    Timeout,
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
    #[error("Record references unsynced {0}")]
    UnresolvedReference(String),
    #[error("Delete of {0} was accepted but the row is still visible")]
    DeleteNotApplied(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// CRUD operations the sync core needs from the backend
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Rows of `table` matching `query`
    async fn select(&self, table: Table, query: &Query) -> RemoteResult<Vec<Value>>;

    /// Insert a row and return it as stored, including the server-assigned id
    async fn insert(&self, table: Table, record: Value) -> RemoteResult<Value>;

    /// Partial update by primary key
    async fn update(&self, table: Table, id: &str, patch: Value) -> RemoteResult<()>;

    /// Delete by primary key
    async fn delete(&self, table: Table, id: &str) -> RemoteResult<()>;

    /// Whether a row with this primary key is visible to the current session
    async fn exists(&self, table: Table, id: &str) -> RemoteResult<bool> {
        let rows = self
            .select(table, &Query::new().eq("id", id).select("id").limit(1))
            .await?;
        Ok(!rows.is_empty())
    }

    /// Branch assigned to `user_id` in the backend's user profile, if any
    async fn user_branch(&self, user_id: &str) -> RemoteResult<Option<RecordId>>;
}
