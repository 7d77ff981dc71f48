//! Replacing temporary ids with the ids the server assigned

use std::collections::HashMap;

use libsql::params;
use serde_json::Value;

use crate::db::connection::finish_transaction;
use crate::db::store::{remap_in_transaction, select_row, upsert_row};
use crate::db::{LocalStore, RemapSummary};
use crate::error::Result;
use crate::models::{EntityRecord, Operation, RecordId, Table};
use crate::remote::RemoteError;

/// Temporary-to-confirmed id translations learned during one drain pass
#[derive(Debug, Default)]
pub struct IdMap {
    ids: HashMap<(Table, RecordId), RecordId>,
}

impl IdMap {
    pub fn insert(&mut self, table: Table, old: RecordId, new: RecordId) {
        self.ids.insert((table, old), new);
    }

    pub fn get(&self, table: Table, old: &RecordId) -> Option<&RecordId> {
        self.ids.get(&(table, old.clone()))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Rewrite the record's own id and foreign keys with every known translation.
    /// Returns whether anything changed.
    pub fn apply(&self, record: &mut EntityRecord) -> bool {
        let mut changed = false;
        for ((table, old), new) in &self.ids {
            changed |= record.remap(*table, old, new);
        }
        changed
    }
}

/// Build the confirmed record from an insert response.
///
/// A full row is decoded as-is. A partial row only contributes its `id`,
/// applied to the record that was sent.
pub fn confirmed_record(submitted: &EntityRecord, response: Value) -> Result<EntityRecord> {
    let id = response
        .get("id")
        .cloned()
        .ok_or_else(|| RemoteError::InvalidPayload("insert response has no id".to_string()))?;
    let id: RecordId = serde_json::from_value(id)
        .map_err(|error| RemoteError::InvalidPayload(format!("insert response id: {error}")))?;
    if id.is_temporary() {
        return Err(
            RemoteError::InvalidPayload(format!("server returned temporary id {id}")).into(),
        );
    }

    match EntityRecord::from_value(submitted.table(), response) {
        Ok(record) => Ok(record),
        Err(error) => {
            tracing::debug!(
                "Insert response for {} is not a full row ({error}), keeping submitted fields",
                submitted.table()
            );
            let mut record = submitted.clone();
            record.set_id(id);
            Ok(record)
        }
    }
}

/// Fold a confirmed insert back into the local store in one transaction.
///
/// `submitted` is the snapshot that was sent (still carrying the temporary
/// id); `confirmed` is what the server stored. Every local reference to the
/// temporary id, including queued snapshots, is rewritten to the confirmed id
/// and the queued insert for that record is removed. The local copy becomes
/// the confirmed row unless it was edited or deleted after `submitted` was
/// taken, in which case the newer local state is kept as pending.
pub async fn reconcile_insert(
    store: &LocalStore,
    submitted: &EntityRecord,
    confirmed: &EntityRecord,
) -> Result<RemapSummary> {
    let table = submitted.table();
    let old = submitted.id().clone();
    let new = confirmed.id().clone();

    let mut expected = submitted.clone();
    expected.remap(table, &old, &new);

    let db = store.lock().await;
    let conn = db.connection();
    conn.execute("BEGIN TRANSACTION", ()).await?;
    let result = async {
        let summary = if old == new {
            RemapSummary::default()
        } else {
            remap_in_transaction(conn, table, &old, &new).await?
        };

        conn.execute(
            "DELETE FROM sync_queue WHERE table_name = ? AND operation = ? AND record_id IN (?, ?)",
            params![
                table.name(),
                Operation::Insert.as_str(),
                old.as_str(),
                new.as_str()
            ],
        )
        .await?;

        match select_row(conn, table, &new).await? {
            Some(local) if local.record != expected => {
                tracing::debug!("{table} {new} changed locally while its insert was in flight");
            }
            Some(_) => upsert_row(conn, confirmed, true).await?,
            None => tracing::debug!("{table} {new} was removed locally before confirmation"),
        }
        Ok(summary)
    }
    .await;
    let summary = finish_transaction(conn, result).await?;

    if old != new {
        tracing::info!("{table} {old} confirmed as {new}");
    }
    Ok(summary)
}
