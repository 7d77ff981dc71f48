//! Operation queue persisted in the `sync_queue` table

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use libsql::{params, Connection};

use super::store::LocalStore;
use crate::error::{Error, Result};
use crate::models::{EntityRecord, Operation, QueueItem, RecordId, Table};
use crate::util::unix_millis_now;

/// Append-then-drain log of mutations that still have to reach the remote service
#[derive(Clone)]
pub struct OperationQueue {
    store: LocalStore,
}

/// Exclusive right to push one queue item, released on drop
#[derive(Debug)]
pub struct QueueClaim {
    claims: Arc<Mutex<HashSet<String>>>,
    queue_id: String,
}

impl Drop for QueueClaim {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.queue_id);
    }
}

impl OperationQueue {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Claim an item before sending it, so a concurrent drain and an
    /// immediate push never deliver the same item twice.
    ///
    /// Returns `None` while another caller holds the claim.
    pub fn claim(&self, queue_id: &str) -> Option<QueueClaim> {
        let claims = Arc::clone(self.store.in_flight());
        let acquired = claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue_id.to_string());
        acquired.then(|| QueueClaim {
            claims,
            queue_id: queue_id.to_string(),
        })
    }

    /// Whether an item is still queued
    pub async fn contains(&self, queue_id: &str) -> Result<bool> {
        let db = self.store.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT 1 FROM sync_queue WHERE id = ?", [queue_id])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Append an operation with `retries = 0`, stamped with the current time
    pub async fn enqueue(&self, operation: Operation, record: EntityRecord) -> Result<QueueItem> {
        self.enqueue_at(operation, record, unix_millis_now()).await
    }

    /// Append an operation with an explicit timestamp
    pub async fn enqueue_at(
        &self,
        operation: Operation,
        record: EntityRecord,
        timestamp: i64,
    ) -> Result<QueueItem> {
        let item = QueueItem::new(operation, record, timestamp);
        let db = self.store.lock().await;
        insert_row(db.connection(), &item).await?;
        tracing::debug!(
            "Queued {} on {} {}",
            item.operation,
            item.table(),
            item.record_id()
        );
        Ok(item)
    }

    /// The full queue, in no particular order
    pub async fn list_all(&self) -> Result<Vec<QueueItem>> {
        let db = self.store.lock().await;
        select_items(
            db.connection(),
            "SELECT id, table_name, operation, data, timestamp, retries FROM sync_queue",
            (),
        )
        .await
    }

    /// Queue items for one record and operation
    pub async fn find(
        &self,
        table: Table,
        operation: Operation,
        record_id: &RecordId,
    ) -> Result<Vec<QueueItem>> {
        let db = self.store.lock().await;
        select_items(
            db.connection(),
            "SELECT id, table_name, operation, data, timestamp, retries FROM sync_queue
             WHERE table_name = ? AND operation = ? AND record_id = ?",
            params![table.name(), operation.as_str(), record_id.as_str()],
        )
        .await
    }

    /// Remove one item. Returns whether it existed.
    pub async fn remove(&self, queue_id: &str) -> Result<bool> {
        let db = self.store.lock().await;
        let rows = db
            .connection()
            .execute("DELETE FROM sync_queue WHERE id = ?", [queue_id])
            .await?;
        Ok(rows > 0)
    }

    /// Persist a new retry counter for an item
    pub async fn update_retry_count(&self, queue_id: &str, retries: u32) -> Result<()> {
        let db = self.store.lock().await;
        let rows = db
            .connection()
            .execute(
                "UPDATE sync_queue SET retries = ? WHERE id = ?",
                params![i64::from(retries), queue_id],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(queue_id.to_string()));
        }
        Ok(())
    }

    /// Remove every item of one record and operation. Returns the number removed.
    pub async fn remove_matching(
        &self,
        table: Table,
        operation: Operation,
        record_id: &RecordId,
    ) -> Result<usize> {
        let db = self.store.lock().await;
        let rows = db
            .connection()
            .execute(
                "DELETE FROM sync_queue WHERE table_name = ? AND operation = ? AND record_id = ?",
                params![table.name(), operation.as_str(), record_id.as_str()],
            )
            .await?;
        Ok(usize::try_from(rows).unwrap_or_default())
    }

    /// Remove every item of one record, whatever the operation
    pub async fn remove_for_record(&self, table: Table, record_id: &RecordId) -> Result<usize> {
        let db = self.store.lock().await;
        let rows = db
            .connection()
            .execute(
                "DELETE FROM sync_queue WHERE table_name = ? AND record_id = ?",
                params![table.name(), record_id.as_str()],
            )
            .await?;
        Ok(usize::try_from(rows).unwrap_or_default())
    }

    /// Ids of `table` records with a queued delete
    pub async fn pending_deletes(&self, table: Table) -> Result<HashSet<RecordId>> {
        self.pending_ids(table, &[Operation::Delete]).await
    }

    /// Ids of `table` records with a queued insert or update
    pub async fn pending_writes(&self, table: Table) -> Result<HashSet<RecordId>> {
        self.pending_ids(table, &[Operation::Insert, Operation::Update])
            .await
    }

    async fn pending_ids(
        &self,
        table: Table,
        operations: &[Operation],
    ) -> Result<HashSet<RecordId>> {
        let db = self.store.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT record_id, operation FROM sync_queue WHERE table_name = ?",
                [table.name()],
            )
            .await?;

        let mut ids = HashSet::new();
        while let Some(row) = rows.next().await? {
            let record_id: String = row.get(0)?;
            let operation: String = row.get(1)?;
            let matches = operation
                .parse::<Operation>()
                .is_ok_and(|op| operations.contains(&op));
            if matches {
                if let Ok(id) = record_id.parse() {
                    ids.insert(id);
                }
            }
        }
        Ok(ids)
    }

    /// Number of queued items
    pub async fn len(&self) -> Result<usize> {
        let db = self.store.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM sync_queue", ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

async fn insert_row(conn: &Connection, item: &QueueItem) -> Result<()> {
    let data = serde_json::to_string(&item.data.to_value()?)?;
    conn.execute(
        "INSERT INTO sync_queue (id, table_name, operation, record_id, data, timestamp, retries)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            item.id.as_str(),
            item.table().name(),
            item.operation.as_str(),
            item.record_id().as_str(),
            data,
            item.timestamp,
            i64::from(item.retries)
        ],
    )
    .await?;
    Ok(())
}

/// Rewrite queued snapshots that mention the `table` id `old`.
///
/// Runs on the caller's connection so it can join the caller's transaction.
pub(crate) async fn remap_rows(
    conn: &Connection,
    table: Table,
    old: &RecordId,
    new: &RecordId,
) -> Result<usize> {
    let items = select_items(
        conn,
        "SELECT id, table_name, operation, data, timestamp, retries FROM sync_queue
         WHERE instr(data, ?) > 0",
        [old.as_str()],
    )
    .await?;

    let mut rewritten = 0;
    for mut item in items {
        if !item.data.remap(table, old, new) {
            continue;
        }
        let data = serde_json::to_string(&item.data.to_value()?)?;
        conn.execute(
            "UPDATE sync_queue SET record_id = ?, data = ? WHERE id = ?",
            params![item.record_id().as_str(), data, item.id.as_str()],
        )
        .await?;
        rewritten += 1;
    }
    Ok(rewritten)
}

/// Decode queue rows; rows that no longer decode are skipped with a warning.
async fn select_items(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Vec<QueueItem>> {
    let mut rows = conn.query(sql, params).await?;
    let mut items = Vec::new();
    while let Some(row) = rows.next().await? {
        let id: String = row.get(0)?;
        let table_name: String = row.get(1)?;
        let operation: String = row.get(2)?;
        let data: String = row.get(3)?;
        let timestamp: i64 = row.get(4)?;
        let retries: i64 = row.get(5)?;

        match decode_item(&table_name, &operation, &data) {
            Ok((operation, data)) => items.push(QueueItem {
                id,
                operation,
                data,
                timestamp,
                retries: u32::try_from(retries).unwrap_or_default(),
            }),
            Err(error) => tracing::warn!("Skipping undecodable queue item {id}: {error}"),
        }
    }
    Ok(items)
}

fn decode_item(table_name: &str, operation: &str, data: &str) -> Result<(Operation, EntityRecord)> {
    let table: Table = table_name.parse().map_err(Error::InvalidInput)?;
    let operation: Operation = operation.parse().map_err(Error::InvalidInput)?;
    let value = serde_json::from_str(data)?;
    Ok((operation, EntityRecord::from_value(table, value)?))
}
