//! Local store: one keyed table per entity, backed by libSQL

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use libsql::{params, Connection, Value as SqlValue};
use tokio::sync::{Mutex, MutexGuard};

use super::connection::{finish_transaction, Database};
use super::queue;
use crate::error::{Error, Result};
use crate::models::{Entity, EntityRecord, LocalRecord, RecordId, Table};
use crate::util::unix_millis_now;

/// What a [`LocalStore::remap_id`] pass touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemapSummary {
    /// Whether the record itself was re-keyed
    pub record_moved: bool,
    /// Dependent records whose foreign keys were rewritten
    pub dependents: usize,
    /// Queue items whose snapshot was rewritten
    pub queue_items: usize,
}

/// Durable on-device store shared by the queue, the sync engine and repositories.
///
/// Cloning is cheap; clones share the same connection and degraded flag.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    degraded: Arc<AtomicBool>,
    in_flight: Arc<StdMutex<HashSet<String>>>,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_database(Database::open(path).await?))
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory().await?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            degraded: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::default(),
        }
    }

    /// Queue item ids currently being pushed, shared by every clone
    pub(crate) fn in_flight(&self) -> &Arc<StdMutex<HashSet<String>>> {
        &self.in_flight
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().await
    }

    /// Whether a local write has failed since the store was opened
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Record a storage failure that the caller chose to survive
    pub fn mark_degraded(&self, context: &str, error: &Error) {
        tracing::warn!("Local cache degraded during {context}: {error}");
        self.degraded.store(true, Ordering::SeqCst);
    }

    /// Upsert a typed record
    pub async fn put<E: Entity>(&self, record: &E, synced: bool) -> Result<()> {
        self.put_record(&record.clone().into_record(), synced).await
    }

    /// Upsert a record of any table
    pub async fn put_record(&self, record: &EntityRecord, synced: bool) -> Result<()> {
        let db = self.lock().await;
        upsert_row(db.connection(), record, synced).await
    }

    /// Bulk upsert in a single transaction. Returns the number of rows written.
    pub async fn put_all(&self, records: &[EntityRecord], synced: bool) -> Result<usize> {
        let db = self.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            for record in records {
                upsert_row(conn, record, synced).await?;
            }
            Ok(records.len())
        }
        .await;
        finish_transaction(conn, result).await
    }

    /// Fetch a typed record by id
    pub async fn get<E: Entity>(&self, id: &RecordId) -> Result<Option<LocalRecord<E>>> {
        Ok(self
            .get_record(E::TABLE, id)
            .await?
            .and_then(|local| downcast(local)))
    }

    /// Fetch a record of any table by id
    pub async fn get_record(
        &self,
        table: Table,
        id: &RecordId,
    ) -> Result<Option<LocalRecord<EntityRecord>>> {
        let db = self.lock().await;
        select_row(db.connection(), table, id).await
    }

    /// All typed records of a table, in storage order
    pub async fn get_all<E: Entity>(&self) -> Result<Vec<LocalRecord<E>>> {
        Ok(self
            .get_all_records(E::TABLE)
            .await?
            .into_iter()
            .filter_map(downcast)
            .collect())
    }

    /// All records of a table, in storage order
    pub async fn get_all_records(&self, table: Table) -> Result<Vec<LocalRecord<EntityRecord>>> {
        let db = self.lock().await;
        let sql = format!("SELECT synced, data FROM {} ORDER BY rowid", table.name());
        select_rows(db.connection(), table, &sql, ()).await
    }

    /// Typed records of a branch, through the `branch_id` index
    pub async fn list_by_branch<E: Entity>(
        &self,
        branch_id: &RecordId,
    ) -> Result<Vec<LocalRecord<E>>> {
        let db = self.lock().await;
        let sql = format!(
            "SELECT synced, data FROM {} WHERE branch_id = ? ORDER BY rowid",
            E::TABLE.name()
        );
        let rows = select_rows(db.connection(), E::TABLE, &sql, [branch_id.as_str()]).await?;
        Ok(rows.into_iter().filter_map(downcast).collect())
    }

    /// Remove a record. Returns whether a row was deleted.
    pub async fn delete(&self, table: Table, id: &RecordId) -> Result<bool> {
        let db = self.lock().await;
        delete_row(db.connection(), table, id).await
    }

    /// Remove several records in one transaction, in the given order
    pub async fn delete_many(&self, keys: &[(Table, RecordId)]) -> Result<usize> {
        let db = self.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            let mut deleted = 0;
            for (table, id) in keys {
                if delete_row(conn, *table, id).await? {
                    deleted += 1;
                }
            }
            Ok(deleted)
        }
        .await;
        finish_transaction(conn, result).await
    }

    /// Remove every record of a table
    pub async fn clear(&self, table: Table) -> Result<()> {
        let db = self.lock().await;
        db.connection()
            .execute(&format!("DELETE FROM {}", table.name()), ())
            .await?;
        Ok(())
    }

    /// Swap every row of `table` for `fresh` (stored as synced) plus `kept`
    /// (stored as pending), in one transaction.
    ///
    /// On failure the table keeps its previous contents. Returns the number of
    /// fresh and kept rows written.
    pub async fn replace_table(
        &self,
        table: Table,
        fresh: &[EntityRecord],
        kept: &[EntityRecord],
    ) -> Result<(usize, usize)> {
        let db = self.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            conn.execute(&format!("DELETE FROM {}", table.name()), ())
                .await?;
            for record in fresh {
                upsert_row(conn, record, true).await?;
            }
            for record in kept {
                upsert_row(conn, record, false).await?;
            }
            Ok((fresh.len(), kept.len()))
        }
        .await;
        finish_transaction(conn, result).await
    }

    /// Flip the `synced` flag of a record without rewriting it
    pub async fn mark_synced(&self, table: Table, id: &RecordId, synced: bool) -> Result<bool> {
        let db = self.lock().await;
        let rows = db
            .connection()
            .execute(
                &format!("UPDATE {} SET synced = ? WHERE id = ?", table.name()),
                params![i64::from(synced), id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    /// Number of records not yet confirmed by the server
    pub async fn pending_count(&self, table: Table) -> Result<usize> {
        let db = self.lock().await;
        let mut rows = db
            .connection()
            .query(
                &format!("SELECT COUNT(*) FROM {} WHERE synced = 0", table.name()),
                (),
            )
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Replace the id `old` of a `table` record with `new` everywhere it appears:
    /// the record itself, foreign keys of dependent records and queued snapshots.
    ///
    /// Runs as one transaction.
    pub async fn remap_id(
        &self,
        table: Table,
        old: &RecordId,
        new: &RecordId,
    ) -> Result<RemapSummary> {
        if old == new {
            return Ok(RemapSummary::default());
        }
        let db = self.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = remap_in_transaction(conn, table, old, new).await;
        let summary = finish_transaction(conn, result).await?;
        tracing::debug!(
            "Remapped {table} id {old} -> {new} ({} dependents, {} queued)",
            summary.dependents,
            summary.queue_items
        );
        Ok(summary)
    }
}

pub(crate) async fn remap_in_transaction(
    conn: &Connection,
    table: Table,
    old: &RecordId,
    new: &RecordId,
) -> Result<RemapSummary> {
    let mut summary = RemapSummary::default();

    if let Some(mut local) = select_row(conn, table, old).await? {
        local.record.remap(table, old, new);
        delete_row(conn, table, old).await?;
        upsert_row(conn, &local.record, local.synced).await?;
        summary.record_moved = true;
    }

    let mut child_tables: Vec<Table> = table.children().map(|edge| edge.child).collect();
    child_tables.dedup();
    for child in child_tables {
        let sql = format!(
            "SELECT synced, data FROM {} WHERE instr(data, ?) > 0",
            child.name()
        );
        for mut local in select_rows(conn, child, &sql, [old.as_str()]).await? {
            if local.record.remap(table, old, new) {
                upsert_row(conn, &local.record, local.synced).await?;
                summary.dependents += 1;
            }
        }
    }

    summary.queue_items = queue::remap_rows(conn, table, old, new).await?;
    Ok(summary)
}

fn downcast<E: Entity>(local: LocalRecord<EntityRecord>) -> Option<LocalRecord<E>> {
    let synced = local.synced;
    E::from_record(local.record).map(|record| LocalRecord::new(record, synced))
}

fn optional_text(value: Option<&RecordId>) -> SqlValue {
    value.map_or(SqlValue::Null, |id| SqlValue::Text(id.as_str()))
}

pub(crate) async fn upsert_row(
    conn: &Connection,
    record: &EntityRecord,
    synced: bool,
) -> Result<()> {
    let data = serde_json::to_string(&record.to_value()?)?;
    conn.execute(
        &format!(
            "INSERT INTO {} (id, branch_id, synced, data, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                branch_id = excluded.branch_id,
                synced = excluded.synced,
                data = excluded.data,
                updated_at = excluded.updated_at",
            record.table().name()
        ),
        params![
            record.id().as_str(),
            optional_text(record.branch_id()),
            i64::from(synced),
            data,
            unix_millis_now()
        ],
    )
    .await?;
    Ok(())
}

async fn delete_row(conn: &Connection, table: Table, id: &RecordId) -> Result<bool> {
    let rows = conn
        .execute(
            &format!("DELETE FROM {} WHERE id = ?", table.name()),
            [id.as_str()],
        )
        .await?;
    Ok(rows > 0)
}

pub(crate) async fn select_row(
    conn: &Connection,
    table: Table,
    id: &RecordId,
) -> Result<Option<LocalRecord<EntityRecord>>> {
    let sql = format!("SELECT synced, data FROM {} WHERE id = ?", table.name());
    Ok(select_rows(conn, table, &sql, [id.as_str()])
        .await?
        .into_iter()
        .next())
}

/// Run a `SELECT synced, data ...` query and decode the rows.
///
/// Rows whose JSON no longer decodes are skipped with a warning.
async fn select_rows(
    conn: &Connection,
    table: Table,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Vec<LocalRecord<EntityRecord>>> {
    let mut rows = conn.query(sql, params).await?;
    let mut records = Vec::new();
    while let Some(row) = rows.next().await? {
        let synced = row.get::<i64>(0)? != 0;
        let data: String = row.get(1)?;
        let decoded = serde_json::from_str(&data)
            .map_err(Error::from)
            .and_then(|value| EntityRecord::from_value(table, value));
        match decoded {
            Ok(record) => records.push(LocalRecord::new(record, synced)),
            Err(error) => tracing::warn!("Skipping undecodable {table} row: {error}"),
        }
    }
    Ok(records)
}
