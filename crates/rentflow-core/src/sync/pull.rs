//! Refreshing the local store from the remote service

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::db::{LocalStore, OperationQueue};
use crate::error::Result;
use crate::models::{EntityRecord, RecordId, Table};
use crate::remote::{Query, RemoteService};
use crate::util::unix_millis_now;

/// What a pull wrote locally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Remote rows written as synced
    pub written: usize,
    /// Remote rows written, per table in pull order
    pub tables: Vec<(Table, usize)>,
    /// Local unsynced records kept over their remote copy
    pub kept_pending: usize,
    /// Remote rows skipped because a local delete is still queued
    pub skipped_deletes: usize,
    /// Remote rows that did not decode
    pub rejected: usize,
    /// Tables whose local copy could not be replaced
    pub degraded: Vec<Table>,
}

#[derive(Debug, Clone)]
enum Scope {
    All,
    Branch(RecordId),
}

/// Downloads remote rows into the local store, table by table in insert order.
///
/// Queued mutations win over what the server returns: rows with a pending
/// delete are not written back, and unsynced local records with a pending
/// insert or update are kept as they are.
pub struct PullService<R> {
    store: LocalStore,
    queue: OperationQueue,
    remote: Arc<R>,
}

impl<R> Clone for PullService<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            queue: self.queue.clone(),
            remote: Arc::clone(&self.remote),
        }
    }
}

impl<R: RemoteService> PullService<R> {
    pub fn new(store: LocalStore, remote: Arc<R>) -> Self {
        Self {
            queue: OperationQueue::new(store.clone()),
            store,
            remote,
        }
    }

    /// Full refresh of every table
    pub async fn pull_all(&self) -> Result<PullReport> {
        self.pull(Scope::All).await
    }

    /// Refresh scoped to one branch: the branch row, its branch-scoped tables
    /// and the rental items of its rentals
    pub async fn preload(&self, branch_id: &RecordId) -> Result<PullReport> {
        self.pull(Scope::Branch(branch_id.clone())).await
    }

    async fn pull(&self, scope: Scope) -> Result<PullReport> {
        let mut report = PullReport::default();
        let mut rental_ids: Vec<String> = Vec::new();

        for table in Table::insert_order() {
            let query = match (&scope, table) {
                (Scope::All, _) => Some(Query::new()),
                (Scope::Branch(branch), Table::Branches) => {
                    Some(Query::new().eq("id", branch.as_str()))
                }
                (Scope::Branch(_), Table::RentalItems) if rental_ids.is_empty() => None,
                (Scope::Branch(_), Table::RentalItems) => {
                    Some(Query::new().in_list("rental_id", rental_ids.clone()))
                }
                (Scope::Branch(branch), _) => Some(Query::new().eq("branch_id", branch.as_str())),
            };

            let rows = match query {
                Some(query) => self.remote.select(table, &query).await?,
                None => Vec::new(),
            };
            let records = decode_rows(table, rows, &mut report);
            if table == Table::Rentals {
                rental_ids = records.iter().map(|record| record.id().as_str()).collect();
            }
            self.replace_table(table, records, &mut report).await;
        }

        let mut metadata = self.store.load_metadata().await.unwrap_or_default();
        metadata.last_pull_at = Some(unix_millis_now());
        if let Scope::Branch(branch) = &scope {
            metadata.branch_id = Some(branch.clone());
        }
        if let Err(error) = self.store.save_metadata(&metadata).await {
            self.store.mark_degraded("saving pull metadata", &error);
        }

        tracing::info!(
            "Pull finished: {} written, {} pending kept, {} pending deletes skipped",
            report.written,
            report.kept_pending,
            report.skipped_deletes
        );
        Ok(report)
    }

    /// Swap the local copy of `table` for `incoming`, keeping pending local work.
    ///
    /// Storage failures leave the table as it was and are recorded on the report.
    async fn replace_table(
        &self,
        table: Table,
        incoming: Vec<EntityRecord>,
        report: &mut PullReport,
    ) {
        if let Err(error) = self.try_replace_table(table, incoming, report).await {
            self.store.mark_degraded(&format!("pull of {table}"), &error);
            report.degraded.push(table);
        }
    }

    async fn try_replace_table(
        &self,
        table: Table,
        incoming: Vec<EntityRecord>,
        report: &mut PullReport,
    ) -> Result<()> {
        let pending_deletes = self.queue.pending_deletes(table).await?;
        let pending_writes = self.queue.pending_writes(table).await?;

        let kept: Vec<EntityRecord> = self
            .store
            .get_all_records(table)
            .await?
            .into_iter()
            .filter(|local| !local.synced && pending_writes.contains(local.record.id()))
            .map(|local| local.record)
            .collect();
        let kept_ids: HashSet<&RecordId> = kept.iter().map(EntityRecord::id).collect();

        let mut fresh = Vec::with_capacity(incoming.len());
        for record in incoming {
            if pending_deletes.contains(record.id()) {
                report.skipped_deletes += 1;
            } else if !kept_ids.contains(record.id()) {
                fresh.push(record);
            }
        }

        let (written, kept) = self.store.replace_table(table, &fresh, &kept).await?;
        report.written += written;
        report.tables.push((table, written));
        report.kept_pending += kept;
        Ok(())
    }
}

fn decode_rows(table: Table, rows: Vec<Value>, report: &mut PullReport) -> Vec<EntityRecord> {
    rows.into_iter()
        .filter_map(|row| match EntityRecord::from_value(table, row) {
            Ok(record) => Some(record),
            Err(error) => {
                tracing::warn!("Skipping remote {table} row that does not decode: {error}");
                report.rejected += 1;
                None
            }
        })
        .collect()
}
