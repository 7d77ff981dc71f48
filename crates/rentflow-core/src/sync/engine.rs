//! Drains the operation queue against the remote service

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::ordering::sort_for_replay;
use super::reconcile::{confirmed_record, reconcile_insert, IdMap};
use crate::config::SyncSettings;
use crate::db::{LocalStore, OperationQueue};
use crate::error::{Error, Result};
use crate::models::{Operation, QueueItem};
use crate::remote::{RemoteError, RemoteService};

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Items applied remotely and removed from the queue
    pub synced: usize,
    /// Items that failed in this pass, dropped ones included
    pub failed: usize,
    /// Items removed after exhausting their retries
    pub dropped: usize,
}

impl SyncReport {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.synced == 0 && self.failed == 0
    }
}

/// Exclusive right to drain the queue, released on drop
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Replays queued mutations in dependency order.
///
/// At most one drain runs at a time per engine (and its clones); a call made
/// while another drain is in progress returns an empty report immediately.
pub struct SyncEngine<R> {
    store: LocalStore,
    queue: OperationQueue,
    remote: Arc<R>,
    draining: Arc<AtomicBool>,
    settings: SyncSettings,
}

impl<R> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            queue: self.queue.clone(),
            remote: Arc::clone(&self.remote),
            draining: Arc::clone(&self.draining),
            settings: self.settings,
        }
    }
}

impl<R: RemoteService> SyncEngine<R> {
    pub fn new(store: LocalStore, remote: Arc<R>, settings: SyncSettings) -> Self {
        Self {
            queue: OperationQueue::new(store.clone()),
            store,
            remote,
            draining: Arc::new(AtomicBool::new(false)),
            settings,
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Run one drain pass over a snapshot of the queue.
    ///
    /// Item failures are counted and never abort the pass; a local storage
    /// failure does.
    pub async fn perform_sync(&self) -> Result<SyncReport> {
        let Some(_guard) = DrainGuard::try_acquire(&self.draining) else {
            tracing::debug!("Sync already in progress, skipping");
            return Ok(SyncReport::default());
        };

        let mut items = self.queue.list_all().await?;
        if items.is_empty() {
            return Ok(SyncReport::default());
        }
        sort_for_replay(&mut items);
        tracing::info!("Draining {} queued operations", items.len());

        let mut ids = IdMap::default();
        let mut report = SyncReport::default();
        for mut item in items {
            // Pushed by a repository right now, or already delivered
            let Some(_claim) = self.queue.claim(&item.id) else {
                tracing::debug!(
                    "Skipping {} on {}: push in flight",
                    item.operation,
                    item.table()
                );
                continue;
            };
            if !self.queue.contains(&item.id).await? {
                continue;
            }
            ids.apply(&mut item.data);
            match self.replay(&item, &mut ids).await {
                Ok(()) => {
                    self.queue.remove(&item.id).await?;
                    report.synced += 1;
                }
                Err(error @ (Error::LibSql(_) | Error::Database(_) | Error::Io(_))) => {
                    return Err(error);
                }
                Err(error) => self.record_failure(&item, &error, &mut report).await?,
            }
        }

        tracing::info!(
            "Sync pass finished: {} synced, {} failed, {} dropped",
            report.synced,
            report.failed,
            report.dropped
        );
        Ok(report)
    }

    async fn replay(&self, item: &QueueItem, ids: &mut IdMap) -> Result<()> {
        let table = item.table();
        let record = &item.data;

        match item.operation {
            Operation::Insert => {
                if let Some(parent) = record.unresolved_references().first() {
                    return Err(RemoteError::UnresolvedReference(parent.to_string()).into());
                }
                let response = self
                    .remote
                    .insert(table, record.to_remote_payload()?)
                    .await?;
                let confirmed = confirmed_record(record, response)?;
                reconcile_insert(&self.store, record, &confirmed).await?;
                if confirmed.id() != record.id() {
                    ids.insert(table, record.id().clone(), confirmed.id().clone());
                }
            }
            Operation::Update => {
                let id = record.id();
                if id.is_temporary() {
                    return Err(RemoteError::UnresolvedReference(id.to_string()).into());
                }
                if let Some(parent) = record.unresolved_references().first() {
                    return Err(RemoteError::UnresolvedReference(parent.to_string()).into());
                }
                let mut patch = record.to_value()?;
                if let Some(fields) = patch.as_object_mut() {
                    fields.remove("id");
                }
                self.remote.update(table, &id.as_str(), patch).await?;

                // Only flag the local copy if no newer edit replaced this snapshot
                if let Some(local) = self.store.get_record(table, id).await? {
                    if local.record == *record {
                        self.store.mark_synced(table, id, true).await?;
                    }
                }
            }
            Operation::Delete => {
                let id = record.id();
                if id.is_temporary() {
                    return Err(RemoteError::UnresolvedReference(id.to_string()).into());
                }
                let key = id.as_str();
                self.remote.delete(table, &key).await?;
                if self.remote.exists(table, &key).await? {
                    return Err(RemoteError::DeleteNotApplied(format!("{table} {id}")).into());
                }
                self.store.delete(table, id).await?;
            }
        }

        tracing::debug!("Replayed {} on {table} {}", item.operation, item.record_id());
        Ok(())
    }

    async fn record_failure(
        &self,
        item: &QueueItem,
        error: &Error,
        report: &mut SyncReport,
    ) -> Result<()> {
        report.failed += 1;

        if item.retries >= self.settings.max_retries {
            tracing::warn!(
                "Dropping {} on {} {} after {} retries: {error}",
                item.operation,
                item.table(),
                item.record_id(),
                item.retries
            );
            self.queue.remove(&item.id).await?;
            report.dropped += 1;
            return Ok(());
        }

        tracing::warn!(
            "{} on {} {} failed (attempt {}): {error}",
            item.operation,
            item.table(),
            item.record_id(),
            item.retries + 1
        );
        match self.queue.update_retry_count(&item.id, item.retries + 1).await {
            // Removed by a reconcile earlier in this pass
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Branch, Customer, Entity, EntityRecord, Equipment, RecordId, Rental, RentalItem, Table,
    };
    use crate::test_support::{reject_local_insert, Call, FakeRemote};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Harness {
        store: LocalStore,
        queue: OperationQueue,
        remote: Arc<FakeRemote>,
        engine: SyncEngine<FakeRemote>,
    }

    async fn setup() -> Harness {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = SyncEngine::new(store.clone(), Arc::clone(&remote), SyncSettings::default());
        Harness {
            queue: OperationQueue::new(store.clone()),
            store,
            remote,
            engine,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
    }

    fn main_branch_row() -> serde_json::Value {
        json!({ "id": "b-1", "name": "Main", "created_at": "2024-01-01T00:00:00Z" })
    }

    impl Harness {
        async fn create_offline<E: Entity>(&self, record: &E, timestamp: i64) {
            self.store.put(record, false).await.unwrap();
            self.queue
                .enqueue_at(Operation::Insert, record.clone().into_record(), timestamp)
                .await
                .unwrap();
        }
    }

    fn inserted_tables(calls: &[Call]) -> Vec<Table> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::Insert(table, _) => Some(*table),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_graph_replays_parents_first_and_rewrites_ids() {
        let h = setup().await;
        h.remote.seed(Table::Branches, main_branch_row());
        let branch = RecordId::confirmed("b-1");

        let customer = Customer::new(branch.clone(), "Ana");
        let equipment = Equipment::new(branch.clone(), "Mixer", "concrete", 4500);
        let rental = Rental::new(branch.clone(), customer.id.clone(), day());
        let line = RentalItem::new(rental.id.clone(), equipment.id.clone(), 1, 4500);

        // Enqueued children first, with older timestamps
        h.create_offline(&line, 1).await;
        h.create_offline(&rental, 2).await;
        h.create_offline(&equipment, 3).await;
        h.create_offline(&customer, 4).await;

        let report = h.engine.perform_sync().await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                synced: 4,
                failed: 0,
                dropped: 0
            }
        );
        assert!(h.queue.is_empty().await.unwrap());
        assert_eq!(
            inserted_tables(&h.remote.calls()),
            vec![
                Table::Customers,
                Table::Equipment,
                Table::Rentals,
                Table::RentalItems
            ]
        );

        // The rental went out with the customer's server id
        let rentals = h.remote.rows(Table::Rentals);
        assert_eq!(rentals.len(), 1);
        let server_customer = h.remote.rows(Table::Customers)[0]["id"].clone();
        assert_eq!(rentals[0]["customer_id"], server_customer);

        // Locally, no temporary id survives and everything is synced
        for table in Table::ALL {
            for local in h.store.get_all_records(table).await.unwrap() {
                assert!(!local.record.id().is_temporary(), "{table} kept a temporary id");
                assert!(local.record.unresolved_references().is_empty());
                assert!(local.synced);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deletes_replay_children_first() {
        let h = setup().await;
        h.remote.seed(
            Table::Rentals,
            json!({
                "id": "r-1",
                "branch_id": "b",
                "customer_id": "c",
                "start_date": "2024-07-01"
            }),
        );
        h.remote.seed(
            Table::RentalItems,
            json!({
                "id": "i-1",
                "rental_id": "r-1",
                "equipment_id": "e",
                "quantity": 1,
                "daily_rate_cents": 10
            }),
        );

        let mut rental = Rental::new(RecordId::confirmed("b"), RecordId::confirmed("c"), day());
        rental.id = RecordId::confirmed("r-1");
        let mut line = RentalItem::new(rental.id.clone(), RecordId::confirmed("e"), 1, 10);
        line.id = RecordId::confirmed("i-1");

        h.queue
            .enqueue_at(Operation::Delete, rental.into_record(), 1)
            .await
            .unwrap();
        h.queue
            .enqueue_at(Operation::Delete, line.into_record(), 2)
            .await
            .unwrap();

        let report = h.engine.perform_sync().await.unwrap();
        assert_eq!(report.synced, 2);
        assert_eq!(
            h.remote.writes(),
            vec![
                Call::Delete(Table::RentalItems, "i-1".to_string()),
                Call::Delete(Table::Rentals, "r-1".to_string()),
            ]
        );
        assert!(h.remote.rows(Table::Rentals).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_parent_blocks_children_without_sending_them() {
        let h = setup().await;
        h.remote.seed(Table::Branches, main_branch_row());
        h.remote.fail(Table::Customers, Operation::Insert);

        let customer = Customer::new(RecordId::confirmed("b-1"), "Ana");
        let rental = Rental::new(RecordId::confirmed("b-1"), customer.id.clone(), day());
        h.create_offline(&customer, 1).await;
        h.create_offline(&rental, 2).await;

        let report = h.engine.perform_sync().await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(inserted_tables(&h.remote.calls()), vec![Table::Customers]);

        let items = h.queue.list_all().await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.retries == 1));

        // Once the backend recovers, the next pass delivers both in order
        h.remote.recover(Table::Customers, Operation::Insert);
        let report = h.engine.perform_sync().await.unwrap();
        assert_eq!(report.synced, 2);
        assert_eq!(h.remote.rows(Table::Rentals).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_bound_drops_after_max_retries() {
        let h = setup().await;
        h.remote.fail(Table::Branches, Operation::Insert);
        h.create_offline(&Branch::new("Doomed"), 1).await;

        let max = SyncSettings::default().max_retries;
        for attempt in 0..max {
            let report = h.engine.perform_sync().await.unwrap();
            assert_eq!(report.failed, 1);
            assert_eq!(report.dropped, 0);
            assert_eq!(h.queue.list_all().await.unwrap()[0].retries, attempt + 1);
        }

        let report = h.engine.perform_sync().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert!(h.queue.is_empty().await.unwrap());

        let attempts = inserted_tables(&h.remote.calls()).len();
        assert_eq!(attempts, usize::try_from(max + 1).unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replay_after_success_is_idempotent() {
        let h = setup().await;
        h.create_offline(&Branch::new("Once"), 1).await;

        assert_eq!(h.engine.perform_sync().await.unwrap().synced, 1);
        h.remote.clear_calls();

        let report = h.engine.perform_sync().await.unwrap();
        assert!(report.is_empty());
        assert!(h.remote.writes().is_empty());
        assert_eq!(h.remote.rows(Table::Branches).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_marks_synced_only_when_unchanged() {
        let h = setup().await;
        h.remote.seed(Table::Branches, main_branch_row());

        let mut branch = Branch::new("Main 2");
        branch.id = RecordId::confirmed("b-1");
        h.store.put(&branch, false).await.unwrap();
        h.queue
            .enqueue_at(Operation::Update, branch.clone().into_record(), 1)
            .await
            .unwrap();

        let report = h.engine.perform_sync().await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(h.remote.row(Table::Branches, "b-1").unwrap()["name"], "Main 2");
        assert!(h.store.get::<Branch>(&branch.id).await.unwrap().unwrap().synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_that_leaves_row_visible_is_retried() {
        let h = setup().await;
        h.remote.seed(Table::Branches, main_branch_row());
        h.remote.ignore_deletes(Table::Branches);

        let mut branch = Branch::new("Main");
        branch.id = RecordId::confirmed("b-1");
        h.queue
            .enqueue_at(Operation::Delete, branch.into_record(), 1)
            .await
            .unwrap();

        let report = h.engine.perform_sync().await.unwrap();
        assert_eq!(report.synced, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(h.queue.list_all().await.unwrap()[0].retries, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overlapping_drains_send_each_item_once() {
        let h = setup().await;
        for i in 0..5 {
            h.create_offline(&Branch::new(format!("B{i}")), i).await;
        }

        let first = h.engine.clone();
        let second = h.engine.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { first.perform_sync().await.unwrap() }),
            tokio::spawn(async move { second.perform_sync().await.unwrap() }),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.synced + b.synced, 5);
        assert_eq!(inserted_tables(&h.remote.calls()).len(), 5);
        assert_eq!(h.remote.rows(Table::Branches).len(), 5);
        assert!(!h.engine.is_draining());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_storage_failure_aborts_pass_and_releases_guard() {
        let h = setup().await;
        h.create_offline(&Branch::new("A"), 1).await;
        // The confirmed row cannot be stored, so reconciling the first insert fails
        reject_local_insert(&h.store, Table::Branches, "srv-1").await;

        assert!(h.engine.perform_sync().await.is_err());
        assert!(!h.engine.is_draining());
        let items = h.queue.list_all().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].retries, 0);

        let report = h.engine.perform_sync().await.unwrap();
        assert_eq!(report.synced, 1);
        assert!(h.queue.is_empty().await.unwrap());
        assert!(!h.engine.is_draining());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_outage_counts_failures_without_aborting() {
        let h = setup().await;
        h.remote.set_offline(true);
        h.create_offline(&Branch::new("A"), 1).await;
        h.create_offline(&Branch::new("B"), 2).await;

        let report = h.engine.perform_sync().await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(h.queue.len().await.unwrap(), 2);

        let pending: Vec<EntityRecord> = h
            .store
            .get_all_records(Table::Branches)
            .await
            .unwrap()
            .into_iter()
            .filter(|local| !local.synced)
            .map(|local| local.record)
            .collect();
        assert_eq!(pending.len(), 2);
    }
}
