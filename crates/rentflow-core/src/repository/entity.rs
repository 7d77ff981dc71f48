//! Generic offline-first repository over one entity table

use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use crate::db::{LocalStore, OperationQueue};
use crate::error::{Error, Result};
use crate::models::{
    Entity, EntityRecord, LocalRecord, OnDelete, Operation, QueueItem, RecordId, Table,
};
use crate::remote::{RemoteError, RemoteService};
use crate::sync::{confirmed_record, reconcile_insert, ConnectivityMonitor};

/// Where a mutation stands once the repository call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    /// Applied remotely during the call
    Synced,
    /// Saved locally; the queued operation will deliver it
    Queued,
    /// The record never reached the server, so nothing was queued
    Discarded,
}

/// Record as stored after a create or update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome<E> {
    pub record: E,
    pub status: MutationStatus,
}

impl<E> MutationOutcome<E> {
    pub const fn is_synced(&self) -> bool {
        matches!(self.status, MutationStatus::Synced)
    }
}

/// Reads and writes of one entity type.
///
/// Every write lands in the local store first and is queued, then pushed
/// immediately when online. Reads never touch the network.
pub struct EntityRepository<E, R> {
    store: LocalStore,
    queue: OperationQueue,
    remote: Arc<R>,
    connectivity: ConnectivityMonitor,
    _entity: PhantomData<fn() -> E>,
}

impl<E, R> Clone for EntityRepository<E, R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            queue: self.queue.clone(),
            remote: Arc::clone(&self.remote),
            connectivity: self.connectivity.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity, R: RemoteService> EntityRepository<E, R> {
    pub fn new(store: LocalStore, remote: Arc<R>, connectivity: ConnectivityMonitor) -> Self {
        Self {
            queue: OperationQueue::new(store.clone()),
            store,
            remote,
            connectivity,
            _entity: PhantomData,
        }
    }

    /// Repository of another entity sharing this one's store and remote
    pub fn sibling<T: Entity>(&self) -> EntityRepository<T, R> {
        EntityRepository {
            store: self.store.clone(),
            queue: self.queue.clone(),
            remote: Arc::clone(&self.remote),
            connectivity: self.connectivity.clone(),
            _entity: PhantomData,
        }
    }

    pub(crate) const fn store(&self) -> &LocalStore {
        &self.store
    }

    /// All records, in the entity's natural order
    pub async fn list(&self) -> Vec<E> {
        strip(self.list_with_status().await)
    }

    /// All records with their local sync flag, in the entity's natural order
    pub async fn list_with_status(&self) -> Vec<LocalRecord<E>> {
        match self.store.get_all::<E>().await {
            Ok(records) => sorted(records),
            Err(error) => {
                tracing::warn!("Could not read {} from the local cache: {error}", E::TABLE);
                Vec::new()
            }
        }
    }

    /// Records of one branch, in the entity's natural order
    pub async fn list_by_branch(&self, branch_id: &RecordId) -> Vec<E> {
        match self.store.list_by_branch::<E>(branch_id).await {
            Ok(records) => strip(sorted(records)),
            Err(error) => {
                tracing::warn!(
                    "Could not read {} of branch {branch_id} from the local cache: {error}",
                    E::TABLE
                );
                Vec::new()
            }
        }
    }

    pub async fn get(&self, id: &RecordId) -> Option<E> {
        match self.store.get::<E>(id).await {
            Ok(record) => record.map(|local| local.record),
            Err(error) => {
                tracing::warn!("Could not read {} {id} from the local cache: {error}", E::TABLE);
                None
            }
        }
    }

    /// Save a new record locally, queue its insert and push it when online.
    ///
    /// When the server confirms the insert during the call, the returned
    /// record carries the server-assigned id.
    pub async fn create(&self, record: E) -> Result<MutationOutcome<E>> {
        let submitted = record.clone().into_record();

        if let Err(error) = self.store.put(&record, false).await {
            self.store.mark_degraded(&format!("create in {}", E::TABLE), &error);
        }
        let queued = self.enqueue(Operation::Insert, &submitted).await?;

        if !self.connectivity.is_online() || !submitted.unresolved_references().is_empty() {
            return Ok(MutationOutcome {
                record,
                status: MutationStatus::Queued,
            });
        }

        // A drain that already picked the item up delivers it
        let _claim = match &queued {
            Some(item) => {
                let Some(claim) = self.queue.claim(&item.id) else {
                    return Ok(MutationOutcome {
                        record,
                        status: MutationStatus::Queued,
                    });
                };
                Some(claim)
            }
            None => None,
        };

        match self.push_insert(&submitted).await {
            Ok(confirmed) => {
                if let Err(error) = reconcile_insert(&self.store, &submitted, &confirmed).await {
                    self.store
                        .mark_degraded(&format!("confirming {}", E::TABLE), &error);
                }
                Ok(MutationOutcome {
                    record: confirmed.into_entity().unwrap_or(record),
                    status: MutationStatus::Synced,
                })
            }
            Err(error) => self.recover(record, queued.is_some(), &error),
        }
    }

    /// Save changes locally, queue the update and push it when online
    pub async fn update(&self, record: E) -> Result<MutationOutcome<E>> {
        let id = record.id().clone();
        match self.store.get::<E>(&id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(Error::NotFound(format!("{} {id}", E::TABLE))),
            Err(error) => self
                .store
                .mark_degraded(&format!("update in {}", E::TABLE), &error),
        }

        let submitted = record.clone().into_record();
        if let Err(error) = self.store.put(&record, false).await {
            self.store
                .mark_degraded(&format!("update in {}", E::TABLE), &error);
        }
        let queued = self.enqueue(Operation::Update, &submitted).await?;

        if !self.connectivity.is_online()
            || id.is_temporary()
            || !submitted.unresolved_references().is_empty()
        {
            return Ok(MutationOutcome {
                record,
                status: MutationStatus::Queued,
            });
        }

        match self.push_update(&submitted).await {
            Ok(()) => {
                if let Err(error) = self.store.mark_synced(E::TABLE, &id, true).await {
                    self.store
                        .mark_degraded(&format!("update in {}", E::TABLE), &error);
                }
                Ok(MutationOutcome {
                    record,
                    status: MutationStatus::Synced,
                })
            }
            Err(error) => self.recover(record, queued.is_some(), &error),
        }
    }

    /// Delete a record and the children that cascade with it.
    ///
    /// Fails with [`Error::Integrity`] before touching anything when a
    /// restricting child still references the record.
    pub async fn delete(&self, id: &RecordId) -> Result<MutationStatus> {
        let record = self
            .store
            .get_record(E::TABLE, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", E::TABLE)))?
            .record;

        let mut cascade: Vec<EntityRecord> = Vec::new();
        for edge in E::TABLE.children() {
            let children: Vec<EntityRecord> = self
                .store
                .get_all_records(edge.child)
                .await?
                .into_iter()
                .map(|local| local.record)
                .filter(|child| child.references_record(E::TABLE, id))
                .collect();
            if children.is_empty() {
                continue;
            }
            match edge.on_delete {
                OnDelete::Restrict => {
                    return Err(Error::Integrity(format!(
                        "Cannot delete {} {id}: {} {} still reference it",
                        E::TABLE,
                        children.len(),
                        edge.child
                    )));
                }
                OnDelete::Cascade => cascade.extend(children),
            }
        }

        // Children first, both locally and in the queue
        let mut doomed = cascade;
        doomed.push(record);
        let keys: Vec<(Table, RecordId)> = doomed
            .iter()
            .map(|record| (record.table(), record.id().clone()))
            .collect();
        self.store.delete_many(&keys).await?;

        let mut remote_targets = Vec::new();
        for record in doomed {
            if record.id().is_temporary() {
                let discarded = self
                    .queue
                    .remove_for_record(record.table(), record.id())
                    .await?;
                tracing::debug!(
                    "Discarded {discarded} queued operations of unsynced {} {}",
                    record.table(),
                    record.id()
                );
            } else {
                self.queue.enqueue(Operation::Delete, record.clone()).await?;
                remote_targets.push(record);
            }
        }

        if remote_targets.is_empty() {
            return Ok(MutationStatus::Discarded);
        }
        if !self.connectivity.is_online() {
            return Ok(MutationStatus::Queued);
        }

        for target in &remote_targets {
            if let Err(error) = self.push_delete(target).await {
                tracing::warn!(
                    "Deleted {} {} locally, will sync: {error}",
                    target.table(),
                    target.id()
                );
                return Ok(MutationStatus::Queued);
            }
        }
        Ok(MutationStatus::Synced)
    }

    /// Queue an operation. A queue failure is only survivable when the
    /// immediate push can still deliver the change.
    async fn enqueue(
        &self,
        operation: Operation,
        record: &EntityRecord,
    ) -> Result<Option<QueueItem>> {
        match self.queue.enqueue(operation, record.clone()).await {
            Ok(item) => Ok(Some(item)),
            Err(error) if self.connectivity.is_online() => {
                self.store
                    .mark_degraded(&format!("queueing {operation} on {}", E::TABLE), &error);
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    fn recover(&self, record: E, queued: bool, error: &Error) -> Result<MutationOutcome<E>> {
        if !queued {
            return Err(Error::Database(format!(
                "{} {} was neither pushed nor queued: {error}",
                E::TABLE,
                record.id()
            )));
        }
        tracing::warn!(
            "Saved {} {} locally, will sync: {error}",
            E::TABLE,
            record.id()
        );
        Ok(MutationOutcome {
            record,
            status: MutationStatus::Queued,
        })
    }

    async fn push_insert(&self, record: &EntityRecord) -> Result<EntityRecord> {
        let response = self
            .remote
            .insert(record.table(), record.to_remote_payload()?)
            .await?;
        confirmed_record(record, response)
    }

    async fn push_update(&self, record: &EntityRecord) -> Result<()> {
        let mut patch: Value = record.to_value()?;
        if let Some(fields) = patch.as_object_mut() {
            fields.remove("id");
        }
        self.remote
            .update(record.table(), &record.id().as_str(), patch)
            .await?;
        Ok(())
    }

    async fn push_delete(&self, record: &EntityRecord) -> Result<()> {
        let key = record.id().as_str();
        self.remote.delete(record.table(), &key).await?;
        if self.remote.exists(record.table(), &key).await? {
            return Err(
                RemoteError::DeleteNotApplied(format!("{} {key}", record.table())).into(),
            );
        }
        Ok(())
    }
}

fn sorted<E: Entity>(mut records: Vec<LocalRecord<E>>) -> Vec<LocalRecord<E>> {
    records.sort_by_cached_key(|local| local.record.sort_key());
    records
}

fn strip<E>(records: Vec<LocalRecord<E>>) -> Vec<E> {
    records.into_iter().map(|local| local.record).collect()
}
