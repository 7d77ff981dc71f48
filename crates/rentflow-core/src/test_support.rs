//! In-memory remote service used by unit tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::db::LocalStore;
use crate::models::{Operation, RecordId, Table, FOREIGN_KEYS};
use crate::remote::{Filter, Query, RemoteError, RemoteResult, RemoteService};

/// One call observed by [`FakeRemote`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Select(Table),
    Insert(Table, Value),
    Update(Table, String),
    Delete(Table, String),
}

#[derive(Default)]
struct State {
    rows: HashMap<Table, BTreeMap<String, Value>>,
    next_id: u64,
    calls: Vec<Call>,
    failing: HashSet<(Table, Operation)>,
    offline: bool,
    ignored_deletes: HashSet<Table>,
    profiles: HashMap<String, RecordId>,
    profile_delay: Option<Duration>,
    insert_delay: Option<Duration>,
}

/// Remote service that keeps rows in memory and enforces foreign keys the
/// way a relational backend would: inserts need existing parents and deletes
/// fail while children still point at the row.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Store a row as if another device had created it
    pub fn seed(&self, table: Table, row: Value) {
        let id = row["id"].as_str().unwrap().to_string();
        self.state()
            .rows
            .entry(table)
            .or_default()
            .insert(id, row);
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.state()
            .rows
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row(&self, table: Table, id: &str) -> Option<Value> {
        self.state().rows.get(&table)?.get(id).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Calls other than selects, in order
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::Select(_)))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Make every `operation` on `table` fail with a server error
    pub fn fail(&self, table: Table, operation: Operation) {
        self.state().failing.insert((table, operation));
    }

    pub fn recover(&self, table: Table, operation: Operation) {
        self.state().failing.remove(&(table, operation));
    }

    /// Make every call fail as if the network was down
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Accept deletes on `table` without removing anything
    pub fn ignore_deletes(&self, table: Table) {
        self.state().ignored_deletes.insert(table);
    }

    pub fn set_profile(&self, user_id: &str, branch_id: RecordId) {
        self.state().profiles.insert(user_id.to_string(), branch_id);
    }

    pub fn delay_profiles(&self, delay: Duration) {
        self.state().profile_delay = Some(delay);
    }

    /// Hold every insert for `delay` before it is applied
    pub fn delay_inserts(&self, delay: Duration) {
        self.state().insert_delay = Some(delay);
    }

    fn check(state: &State, table: Table, operation: Operation) -> RemoteResult<()> {
        if state.offline {
            return Err(RemoteError::Timeout);
        }
        if state.failing.contains(&(table, operation)) {
            return Err(RemoteError::Api {
                status: 500,
                message: format!("{operation} on {table} rejected"),
            });
        }
        Ok(())
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let cell = |column: &str| match &row[column] {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    };
    match filter {
        Filter::Eq(column, value) => cell(column).as_deref() == Some(value.as_str()),
        Filter::In(column, values) => cell(column).is_some_and(|cell| values.contains(&cell)),
        Filter::Gte(column, value) => cell(column).is_some_and(|cell| cell >= *value),
        Filter::Lte(column, value) => cell(column).is_some_and(|cell| cell <= *value),
        Filter::ILike(column, pattern) => {
            let needle = pattern.trim_matches('*').to_lowercase();
            cell(column).is_some_and(|cell| cell.to_lowercase().contains(&needle))
        }
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn select(&self, table: Table, query: &Query) -> RemoteResult<Vec<Value>> {
        let mut state = self.state();
        state.calls.push(Call::Select(table));
        if state.offline {
            return Err(RemoteError::Timeout);
        }
        let rows = state
            .rows
            .get(&table)
            .map(|rows| {
                rows.values()
                    .filter(|row| query.filters.iter().all(|filter| matches(row, filter)))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(match query.limit {
            Some(limit) => rows.into_iter().take(limit).collect(),
            None => rows,
        })
    }

    async fn insert(&self, table: Table, mut record: Value) -> RemoteResult<Value> {
        let delay = self.state().insert_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.calls.push(Call::Insert(table, record.clone()));
        Self::check(&state, table, Operation::Insert)?;

        for edge in FOREIGN_KEYS.iter().filter(|edge| edge.child == table) {
            let parent = record[edge.column].as_str().unwrap_or_default().to_string();
            let known = state
                .rows
                .get(&edge.parent)
                .is_some_and(|rows| rows.contains_key(&parent));
            if !known {
                return Err(RemoteError::Api {
                    status: 409,
                    message: format!("{table}.{} references missing {parent}", edge.column),
                });
            }
        }

        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                state.next_id += 1;
                format!("srv-{}", state.next_id)
            }
        };
        record["id"] = Value::String(id.clone());
        state
            .rows
            .entry(table)
            .or_default()
            .insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> RemoteResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Update(table, id.to_string()));
        Self::check(&state, table, Operation::Update)?;
        if let Some(row) = state.rows.get_mut(&table).and_then(|rows| rows.get_mut(id)) {
            if let (Value::Object(row), Value::Object(patch)) = (row, patch) {
                for (key, value) in patch {
                    row.insert(key, value);
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: Table, id: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Delete(table, id.to_string()));
        Self::check(&state, table, Operation::Delete)?;
        if state.ignored_deletes.contains(&table) {
            return Ok(());
        }

        for edge in FOREIGN_KEYS.iter().filter(|edge| edge.parent == table) {
            let referenced = state.rows.get(&edge.child).is_some_and(|rows| {
                rows.values()
                    .any(|row| row[edge.column].as_str() == Some(id))
            });
            if referenced {
                return Err(RemoteError::Api {
                    status: 409,
                    message: format!("{table} {id} is still referenced by {}", edge.child),
                });
            }
        }

        if let Some(rows) = state.rows.get_mut(&table) {
            rows.remove(id);
        }
        Ok(())
    }

    async fn user_branch(&self, user_id: &str) -> RemoteResult<Option<RecordId>> {
        let (delay, branch, offline) = {
            let state = self.state();
            (
                state.profile_delay,
                state.profiles.get(user_id).cloned(),
                state.offline,
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if offline {
            return Err(RemoteError::Timeout);
        }
        Ok(branch)
    }
}

/// Make the local store abort every insert of `id` into `table`
pub async fn reject_local_insert(store: &LocalStore, table: Table, id: &str) {
    let db = store.lock().await;
    db.connection()
        .execute(
            &format!(
                "CREATE TRIGGER reject_{name} BEFORE INSERT ON {name}
                 WHEN NEW.id = '{id}'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END",
                name = table.name()
            ),
            (),
        )
        .await
        .unwrap();
}
