//! The closed set of entity records and the trait every record implements

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entities::{
    Branch, Customer, Equipment, Expense, MaintenanceRequest, Rental, RentalItem,
};
use super::{RecordId, Table};
use crate::error::Result;

/// Behaviour shared by every typed entity record
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table the record lives in
    const TABLE: Table;

    fn id(&self) -> &RecordId;

    fn set_id(&mut self, id: RecordId);

    /// Foreign keys as `(column, referenced id)` pairs
    fn references(&self) -> Vec<(&'static str, &RecordId)>;

    /// Mutable access to a foreign-key column
    fn reference_mut(&mut self, column: &str) -> Option<&mut RecordId>;

    /// Natural ordering used by repository listings
    fn sort_key(&self) -> String;

    fn into_record(self) -> EntityRecord;

    fn from_record(record: EntityRecord) -> Option<Self>;

    fn branch_id(&self) -> Option<&RecordId> {
        self.references()
            .into_iter()
            .find(|(column, _)| *column == "branch_id")
            .map(|(_, id)| id)
    }
}

/// Apply `$body` to the typed record inside any `EntityRecord` variant.
macro_rules! with_record {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            EntityRecord::Branch($inner) => $body,
            EntityRecord::Customer($inner) => $body,
            EntityRecord::Equipment($inner) => $body,
            EntityRecord::Expense($inner) => $body,
            EntityRecord::Rental($inner) => $body,
            EntityRecord::MaintenanceRequest($inner) => $body,
            EntityRecord::RentalItem($inner) => $body,
        }
    };
}

/// Any entity record, tagged by its table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRecord {
    Branch(Branch),
    Customer(Customer),
    Equipment(Equipment),
    Expense(Expense),
    Rental(Rental),
    MaintenanceRequest(MaintenanceRequest),
    RentalItem(RentalItem),
}

impl EntityRecord {
    #[must_use]
    pub const fn table(&self) -> Table {
        match self {
            Self::Branch(_) => Table::Branches,
            Self::Customer(_) => Table::Customers,
            Self::Equipment(_) => Table::Equipment,
            Self::Expense(_) => Table::Expenses,
            Self::Rental(_) => Table::Rentals,
            Self::MaintenanceRequest(_) => Table::MaintenanceRequests,
            Self::RentalItem(_) => Table::RentalItems,
        }
    }

    #[must_use]
    pub fn id(&self) -> &RecordId {
        with_record!(self, inner => inner.id())
    }

    pub fn set_id(&mut self, id: RecordId) {
        with_record!(self, inner => inner.set_id(id));
    }

    #[must_use]
    pub fn branch_id(&self) -> Option<&RecordId> {
        with_record!(self, inner => inner.branch_id())
    }

    #[must_use]
    pub fn references(&self) -> Vec<(&'static str, &RecordId)> {
        with_record!(self, inner => inner.references())
    }

    /// Whether any foreign key of this record points at `(parent, id)`
    #[must_use]
    pub fn references_record(&self, parent: Table, id: &RecordId) -> bool {
        self.table()
            .parents()
            .filter(|edge| edge.parent == parent)
            .any(|edge| {
                self.references()
                    .iter()
                    .any(|(column, value)| *column == edge.column && *value == id)
            })
    }

    /// Temporary ids this record still points at
    #[must_use]
    pub fn unresolved_references(&self) -> Vec<&RecordId> {
        self.references()
            .into_iter()
            .map(|(_, id)| id)
            .filter(|id| id.is_temporary())
            .collect()
    }

    /// Replace every occurrence of the `table` record id `old` with `new`,
    /// both as this record's own id and in its foreign keys.
    ///
    /// Returns whether anything changed.
    pub fn remap(&mut self, table: Table, old: &RecordId, new: &RecordId) -> bool {
        let mut changed = false;
        if self.table() == table && self.id() == old {
            self.set_id(new.clone());
            changed = true;
        }

        let columns: Vec<&'static str> = self
            .table()
            .parents()
            .filter(|edge| edge.parent == table)
            .map(|edge| edge.column)
            .collect();
        for column in columns {
            let slot = with_record!(self, inner => inner.reference_mut(column));
            if let Some(slot) = slot {
                if slot == old {
                    *slot = new.clone();
                    changed = true;
                }
            }
        }
        changed
    }

    /// Natural ordering key of the wrapped record
    #[must_use]
    pub fn sort_key(&self) -> String {
        with_record!(self, inner => inner.sort_key())
    }

    /// Serialize the typed record as a JSON object
    pub fn to_value(&self) -> Result<Value> {
        Ok(with_record!(self, inner => serde_json::to_value(inner)?))
    }

    /// Decode a JSON object as a record of `table`
    pub fn from_value(table: Table, value: Value) -> Result<Self> {
        Ok(match table {
            Table::Branches => Self::Branch(serde_json::from_value(value)?),
            Table::Customers => Self::Customer(serde_json::from_value(value)?),
            Table::Equipment => Self::Equipment(serde_json::from_value(value)?),
            Table::Expenses => Self::Expense(serde_json::from_value(value)?),
            Table::Rentals => Self::Rental(serde_json::from_value(value)?),
            Table::MaintenanceRequests => {
                Self::MaintenanceRequest(serde_json::from_value(value)?)
            }
            Table::RentalItems => Self::RentalItem(serde_json::from_value(value)?),
        })
    }

    /// Body sent to the remote service.
    ///
    /// Temporary ids are never sent; the server assigns its own on insert.
    pub fn to_remote_payload(&self) -> Result<Value> {
        let mut value = self.to_value()?;
        if self.id().is_temporary() {
            if let Value::Object(map) = &mut value {
                map.remove("id");
            }
        }
        Ok(value)
    }

    /// Downcast into a concrete entity type
    #[must_use]
    pub fn into_entity<E: Entity>(self) -> Option<E> {
        E::from_record(self)
    }
}

/// A record as held by the local store, with its local-only sync flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord<E> {
    pub record: E,
    /// True iff the local copy is known to match the remote copy
    pub synced: bool,
}

impl<E> LocalRecord<E> {
    pub const fn new(record: E, synced: bool) -> Self {
        Self { record, synced }
    }
}
