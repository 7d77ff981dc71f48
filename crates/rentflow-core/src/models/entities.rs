//! Typed entity records, one struct per table

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::record::{Entity, EntityRecord};
use super::{RecordId, Table};

/// Implements [`Entity`] for a record struct whose foreign keys are plain `RecordId` fields.
macro_rules! impl_entity {
    (
        $ty:ident,
        $variant:ident,
        $table:expr,
        refs: [$($column:ident),*],
        sort: |$this:ident| $sort:expr
    ) => {
        impl Entity for $ty {
            const TABLE: Table = $table;

            fn id(&self) -> &RecordId {
                &self.id
            }

            fn set_id(&mut self, id: RecordId) {
                self.id = id;
            }

            fn references(&self) -> Vec<(&'static str, &RecordId)> {
                vec![$((stringify!($column), &self.$column)),*]
            }

            fn reference_mut(&mut self, column: &str) -> Option<&mut RecordId> {
                match column {
                    $(stringify!($column) => Some(&mut self.$column),)*
                    _ => None,
                }
            }

            fn sort_key(&self) -> String {
                let $this = self;
                $sort
            }

            fn into_record(self) -> EntityRecord {
                EntityRecord::$variant(self)
            }

            fn from_record(record: EntityRecord) -> Option<Self> {
                match record {
                    EntityRecord::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

/// A physical location of the business
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RecordId::temporary(),
            name: name.into(),
            address: None,
            phone: None,
            created_at: Utc::now(),
        }
    }
}

impl_entity!(Branch, Branch, Table::Branches, refs: [], sort: |branch| branch.name.to_lowercase());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: RecordId,
    pub branch_id: RecordId,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub document_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    #[must_use]
    pub fn new(branch_id: RecordId, full_name: impl Into<String>) -> Self {
        Self {
            id: RecordId::temporary(),
            branch_id,
            full_name: full_name.into(),
            phone: None,
            email: None,
            document_number: None,
            created_at: Utc::now(),
        }
    }
}

impl_entity!(Customer, Customer, Table::Customers, refs: [branch_id],
    sort: |customer| customer.full_name.to_lowercase());

/// Lifecycle of a piece of equipment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    #[default]
    Available,
    Rented,
    Maintenance,
    Retired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: RecordId,
    pub branch_id: RecordId,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    pub daily_rate_cents: i64,
    #[serde(default)]
    pub status: EquipmentStatus,
}

impl Equipment {
    #[must_use]
    pub fn new(
        branch_id: RecordId,
        name: impl Into<String>,
        category: impl Into<String>,
        daily_rate_cents: i64,
    ) -> Self {
        Self {
            id: RecordId::temporary(),
            branch_id,
            name: name.into(),
            category: category.into(),
            serial_number: None,
            daily_rate_cents,
            status: EquipmentStatus::Available,
        }
    }
}

impl_entity!(Equipment, Equipment, Table::Equipment, refs: [branch_id],
    sort: |equipment| equipment.name.to_lowercase());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: RecordId,
    pub branch_id: RecordId,
    pub description: String,
    pub category: String,
    pub amount_cents: i64,
    pub incurred_on: NaiveDate,
}

impl Expense {
    #[must_use]
    pub fn new(
        branch_id: RecordId,
        description: impl Into<String>,
        category: impl Into<String>,
        amount_cents: i64,
        incurred_on: NaiveDate,
    ) -> Self {
        Self {
            id: RecordId::temporary(),
            branch_id,
            description: description.into(),
            category: category.into(),
            amount_cents,
            incurred_on,
        }
    }
}

// Newest first
impl_entity!(Expense, Expense, Table::Expenses, refs: [branch_id],
    sort: |expense| descending_date(expense.incurred_on));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rental {
    pub id: RecordId,
    pub branch_id: RecordId,
    pub customer_id: RecordId,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: RentalStatus,
    #[serde(default)]
    pub total_cents: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Rental {
    #[must_use]
    pub fn new(branch_id: RecordId, customer_id: RecordId, start_date: NaiveDate) -> Self {
        Self {
            id: RecordId::temporary(),
            branch_id,
            customer_id,
            start_date,
            end_date: None,
            status: RentalStatus::Active,
            total_cents: 0,
            notes: None,
        }
    }
}

impl_entity!(Rental, Rental, Table::Rentals, refs: [branch_id, customer_id],
    sort: |rental| descending_date(rental.start_date));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceRequest {
    pub id: RecordId,
    pub branch_id: RecordId,
    pub equipment_id: RecordId,
    pub description: String,
    #[serde(default)]
    pub status: MaintenanceStatus,
    pub reported_at: DateTime<Utc>,
}

impl MaintenanceRequest {
    #[must_use]
    pub fn new(
        branch_id: RecordId,
        equipment_id: RecordId,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: RecordId::temporary(),
            branch_id,
            equipment_id,
            description: description.into(),
            status: MaintenanceStatus::Pending,
            reported_at: Utc::now(),
        }
    }
}

impl_entity!(
    MaintenanceRequest,
    MaintenanceRequest,
    Table::MaintenanceRequests,
    refs: [branch_id, equipment_id],
    sort: |request| format!(
        "{:020}",
        i64::MAX.saturating_sub(request.reported_at.timestamp_millis())
    )
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalItem {
    pub id: RecordId,
    pub rental_id: RecordId,
    pub equipment_id: RecordId,
    pub quantity: i64,
    pub daily_rate_cents: i64,
}

impl RentalItem {
    #[must_use]
    pub fn new(
        rental_id: RecordId,
        equipment_id: RecordId,
        quantity: i64,
        daily_rate_cents: i64,
    ) -> Self {
        Self {
            id: RecordId::temporary(),
            rental_id,
            equipment_id,
            quantity,
            daily_rate_cents,
        }
    }

    /// Price of this line for one day
    #[must_use]
    pub const fn daily_total_cents(&self) -> i64 {
        self.quantity.saturating_mul(self.daily_rate_cents)
    }
}

impl_entity!(RentalItem, RentalItem, Table::RentalItems, refs: [rental_id, equipment_id],
    sort: |item| item.id.as_str());

/// Sort key that orders later dates first
fn descending_date(date: NaiveDate) -> String {
    format!("{:010}", i64::from(i32::MAX) - i64::from(date.num_days_from_ce()))
}
