//! Data models for Rentflow

mod entities;
mod id;
mod metadata;
mod queue;
mod record;
mod schema;

pub use entities::{
    Branch, Customer, Equipment, EquipmentStatus, Expense, MaintenanceRequest, MaintenanceStatus,
    Rental, RentalItem, RentalStatus,
};
pub use id::RecordId;
pub use metadata::SyncMetadata;
pub use queue::{Operation, QueueItem};
pub use record::{Entity, EntityRecord, LocalRecord};
pub use schema::{ForeignKey, OnDelete, Table, FOREIGN_KEYS};
