//! Per-entity repositories: the write path clients go through

mod details;
mod entity;

use std::sync::Arc;

pub use details::{EquipmentDetails, MaintenanceDetails, RentalDetails, RentalItemDetails};
pub use entity::{EntityRepository, MutationOutcome, MutationStatus};

use crate::db::LocalStore;
use crate::error::Result;
use crate::models::{
    Branch, Customer, Equipment, Expense, MaintenanceRequest, Rental, RentalItem,
};
use crate::remote::RemoteService;
use crate::sync::ConnectivityMonitor;

/// One repository per entity, all sharing a store, a remote and a
/// connectivity signal
pub struct Repositories<R> {
    pub branches: EntityRepository<Branch, R>,
    pub customers: EntityRepository<Customer, R>,
    pub equipment: EntityRepository<Equipment, R>,
    pub expenses: EntityRepository<Expense, R>,
    pub rentals: EntityRepository<Rental, R>,
    pub rental_items: EntityRepository<RentalItem, R>,
    pub maintenance: EntityRepository<MaintenanceRequest, R>,
}

impl<R> Clone for Repositories<R> {
    fn clone(&self) -> Self {
        Self {
            branches: self.branches.clone(),
            customers: self.customers.clone(),
            equipment: self.equipment.clone(),
            expenses: self.expenses.clone(),
            rentals: self.rentals.clone(),
            rental_items: self.rental_items.clone(),
            maintenance: self.maintenance.clone(),
        }
    }
}

impl<R: RemoteService> Repositories<R> {
    pub fn new(store: LocalStore, remote: Arc<R>, connectivity: ConnectivityMonitor) -> Self {
        let branches = EntityRepository::<Branch, R>::new(store, remote, connectivity);
        Self {
            customers: branches.sibling(),
            equipment: branches.sibling(),
            expenses: branches.sibling(),
            rentals: branches.sibling(),
            rental_items: branches.sibling(),
            maintenance: branches.sibling(),
            branches,
        }
    }

    /// Create a rental and its line items. Items are pointed at the rental's
    /// id as it stands after the create, so they pick up a server id assigned
    /// during the call.
    pub async fn create_rental_with_items(
        &self,
        rental: Rental,
        items: Vec<RentalItem>,
    ) -> Result<(MutationOutcome<Rental>, Vec<MutationOutcome<RentalItem>>)> {
        let rental = self.rentals.create(rental).await?;
        let mut created = Vec::with_capacity(items.len());
        for mut item in items {
            item.rental_id = rental.record.id.clone();
            created.push(self.rental_items.create(item).await?);
        }
        Ok((rental, created))
    }
}
