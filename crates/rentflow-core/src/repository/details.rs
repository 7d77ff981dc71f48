//! Read models joining related records on the client

use std::collections::HashMap;

use super::Repositories;
use crate::models::{
    Branch, Customer, Equipment, MaintenanceRequest, RecordId, Rental, RentalItem,
};
use crate::remote::RemoteService;

/// Rental with the names of what it points at and its line items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentalDetails {
    pub rental: Rental,
    pub customer_name: Option<String>,
    pub branch_name: Option<String>,
    pub items: Vec<RentalItemDetails>,
}

impl RentalDetails {
    /// Sum of all lines for one day
    #[must_use]
    pub fn daily_total_cents(&self) -> i64 {
        self.items
            .iter()
            .map(|line| line.item.daily_total_cents())
            .fold(0, i64::saturating_add)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentalItemDetails {
    pub item: RentalItem,
    pub equipment_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceDetails {
    pub request: MaintenanceRequest,
    pub equipment_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquipmentDetails {
    pub equipment: Equipment,
    pub branch_name: Option<String>,
}

fn names<E>(
    records: Vec<E>,
    pair: impl Fn(E) -> (RecordId, String),
) -> HashMap<RecordId, String> {
    records.into_iter().map(pair).collect()
}

impl<R: RemoteService> Repositories<R> {
    async fn branch_names(&self) -> HashMap<RecordId, String> {
        names(self.branches.list().await, |branch: Branch| {
            (branch.id, branch.name)
        })
    }

    async fn equipment_names(&self) -> HashMap<RecordId, String> {
        names(self.equipment.list().await, |equipment: Equipment| {
            (equipment.id, equipment.name)
        })
    }

    /// Every rental, newest first, with customer, branch and equipment names
    pub async fn rental_details(&self) -> Vec<RentalDetails> {
        let rentals = self.rentals.list().await;
        self.join_rentals(rentals).await
    }

    /// Rentals of one branch, newest first
    pub async fn rental_details_by_branch(&self, branch_id: &RecordId) -> Vec<RentalDetails> {
        let rentals = self.rentals.list_by_branch(branch_id).await;
        self.join_rentals(rentals).await
    }

    pub async fn rental_detail(&self, id: &RecordId) -> Option<RentalDetails> {
        let rental = self.rentals.get(id).await?;
        self.join_rentals(vec![rental]).await.into_iter().next()
    }

    async fn join_rentals(&self, rentals: Vec<Rental>) -> Vec<RentalDetails> {
        let customers = names(self.customers.list().await, |customer: Customer| {
            (customer.id, customer.full_name)
        });
        let branches = self.branch_names().await;
        let equipment = self.equipment_names().await;

        let mut items_by_rental: HashMap<RecordId, Vec<RentalItemDetails>> = HashMap::new();
        for item in self.rental_items.list().await {
            let equipment_name = equipment.get(&item.equipment_id).cloned();
            items_by_rental
                .entry(item.rental_id.clone())
                .or_default()
                .push(RentalItemDetails {
                    item,
                    equipment_name,
                });
        }

        rentals
            .into_iter()
            .map(|rental| RentalDetails {
                customer_name: customers.get(&rental.customer_id).cloned(),
                branch_name: branches.get(&rental.branch_id).cloned(),
                items: items_by_rental.remove(&rental.id).unwrap_or_default(),
                rental,
            })
            .collect()
    }

    /// Maintenance requests, most recent first, with equipment names
    pub async fn maintenance_details(&self) -> Vec<MaintenanceDetails> {
        let equipment = self.equipment_names().await;
        self.maintenance
            .list()
            .await
            .into_iter()
            .map(|request| MaintenanceDetails {
                equipment_name: equipment.get(&request.equipment_id).cloned(),
                request,
            })
            .collect()
    }

    /// Equipment by name, with branch names
    pub async fn equipment_details(&self) -> Vec<EquipmentDetails> {
        let branches = self.branch_names().await;
        self.equipment
            .list()
            .await
            .into_iter()
            .map(|equipment| EquipmentDetails {
                branch_name: branches.get(&equipment.branch_id).cloned(),
                equipment,
            })
            .collect()
    }
}
