//! Replay order of queued operations

use std::cmp::Ordering;

use crate::models::{Operation, QueueItem};

/// Sort key of one queue item: operation class, then dependency rank
/// (ascending for inserts, descending for deletes, flat for updates),
/// then enqueue time, then queue id for a total order.
fn replay_key(item: &QueueItem) -> (u8, i64, i64, &str) {
    let rank = i64::try_from(item.table().dependency_rank()).unwrap_or(i64::MAX);
    let rank = match item.operation {
        Operation::Insert => rank,
        Operation::Update => 0,
        Operation::Delete => -rank,
    };
    (item.operation.class(), rank, item.timestamp, item.id.as_str())
}

/// Compare two items by replay order
pub fn compare_for_replay(a: &QueueItem, b: &QueueItem) -> Ordering {
    replay_key(a).cmp(&replay_key(b))
}

/// Sort a queue snapshot into the order it must be replayed in
pub fn sort_for_replay(items: &mut [QueueItem]) {
    items.sort_by(compare_for_replay);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Branch, Customer, Entity, EntityRecord, Equipment, Rental, RentalItem, Table,
    };
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn item(operation: Operation, data: EntityRecord, timestamp: i64) -> QueueItem {
        QueueItem::new(operation, data, timestamp)
    }

    fn records() -> Vec<EntityRecord> {
        let branch = Branch::new("Main");
        let customer = Customer::new(branch.id.clone(), "Ana");
        let equipment = Equipment::new(branch.id.clone(), "Drill", "tools", 900);
        let rental = Rental::new(
            branch.id.clone(),
            customer.id.clone(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        );
        let line = RentalItem::new(rental.id.clone(), equipment.id.clone(), 1, 900);
        vec![
            branch.into_record(),
            customer.into_record(),
            equipment.into_record(),
            rental.into_record(),
            line.into_record(),
        ]
    }

    fn tables(items: &[QueueItem]) -> Vec<(Operation, Table)> {
        items.iter().map(|item| (item.operation, item.table())).collect()
    }

    #[test]
    fn inserts_replay_parents_first_even_when_enqueued_later() {
        // Enqueued children-first (newest timestamps on the parents)
        let mut items: Vec<QueueItem> = records()
            .into_iter()
            .rev()
            .enumerate()
            .map(|(i, record)| item(Operation::Insert, record, i64::try_from(i).unwrap()))
            .collect();

        sort_for_replay(&mut items);

        let ranks: Vec<usize> = items
            .iter()
            .map(|item| item.table().dependency_rank())
            .collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
        assert_eq!(items[0].table(), Table::Branches);
        assert_eq!(items[4].table(), Table::RentalItems);
    }

    #[test]
    fn deletes_replay_children_first() {
        let mut items: Vec<QueueItem> = records()
            .into_iter()
            .enumerate()
            .map(|(i, record)| item(Operation::Delete, record, i64::try_from(i).unwrap()))
            .collect();

        sort_for_replay(&mut items);

        assert_eq!(items[0].table(), Table::RentalItems);
        assert_eq!(items[1].table(), Table::Rentals);
        assert_eq!(items[4].table(), Table::Branches);
    }

    #[test]
    fn classes_order_insert_update_delete_and_updates_keep_time_order() {
        let all = records();
        let mut items = vec![
            item(Operation::Delete, all[4].clone(), 1),
            item(Operation::Update, all[3].clone(), 5),
            item(Operation::Update, all[0].clone(), 9),
            item(Operation::Insert, all[1].clone(), 7),
        ];

        sort_for_replay(&mut items);

        assert_eq!(
            tables(&items),
            vec![
                (Operation::Insert, Table::Customers),
                // Updates are not reordered by table: rental (t=5) before branch (t=9)
                (Operation::Update, Table::Rentals),
                (Operation::Update, Table::Branches),
                (Operation::Delete, Table::RentalItems),
            ]
        );
    }

    #[test]
    fn ties_break_on_timestamp() {
        let a = EntityRecord::Branch(Branch::new("A"));
        let b = EntityRecord::Branch(Branch::new("B"));
        let mut items = vec![
            item(Operation::Insert, b.clone(), 20),
            item(Operation::Insert, a.clone(), 10),
        ];
        sort_for_replay(&mut items);
        assert_eq!(items[0].data, a);
        assert_eq!(items[1].record_id(), b.id());
    }
}
