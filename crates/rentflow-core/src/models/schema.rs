//! Entity tables and the static dependency graph between them

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// A local/remote entity table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Branches,
    Customers,
    Equipment,
    Expenses,
    Rentals,
    MaintenanceRequests,
    RentalItems,
}

impl Table {
    /// Every entity table, in declaration order
    pub const ALL: [Self; 7] = [
        Self::Branches,
        Self::Customers,
        Self::Equipment,
        Self::Expenses,
        Self::Rentals,
        Self::MaintenanceRequests,
        Self::RentalItems,
    ];

    /// Table name, shared by the local store and the remote service
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Branches => "branches",
            Self::Customers => "customers",
            Self::Equipment => "equipment",
            Self::Expenses => "expenses",
            Self::Rentals => "rentals",
            Self::MaintenanceRequests => "maintenance_requests",
            Self::RentalItems => "rental_items",
        }
    }

    /// Foreign-key edges leaving this table
    pub fn parents(self) -> impl Iterator<Item = &'static ForeignKey> {
        FOREIGN_KEYS.iter().filter(move |fk| fk.child == self)
    }

    /// Foreign-key edges pointing at this table
    pub fn children(self) -> impl Iterator<Item = &'static ForeignKey> {
        FOREIGN_KEYS.iter().filter(move |fk| fk.parent == self)
    }

    /// Position in the parent-to-child order: parents always rank lower than their children
    #[must_use]
    pub fn dependency_rank(self) -> usize {
        dependency_ranks().get(&self).copied().unwrap_or_default()
    }

    /// Tables sorted parents-first (the order inserts must reach the server in)
    #[must_use]
    pub fn insert_order() -> Vec<Self> {
        let mut tables = Self::ALL.to_vec();
        tables.sort_by_key(|table| (table.dependency_rank(), *table));
        tables
    }

    /// Tables sorted children-first (the order deletes must reach the server in)
    #[must_use]
    pub fn delete_order() -> Vec<Self> {
        let mut tables = Self::insert_order();
        tables.reverse();
        tables
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|table| table.name() == s)
            .ok_or_else(|| format!("unknown table: {s}"))
    }
}

/// What happens to child rows when their parent is deleted locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    /// Parent cannot be deleted while children reference it
    Restrict,
    /// Children are deleted together with the parent
    Cascade,
}

/// A foreign-key edge `child.column -> parent.id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub child: Table,
    pub column: &'static str,
    pub parent: Table,
    pub on_delete: OnDelete,
}

const fn fk(child: Table, column: &'static str, parent: Table, on_delete: OnDelete) -> ForeignKey {
    ForeignKey {
        child,
        column,
        parent,
        on_delete,
    }
}

/// The complete, hand-authored dependency graph. Adding a table means adding its edges here.
pub const FOREIGN_KEYS: &[ForeignKey] = &[
    fk(Table::Customers, "branch_id", Table::Branches, OnDelete::Restrict),
    fk(Table::Equipment, "branch_id", Table::Branches, OnDelete::Restrict),
    fk(Table::Expenses, "branch_id", Table::Branches, OnDelete::Restrict),
    fk(Table::Rentals, "branch_id", Table::Branches, OnDelete::Restrict),
    fk(Table::Rentals, "customer_id", Table::Customers, OnDelete::Restrict),
    fk(
        Table::MaintenanceRequests,
        "branch_id",
        Table::Branches,
        OnDelete::Restrict,
    ),
    fk(
        Table::MaintenanceRequests,
        "equipment_id",
        Table::Equipment,
        OnDelete::Restrict,
    ),
    fk(Table::RentalItems, "rental_id", Table::Rentals, OnDelete::Cascade),
    fk(
        Table::RentalItems,
        "equipment_id",
        Table::Equipment,
        OnDelete::Restrict,
    ),
];

fn dependency_ranks() -> &'static HashMap<Table, usize> {
    static RANKS: OnceLock<HashMap<Table, usize>> = OnceLock::new();
    RANKS.get_or_init(|| topological_ranks(&Table::ALL, FOREIGN_KEYS))
}

/// Rank every table by its longest path from a root, processing tables in
/// topological order (Kahn). Tables caught in a cycle keep rank 0 and are
/// reported, which never happens for the static graph above.
fn topological_ranks(tables: &[Table], edges: &[ForeignKey]) -> HashMap<Table, usize> {
    let mut in_degree: HashMap<Table, usize> = tables.iter().map(|table| (*table, 0)).collect();
    for edge in edges {
        if edge.child != edge.parent {
            *in_degree.entry(edge.child).or_default() += 1;
        }
    }

    let mut ranks: HashMap<Table, usize> = tables.iter().map(|table| (*table, 0)).collect();
    let mut ready: Vec<Table> = tables
        .iter()
        .copied()
        .filter(|table| in_degree.get(table).copied().unwrap_or_default() == 0)
        .collect();
    let mut visited = 0usize;

    while let Some(table) = ready.pop() {
        visited += 1;
        let rank = ranks.get(&table).copied().unwrap_or_default();
        for edge in edges
            .iter()
            .filter(|edge| edge.parent == table && edge.child != table)
        {
            let child_rank = ranks.entry(edge.child).or_default();
            *child_rank = (*child_rank).max(rank + 1);
            let degree = in_degree.entry(edge.child).or_default();
            *degree = degree.saturating_sub(1);
            if *degree == 0 {
                ready.push(edge.child);
            }
        }
    }

    if visited < tables.len() {
        tracing::error!("Entity dependency graph contains a cycle");
    }

    ranks
}
