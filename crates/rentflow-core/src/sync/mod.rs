//! Sync layer: queue replay, id reconciliation, pulls and the signals that drive them

mod auth;
mod connectivity;
mod coordinator;
mod engine;
mod ordering;
mod pull;
mod reconcile;

pub use auth::{AuthGate, SessionFlag};
pub use connectivity::ConnectivityMonitor;
pub use coordinator::SyncCoordinator;
pub use engine::{SyncEngine, SyncReport};
pub use ordering::{compare_for_replay, sort_for_replay};
pub use pull::{PullReport, PullService};
pub use reconcile::{confirmed_record, reconcile_insert, IdMap};
