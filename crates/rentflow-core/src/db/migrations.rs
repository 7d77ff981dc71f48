//! Database migrations

use crate::error::Result;
use crate::models::Table;
use libsql::Connection;

use super::connection::finish_transaction;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
pub async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master
             WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// DDL for one entity table: the typed record is stored as JSON in `data`,
/// with `branch_id` and `synced` lifted into indexed columns.
fn entity_table_statements(table: Table) -> Vec<String> {
    let name = table.name();
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {name} (
                id TEXT PRIMARY KEY,
                branch_id TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{name}_branch ON {name}(branch_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{name}_synced ON {name}(synced)"),
    ]
}

/// Execute `statements` and record `version`, all in one transaction
async fn apply(conn: &Connection, version: i32, statements: Vec<String>) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let result = async {
        for stmt in &statements {
            conn.execute(stmt, ()).await?;
        }
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            [i64::from(version)],
        )
        .await?;
        Ok(())
    }
    .await;

    finish_transaction(conn, result).await?;
    tracing::info!("Migrated local store to version {version}");
    Ok(())
}

/// Migration to version 1: core rental tables, sync queue and settings
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let mut statements = vec![
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )"
        .to_string(),
        // Settings table (local only)
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS sync_queue (
            id TEXT PRIMARY KEY,
            table_name TEXT NOT NULL,
            operation TEXT NOT NULL,
            record_id TEXT NOT NULL,
            data TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            retries INTEGER NOT NULL DEFAULT 0
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_record ON sync_queue(table_name, record_id)"
            .to_string(),
    ];
    for table in [
        Table::Branches,
        Table::Customers,
        Table::Equipment,
        Table::Rentals,
        Table::RentalItems,
    ] {
        statements.extend(entity_table_statements(table));
    }

    apply(conn, 1, statements).await
}

/// Migration to version 2: maintenance requests and expenses
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let mut statements = Vec::new();
    for table in [Table::MaintenanceRequests, Table::Expenses] {
        statements.extend(entity_table_statements(table));
    }

    apply(conn, 2, statements).await
}
