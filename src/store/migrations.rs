//! Schema migrations for the handled-item store.
//!
//! The applied version lives in SQLite's `user_version` pragma. Migration
//! `n` (1-based position in [`MIGRATIONS`]) runs in its own transaction
//! together with the version bump.

use libsql::Connection;
use tracing::{debug, info};

use crate::error::DatabaseError;

/// `(name, sql)` in order. Only ever append.
const MIGRATIONS: &[(&str, &str)] = &[(
    "handled_items",
    r#"
    CREATE TABLE IF NOT EXISTS mails (
        item TEXT PRIMARY KEY,
        handled INTEGER NOT NULL DEFAULT 0,
        progress INTEGER NOT NULL DEFAULT 0,
        received_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS mails_unhandled ON mails(handled, received_at);

    CREATE TABLE IF NOT EXISTS events (
        item TEXT PRIMARY KEY,
        handled INTEGER NOT NULL DEFAULT 0,
        progress INTEGER NOT NULL DEFAULT 0,
        received_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS events_unhandled ON events(handled, received_at);
    "#,
)];

fn failed(step: &str, e: libsql::Error) -> DatabaseError {
    DatabaseError::Migration(format!("{step}: {e}"))
}

/// Bring the schema up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn).await?;
    let latest = MIGRATIONS.len() as i64;
    if current > latest {
        return Err(DatabaseError::Migration(format!(
            "database is at schema version {current}, this build only knows {latest}"
        )));
    }

    for (version, (name, sql)) in (1i64..).zip(MIGRATIONS).skip(current as usize) {
        info!(version, name, "Applying migration");
        let tx = conn
            .transaction()
            .await
            .map_err(|e| failed("begin", e))?;
        tx.execute_batch(sql)
            .await
            .map_err(|e| failed(name, e))?;
        tx.execute(&format!("PRAGMA user_version = {version}"), ())
            .await
            .map_err(|e| failed("bump user_version", e))?;
        tx.commit().await.map_err(|e| failed("commit", e))?;
    }

    debug!(version = latest, "Schema up to date");
    Ok(())
}

async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("PRAGMA user_version", ())
        .await
        .map_err(|e| failed("read user_version", e))?;
    let Some(row) = rows
        .next()
        .await
        .map_err(|e| failed("read user_version", e))?
    else {
        return Ok(0);
    };
    row.get(0).map_err(|e| failed("read user_version", e))
}
