//! libSQL backend for [`HandledStore`].
//!
//! Supports local file and in-memory databases.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{HandledStore, ItemKind};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;
        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self { _db: db, conn })
    }
}

#[async_trait]
impl HandledStore for LibSqlBackend {
    async fn record_received(&self, kind: ItemKind, item: &str) -> Result<(), DatabaseError> {
        let sql = format!(
            "INSERT INTO {} (item, handled, progress, received_at) VALUES (?1, 0, 0, ?2)
             ON CONFLICT(item) DO UPDATE SET handled = 0, progress = 0",
            kind.table()
        );
        self.conn
            .execute(&sql, params![item, Utc::now().to_rfc3339()])
            .await
            .map_err(|e| DatabaseError::Query(format!("record_received: {e}")))?;
        debug!(%kind, item, "Recorded item");
        Ok(())
    }

    async fn set_handled(
        &self,
        kind: ItemKind,
        item: &str,
        handled: bool,
    ) -> Result<(), DatabaseError> {
        let sql = format!("UPDATE {} SET handled = ?1 WHERE item = ?2", kind.table());
        let changed = self
            .conn
            .execute(&sql, params![handled as i64, item])
            .await
            .map_err(|e| DatabaseError::Query(format!("set_handled: {e}")))?;
        if changed == 0 {
            return Err(DatabaseError::Query(format!(
                "set_handled: no {kind} named {item}"
            )));
        }
        debug!(%kind, item, handled, "Handled flag updated");
        Ok(())
    }

    async fn list_unhandled(&self, kind: ItemKind) -> Result<Vec<String>, DatabaseError> {
        let sql = format!(
            "SELECT item FROM {} WHERE handled = 0 ORDER BY received_at ASC, item ASC",
            kind.table()
        );
        let mut rows = self
            .conn
            .query(&sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_unhandled: {e}")))?;

        let mut items = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_unhandled: {e}")))?
        {
            let item: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("list_unhandled: {e}")))?;
            items.push(item);
        }
        Ok(items)
    }

    async fn set_progress(
        &self,
        kind: ItemKind,
        item: &str,
        done: usize,
    ) -> Result<(), DatabaseError> {
        let sql = format!("UPDATE {} SET progress = ?1 WHERE item = ?2", kind.table());
        self.conn
            .execute(&sql, params![done as i64, item])
            .await
            .map_err(|e| DatabaseError::Query(format!("set_progress: {e}")))?;
        Ok(())
    }

    async fn progress(&self, kind: ItemKind, item: &str) -> Result<usize, DatabaseError> {
        let sql = format!("SELECT progress FROM {} WHERE item = ?1", kind.table());
        let mut rows = self
            .conn
            .query(&sql, params![item])
            .await
            .map_err(|e| DatabaseError::Query(format!("progress: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("progress: {e}")))?;
        match row {
            Some(row) => {
                let done: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("progress: {e}")))?;
                Ok(done.max(0) as usize)
            }
            None => Ok(0),
        }
    }
}
