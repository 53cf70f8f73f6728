//! SQLite-backed store

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::application::errors::StorageError;
use crate::domain::entities::schema::is_valid_identifier;
use crate::domain::entities::ColumnDefinition;
use crate::domain::traits::Store;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> SqliteResult<Self> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.init_tables()?;
        Ok(db)
    }

    fn init_tables(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;

        // Key/value config shared by the kernel and plugins
        conn.execute(
            "CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        // Core table plugins commonly extend
        conn.execute(
            "CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                mac TEXT,
                ip TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Internal("database connection lock poisoned".to_string()))
    }

    /// Column names of `table`, in declaration order
    pub fn columns(&self, table: &str) -> Result<Vec<String>, StorageError> {
        if !is_valid_identifier(table) {
            return Err(StorageError::InvalidIdentifier(table.to_string()));
        }
        let conn = self.lock()?;
        table_columns(&conn, table)
    }
}

fn poisoned() -> rusqlite::Error {
    rusqlite::Error::InvalidParameterName("connection lock poisoned".to_string())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;

    let mut columns = Vec::new();
    for column in rows {
        columns.push(column?);
    }
    if columns.is_empty() {
        return Err(StorageError::TableNotFound(table.to_string()));
    }
    Ok(columns)
}

#[async_trait]
impl Store for Database {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            [key, value],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM config WHERE key = ?1", [key])?;
        Ok(())
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, StorageError> {
        if !is_valid_identifier(table) {
            return Err(StorageError::InvalidIdentifier(table.to_string()));
        }
        let conn = self.lock()?;
        Ok(table_columns(&conn, table)?.iter().any(|c| c == column))
    }

    async fn add_column_if_not_exists(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<bool, StorageError> {
        if !is_valid_identifier(table) || !is_valid_identifier(&column.name) {
            return Err(StorageError::InvalidIdentifier(format!("{}.{}", table, column.name)));
        }

        let conn = self.lock()?;
        if table_columns(&conn, table)?.iter().any(|c| c == &column.name) {
            return Ok(false);
        }
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {}", table, column.to_sql()),
            [],
        )?;
        Ok(true)
    }
}
