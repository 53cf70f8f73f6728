//! In-memory storage implementation

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::application::errors::StorageError;
use crate::domain::entities::schema::is_valid_identifier;
use crate::domain::entities::ColumnDefinition;
use crate::domain::traits::Store;

/// Volatile store used when no database is configured, and by tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    kv: Arc<RwLock<HashMap<String, String>>>,
    tables: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a table with the given columns
    pub async fn create_table(&self, table: &str, columns: &[&str]) {
        let mut tables = self.tables.write().await;
        tables.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
    }

    /// Column names of `table`, in creation order
    pub async fn columns(&self, table: &str) -> Vec<String> {
        let tables = self.tables.read().await;
        tables.get(table).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let kv = self.kv.read().await;
        Ok(kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut kv = self.kv.write().await;
        kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut kv = self.kv.write().await;
        kv.remove(key);
        Ok(())
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, StorageError> {
        let tables = self.tables.read().await;
        let columns = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        Ok(columns.iter().any(|c| c == column))
    }

    async fn add_column_if_not_exists(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<bool, StorageError> {
        if !is_valid_identifier(table) || !is_valid_identifier(&column.name) {
            return Err(StorageError::InvalidIdentifier(format!("{}.{}", table, column.name)));
        }

        let mut tables = self.tables.write().await;
        let columns = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        if columns.iter().any(|c| c == &column.name) {
            return Ok(false);
        }
        columns.push(column.name.clone());
        Ok(true)
    }
}
