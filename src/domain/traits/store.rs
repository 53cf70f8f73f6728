use async_trait::async_trait;
use crate::application::errors::StorageError;
use crate::domain::entities::ColumnDefinition;

/// Store trait - the two persistence primitives the kernel relies on
#[async_trait]
pub trait Store: Send + Sync {
    // Key-value config table
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    // Migrations
    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, StorageError>;

    /// Add `column` to `table` unless it already exists. Returns `true` if added.
    async fn add_column_if_not_exists(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<bool, StorageError>;
}
