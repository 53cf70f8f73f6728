//! Schema extension manager - applies plugin-declared additive columns

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::application::errors::{PluginError, PluginResult};
use crate::domain::entities::schema::is_valid_identifier;
use crate::domain::entities::SchemaExtension;
use crate::domain::traits::Store;

/// What one apply pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaReport {
    /// `table.column` newly added
    pub added: Vec<String>,
    /// Column was already in the table
    pub present: Vec<String>,
    /// Failed and left queued for the next pass
    pub failed: Vec<(String, String)>,
}

impl SchemaReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.failed.is_empty()
    }
}

#[derive(Default)]
struct SchemaState {
    /// First definition seen for each (table, column)
    declared: HashMap<(String, String), SchemaExtension>,
    /// Pending, in plugin load order
    queue: Vec<SchemaExtension>,
    applied: HashSet<(String, String)>,
}

/// Collects additive column requests during `on_load` and applies them later
///
/// Declarations are never forgotten, even when the owning plugin unloads: the
/// column stays in the table, so a later conflicting definition is still an error.
#[derive(Default)]
pub struct SchemaExtensionManager {
    state: Mutex<SchemaState>,
}

impl SchemaExtensionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue extensions declared by one plugin.
    ///
    /// Redeclaring an identical column is a no-op; a different type or
    /// default for a column already declared is a registration conflict.
    /// Nothing is queued if any extension conflicts or has a default with no
    /// SQL literal.
    pub fn register_schema_extensions(&self, extensions: Vec<SchemaExtension>) -> PluginResult<()> {
        for ext in &extensions {
            if !is_valid_identifier(&ext.table) || !is_valid_identifier(&ext.column.name) {
                return Err(PluginError::InvalidName(format!(
                    "column '{}.{}' declared by '{}'",
                    ext.table, ext.column.name, ext.plugin
                )));
            }
            if !ext.column.default.is_representable() {
                return Err(PluginError::InvalidSchema(format!(
                    "column '{}.{}' declared by '{}' has default {:?}",
                    ext.table, ext.column.name, ext.plugin, ext.column.default
                )));
            }
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| PluginError::Handler("schema manager lock poisoned".to_string()))?;

        let mut batch: HashMap<(String, String), &SchemaExtension> = HashMap::new();
        for ext in &extensions {
            let key = ext.key();
            let previous = state.declared.get(&key).or_else(|| batch.get(&key).copied());
            if let Some(prev) = previous {
                if prev.column != ext.column {
                    return Err(PluginError::RegistrationConflict {
                        what: format!(
                            "column '{}.{}' ({} vs {})",
                            ext.table, ext.column.name, prev.column.column_type, ext.column.column_type
                        ),
                        existing: prev.plugin.clone(),
                        incoming: ext.plugin.clone(),
                    });
                }
            }
            batch.insert(key, ext);
        }

        for ext in extensions {
            let key = ext.key();
            if state.applied.contains(&key) || state.queue.iter().any(|q| q.key() == key) {
                continue;
            }
            state.declared.entry(key).or_insert_with(|| ext.clone());
            tracing::debug!(
                plugin = %ext.plugin,
                table = %ext.table,
                column = %ext.column.name,
                "Queued schema extension"
            );
            state.queue.push(ext);
        }
        Ok(())
    }

    /// Extensions waiting for the next apply pass
    pub fn pending(&self) -> Vec<SchemaExtension> {
        self.state.lock().map(|s| s.queue.clone()).unwrap_or_default()
    }

    pub fn is_applied(&self, table: &str, column: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.applied.contains(&(table.to_string(), column.to_string())))
            .unwrap_or(false)
    }

    /// Add every queued column missing from the store, in load order.
    ///
    /// Existing columns are never dropped or altered. Running this again with
    /// nothing new queued does nothing.
    pub async fn apply_plugin_schema_extensions(&self, store: &dyn Store) -> PluginResult<SchemaReport> {
        let queue = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| PluginError::Handler("schema manager lock poisoned".to_string()))?;
            std::mem::take(&mut state.queue)
        };

        let mut report = SchemaReport::default();
        let mut done = Vec::new();
        let mut retry = Vec::new();

        for ext in queue {
            let label = format!("{}.{}", ext.table, ext.column.name);
            match store.add_column_if_not_exists(&ext.table, &ext.column).await {
                Ok(added) => {
                    if added {
                        tracing::info!(plugin = %ext.plugin, column = %label, "Added column");
                        report.added.push(label);
                    } else {
                        tracing::debug!(plugin = %ext.plugin, column = %label, "Column already present");
                        report.present.push(label);
                    }
                    if let Err(e) = store.set(&ext.marker_key(), &ext.plugin).await {
                        tracing::warn!(column = %ext.marker_key(), error = %e, "Failed to record schema marker");
                    }
                    done.push(ext.key());
                }
                Err(e) => {
                    tracing::error!(plugin = %ext.plugin, column = %label, error = %e, "Schema extension failed");
                    report.failed.push((label, e.to_string()));
                    retry.push(ext);
                }
            }
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| PluginError::Handler("schema manager lock poisoned".to_string()))?;
        state.applied.extend(done);
        // Anything queued while we were applying goes after the retries
        let newer = std::mem::take(&mut state.queue);
        state.queue = retry;
        state.queue.extend(newer);

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ColumnDefault, ColumnDefinition, ColumnType};
    use crate::infrastructure::storage::MemoryStore;

    fn ext(plugin: &str, column: ColumnDefinition) -> SchemaExtension {
        SchemaExtension {
            table: "devices".to_string(),
            column,
            plugin: plugin.to_string(),
        }
    }

    #[tokio::test]
    async fn test_apply_twice_is_noop() {
        let store = MemoryStore::new();
        store.create_table("devices", &["id", "name"]).await;
        let manager = SchemaExtensionManager::new();

        manager
            .register_schema_extensions(vec![ext(
                "shutdown",
                ColumnDefinition::new("shutdown_api_key", ColumnType::Text),
            )])
            .unwrap();

        let first = manager.apply_plugin_schema_extensions(&store).await.unwrap();
        assert_eq!(first.added, vec!["devices.shutdown_api_key".to_string()]);
        assert!(manager.is_applied("devices", "shutdown_api_key"));

        // Plugin reloads and declares the same column again
        manager
            .register_schema_extensions(vec![ext(
                "shutdown",
                ColumnDefinition::new("shutdown_api_key", ColumnType::Text),
            )])
            .unwrap();
        let second = manager.apply_plugin_schema_extensions(&store).await.unwrap();
        assert!(second.is_noop());
        assert!(second.present.is_empty());
        assert_eq!(store.columns("devices").await.len(), 3);
        assert_eq!(
            store.get("schema.devices.shutdown_api_key").await.unwrap(),
            Some("shutdown".to_string())
        );
    }

    #[tokio::test]
    async fn test_conflicting_type_is_rejected() {
        let manager = SchemaExtensionManager::new();
        manager
            .register_schema_extensions(vec![ext(
                "p",
                ColumnDefinition::new("shutdown_api_key", ColumnType::Text),
            )])
            .unwrap();

        let err = manager
            .register_schema_extensions(vec![ext(
                "q",
                ColumnDefinition::new("shutdown_api_key", ColumnType::Integer),
            )])
            .unwrap_err();
        match err {
            PluginError::RegistrationConflict { existing, incoming, .. } => {
                assert_eq!(existing, "p");
                assert_eq!(incoming, "q");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(manager.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_column_is_left_alone() {
        let store = MemoryStore::new();
        store.create_table("devices", &["id", "shutdown_api_key"]).await;
        let manager = SchemaExtensionManager::new();
        manager
            .register_schema_extensions(vec![ext(
                "p",
                ColumnDefinition::new("shutdown_api_key", ColumnType::Text),
            )])
            .unwrap();

        let report = manager.apply_plugin_schema_extensions(&store).await.unwrap();
        assert!(report.added.is_empty());
        assert_eq!(report.present, vec!["devices.shutdown_api_key".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_table_stays_queued() {
        let store = MemoryStore::new();
        let manager = SchemaExtensionManager::new();
        manager
            .register_schema_extensions(vec![ext("p", ColumnDefinition::new("x", ColumnType::Integer))])
            .unwrap();

        let report = manager.apply_plugin_schema_extensions(&store).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(manager.pending().len(), 1);

        store.create_table("devices", &["id"]).await;
        let report = manager.apply_plugin_schema_extensions(&store).await.unwrap();
        assert_eq!(report.added, vec!["devices.x".to_string()]);
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let manager = SchemaExtensionManager::new();
        let err = manager
            .register_schema_extensions(vec![ext("p", ColumnDefinition::new("bad name", ColumnType::Text))])
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_non_finite_default_rejected_at_registration() {
        let store = MemoryStore::new();
        store.create_table("devices", &["id"]).await;
        let manager = SchemaExtensionManager::new();
        let err = manager
            .register_schema_extensions(vec![ext(
                "p",
                ColumnDefinition::new("ratio", ColumnType::Real).with_default(ColumnDefault::Real(f64::NAN)),
            )])
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidSchema(_)));

        // Nothing was queued, so applying has no work and no retry
        let report = manager.apply_plugin_schema_extensions(&store).await.unwrap();
        assert!(report.is_noop());
    }
}
