//! Plugin catalog - compiled-in plugin factories by name

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::application::errors::PluginError;
use crate::plugins::{Plugin, PluginFactory};
use super::manifest::PluginManifest;

struct CatalogEntry {
    factory: PluginFactory,
    /// Used when no plugin directory supplies a manifest
    manifest: Option<PluginManifest>,
}

/// Registry of plugin constructors
///
/// A discovered plugin directory is only loadable if its manifest name has a
/// factory here.
pub struct PluginCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
    order: RwLock<Vec<String>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Register a factory for plugins discovered on disk
    pub fn register<F>(&self, name: impl Into<String>, factory: F) -> Result<(), PluginError>
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(factory), None)
    }

    /// Register a factory that carries its own manifest
    pub fn register_builtin<F>(&self, manifest: PluginManifest, factory: F) -> Result<(), PluginError>
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        manifest.validate()?;
        self.insert(manifest.name.clone(), Arc::new(factory), Some(manifest))
    }

    fn insert(
        &self,
        name: String,
        factory: PluginFactory,
        manifest: Option<PluginManifest>,
    ) -> Result<(), PluginError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PluginError::Handler("catalog lock poisoned".to_string()))?;

        if entries.contains_key(&name) {
            return Err(PluginError::RegistrationConflict {
                what: format!("plugin '{}'", name),
                existing: name.clone(),
                incoming: name,
            });
        }

        if let Ok(mut order) = self.order.write() {
            order.push(name.clone());
        }
        entries.insert(name, CatalogEntry { factory, manifest });
        Ok(())
    }

    /// Get a factory by name
    pub fn factory(&self, name: &str) -> Option<PluginFactory> {
        self.entries
            .read()
            .ok()?
            .get(name)
            .map(|e| e.factory.clone())
    }

    /// Manifests of plugins that ship their own, in registration order
    pub fn builtin_manifests(&self) -> Vec<PluginManifest> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        self.names()
            .iter()
            .filter_map(|n| entries.get(n).and_then(|e| e.manifest.clone()))
            .collect()
    }

    /// Get all plugin names
    pub fn names(&self) -> Vec<String> {
        self.order.read().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(name))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::PluginResult;
    use crate::plugins::PluginContext;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Plugin for Noop {
        async fn on_load(&self, _ctx: &mut PluginContext) -> PluginResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let catalog = PluginCatalog::new();
        catalog.register("weather", || Arc::new(Noop) as Arc<dyn Plugin>).unwrap();
        catalog
            .register_builtin(PluginManifest::new("diagnostics", "1.0.0"), || {
                Arc::new(Noop) as Arc<dyn Plugin>
            })
            .unwrap();

        assert!(catalog.factory("weather").is_some());
        assert!(catalog.factory("ghost").is_none());
        assert_eq!(catalog.names(), vec!["weather", "diagnostics"]);
        let builtins = catalog.builtin_manifests();
        assert_eq!(builtins.len(), 1);
        assert_eq!(builtins[0].name, "diagnostics");
    }

    #[test]
    fn test_duplicate_factory_rejected() {
        let catalog = PluginCatalog::new();
        catalog.register("weather", || Arc::new(Noop) as Arc<dyn Plugin>).unwrap();
        let err = catalog
            .register("weather", || Arc::new(Noop) as Arc<dyn Plugin>)
            .unwrap_err();
        assert!(err.is_conflict());
    }
}
