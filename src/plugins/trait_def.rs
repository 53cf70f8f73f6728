//! Plugin contract - the capability set every plugin implements

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::application::errors::{PluginError, PluginResult};
use crate::application::messaging::parser::CustomId;
use crate::domain::entities::{
    AutocompleteChoice, ColumnDefinition, CommandDescriptor, CommandOwner, HandlerOutcome,
    InteractionEvent, SchemaExtension,
};
use crate::domain::traits::Store;
use super::events::HookHandler;

/// Core plugin trait that all plugins must implement
///
/// Only `on_load` is required. Every other call has a no-op default, so a
/// plugin overrides just the capabilities it has. `on_load` runs exactly once
/// per load attempt; an error aborts this plugin (and its dependents) only.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Register commands, hooks, schema extensions and services
    async fn on_load(&self, ctx: &mut PluginContext) -> PluginResult<()>;

    /// Release resources. Persisted data must be left untouched.
    async fn on_unload(&self) -> PluginResult<()> {
        Ok(())
    }

    async fn on_enable(&self) -> PluginResult<()> {
        Ok(())
    }

    async fn on_disable(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Handle a slash command owned by this plugin
    async fn handle_command(&self, _interaction: &InteractionEvent) -> PluginResult<HandlerOutcome> {
        Ok(HandlerOutcome::Unhandled)
    }

    /// Suggestions for a command option marked `autocomplete`
    async fn handle_autocomplete(
        &self,
        _interaction: &InteractionEvent,
    ) -> PluginResult<Vec<AutocompleteChoice>> {
        Ok(Vec::new())
    }

    /// Handle a button/select whose custom-id is namespaced to this plugin
    async fn handle_component(
        &self,
        _interaction: &InteractionEvent,
        _custom_id: &CustomId,
    ) -> PluginResult<HandlerOutcome> {
        Ok(HandlerOutcome::Unhandled)
    }
}

/// Constructor for a fresh plugin instance; called once per load attempt
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

type Service = Arc<dyn Any + Send + Sync>;

struct ActivePlugin {
    instance: Arc<dyn Plugin>,
    services: HashMap<String, Service>,
    enabled: bool,
}

/// Name-keyed view of currently loaded plugins
///
/// Optional dependencies are resolved through this at call time, never at
/// load time, so a missing optional dependency cannot fail `on_load`.
#[derive(Clone, Default)]
pub struct PluginDirectory {
    active: Arc<RwLock<HashMap<String, ActivePlugin>>>,
}

impl PluginDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loaded and enabled
    pub fn is_available(&self, name: &str) -> bool {
        self.active
            .read()
            .ok()
            .map(|a| a.get(name).is_some_and(|p| p.enabled))
            .unwrap_or(false)
    }

    /// Get an enabled plugin instance by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let active = self.active.read().ok()?;
        active
            .get(name)
            .filter(|p| p.enabled)
            .map(|p| p.instance.clone())
    }

    /// Get a typed service published by an enabled plugin
    pub fn service<T: Any + Send + Sync>(&self, plugin: &str, service: &str) -> Option<Arc<T>> {
        let active = self.active.read().ok()?;
        let entry = active.get(plugin).filter(|p| p.enabled)?;
        entry.services.get(service)?.clone().downcast::<T>().ok()
    }

    pub(crate) fn insert(
        &self,
        name: &str,
        instance: Arc<dyn Plugin>,
        services: HashMap<String, Service>,
        enabled: bool,
    ) {
        if let Ok(mut active) = self.active.write() {
            active.insert(
                name.to_string(),
                ActivePlugin {
                    instance,
                    services,
                    enabled,
                },
            );
        }
    }

    pub(crate) fn set_enabled(&self, name: &str, enabled: bool) {
        if let Ok(mut active) = self.active.write() {
            if let Some(entry) = active.get_mut(name) {
                entry.enabled = enabled;
            }
        }
    }

    pub(crate) fn instance(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.active.read().ok()?.get(name).map(|p| p.instance.clone())
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.active.write().ok()?.remove(name).map(|p| p.instance)
    }
}

/// Registration surface handed to `on_load`
///
/// Everything registered here is pending until `on_load` returns `Ok` and the
/// loader has validated it against the other plugins.
pub struct PluginContext {
    plugin_name: String,
    plugin_dir: Option<PathBuf>,
    settings: serde_yaml::Value,
    directory: PluginDirectory,
    store: Option<Arc<dyn Store>>,
    pending_commands: Vec<CommandDescriptor>,
    pending_hooks: Vec<(String, HookHandler)>,
    pending_schema: Vec<SchemaExtension>,
    services: HashMap<String, Service>,
}

impl PluginContext {
    pub fn new(plugin_name: impl Into<String>, directory: PluginDirectory) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            plugin_dir: None,
            settings: serde_yaml::Value::Null,
            directory,
            store: None,
            pending_commands: Vec::new(),
            pending_hooks: Vec::new(),
            pending_schema: Vec::new(),
            services: HashMap::new(),
        }
    }

    pub fn with_plugin_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.plugin_dir = dir;
        self
    }

    pub fn with_settings(mut self, settings: serde_yaml::Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_store(mut self, store: Option<Arc<dyn Store>>) -> Self {
        self.store = store;
        self
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn plugin_dir(&self) -> Option<&Path> {
        self.plugin_dir.as_deref()
    }

    /// The `settings` section of the plugin manifest
    pub fn settings(&self) -> &serde_yaml::Value {
        &self.settings
    }

    /// Handle for resolving optional dependencies lazily
    pub fn plugins(&self) -> PluginDirectory {
        self.directory.clone()
    }

    /// Shared store (key/value config table), when the kernel has one
    pub fn store(&self) -> Option<Arc<dyn Store>> {
        self.store.clone()
    }

    // Commands

    /// Register a standalone command or a subcommand-group.
    ///
    /// Returns error if the same command/group is registered twice by this plugin.
    pub fn register_command(&mut self, command: CommandDescriptor) -> PluginResult<()> {
        command.validate().map_err(PluginError::InvalidName)?;
        let command = command.owned_by(CommandOwner::Plugin(self.plugin_name.clone()));
        if self
            .pending_commands
            .iter()
            .any(|c| c.top_level_name() == command.top_level_name() && c.name == command.name)
        {
            return Err(PluginError::RegistrationConflict {
                what: command.registration_key(),
                existing: self.plugin_name.clone(),
                incoming: self.plugin_name.clone(),
            });
        }
        self.pending_commands.push(command);
        Ok(())
    }

    pub fn pending_commands(&self) -> &[CommandDescriptor] {
        &self.pending_commands
    }

    pub(crate) fn take_pending_commands(&mut self) -> Vec<CommandDescriptor> {
        std::mem::take(&mut self.pending_commands)
    }

    // Hooks

    /// Subscribe to a named broadcast event
    pub fn subscribe<F, Fut>(&mut self, event: impl Into<String>, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        let handler: HookHandler = Arc::new(move |payload| handler(payload).boxed());
        self.pending_hooks.push((event.into(), handler));
    }

    pub fn subscriptions(&self) -> Vec<&str> {
        self.pending_hooks.iter().map(|(e, _)| e.as_str()).collect()
    }

    pub(crate) fn take_pending_hooks(&mut self) -> Vec<(String, HookHandler)> {
        std::mem::take(&mut self.pending_hooks)
    }

    // Schema

    /// Queue additive columns for a shared table. Nothing touches the store
    /// until the kernel applies extensions after every plugin has loaded.
    pub fn declare_schema_extension(
        &mut self,
        table: impl Into<String>,
        columns: Vec<ColumnDefinition>,
    ) {
        let table = table.into();
        for column in columns {
            self.pending_schema.push(SchemaExtension {
                table: table.clone(),
                column,
                plugin: self.plugin_name.clone(),
            });
        }
    }

    pub fn pending_schema(&self) -> &[SchemaExtension] {
        &self.pending_schema
    }

    pub(crate) fn take_pending_schema(&mut self) -> Vec<SchemaExtension> {
        std::mem::take(&mut self.pending_schema)
    }

    // Services

    /// Publish a typed capability other plugins can look up by name
    pub fn provide_service<T: Any + Send + Sync>(&mut self, name: impl Into<String>, service: Arc<T>) {
        self.services.insert(name.into(), service);
    }

    pub(crate) fn take_services(&mut self) -> HashMap<String, Service> {
        std::mem::take(&mut self.services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ColumnType;

    struct Noop;

    #[async_trait]
    impl Plugin for Noop {
        async fn on_load(&self, _ctx: &mut PluginContext) -> PluginResult<()> {
            Ok(())
        }
    }

    struct KeyRotation {
        keys: Vec<String>,
    }

    #[test]
    fn test_register_command_sets_owner() {
        let mut ctx = PluginContext::new("weather", PluginDirectory::new());
        ctx.register_command(CommandDescriptor::standalone("weather")).unwrap();
        assert_eq!(
            ctx.pending_commands()[0].owner,
            CommandOwner::Plugin("weather".to_string())
        );
    }

    #[test]
    fn test_duplicate_command_in_same_plugin_rejected() {
        let mut ctx = PluginContext::new("network", PluginDirectory::new());
        ctx.register_command(CommandDescriptor::group("network", "insights")).unwrap();
        let err = ctx
            .register_command(CommandDescriptor::group("network", "insights"))
            .unwrap_err();
        assert!(err.is_conflict());
        // Same group name under a different parent is fine
        ctx.register_command(CommandDescriptor::group("device", "insights")).unwrap();
    }

    #[test]
    fn test_invalid_command_name_rejected() {
        let mut ctx = PluginContext::new("x", PluginDirectory::new());
        let err = ctx.register_command(CommandDescriptor::standalone("Bad Name")).unwrap_err();
        assert!(matches!(err, PluginError::InvalidName(_)));
    }

    #[test]
    fn test_schema_extension_tagged_with_plugin() {
        let mut ctx = PluginContext::new("shutdown", PluginDirectory::new());
        ctx.declare_schema_extension(
            "devices",
            vec![ColumnDefinition::new("shutdown_api_key", ColumnType::Text)],
        );
        let ext = &ctx.pending_schema()[0];
        assert_eq!(ext.plugin, "shutdown");
        assert_eq!(ext.table, "devices");
    }

    #[test]
    fn test_directory_resolves_only_enabled_plugins() {
        let dir = PluginDirectory::new();
        assert!(dir.get("ai").is_none());

        let mut services: HashMap<String, Service> = HashMap::new();
        services.insert(
            "keys".to_string(),
            Arc::new(KeyRotation {
                keys: vec!["k1".to_string()],
            }),
        );
        dir.insert("ai", Arc::new(Noop), services, true);
        assert!(dir.is_available("ai"));
        let keys = dir.service::<KeyRotation>("ai", "keys").unwrap();
        assert_eq!(keys.keys, vec!["k1".to_string()]);
        assert!(dir.service::<String>("ai", "keys").is_none());

        dir.set_enabled("ai", false);
        assert!(!dir.is_available("ai"));
        assert!(dir.get("ai").is_none());
        assert!(dir.instance("ai").is_some());

        dir.remove("ai");
        assert!(dir.instance("ai").is_none());
    }
}
