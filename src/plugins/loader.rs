//! Plugin loader - discovery, dependency ordering and the plugin lifecycle
//!
//! State machine per plugin:
//! `Unloaded -> Loading -> Loaded -> {Enabled <-> Disabled} -> Unloading -> Unloaded`.
//! Mutations of one plugin name are serialized; different names run concurrently.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::application::errors::{BotError, LifecyclePhase, PluginError, PluginResult};
use crate::application::services::CommandRegistry;
use crate::domain::entities::{PluginDescriptor, PluginState};
use crate::domain::traits::{CommandTransport, Store};
use crate::infrastructure::plugins::{PluginCatalog, PluginDiscovery, PluginManifest};
use super::dependency::resolve_load_order;
use super::events::{EventBus, COMMANDS_PUBLISHED, PLUGIN_LOADED, PLUGIN_UNLOADED};
use super::schema::SchemaExtensionManager;
use super::trait_def::{Plugin, PluginContext, PluginDirectory};
use super::watcher::ReloadTarget;

/// Default bound on a single lifecycle call
pub const DEFAULT_LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of `load_all_plugins`
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// In load order
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Loaded but left disabled because `on_enable` failed
    pub degraded: Vec<(String, String)>,
}

impl LoadReport {
    pub fn failure_of(&self, name: &str) -> Option<&str> {
        self.failed
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.as_str())
    }

    pub fn degradation_of(&self, name: &str) -> Option<&str> {
        self.degraded
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.as_str())
    }

    /// Plugins were found but none of them loaded
    pub fn is_total_failure(&self) -> bool {
        self.loaded.is_empty() && !self.failed.is_empty()
    }
}

struct Entry {
    descriptor: PluginDescriptor,
    settings: serde_yaml::Value,
}

/// Store key holding a plugin's enabled flag
pub fn enabled_flag_key(name: &str) -> String {
    format!("plugin.{}.enabled", name)
}

/// Owns every plugin's lifecycle and keeps the registry, event bus, schema
/// manager and plugin directory in step with it.
pub struct PluginLoader {
    catalog: Arc<PluginCatalog>,
    registry: Arc<CommandRegistry>,
    bus: Arc<EventBus>,
    schema: Arc<SchemaExtensionManager>,
    directory: PluginDirectory,
    discovery: Option<PluginDiscovery>,
    store: Option<Arc<dyn Store>>,
    transport: RwLock<Option<Arc<dyn CommandTransport>>>,
    entries: RwLock<Vec<Entry>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    forced_disabled: HashSet<String>,
    lifecycle_timeout: Duration,
    published: AtomicBool,
}

impl PluginLoader {
    pub fn new(
        catalog: Arc<PluginCatalog>,
        registry: Arc<CommandRegistry>,
        bus: Arc<EventBus>,
        schema: Arc<SchemaExtensionManager>,
    ) -> Self {
        Self {
            catalog,
            registry,
            bus,
            schema,
            directory: PluginDirectory::new(),
            discovery: None,
            store: None,
            transport: RwLock::new(None),
            entries: RwLock::new(Vec::new()),
            locks: Mutex::new(HashMap::new()),
            forced_disabled: HashSet::new(),
            lifecycle_timeout: DEFAULT_LIFECYCLE_TIMEOUT,
            published: AtomicBool::new(false),
        }
    }

    pub fn with_discovery(mut self, discovery: PluginDiscovery) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_lifecycle_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle_timeout = timeout;
        self
    }

    /// Names that stay disabled whatever their manifest or persisted flag says
    pub fn with_forced_disabled(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.forced_disabled = names.into_iter().collect();
        self
    }

    pub fn set_transport(&self, transport: Arc<dyn CommandTransport>) {
        if let Ok(mut slot) = self.transport.write() {
            *slot = Some(transport);
        }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn schema(&self) -> &Arc<SchemaExtensionManager> {
        &self.schema
    }

    pub fn directory(&self) -> &PluginDirectory {
        &self.directory
    }

    pub fn store(&self) -> Option<Arc<dyn Store>> {
        self.store.clone()
    }

    // Descriptors

    /// All known plugins in discovery order
    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.entries
            .read()
            .map(|e| e.iter().map(|e| e.descriptor.clone()).collect())
            .unwrap_or_default()
    }

    pub fn descriptor(&self, name: &str) -> Option<PluginDescriptor> {
        self.entries
            .read()
            .ok()?
            .iter()
            .find(|e| e.descriptor.name == name)
            .map(|e| e.descriptor.clone())
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.descriptor(name).map(|d| d.state)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state(name).is_some_and(|s| s.is_loaded())
    }

    /// Plugin directories to watch for changes
    pub fn watch_targets(&self) -> Vec<(String, PathBuf)> {
        self.descriptors()
            .into_iter()
            .filter_map(|d| d.source_dir.map(|dir| (d.name, dir)))
            .collect()
    }

    /// Merge manifests from disk and from the catalog into the known set.
    ///
    /// Plugin directories come first, then built-in manifests not shadowed by a
    /// directory. Metadata of unloaded plugins is refreshed; loaded plugins keep
    /// theirs until they reload.
    pub fn refresh_descriptors(&self) -> Vec<PluginDescriptor> {
        let mut found: Vec<(PluginManifest, Option<PathBuf>)> = self
            .discovery
            .as_ref()
            .map(|d| d.discover().into_iter().map(|p| (p.manifest, Some(p.dir))).collect())
            .unwrap_or_default();

        for manifest in self.catalog.builtin_manifests() {
            if !found.iter().any(|(m, _)| m.name == manifest.name) {
                found.push((manifest, None));
            }
        }

        for (manifest, dir) in found {
            self.upsert(&manifest, dir);
        }
        self.descriptors()
    }

    fn upsert(&self, manifest: &PluginManifest, dir: Option<PathBuf>) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        match entries.iter_mut().find(|e| e.descriptor.name == manifest.name) {
            Some(entry) if entry.descriptor.state == PluginState::Unloaded => {
                let enabled = entry.descriptor.enabled;
                let last_error = entry.descriptor.last_error.take();
                entry.descriptor = manifest.to_descriptor(dir).with_enabled(enabled);
                entry.descriptor.last_error = last_error;
                entry.settings = manifest.settings.clone();
            }
            Some(_) => {}
            None => entries.push(Entry {
                descriptor: manifest.to_descriptor(dir),
                settings: manifest.settings.clone(),
            }),
        }
    }

    fn update<F: FnOnce(&mut PluginDescriptor)>(&self, name: &str, f: F) {
        if let Ok(mut entries) = self.entries.write() {
            if let Some(entry) = entries.iter_mut().find(|e| e.descriptor.name == name) {
                f(&mut entry.descriptor);
            }
        }
    }

    fn set_state(&self, name: &str, state: PluginState) {
        self.update(name, |d| d.state = state);
        tracing::debug!(plugin = %name, state = %state, "Plugin state changed");
    }

    fn record_failure(&self, name: &str, error: &PluginError) {
        let message = error.to_string();
        self.update(name, |d| d.last_error = Some(message));
    }

    fn settings_of(&self, name: &str) -> serde_yaml::Value {
        self.entries
            .read()
            .ok()
            .and_then(|e| e.iter().find(|e| e.descriptor.name == name).map(|e| e.settings.clone()))
            .unwrap_or(serde_yaml::Value::Null)
    }

    fn name_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(name.to_string()).or_default().clone()
    }

    // Boot

    /// Discover every plugin, order by required dependencies and load.
    ///
    /// A cycle fails every member; a failed or missing dependency fails only
    /// its dependents. Unrelated plugins always load.
    pub async fn load_all_plugins(&self) -> LoadReport {
        let candidates: Vec<PluginDescriptor> = self
            .refresh_descriptors()
            .into_iter()
            .filter(|d| d.state == PluginState::Unloaded)
            .collect();
        let plan = resolve_load_order(&candidates);
        let mut report = LoadReport::default();

        for path in &plan.cycles {
            let members: HashSet<&String> = path.iter().collect();
            for name in members {
                let err = PluginError::Cycle { path: path.clone() };
                tracing::error!(plugin = %name, error = %err, "Plugin not loaded");
                self.record_failure(name, &err);
                report.failed.push((name.clone(), err.to_string()));
            }
        }

        for (name, dependency) in &plan.blocked {
            let err = PluginError::Dependency {
                plugin: name.clone(),
                dependency: dependency.clone(),
            };
            tracing::error!(plugin = %name, error = %err, "Plugin not loaded");
            self.record_failure(name, &err);
            report.failed.push((name.clone(), err.to_string()));
        }

        for name in &plan.order {
            let lock = self.name_lock(name);
            let _guard = lock.lock().await;
            match self.load_locked(name, None).await {
                Ok(enable_error) => {
                    report.loaded.push(name.clone());
                    if let Some(e) = enable_error {
                        report.degraded.push((name.clone(), e.to_string()));
                    }
                }
                Err(e) => report.failed.push((name.clone(), e.to_string())),
            }
        }

        if report.is_total_failure() {
            tracing::error!(failed = report.failed.len(), "No plugin could be loaded");
        } else {
            tracing::info!(
                loaded = report.loaded.len(),
                failed = report.failed.len(),
                degraded = report.degraded.len(),
                "Plugins loaded"
            );
        }
        report
    }

    // Lifecycle

    /// Load one plugin by name
    pub async fn load_plugin(&self, name: &str) -> PluginResult<()> {
        if self.descriptor(name).is_none() {
            self.refresh_descriptors();
        }
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        self.load_locked(name, None).await?;
        self.after_runtime_change().await;
        Ok(())
    }

    /// Disable (if enabled) and unload; persisted data is left untouched
    pub async fn unload_plugin(&self, name: &str) -> PluginResult<()> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        self.unload_locked(name).await?;
        self.after_runtime_change().await;
        Ok(())
    }

    /// Unload then load, keeping the enabled/disabled flag seen before the call.
    ///
    /// A failed load leaves the plugin `Unloaded`.
    pub async fn reload_plugin(&self, name: &str) -> PluginResult<()> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        let enabled = match descriptor.state {
            PluginState::Enabled => true,
            PluginState::Disabled => false,
            _ => descriptor.enabled,
        };
        tracing::info!(plugin = %name, enabled, "Reloading plugin");

        if descriptor.state.is_loaded() {
            self.unload_locked(name).await?;
        }

        if let (Some(discovery), Some(dir)) = (&self.discovery, &descriptor.source_dir) {
            match discovery.inspect(dir) {
                Ok(found) if found.manifest.name == name => self.upsert(&found.manifest, Some(found.dir)),
                Ok(found) => {
                    let err = PluginError::Manifest(format!(
                        "{} now declares '{}'",
                        dir.display(),
                        found.manifest.name
                    ));
                    tracing::error!(plugin = %name, error = %err, "Reload failed");
                    self.record_failure(name, &err);
                    self.after_runtime_change().await;
                    return Err(err);
                }
                Err(err) => {
                    tracing::error!(plugin = %name, error = %err, "Reload failed");
                    self.record_failure(name, &err);
                    self.after_runtime_change().await;
                    return Err(err);
                }
            }
        }

        let result = self.load_locked(name, Some(enabled)).await;
        self.after_runtime_change().await;
        result.map(|_| ())
    }

    pub async fn enable_plugin(&self, name: &str) -> PluginResult<()> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        self.enable_locked(name).await?;
        self.persist_flag(name, true).await;
        Ok(())
    }

    /// Hide a plugin from routing and hook delivery without unloading it
    pub async fn disable_plugin(&self, name: &str) -> PluginResult<()> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        self.disable_locked(name).await?;
        self.persist_flag(name, false).await;
        Ok(())
    }

    /// Unload every loaded plugin, dependents first
    pub async fn shutdown(&self) {
        let loaded: Vec<PluginDescriptor> = self
            .descriptors()
            .into_iter()
            .filter(|d| d.state.is_loaded())
            .collect();
        let mut order = resolve_load_order(&loaded).order;
        order.reverse();
        for name in order {
            if let Err(e) = self.unload_plugin(&name).await {
                tracing::warn!(plugin = %name, error = %e, "Failed to unload during shutdown");
            }
        }
    }

    /// Load `name` with its lock held. `Ok(Some(err))` means the plugin loaded
    /// but `on_enable` failed and it was left disabled.
    ///
    /// If the returned future is dropped midway the load is rolled back, so
    /// the plugin never stays `Loading`.
    async fn load_locked(&self, name: &str, enabled_override: Option<bool>) -> PluginResult<Option<PluginError>> {
        let mut rollback = LoadRollback {
            loader: self,
            name,
            armed: true,
        };
        let result = self.load_steps(name, enabled_override).await;
        rollback.armed = false;
        result
    }

    async fn load_steps(&self, name: &str, enabled_override: Option<bool>) -> PluginResult<Option<PluginError>> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        if descriptor.state != PluginState::Unloaded {
            return Err(PluginError::InvalidState {
                plugin: name.to_string(),
                state: descriptor.state.to_string(),
                action: "load".to_string(),
            });
        }

        if let Some(dependency) = descriptor.dependencies.iter().find(|d| !self.is_loaded(d)) {
            let err = PluginError::Dependency {
                plugin: name.to_string(),
                dependency: dependency.clone(),
            };
            tracing::error!(plugin = %name, error = %err, "Plugin not loaded");
            self.record_failure(name, &err);
            return Err(err);
        }

        let Some(factory) = self.catalog.factory(name) else {
            let err = PluginError::NoFactory(name.to_string());
            tracing::error!(plugin = %name, error = %err, "Plugin not loaded");
            self.record_failure(name, &err);
            return Err(err);
        };

        let enabled = match enabled_override {
            Some(flag) => flag && !self.forced_disabled.contains(name),
            None => self.initial_enabled(&descriptor).await,
        };

        self.set_state(name, PluginState::Loading);
        tracing::info!(plugin = %name, version = %descriptor.version, "Loading plugin");

        let instance = factory();
        let ctx = PluginContext::new(name, self.directory.clone())
            .with_plugin_dir(descriptor.source_dir.clone())
            .with_settings(self.settings_of(name))
            .with_store(self.store.clone());

        let loading = Arc::clone(&instance);
        let mut ctx = match self
            .run_phase(name, LifecyclePhase::Load, async move {
                let mut ctx = ctx;
                loading.on_load(&mut ctx).await.map(|()| ctx)
            })
            .await
        {
            Ok(ctx) => ctx,
            Err(err) => {
                self.fail_load(name, &err);
                return Err(err);
            }
        };

        let commands = ctx.take_pending_commands();
        let hooks = ctx.take_pending_hooks();
        let schema = ctx.take_pending_schema();
        let services = ctx.take_services();

        if let Err(err) = self.registry.register(name, commands, false) {
            self.abort_load(name, &instance, err.clone()).await;
            return Err(err);
        }
        if let Err(err) = self.schema.register_schema_extensions(schema) {
            self.registry.unregister(name);
            self.abort_load(name, &instance, err.clone()).await;
            return Err(err);
        }
        for (event, handler) in hooks {
            self.bus.subscribe(name, &event, handler);
        }
        self.directory.insert(name, Arc::clone(&instance), services, false);

        self.update(name, |d| {
            d.state = PluginState::Loaded;
            d.enabled = enabled;
            d.loaded_at = Some(Utc::now());
            d.last_error = None;
        });
        tracing::info!(plugin = %name, "Plugin loaded");

        // A failing on_enable leaves the plugin loaded but disabled
        let enable_error = if enabled {
            self.enable_locked(name).await.err()
        } else {
            self.set_state(name, PluginState::Disabled);
            None
        };
        self.bus.spawn_emit(
            PLUGIN_LOADED,
            serde_json::json!({ "plugin": name, "version": descriptor.version }),
        );
        Ok(enable_error)
    }

    async fn unload_locked(&self, name: &str) -> PluginResult<()> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        if !descriptor.state.is_loaded() {
            return Err(PluginError::InvalidState {
                plugin: name.to_string(),
                state: descriptor.state.to_string(),
                action: "unload".to_string(),
            });
        }

        let dependents: Vec<String> = self
            .descriptors()
            .into_iter()
            .filter(|d| d.state.is_loaded() && d.dependencies.iter().any(|dep| dep == name))
            .map(|d| d.name)
            .collect();
        if !dependents.is_empty() {
            tracing::warn!(plugin = %name, dependents = ?dependents, "Unloading a plugin others depend on");
        }

        self.set_state(name, PluginState::Unloading);
        self.set_routable(name, false);

        let instance = self.directory.instance(name);
        if let Some(instance) = &instance {
            if descriptor.state == PluginState::Enabled {
                let disabling = Arc::clone(instance);
                if let Err(err) = self
                    .run_phase(name, LifecyclePhase::Disable, async move { disabling.on_disable().await })
                    .await
                {
                    tracing::warn!(plugin = %name, error = %err, "on_disable failed during unload");
                    self.record_failure(name, &err);
                }
            }
        }

        self.registry.unregister(name);
        self.bus.unsubscribe_plugin(name);
        self.directory.remove(name);

        if let Some(instance) = instance {
            if let Err(err) = self
                .run_phase(name, LifecyclePhase::Unload, async move { instance.on_unload().await })
                .await
            {
                tracing::warn!(plugin = %name, error = %err, "on_unload failed");
                self.record_failure(name, &err);
            }
        }

        self.update(name, |d| {
            d.state = PluginState::Unloaded;
            d.loaded_at = None;
        });
        tracing::info!(plugin = %name, "Plugin unloaded");
        self.bus.spawn_emit(PLUGIN_UNLOADED, serde_json::json!({ "plugin": name }));
        Ok(())
    }

    async fn enable_locked(&self, name: &str) -> PluginResult<()> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        match descriptor.state {
            PluginState::Enabled => return Ok(()),
            PluginState::Loaded | PluginState::Disabled => {}
            state => {
                return Err(PluginError::InvalidState {
                    plugin: name.to_string(),
                    state: state.to_string(),
                    action: "enable".to_string(),
                })
            }
        }
        if self.forced_disabled.contains(name) {
            return Err(PluginError::InvalidState {
                plugin: name.to_string(),
                state: "disabled by configuration".to_string(),
                action: "enable".to_string(),
            });
        }

        let instance = self
            .directory
            .instance(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        match self
            .run_phase(name, LifecyclePhase::Enable, async move { instance.on_enable().await })
            .await
        {
            Ok(()) => {
                self.set_routable(name, true);
                self.update(name, |d| {
                    d.state = PluginState::Enabled;
                    d.enabled = true;
                });
                tracing::info!(plugin = %name, "Plugin enabled");
                Ok(())
            }
            Err(err) => {
                self.record_failure(name, &err);
                self.update(name, |d| {
                    d.state = PluginState::Disabled;
                    d.enabled = false;
                });
                tracing::error!(plugin = %name, phase = LifecyclePhase::Enable.as_str(), error = %err, "Plugin left disabled");
                Err(err)
            }
        }
    }

    async fn disable_locked(&self, name: &str) -> PluginResult<()> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        match descriptor.state {
            PluginState::Disabled => return Ok(()),
            PluginState::Loaded => {
                self.update(name, |d| {
                    d.state = PluginState::Disabled;
                    d.enabled = false;
                });
                return Ok(());
            }
            PluginState::Enabled => {}
            state => {
                return Err(PluginError::InvalidState {
                    plugin: name.to_string(),
                    state: state.to_string(),
                    action: "disable".to_string(),
                })
            }
        }

        let instance = self
            .directory
            .instance(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        // Stop routing first so nothing new reaches the plugin while it winds down
        self.set_routable(name, false);
        match self
            .run_phase(name, LifecyclePhase::Disable, async move { instance.on_disable().await })
            .await
        {
            Ok(()) => {
                self.update(name, |d| {
                    d.state = PluginState::Disabled;
                    d.enabled = false;
                });
                tracing::info!(plugin = %name, "Plugin disabled");
                Ok(())
            }
            Err(err) => {
                self.set_routable(name, true);
                self.record_failure(name, &err);
                tracing::error!(plugin = %name, phase = LifecyclePhase::Disable.as_str(), error = %err, "Plugin kept enabled");
                Err(err)
            }
        }
    }

    fn set_routable(&self, name: &str, routable: bool) {
        self.registry.set_enabled(name, routable);
        self.bus.set_enabled(name, routable);
        self.directory.set_enabled(name, routable);
    }

    fn fail_load(&self, name: &str, err: &PluginError) {
        tracing::error!(plugin = %name, error = %err, "Plugin failed to load");
        self.record_failure(name, err);
        self.update(name, |d| {
            d.state = PluginState::Unloaded;
            d.loaded_at = None;
        });
    }

    /// Undo a load whose `on_load` succeeded but whose registrations did not
    async fn abort_load(&self, name: &str, instance: &Arc<dyn Plugin>, err: PluginError) {
        self.fail_load(name, &err);
        let unloading = Arc::clone(instance);
        if let Err(e) = self
            .run_phase(name, LifecyclePhase::Unload, async move { unloading.on_unload().await })
            .await
        {
            tracing::warn!(plugin = %name, error = %e, "on_unload failed after aborted load");
        }
    }

    /// Run one lifecycle call on its own task, bounded by the lifecycle timeout.
    ///
    /// On timeout the task is left running in the background; the call counts
    /// as failed. A panic inside the call surfaces as a lifecycle error.
    async fn run_phase<T, F>(&self, name: &str, phase: LifecyclePhase, call: F) -> PluginResult<T>
    where
        T: Send + 'static,
        F: Future<Output = PluginResult<T>> + Send + 'static,
    {
        let handle = tokio::spawn(call);
        match tokio::time::timeout(self.lifecycle_timeout, handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(PluginError::Lifecycle {
                plugin: name.to_string(),
                phase,
                message: e.to_string(),
            }),
            Ok(Err(join_err)) => Err(PluginError::Lifecycle {
                plugin: name.to_string(),
                phase,
                message: if join_err.is_panic() {
                    "panicked".to_string()
                } else {
                    "cancelled".to_string()
                },
            }),
            Err(_) => {
                tracing::warn!(plugin = %name, phase = %phase, timeout = ?self.lifecycle_timeout, "Lifecycle call timed out");
                Err(PluginError::Timeout {
                    plugin: name.to_string(),
                    phase,
                    timeout: self.lifecycle_timeout,
                })
            }
        }
    }

    // Persistence

    async fn initial_enabled(&self, descriptor: &PluginDescriptor) -> bool {
        if self.forced_disabled.contains(&descriptor.name) {
            return false;
        }
        let Some(store) = &self.store else {
            return descriptor.enabled;
        };
        match store.get(&enabled_flag_key(&descriptor.name)).await {
            Ok(Some(value)) => value == "true",
            Ok(None) => descriptor.enabled,
            Err(e) => {
                tracing::warn!(plugin = %descriptor.name, error = %e, "Failed to read enabled flag");
                descriptor.enabled
            }
        }
    }

    async fn persist_flag(&self, name: &str, enabled: bool) {
        if let Some(store) = &self.store {
            let value = if enabled { "true" } else { "false" };
            if let Err(e) = store.set(&enabled_flag_key(name), value).await {
                tracing::warn!(plugin = %name, error = %e, "Failed to persist enabled flag");
            }
        }
    }

    // Publication

    /// Publish the full command tree. Every later load, unload or reload
    /// republishes automatically.
    pub async fn publish_commands(&self) -> Result<usize, BotError> {
        let transport = self
            .transport
            .read()
            .ok()
            .and_then(|t| t.clone())
            .ok_or_else(|| BotError::Transport("no transport attached".to_string()))?;
        let count = self.registry.publish(transport.as_ref()).await?;
        self.published.store(true, Ordering::SeqCst);
        self.bus.spawn_emit(COMMANDS_PUBLISHED, serde_json::json!({ "commands": count }));
        Ok(count)
    }

    /// Apply queued schema extensions to the attached store
    pub async fn apply_schema(&self) -> PluginResult<()> {
        if let Some(store) = &self.store {
            let report = self.schema.apply_plugin_schema_extensions(store.as_ref()).await?;
            if !report.is_noop() {
                tracing::info!(
                    added = report.added.len(),
                    failed = report.failed.len(),
                    "Applied schema extensions"
                );
            }
        }
        Ok(())
    }

    async fn after_runtime_change(&self) {
        if !self.published.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.apply_schema().await {
            tracing::warn!(error = %e, "Schema extensions not applied");
        }
        if let Err(e) = self.publish_commands().await {
            tracing::warn!(error = %e, "Failed to republish command tree");
        }
    }
}

/// Undoes a load whose future was dropped before it finished
struct LoadRollback<'a> {
    loader: &'a PluginLoader,
    name: &'a str,
    armed: bool,
}

impl Drop for LoadRollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let loader = self.loader;
        let name = self.name;
        tracing::warn!(plugin = %name, "Load cancelled, rolling back");

        loader.registry.unregister(name);
        loader.bus.unsubscribe_plugin(name);
        if let Some(instance) = loader.directory.remove(name) {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = instance.on_unload().await {
                        tracing::warn!(error = %e, "on_unload failed after cancelled load");
                    }
                });
            }
        }
        let err = PluginError::Lifecycle {
            plugin: name.to_string(),
            phase: LifecyclePhase::Load,
            message: "cancelled".to_string(),
        };
        loader.record_failure(name, &err);
        loader.update(name, |d| {
            d.state = PluginState::Unloaded;
            d.loaded_at = None;
        });
    }
}

#[async_trait]
impl ReloadTarget for PluginLoader {
    async fn reload(&self, plugin: &str) -> PluginResult<()> {
        self.reload_plugin(plugin).await
    }
}
