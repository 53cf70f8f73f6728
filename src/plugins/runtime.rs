//! Kernel runtime - wires loader, registry, router and watcher together

use std::sync::Arc;

use crate::application::errors::{BotError, PluginResult};
use crate::application::messaging::{InteractionHandler, InteractionRouter};
use crate::application::services::{CommandRegistry, CoreCommands};
use crate::domain::traits::{CommandTransport, Store};
use crate::infrastructure::config::Config;
use crate::infrastructure::plugins::{PluginCatalog, PluginDiscovery};
use super::events::EventBus;
use super::loader::{LoadReport, PluginLoader};
use super::schema::SchemaExtensionManager;
use super::watcher::{HotReloadWatcher, ReloadTarget};

/// A configured plugin runtime
///
/// `boot` runs the startup sequence: load every plugin, publish the command
/// tree, apply schema extensions, then start watching plugin directories.
pub struct Kernel {
    config: Config,
    loader: Arc<PluginLoader>,
    core: Arc<CoreCommands>,
    router: Arc<InteractionRouter>,
    watcher: Option<HotReloadWatcher>,
}

impl Kernel {
    pub fn new(config: Config, catalog: Arc<PluginCatalog>, store: Option<Arc<dyn Store>>) -> PluginResult<Self> {
        let registry = Arc::new(CommandRegistry::new());
        let bus = Arc::new(EventBus::default());
        let schema = Arc::new(SchemaExtensionManager::new());

        let mut loader = PluginLoader::new(catalog, registry, bus, schema)
            .with_discovery(PluginDiscovery::new(config.plugins.directories.clone()))
            .with_lifecycle_timeout(config.plugins.lifecycle_timeout())
            .with_forced_disabled(config.plugins.disabled.iter().cloned());
        if let Some(store) = store {
            loader = loader.with_store(store);
        }
        let loader = Arc::new(loader);

        let core = Arc::new(
            CoreCommands::new(Arc::clone(&loader))
                .with_admins(config.bot.admins.iter().cloned())
                .with_reply_within(config.routing.handler_timeout() / 2),
        );
        core.register_commands()?;

        let router = Arc::new(Self::build_router(&config, &loader, &core, None));
        Ok(Self {
            config,
            loader,
            core,
            router,
            watcher: None,
        })
    }

    fn build_router(
        config: &Config,
        loader: &Arc<PluginLoader>,
        core: &Arc<CoreCommands>,
        legacy: Option<Arc<dyn InteractionHandler>>,
    ) -> InteractionRouter {
        let mut router = InteractionRouter::new(Arc::clone(loader.registry()), loader.directory().clone())
            .with_core_handler(Arc::clone(core) as Arc<dyn InteractionHandler>)
            .with_handler_timeout(config.routing.handler_timeout());
        if let Some(legacy) = legacy {
            router = router.with_legacy_handler(legacy);
        }
        router
    }

    /// Route unhandled interactions through `handler` before the fallback reply
    pub fn with_legacy_handler(mut self, handler: Arc<dyn InteractionHandler>) -> Self {
        self.router = Arc::new(Self::build_router(&self.config, &self.loader, &self.core, Some(handler)));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn loader(&self) -> &Arc<PluginLoader> {
        &self.loader
    }

    pub fn router(&self) -> &Arc<InteractionRouter> {
        &self.router
    }

    pub fn watcher(&self) -> Option<&HotReloadWatcher> {
        self.watcher.as_ref()
    }

    /// Run the startup sequence against `transport`
    pub async fn boot(&mut self, transport: Arc<dyn CommandTransport>) -> Result<LoadReport, BotError> {
        let report = self.loader.load_all_plugins().await;
        for (name, error) in &report.failed {
            tracing::warn!(plugin = %name, error = %error, "Excluded at startup");
        }
        for (name, error) in &report.degraded {
            tracing::warn!(plugin = %name, error = %error, "Loaded but left disabled");
        }

        self.loader.set_transport(transport);
        self.loader.publish_commands().await?;
        self.loader.apply_schema().await?;

        if self.config.plugins.hot_reload {
            let target = Arc::clone(&self.loader) as Arc<dyn ReloadTarget>;
            let watcher = HotReloadWatcher::start(target, self.loader.watch_targets(), self.config.plugins.debounce());
            tracing::info!(watched = watcher.watched().len(), active = watcher.is_active(), "Hot reload started");
            self.watcher = Some(watcher);
        }
        Ok(report)
    }

    /// Stop watching, then unload every plugin
    pub async fn shutdown(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }
        self.loader.shutdown().await;
        tracing::info!("Kernel stopped");
    }
}
