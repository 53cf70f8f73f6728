//! End-to-end behaviour of the plugin runtime through the public API

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use carik_kernel::application::errors::{PluginError, PluginResult};
use carik_kernel::application::messaging::HandledBy;
use carik_kernel::application::services::CommandRegistry;
use carik_kernel::domain::entities::{
    ColumnDefault, ColumnDefinition, ColumnType, CommandDescriptor, HandlerOutcome,
    InteractionEvent, InteractionResponse, PluginState,
};
use carik_kernel::domain::traits::{CommandTransport, Store};
use carik_kernel::infrastructure::adapters::ConsoleTransport;
use carik_kernel::infrastructure::config::Config;
use carik_kernel::infrastructure::database::Database;
use carik_kernel::infrastructure::plugins::{PluginCatalog, PluginManifest};
use carik_kernel::plugins::{
    ChangeKind, EventBus, HotReloadWatcher, Kernel, Plugin, PluginContext, PluginLoader,
    ReloadTarget, SchemaExtensionManager, WatchEvent,
};

/// Plugin whose behaviour is set up per test
#[derive(Default)]
struct Scripted {
    fail_load: bool,
    commands: Vec<CommandDescriptor>,
    columns: Vec<(&'static str, ColumnDefinition)>,
    hook: Option<(&'static str, bool)>,
    loads: Arc<AtomicUsize>,
    deliveries: Arc<AtomicUsize>,
}

#[async_trait]
impl Plugin for Scripted {
    async fn on_load(&self, ctx: &mut PluginContext) -> PluginResult<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(PluginError::handler("boom"));
        }
        for command in &self.commands {
            ctx.register_command(command.clone())?;
        }
        for (table, column) in &self.columns {
            ctx.declare_schema_extension(*table, vec![column.clone()]);
        }
        if let Some((event, fail)) = self.hook {
            let deliveries = Arc::clone(&self.deliveries);
            ctx.subscribe(event, move |_| {
                let deliveries = Arc::clone(&deliveries);
                async move {
                    if fail {
                        return Err(PluginError::handler("hook failed"));
                    }
                    deliveries.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        Ok(())
    }

    async fn handle_command(&self, interaction: &InteractionEvent) -> PluginResult<HandlerOutcome> {
        Ok(HandlerOutcome::Handled(InteractionResponse::message(format!(
            "handled {}",
            interaction.command_path()
        ))))
    }
}

fn add(catalog: &PluginCatalog, manifest: PluginManifest, plugin: Scripted) {
    let plugin: Arc<dyn Plugin> = Arc::new(plugin);
    catalog
        .register_builtin(manifest, move || Arc::clone(&plugin))
        .unwrap();
}

fn loader(catalog: Arc<PluginCatalog>) -> PluginLoader {
    PluginLoader::new(
        catalog,
        Arc::new(CommandRegistry::new()),
        Arc::new(EventBus::default()),
        Arc::new(SchemaExtensionManager::new()),
    )
}

#[tokio::test]
async fn failed_dependency_blocks_only_its_dependents() {
    let catalog = Arc::new(PluginCatalog::new());
    let c_loads = Arc::new(AtomicUsize::new(0));
    add(&catalog, PluginManifest::new("a", "1.0.0"), Scripted::default());
    add(
        &catalog,
        PluginManifest::new("b", "1.0.0"),
        Scripted {
            fail_load: true,
            ..Default::default()
        },
    );
    add(
        &catalog,
        PluginManifest::new("c", "1.0.0").with_dependencies(&["b"]),
        Scripted {
            loads: c_loads.clone(),
            ..Default::default()
        },
    );

    let loader = loader(catalog);
    let report = loader.load_all_plugins().await;

    assert_eq!(report.loaded, vec!["a".to_string()]);
    assert!(report.failure_of("b").is_some());
    assert!(report.failure_of("c").unwrap().contains("requires 'b'"));
    assert_eq!(c_loads.load(Ordering::SeqCst), 0);
    assert_eq!(loader.state("a"), Some(PluginState::Enabled));
    assert_eq!(loader.state("c"), Some(PluginState::Unloaded));
}

#[tokio::test]
async fn groups_merge_into_one_published_tree() {
    let catalog = Arc::new(PluginCatalog::new());
    add(
        &catalog,
        PluginManifest::new("x", "1.0.0"),
        Scripted {
            commands: vec![CommandDescriptor::standalone("weather")],
            ..Default::default()
        },
    );
    add(
        &catalog,
        PluginManifest::new("y", "1.0.0"),
        Scripted {
            commands: vec![CommandDescriptor::group("network", "insights")],
            ..Default::default()
        },
    );
    add(
        &catalog,
        PluginManifest::new("z", "1.0.0"),
        Scripted {
            commands: vec![CommandDescriptor::group("network", "devicetrigger")],
            ..Default::default()
        },
    );

    let loader = loader(catalog.clone());
    loader.load_all_plugins().await;
    let transport = Arc::new(ConsoleTransport::silent());
    loader.set_transport(transport.clone() as Arc<dyn CommandTransport>);
    assert_eq!(loader.publish_commands().await.unwrap(), 2);

    let tree = transport.published();
    let names: Vec<&str> = tree.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["weather", "network"]);
    assert_eq!(tree[1].group_names(), vec!["insights", "devicetrigger"]);

    // A second owner for the same group is refused when it loads
    add(
        &catalog,
        PluginManifest::new("w", "1.0.0"),
        Scripted {
            commands: vec![CommandDescriptor::group("network", "insights")],
            ..Default::default()
        },
    );
    let err = loader.load_plugin("w").await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(loader.state("w"), Some(PluginState::Unloaded));
    assert_eq!(transport.published()[1].group_names(), vec!["insights", "devicetrigger"]);
}

#[tokio::test]
async fn schema_extension_applies_once_and_rejects_conflicts() {
    let db = Arc::new(Database::in_memory().unwrap());
    let catalog = Arc::new(PluginCatalog::new());
    add(
        &catalog,
        PluginManifest::new("p", "1.0.0"),
        Scripted {
            columns: vec![(
                "devices",
                ColumnDefinition::new("shutdown_api_key", ColumnType::Text)
                    .with_default(ColumnDefault::Null),
            )],
            ..Default::default()
        },
    );

    let loader = loader(catalog.clone()).with_store(db.clone());
    loader.load_all_plugins().await;
    loader.apply_schema().await.unwrap();

    let count = |cols: Vec<String>| cols.iter().filter(|c| *c == "shutdown_api_key").count();
    assert_eq!(count(db.columns("devices").unwrap()), 1);
    assert_eq!(
        db.get("schema.devices.shutdown_api_key").await.unwrap(),
        Some("p".to_string())
    );

    loader.reload_plugin("p").await.unwrap();
    loader.apply_schema().await.unwrap();
    assert_eq!(count(db.columns("devices").unwrap()), 1);

    add(
        &catalog,
        PluginManifest::new("q", "1.0.0"),
        Scripted {
            columns: vec![(
                "devices",
                ColumnDefinition::new("shutdown_api_key", ColumnType::Integer),
            )],
            ..Default::default()
        },
    );
    let err = loader.load_plugin("q").await.unwrap_err();
    assert!(err.is_conflict());
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ReloadTarget for Recorder {
    async fn reload(&self, plugin: &str) -> PluginResult<()> {
        self.calls.lock().unwrap().push(plugin.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn two_edits_within_window_reload_once() {
    let dir = tempfile::tempdir().unwrap();
    let plugin_dir = dir.path().join("weather");
    std::fs::create_dir(&plugin_dir).unwrap();
    let commands = plugin_dir.join("commands.rs");
    std::fs::write(&commands, "v1").unwrap();

    let recorder = Arc::new(Recorder::default());
    let watcher = HotReloadWatcher::start(
        recorder.clone(),
        vec![("weather".to_string(), plugin_dir.clone())],
        Duration::from_millis(300),
    );
    if !watcher.is_active() {
        // No platform notifications here; the debounce itself is covered below
        watcher.stop().await;
        return;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(&commands, "v2").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&commands, "v3").unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(recorder.calls.lock().unwrap().clone(), vec!["weather".to_string()]);
    watcher.stop().await;
}

#[tokio::test]
async fn queued_change_events_debounce_per_plugin() {
    let recorder = Arc::new(Recorder::default());
    let watcher = HotReloadWatcher::start(recorder.clone(), Vec::new(), Duration::from_millis(300));
    let tx = watcher.sender();

    tx.send(WatchEvent::new("weather", ChangeKind::Modified)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    tx.send(WatchEvent::new("weather", ChangeKind::Modified)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(900)).await;

    assert_eq!(recorder.calls.lock().unwrap().len(), 1);
    watcher.stop().await;
}

#[tokio::test]
async fn failing_hook_does_not_stop_delivery() {
    let catalog = Arc::new(PluginCatalog::new());
    let delivered = Arc::new(AtomicUsize::new(0));
    for (name, fail) in [("h1", false), ("h2", true), ("h3", false)] {
        add(
            &catalog,
            PluginManifest::new(name, "1.0.0"),
            Scripted {
                hook: Some(("networkScan", fail)),
                deliveries: delivered.clone(),
                ..Default::default()
            },
        );
    }

    let loader = loader(catalog);
    loader.load_all_plugins().await;
    let report = loader
        .bus()
        .emit_to_plugins("networkScan", serde_json::json!({ "devices": 3 }))
        .await;

    assert_eq!(delivered.load(Ordering::SeqCst), 2);
    assert_eq!(report.delivered.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].plugin, "h2");
}

#[tokio::test]
async fn kernel_routes_and_falls_back() {
    let catalog = Arc::new(PluginCatalog::new());
    add(
        &catalog,
        PluginManifest::new("x", "1.0.0"),
        Scripted {
            commands: vec![CommandDescriptor::standalone("weather")],
            ..Default::default()
        },
    );

    let mut config = Config::default();
    config.plugins.directories = Vec::new();
    config.plugins.hot_reload = false;
    let mut kernel = Kernel::new(config, catalog, None).unwrap();
    let transport = Arc::new(ConsoleTransport::silent());
    kernel
        .boot(transport.clone() as Arc<dyn CommandTransport>)
        .await
        .unwrap();

    let published: Vec<String> = transport.published().into_iter().map(|c| c.name).collect();
    assert_eq!(published, vec!["help", "plugin", "weather"]);

    let router = kernel.router().clone();
    let routed = router.route(&InteractionEvent::command("weather", "u1")).await;
    assert_eq!(routed.handled_by, HandledBy::Plugin("x".to_string()));

    let miss = router.route(&InteractionEvent::command("nothing", "u1")).await;
    assert_eq!(miss.handled_by, HandledBy::Fallback);

    let help = router.route(&InteractionEvent::command("help", "u1")).await;
    assert_eq!(help.handled_by, HandledBy::Core);

    kernel.loader().disable_plugin("x").await.unwrap();
    let disabled = router.route(&InteractionEvent::command("weather", "u1")).await;
    assert_eq!(disabled.handled_by, HandledBy::Fallback);
    assert_eq!(kernel.loader().registry().commands_of("x").len(), 1);

    kernel.loader().enable_plugin("x").await.unwrap();
    let enabled = router.route(&InteractionEvent::command("weather", "u1")).await;
    assert_eq!(enabled.handled_by, HandledBy::Plugin("x".to_string()));

    kernel.shutdown().await;
}
