//! Plugin runtime for carik-bot
//! 
//! Loads compiled-in plugins in dependency order, supervises their lifecycle,
//! broadcasts events to them and hot-reloads them when their sources change.

pub mod builtin;
pub mod dependency;
pub mod events;
pub mod loader;
pub mod runtime;
pub mod schema;
pub mod trait_def;
pub mod watcher;

pub use builtin::{register_builtins, DiagnosticsPlugin};
pub use dependency::{resolve_load_order, LoadPlan};
pub use events::{DeliveryReport, EventBus, HookFailure, COMMANDS_PUBLISHED, PLUGIN_LOADED, PLUGIN_UNLOADED};
pub use loader::{enabled_flag_key, LoadReport, PluginLoader, DEFAULT_LIFECYCLE_TIMEOUT};
pub use runtime::Kernel;
pub use schema::{SchemaExtensionManager, SchemaReport};
pub use trait_def::{Plugin, PluginContext, PluginDirectory, PluginFactory};
pub use watcher::{ChangeKind, HotReloadWatcher, ReloadTarget, WatchEvent, DEFAULT_DEBOUNCE};

pub use crate::application::messaging::parser::CustomId;
