//! carik-kernel - plugin runtime for carik-bot
//!
//! Discovers and supervises plugins, merges their commands into one tree,
//! routes interactions to the owning plugin and hot-reloads plugins when their
//! sources change.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;

pub use application::errors::{BotError, PluginError, PluginResult};
pub use plugins::{Kernel, Plugin, PluginContext, PluginLoader};
