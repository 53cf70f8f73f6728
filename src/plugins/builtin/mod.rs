//! Built-in plugins shipped with the kernel

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::application::errors::PluginResult;
use crate::application::messaging::parser::CustomId;
use crate::domain::entities::{
    CommandDescriptor, CommandOption, HandlerOutcome, InteractionEvent, InteractionResponse,
};
use crate::infrastructure::plugins::{PluginCatalog, PluginManifest};
use super::events::{COMMANDS_PUBLISHED, PLUGIN_LOADED, PLUGIN_UNLOADED};
use super::trait_def::{Plugin, PluginContext};

pub const DIAGNOSTICS: &str = "diagnostics";

/// Register every built-in plugin
pub fn register_builtins(catalog: &PluginCatalog) -> PluginResult<()> {
    catalog.register_builtin(DiagnosticsPlugin::manifest(), || {
        Arc::new(DiagnosticsPlugin::new()) as Arc<dyn Plugin>
    })
}

/// Counters fed by kernel lifecycle events
#[derive(Debug)]
pub struct DiagnosticsStats {
    started: Instant,
    loads: AtomicU64,
    unloads: AtomicU64,
    published: AtomicU64,
}

impl DiagnosticsStats {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            loads: AtomicU64::new(0),
            unloads: AtomicU64::new(0),
            published: AtomicU64::new(0),
        }
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn unloads(&self) -> u64 {
        self.unloads.load(Ordering::Relaxed)
    }

    /// Size of the last published command tree
    pub fn published_commands(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    fn summary(&self) -> String {
        format!(
            "up {}s, {} loads, {} unloads, {} commands published",
            self.started.elapsed().as_secs(),
            self.loads(),
            self.unloads(),
            self.published_commands()
        )
    }
}

/// `/ping` and a refresh button, backed by lifecycle event counters
pub struct DiagnosticsPlugin {
    stats: Arc<DiagnosticsStats>,
}

impl DiagnosticsPlugin {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(DiagnosticsStats::new()),
        }
    }

    pub fn manifest() -> PluginManifest {
        PluginManifest::new(DIAGNOSTICS, env!("CARGO_PKG_VERSION"))
            .with_description("Health check and kernel event counters")
    }

    fn status(&self) -> InteractionResponse {
        InteractionResponse::message(format!(
            "pong ({})\n[refresh: !{}]",
            self.stats.summary(),
            CustomId::new(DIAGNOSTICS, "refresh", "")
        ))
    }
}

impl Default for DiagnosticsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for DiagnosticsPlugin {
    async fn on_load(&self, ctx: &mut PluginContext) -> PluginResult<()> {
        ctx.register_command(
            CommandDescriptor::standalone("ping")
                .with_description("Check that the bot is alive")
                .with_option(CommandOption::new("echo", "Text to send back")),
        )?;

        let stats = Arc::clone(&self.stats);
        ctx.subscribe(PLUGIN_LOADED, move |_| {
            let stats = Arc::clone(&stats);
            async move {
                stats.loads.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        });

        let stats = Arc::clone(&self.stats);
        ctx.subscribe(PLUGIN_UNLOADED, move |_| {
            let stats = Arc::clone(&stats);
            async move {
                stats.unloads.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        });

        let stats = Arc::clone(&self.stats);
        ctx.subscribe(COMMANDS_PUBLISHED, move |payload| {
            let stats = Arc::clone(&stats);
            async move {
                let count = payload.get("commands").and_then(|c| c.as_u64()).unwrap_or(0);
                stats.published.store(count, Ordering::Relaxed);
                Ok(())
            }
        });

        ctx.provide_service("stats", Arc::clone(&self.stats));
        Ok(())
    }

    async fn handle_command(&self, interaction: &InteractionEvent) -> PluginResult<HandlerOutcome> {
        if let Some(text) = interaction.option("echo") {
            return Ok(HandlerOutcome::Handled(InteractionResponse::message(text)));
        }
        Ok(HandlerOutcome::Handled(self.status()))
    }

    async fn handle_component(
        &self,
        _interaction: &InteractionEvent,
        custom_id: &CustomId,
    ) -> PluginResult<HandlerOutcome> {
        match custom_id.action.as_str() {
            "refresh" => Ok(HandlerOutcome::Handled(self.status())),
            _ => Ok(HandlerOutcome::Unhandled),
        }
    }
}
