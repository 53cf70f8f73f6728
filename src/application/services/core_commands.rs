//! Core commands - `/help` and `/plugin` management, always available

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::application::errors::{BotError, PluginResult};
use crate::application::messaging::parser::{CustomId, CORE_NAMESPACE};
use crate::application::messaging::router::InteractionHandler;
use crate::domain::entities::{
    AutocompleteChoice, CommandDescriptor, CommandOption, HandlerOutcome, InteractionEvent,
    InteractionKind, InteractionResponse, PluginDescriptor, Subcommand,
};
use crate::plugins::PluginLoader;

/// Max suggestions returned for a plugin name
const MAX_CHOICES: usize = 25;

/// How long `/plugin enable|disable|reload` waits before replying "in progress"
pub const DEFAULT_REPLY_WITHIN: Duration = Duration::from_millis(1_500);

/// Handler for commands owned by the kernel itself
pub struct CoreCommands {
    loader: Arc<PluginLoader>,
    /// Users allowed to change plugin state; empty means everyone
    admins: HashSet<String>,
    reply_within: Duration,
}

impl CoreCommands {
    pub fn new(loader: Arc<PluginLoader>) -> Self {
        Self {
            loader,
            admins: HashSet::new(),
            reply_within: DEFAULT_REPLY_WITHIN,
        }
    }

    pub fn with_admins(mut self, admins: impl IntoIterator<Item = String>) -> Self {
        self.admins = admins.into_iter().collect();
        self
    }

    /// Bound on waiting for a lifecycle change before answering; keep it
    /// below the router's handler timeout
    pub fn with_reply_within(mut self, wait: Duration) -> Self {
        self.reply_within = wait;
        self
    }

    /// Command descriptors for the core tree
    pub fn descriptors() -> Vec<CommandDescriptor> {
        let name_option = || CommandOption::new("name", "Plugin name").required().with_autocomplete();
        vec![
            CommandDescriptor::standalone("help").with_description("Show available commands"),
            CommandDescriptor::standalone("plugin")
                .with_description("Manage plugins")
                .with_subcommand(Subcommand::new("list", "List plugins and their state"))
                .with_subcommand(Subcommand::new("enable", "Enable a plugin").with_option(name_option()))
                .with_subcommand(Subcommand::new("disable", "Disable a plugin").with_option(name_option()))
                .with_subcommand(Subcommand::new("reload", "Reload a plugin").with_option(name_option())),
        ]
    }

    /// Register the core commands with the loader's registry
    pub fn register_commands(&self) -> PluginResult<()> {
        for command in Self::descriptors() {
            self.loader.registry().register_core(command)?;
        }
        Ok(())
    }

    fn is_admin(&self, user_id: &str) -> bool {
        self.admins.is_empty() || self.admins.contains(user_id)
    }

    fn help(&self) -> InteractionResponse {
        let mut help = "Available commands:\n".to_string();
        for cmd in self.loader.registry().compose_tree() {
            help.push_str(&format!("  /{} - {}\n", cmd.name, cmd.description));
            for group in &cmd.groups {
                help.push_str(&format!("    {} - {}\n", group.name, group.description));
            }
        }
        InteractionResponse::ephemeral(help.trim_end())
    }

    fn list(&self) -> InteractionResponse {
        let descriptors = self.loader.descriptors();
        if descriptors.is_empty() {
            return InteractionResponse::ephemeral("No plugins installed");
        }
        let lines: Vec<String> = descriptors.iter().map(describe).collect();
        InteractionResponse::ephemeral(format!("Plugins:\n{}", lines.join("\n")))
    }

    async fn manage(&self, action: &str, name: &str, user_id: &str) -> InteractionResponse {
        if !self.is_admin(user_id) {
            tracing::warn!(user = %user_id, action, plugin = %name, "Plugin command denied");
            return InteractionResponse::ephemeral("You are not allowed to manage plugins");
        }

        // Run detached so an expired handler timeout cannot cut a lifecycle change in half
        let loader = Arc::clone(&self.loader);
        let plugin = name.to_string();
        let op = action.to_string();
        let mut task = tokio::spawn(async move {
            let result = match op.as_str() {
                "enable" => loader.enable_plugin(&plugin).await,
                "disable" => loader.disable_plugin(&plugin).await,
                _ => loader.reload_plugin(&plugin).await,
            };
            match &result {
                Ok(()) => tracing::info!(plugin = %plugin, action = %op, "Plugin command finished"),
                Err(e) => tracing::warn!(plugin = %plugin, action = %op, error = %e, "Plugin command failed"),
            }
            result
        });

        let joined = match tokio::time::timeout(self.reply_within, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                return InteractionResponse::ephemeral(format!(
                    "Still working on {} {}; check /plugin list for the result",
                    action, name
                ));
            }
        };

        match joined {
            Ok(Ok(())) => {
                let state = self
                    .loader
                    .state(name)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                InteractionResponse::ephemeral(format!("Plugin {} is now {}", name, state))
            }
            Ok(Err(e)) => InteractionResponse::ephemeral(format!("Could not {} {}: {}", action, name, e)),
            Err(e) => {
                tracing::error!(plugin = %name, action, error = %e, "Plugin command task failed");
                InteractionResponse::ephemeral(format!("Could not {} {}", action, name))
            }
        }
    }

    async fn plugin_command(&self, interaction: &InteractionEvent) -> Result<HandlerOutcome, BotError> {
        let sub = interaction.subcommand_name.as_deref().unwrap_or("list");
        let response = match sub {
            "list" => self.list(),
            "enable" | "disable" | "reload" => {
                let Some(name) = interaction.option("name") else {
                    return Ok(HandlerOutcome::Handled(InteractionResponse::ephemeral(format!(
                        "Usage: /plugin {} name=<plugin>",
                        sub
                    ))));
                };
                self.manage(sub, name, &interaction.user_id).await
            }
            other => InteractionResponse::ephemeral(format!("Unknown subcommand: {}", other)),
        };
        Ok(HandlerOutcome::Handled(response))
    }

    /// `core:<action>:<payload>` components, e.g. buttons on the plugin list
    async fn component(&self, interaction: &InteractionEvent, id: &CustomId) -> HandlerOutcome {
        let response = match id.action.as_str() {
            "help" => self.help(),
            "plugins" => self.list(),
            "enable" | "disable" | "reload" if !id.payload.is_empty() => {
                self.manage(&id.action, &id.payload, &interaction.user_id).await
            }
            _ => return HandlerOutcome::Unhandled,
        };
        HandlerOutcome::Handled(response)
    }
}

#[async_trait]
impl InteractionHandler for CoreCommands {
    async fn handle(&self, interaction: &InteractionEvent) -> Result<HandlerOutcome, BotError> {
        match interaction.kind {
            InteractionKind::Command => match interaction.command_name.as_deref() {
                Some("help") => Ok(HandlerOutcome::Handled(self.help())),
                Some("plugin") => self.plugin_command(interaction).await,
                _ => Ok(HandlerOutcome::Unhandled),
            },
            InteractionKind::Component => {
                let id = interaction.custom_id.as_deref().and_then(CustomId::parse);
                match id {
                    Some(id) if id.plugin == CORE_NAMESPACE => Ok(self.component(interaction, &id).await),
                    _ => Ok(HandlerOutcome::Unhandled),
                }
            }
            InteractionKind::Autocomplete => Ok(HandlerOutcome::Unhandled),
        }
    }

    async fn autocomplete(&self, interaction: &InteractionEvent) -> Result<Vec<AutocompleteChoice>, BotError> {
        if interaction.command_name.as_deref() != Some("plugin") {
            return Ok(Vec::new());
        }
        let partial = interaction.focused_value().unwrap_or("").to_lowercase();
        Ok(self
            .loader
            .descriptors()
            .into_iter()
            .filter(|d| d.name.starts_with(&partial))
            .take(MAX_CHOICES)
            .map(|d| AutocompleteChoice::new(d.name.clone(), d.name))
            .collect())
    }
}

fn describe(d: &PluginDescriptor) -> String {
    let mut line = format!("  {} v{} - {}", d.name, d.version, d.state);
    if let Some(err) = &d.last_error {
        line.push_str(&format!(" ({})", err));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::CommandRegistry;
    use crate::domain::entities::PluginState;
    use crate::infrastructure::plugins::{PluginCatalog, PluginManifest};
    use crate::plugins::{EventBus, Plugin, PluginContext, SchemaExtensionManager};

    struct Quiet;

    #[async_trait]
    impl Plugin for Quiet {
        async fn on_load(&self, _ctx: &mut PluginContext) -> PluginResult<()> {
            Ok(())
        }
    }

    /// Takes a while to load after the first time
    struct SlowReload {
        loads: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for SlowReload {
        async fn on_load(&self, _ctx: &mut PluginContext) -> PluginResult<()> {
            if self.loads.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(400)).await;
            }
            Ok(())
        }
    }

    async fn setup() -> (Arc<PluginLoader>, CoreCommands) {
        let catalog = Arc::new(PluginCatalog::new());
        catalog
            .register_builtin(PluginManifest::new("weather", "1.2.0"), || Arc::new(Quiet) as Arc<dyn Plugin>)
            .unwrap();
        let loader = Arc::new(PluginLoader::new(
            catalog,
            Arc::new(CommandRegistry::new()),
            Arc::new(EventBus::default()),
            Arc::new(SchemaExtensionManager::new()),
        ));
        loader.load_all_plugins().await;
        let core = CoreCommands::new(loader.clone());
        core.register_commands().unwrap();
        (loader, core)
    }

    fn content(outcome: HandlerOutcome) -> String {
        match outcome {
            HandlerOutcome::Handled(r) => r.content().unwrap_or_default().to_string(),
            HandlerOutcome::Unhandled => panic!("unhandled"),
        }
    }

    #[tokio::test]
    async fn test_help_lists_core_commands() {
        let (_, core) = setup().await;
        let text = content(core.handle(&InteractionEvent::command("help", "u1")).await.unwrap());
        assert!(text.contains("/help"));
        assert!(text.contains("/plugin - Manage plugins"));
    }

    #[tokio::test]
    async fn test_plugin_list_and_disable() {
        let (loader, core) = setup().await;
        let text = content(
            core.handle(&InteractionEvent::command("plugin", "u1").with_subcommand("list"))
                .await
                .unwrap(),
        );
        assert!(text.contains("weather v1.2.0 - enabled"));

        let ev = InteractionEvent::command("plugin", "u1")
            .with_subcommand("disable")
            .with_option("name", "weather");
        let text = content(core.handle(&ev).await.unwrap());
        assert_eq!(text, "Plugin weather is now disabled");
        assert_eq!(loader.state("weather"), Some(PluginState::Disabled));
    }

    #[tokio::test]
    async fn test_non_admin_cannot_manage() {
        let (loader, core) = setup().await;
        let core = CoreCommands {
            admins: HashSet::from(["root".to_string()]),
            ..core
        };
        let ev = InteractionEvent::command("plugin", "u1")
            .with_subcommand("disable")
            .with_option("name", "weather");
        let text = content(core.handle(&ev).await.unwrap());
        assert!(text.contains("not allowed"));
        assert_eq!(loader.state("weather"), Some(PluginState::Enabled));
    }

    #[tokio::test]
    async fn test_plugin_name_autocomplete() {
        let (_, core) = setup().await;
        let ev = InteractionEvent::autocomplete("plugin", "u1", "name", "we").with_subcommand("reload");
        let choices = core.autocomplete(&ev).await.unwrap();
        assert_eq!(choices, vec![AutocompleteChoice::new("weather", "weather")]);
    }

    #[tokio::test]
    async fn test_core_component() {
        let (_, core) = setup().await;
        let text = content(
            core.handle(&InteractionEvent::component("core:plugins:", "u1"))
                .await
                .unwrap(),
        );
        assert!(text.starts_with("Plugins:"));

        let outcome = core
            .handle(&InteractionEvent::component("core:unknown:x", "u1"))
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Unhandled);
    }

    #[tokio::test]
    async fn test_slow_reload_replies_before_finishing() {
        let catalog = Arc::new(PluginCatalog::new());
        let loads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        catalog
            .register_builtin(PluginManifest::new("slow", "1.0.0"), move || {
                Arc::new(SlowReload { loads: loads.clone() }) as Arc<dyn Plugin>
            })
            .unwrap();
        let loader = Arc::new(PluginLoader::new(
            catalog,
            Arc::new(CommandRegistry::new()),
            Arc::new(EventBus::default()),
            Arc::new(SchemaExtensionManager::new()),
        ));
        loader.load_all_plugins().await;
        let core = CoreCommands::new(loader.clone()).with_reply_within(Duration::from_millis(50));

        let ev = InteractionEvent::command("plugin", "u1")
            .with_subcommand("reload")
            .with_option("name", "slow");
        let text = content(core.handle(&ev).await.unwrap());
        assert!(text.starts_with("Still working on reload slow"));

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(loader.state("slow"), Some(PluginState::Enabled));
    }
}
