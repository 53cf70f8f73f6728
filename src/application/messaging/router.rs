//! Interaction router - dispatches interactions to their owning plugin
//!
//! Every interaction gets exactly one response. When no owner resolves, or the
//! owner declines, the router walks a fixed chain:
//! plugin handler, legacy bridge, then a "temporarily unavailable" reply.

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::application::errors::BotError;
use crate::application::services::{CommandRegistry, CommandResolution, RouteTarget};
use crate::domain::entities::{
    AutocompleteChoice, CommandOwner, HandlerOutcome, InteractionEvent, InteractionKind,
    InteractionResponse,
};
use crate::domain::traits::CommandTransport;
use crate::plugins::PluginDirectory;
use super::parser::CustomId;

/// Final reply when nothing handled an interaction
pub const UNAVAILABLE_MESSAGE: &str = "This feature is temporarily unavailable. Please try again later.";

/// Default bound on a single handler call
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(3);

/// Non-plugin handler: the core's own commands, or a legacy bridge
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn handle(&self, interaction: &InteractionEvent) -> Result<HandlerOutcome, BotError>;

    async fn autocomplete(
        &self,
        _interaction: &InteractionEvent,
    ) -> Result<Vec<AutocompleteChoice>, BotError> {
        Ok(Vec::new())
    }
}

/// Who produced the response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandledBy {
    Plugin(String),
    Core,
    Legacy,
    /// Nothing handled it; the fallback reply (or empty suggestions) was sent
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedResponse {
    pub response: InteractionResponse,
    pub handled_by: HandledBy,
}

impl RoutedResponse {
    fn new(response: InteractionResponse, handled_by: HandledBy) -> Self {
        Self {
            response,
            handled_by,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.handled_by == HandledBy::Fallback
    }
}

/// Routes interactions against the current command snapshot
pub struct InteractionRouter {
    registry: Arc<CommandRegistry>,
    plugins: PluginDirectory,
    core: Option<Arc<dyn InteractionHandler>>,
    legacy: Option<Arc<dyn InteractionHandler>>,
    handler_timeout: Duration,
}

impl InteractionRouter {
    pub fn new(registry: Arc<CommandRegistry>, plugins: PluginDirectory) -> Self {
        Self {
            registry,
            plugins,
            core: None,
            legacy: None,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Handler for core-owned commands and `core:` components
    pub fn with_core_handler(mut self, handler: Arc<dyn InteractionHandler>) -> Self {
        self.core = Some(handler);
        self
    }

    /// Handler tried after the owning plugin declines or none resolves
    pub fn with_legacy_handler(mut self, handler: Arc<dyn InteractionHandler>) -> Self {
        self.legacy = Some(handler);
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Resolve and run the handler for one interaction. Never fails.
    pub async fn route(&self, interaction: &InteractionEvent) -> RoutedResponse {
        match interaction.kind {
            InteractionKind::Command => self.route_command(interaction).await,
            InteractionKind::Autocomplete => self.route_autocomplete(interaction).await,
            InteractionKind::Component => self.route_component(interaction).await,
        }
    }

    /// Route, then send the response through `transport`
    pub async fn dispatch(
        &self,
        interaction: &InteractionEvent,
        transport: &dyn CommandTransport,
    ) -> Result<RoutedResponse, BotError> {
        let routed = self.route(interaction).await;
        transport.respond(interaction, &routed.response).await?;
        Ok(routed)
    }

    async fn route_command(&self, interaction: &InteractionEvent) -> RoutedResponse {
        let target = self.resolve(interaction);

        if let Some(target) = &target {
            match &target.owner {
                CommandOwner::Core => {
                    if let Some(routed) = self.try_handler(self.core.as_ref(), HandledBy::Core, interaction).await {
                        return routed;
                    }
                }
                CommandOwner::Plugin(name) => {
                    if let Some(plugin) = self.plugins.get(name) {
                        let outcome = self
                            .guarded(name, plugin.handle_command(interaction))
                            .await;
                        if let Some(HandlerOutcome::Handled(response)) = outcome {
                            return RoutedResponse::new(response, HandledBy::Plugin(name.clone()));
                        }
                    }
                }
            }
        }

        self.fallback(interaction).await
    }

    async fn route_autocomplete(&self, interaction: &InteractionEvent) -> RoutedResponse {
        let empty = || RoutedResponse::new(InteractionResponse::choices(Vec::new()), HandledBy::Fallback);

        let Some(target) = self.resolve(interaction) else {
            return empty();
        };
        if !target.autocomplete {
            return empty();
        }

        match &target.owner {
            CommandOwner::Core => {
                let Some(core) = &self.core else {
                    return empty();
                };
                match self.guarded("core", core.autocomplete(interaction)).await {
                    Some(choices) => RoutedResponse::new(InteractionResponse::choices(choices), HandledBy::Core),
                    None => empty(),
                }
            }
            CommandOwner::Plugin(name) => {
                let Some(plugin) = self.plugins.get(name) else {
                    return empty();
                };
                match self.guarded(name, plugin.handle_autocomplete(interaction)).await {
                    Some(choices) => RoutedResponse::new(
                        InteractionResponse::choices(choices),
                        HandledBy::Plugin(name.clone()),
                    ),
                    None => empty(),
                }
            }
        }
    }

    async fn route_component(&self, interaction: &InteractionEvent) -> RoutedResponse {
        let custom_id = interaction.custom_id.as_deref().and_then(CustomId::parse);

        match &custom_id {
            Some(id) if id.is_core() => {
                if let Some(routed) = self.try_handler(self.core.as_ref(), HandledBy::Core, interaction).await {
                    return routed;
                }
            }
            Some(id) => match self.plugins.get(&id.plugin) {
                Some(plugin) => {
                    let outcome = self
                        .guarded(&id.plugin, plugin.handle_component(interaction, id))
                        .await;
                    if let Some(HandlerOutcome::Handled(response)) = outcome {
                        return RoutedResponse::new(response, HandledBy::Plugin(id.plugin.clone()));
                    }
                }
                None => {
                    tracing::debug!(plugin = %id.plugin, custom_id = %id, "Component owner not available");
                }
            },
            None => {
                tracing::debug!(custom_id = ?interaction.custom_id, "Component without namespace");
            }
        }

        self.fallback(interaction).await
    }

    /// Owning target from the current snapshot, or `None` on a routing miss
    fn resolve(&self, interaction: &InteractionEvent) -> Option<RouteTarget> {
        let snapshot = self.registry.snapshot();
        let name = interaction.command_name.as_deref()?;
        match snapshot.resolve(name, interaction.group_name.as_deref()) {
            CommandResolution::Found(target) => Some(target),
            CommandResolution::UnknownGroup { parent, group } => {
                tracing::debug!(
                    command = %parent,
                    group = ?group,
                    version = snapshot.version(),
                    "Routing miss: no owner for group"
                );
                None
            }
            CommandResolution::NotFound => {
                tracing::debug!(command = %name, version = snapshot.version(), "Routing miss: no owner");
                None
            }
        }
    }

    async fn try_handler(
        &self,
        handler: Option<&Arc<dyn InteractionHandler>>,
        handled_by: HandledBy,
        interaction: &InteractionEvent,
    ) -> Option<RoutedResponse> {
        let handler = handler?;
        let label = match &handled_by {
            HandledBy::Core => "core",
            _ => "legacy",
        };
        match self.guarded(label, handler.handle(interaction)).await {
            Some(HandlerOutcome::Handled(response)) => Some(RoutedResponse::new(response, handled_by)),
            _ => None,
        }
    }

    /// Legacy bridge, then the final unavailable reply
    async fn fallback(&self, interaction: &InteractionEvent) -> RoutedResponse {
        if let Some(routed) = self.try_handler(self.legacy.as_ref(), HandledBy::Legacy, interaction).await {
            return routed;
        }
        tracing::debug!(
            interaction = %interaction.id,
            kind = interaction.kind.as_str(),
            path = %interaction.command_path(),
            "No handler, sending fallback reply"
        );
        RoutedResponse::new(InteractionResponse::ephemeral(UNAVAILABLE_MESSAGE), HandledBy::Fallback)
    }

    /// Run a handler with the timeout, catching errors and panics
    async fn guarded<T, E, F>(&self, owner: &str, call: F) -> Option<T>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        let call = AssertUnwindSafe(call).catch_unwind();
        match tokio::time::timeout(self.handler_timeout, call).await {
            Ok(Ok(Ok(value))) => Some(value),
            Ok(Ok(Err(e))) => {
                tracing::warn!(plugin = %owner, error = %e, "Handler failed");
                None
            }
            Ok(Err(_)) => {
                tracing::warn!(plugin = %owner, "Handler panicked");
                None
            }
            Err(_) => {
                tracing::warn!(plugin = %owner, timeout = ?self.handler_timeout, "Handler timed out");
                None
            }
        }
    }
}
