use async_trait::async_trait;
use crate::application::errors::BotError;
use crate::domain::entities::{InteractionEvent, InteractionResponse, PublishedCommand};

/// Transport trait - abstraction for the chat platform connection
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Replace the whole registered command tree. The platform has no
    /// incremental update, so `commands` is always the complete tree.
    async fn register_commands(&self, commands: &[PublishedCommand]) -> Result<(), BotError>;

    /// Send the acknowledgment/reply for one interaction
    async fn respond(
        &self,
        interaction: &InteractionEvent,
        response: &InteractionResponse,
    ) -> Result<(), BotError>;

    /// Get transport info
    fn info(&self) -> TransportInfo;
}

/// Transport information
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub id: String,
    pub name: String,
}
