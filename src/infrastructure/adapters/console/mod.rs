//! Console transport for development/testing

use async_trait::async_trait;
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::application::errors::BotError;
use crate::application::messaging::{ConsoleParser, InteractionRouter};
use crate::domain::entities::{InteractionEvent, InteractionResponse, PublishedCommand};
use crate::domain::traits::{CommandTransport, TransportInfo};

/// Console transport: prints the published tree and every response
pub struct ConsoleTransport {
    info: TransportInfo,
    published: RwLock<Vec<PublishedCommand>>,
    responses: Mutex<Vec<(String, InteractionResponse)>>,
    echo: bool,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            info: TransportInfo {
                id: "console".to_string(),
                name: "carik-bot".to_string(),
            },
            published: RwLock::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            echo: true,
        }
    }

    /// Record without printing
    pub fn silent() -> Self {
        Self {
            echo: false,
            ..Self::new()
        }
    }

    /// Last tree passed to `register_commands`
    pub fn published(&self) -> Vec<PublishedCommand> {
        self.published.read().map(|p| p.clone()).unwrap_or_default()
    }

    /// Interaction id and response, in send order
    pub fn responses(&self) -> Vec<(String, InteractionResponse)> {
        self.responses.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandTransport for ConsoleTransport {
    async fn register_commands(&self, commands: &[PublishedCommand]) -> Result<(), BotError> {
        if self.echo {
            println!("[BOT] Registered {} commands:", commands.len());
            for cmd in commands {
                println!("  /{} - {}", cmd.name, cmd.description);
                for group in &cmd.groups {
                    let subs: Vec<&str> = group.subcommands.iter().map(|s| s.name.as_str()).collect();
                    println!("    {} [{}]", group.name, subs.join(" | "));
                }
            }
        }
        let mut published = self
            .published
            .write()
            .map_err(|_| BotError::Transport("console state poisoned".to_string()))?;
        *published = commands.to_vec();
        Ok(())
    }

    async fn respond(
        &self,
        interaction: &InteractionEvent,
        response: &InteractionResponse,
    ) -> Result<(), BotError> {
        if self.echo {
            match response {
                InteractionResponse::Message { content, ephemeral } => {
                    let tag = if *ephemeral { "BOT (only you)" } else { "BOT" };
                    println!("[{}] {}", tag, content);
                }
                InteractionResponse::Autocomplete { choices } => {
                    let names: Vec<&str> = choices.iter().map(|c| c.name.as_str()).collect();
                    println!("[BOT] Suggestions: {}", names.join(", "));
                }
                InteractionResponse::Deferred => println!("[BOT] ..."),
            }
        }
        self.responses
            .lock()
            .map_err(|_| BotError::Transport("console state poisoned".to_string()))?
            .push((interaction.id.clone(), response.clone()));
        Ok(())
    }

    fn info(&self) -> TransportInfo {
        self.info.clone()
    }
}

/// Read interactions from stdin until EOF or `/quit`
pub async fn run_console(
    router: Arc<InteractionRouter>,
    transport: Arc<ConsoleTransport>,
    parser: ConsoleParser,
) -> Result<(), BotError> {
    tracing::info!("Starting console transport (dev mode)");
    println!("Type /help for commands, ?cmd for suggestions, !plugin:action:payload for buttons, /quit to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| BotError::Transport(format!("stdin: {}", e)))?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        let snapshot = router.registry().snapshot();
        let interaction = match parser.parse(line, |cmd, word| {
            snapshot.groups_of(cmd).iter().any(|g| g == word)
        }) {
            Ok(interaction) => interaction,
            Err(e) => {
                println!("[BOT] {}", e);
                continue;
            }
        };

        // One task per interaction; a slow handler does not block the prompt
        let router = Arc::clone(&router);
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            if let Err(e) = router.dispatch(&interaction, transport.as_ref()).await {
                tracing::error!(interaction = %interaction.id, error = %e, "Failed to send response");
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::PublishedGroup;

    #[tokio::test]
    async fn test_records_tree_and_responses() {
        let transport = ConsoleTransport::silent();
        let tree = vec![PublishedCommand {
            name: "network".to_string(),
            description: "network commands".to_string(),
            options: Vec::new(),
            subcommands: Vec::new(),
            groups: vec![PublishedGroup {
                name: "insights".to_string(),
                description: String::new(),
                subcommands: Vec::new(),
            }],
        }];
        transport.register_commands(&tree).await.unwrap();
        assert_eq!(transport.published(), tree);

        let ev = InteractionEvent::command("network", "u1");
        transport
            .respond(&ev, &InteractionResponse::message("ok"))
            .await
            .unwrap();
        assert_eq!(transport.responses(), vec![(ev.id.clone(), InteractionResponse::message("ok"))]);
    }
}
