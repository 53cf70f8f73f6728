use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type of inbound interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Command,
    Autocomplete,
    /// Button press or select-menu choice
    Component,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Command => "command",
            InteractionKind::Autocomplete => "autocomplete",
            InteractionKind::Component => "component",
        }
    }
}

/// One inbound request from the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: String,
    pub kind: InteractionKind,
    pub command_name: Option<String>,
    pub group_name: Option<String>,
    pub subcommand_name: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Option currently being typed, for autocomplete
    pub focused_option: Option<String>,
    pub custom_id: Option<String>,
    pub user_id: String,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InteractionEvent {
    fn new(kind: InteractionKind, user_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            command_name: None,
            group_name: None,
            subcommand_name: None,
            options: BTreeMap::new(),
            focused_option: None,
            custom_id: None,
            user_id: user_id.into(),
            channel_id: None,
            guild_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn command(name: impl Into<String>, user_id: impl Into<String>) -> Self {
        let mut ev = Self::new(InteractionKind::Command, user_id);
        ev.command_name = Some(name.into());
        ev
    }

    pub fn autocomplete(
        name: impl Into<String>,
        user_id: impl Into<String>,
        focused: impl Into<String>,
        partial: impl Into<String>,
    ) -> Self {
        let focused = focused.into();
        let mut ev = Self::new(InteractionKind::Autocomplete, user_id);
        ev.command_name = Some(name.into());
        ev.options.insert(focused.clone(), partial.into());
        ev.focused_option = Some(focused);
        ev
    }

    pub fn component(custom_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let mut ev = Self::new(InteractionKind::Component, user_id);
        ev.custom_id = Some(custom_id.into());
        ev
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group_name = Some(group.into());
        self
    }

    pub fn with_subcommand(mut self, sub: impl Into<String>) -> Self {
        self.subcommand_name = Some(sub.into());
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn in_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn in_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// Value typed so far into the focused option
    pub fn focused_value(&self) -> Option<&str> {
        self.focused_option.as_deref().and_then(|name| self.option(name))
    }

    /// Full invoked path, e.g. `network insights scan`
    pub fn command_path(&self) -> String {
        [
            self.command_name.as_deref(),
            self.group_name.as_deref(),
            self.subcommand_name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// A single autocomplete suggestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutocompleteChoice {
    pub name: String,
    pub value: String,
}

impl AutocompleteChoice {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Reply sent back to the transport for one interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionResponse {
    Message { content: String, ephemeral: bool },
    Autocomplete { choices: Vec<AutocompleteChoice> },
    /// Acknowledged; the handler follows up on its own
    Deferred,
}

impl InteractionResponse {
    pub fn message(content: impl Into<String>) -> Self {
        InteractionResponse::Message {
            content: content.into(),
            ephemeral: false,
        }
    }

    pub fn ephemeral(content: impl Into<String>) -> Self {
        InteractionResponse::Message {
            content: content.into(),
            ephemeral: true,
        }
    }

    pub fn choices(choices: Vec<AutocompleteChoice>) -> Self {
        InteractionResponse::Autocomplete { choices }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            InteractionResponse::Message { content, .. } => Some(content),
            _ => None,
        }
    }
}

/// What a handler did with an interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Handled(InteractionResponse),
    /// Not for this handler; the router moves down the fallback chain
    Unhandled,
}
