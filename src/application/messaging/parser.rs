//! Parsers - component custom-ids and console input lines

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::application::errors::BotError;
use crate::domain::entities::InteractionEvent;

/// Namespace reserved for components rendered by the kernel itself
pub const CORE_NAMESPACE: &str = "core";

/// Structured component id: `<plugin>:<action>:<payload>`
///
/// The payload may itself contain `:`; only the first two separators split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomId {
    pub plugin: String,
    pub action: String,
    pub payload: String,
}

impl CustomId {
    pub fn new(plugin: impl Into<String>, action: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            action: action.into(),
            payload: payload.into(),
        }
    }

    /// Parse a raw custom-id. Returns `None` when it carries no namespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, ':');
        let plugin = parts.next().filter(|p| !p.is_empty())?;
        let action = parts.next().filter(|a| !a.is_empty())?;
        let payload = parts.next().unwrap_or("");
        Some(Self::new(plugin, action, payload))
    }

    pub fn is_core(&self) -> bool {
        self.plugin == CORE_NAMESPACE
    }
}

impl fmt::Display for CustomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.plugin, self.action, self.payload)
    }
}

/// Parses console lines into interactions
///
/// - `/cmd [group] [sub] key=value ...` is a command
/// - `?cmd [group] [sub] key=partial` asks for autocomplete on the last option
/// - `!plugin:action:payload` presses a component
pub struct ConsoleParser {
    user_id: String,
    channel_id: String,
}

impl ConsoleParser {
    pub fn new(user_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
        }
    }

    /// Parse one line. `is_group(command, word)` tells whether `word` names a
    /// subcommand-group of `command`; otherwise the first word is a subcommand.
    pub fn parse<F>(&self, line: &str, is_group: F) -> Result<InteractionEvent, BotError>
    where
        F: Fn(&str, &str) -> bool,
    {
        let line = line.trim();
        if let Some(raw) = line.strip_prefix('!') {
            return Ok(InteractionEvent::component(raw.trim(), &self.user_id).in_channel(&self.channel_id));
        }

        let (autocomplete, body) = if let Some(rest) = line.strip_prefix('?') {
            (true, rest)
        } else if let Some(rest) = line.strip_prefix('/') {
            (false, rest)
        } else {
            return Err(BotError::Parse(format!("expected '/', '?' or '!': {}", line)));
        };

        let tokens = tokenize(body)?;
        let mut words = Vec::new();
        let mut options = Vec::new();
        for token in tokens {
            let pair = token
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()));
            match pair {
                Some((k, v)) if !k.is_empty() => options.push((k, v)),
                _ if options.is_empty() => words.push(token),
                _ => return Err(BotError::Parse(format!("positional '{}' after options", token))),
            }
        }

        let mut words = words.into_iter();
        let command = words
            .next()
            .ok_or_else(|| BotError::Parse("missing command name".to_string()))?;

        let mut event = if autocomplete {
            let (focused, partial) = options
                .pop()
                .ok_or_else(|| BotError::Parse("autocomplete needs a key=partial option".to_string()))?;
            InteractionEvent::autocomplete(&command, &self.user_id, focused, partial)
        } else {
            InteractionEvent::command(&command, &self.user_id)
        };

        if let Some(first) = words.next() {
            if is_group(&command, &first) {
                event = event.with_group(first);
                if let Some(sub) = words.next() {
                    event = event.with_subcommand(sub);
                }
            } else {
                event = event.with_subcommand(first);
            }
        }
        if let Some(extra) = words.next() {
            return Err(BotError::Parse(format!("unexpected argument '{}'", extra)));
        }

        for (k, v) in options {
            event = event.with_option(k, v);
        }
        Ok(event.in_channel(&self.channel_id))
    }
}

/// Whitespace split that keeps double-quoted runs together
fn tokenize(input: &str) -> Result<Vec<String>, BotError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;

    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            c if c.is_whitespace() && !quoted => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if quoted {
        return Err(BotError::Parse("unterminated quote".to_string()));
    }
    if started {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::InteractionKind;

    fn groups(cmd: &str, word: &str) -> bool {
        cmd == "network" && word == "insights"
    }

    #[test]
    fn test_custom_id_payload_keeps_colons() {
        let id = CustomId::parse("weather:refresh:city:London").unwrap();
        assert_eq!(id.plugin, "weather");
        assert_eq!(id.action, "refresh");
        assert_eq!(id.payload, "city:London");
        assert_eq!(id.to_string(), "weather:refresh:city:London");
    }

    #[test]
    fn test_custom_id_without_namespace() {
        assert!(CustomId::parse("legacy_button").is_none());
        assert!(CustomId::parse(":x:y").is_none());
        let id = CustomId::parse("core:plugins:").unwrap();
        assert!(id.is_core());
        assert_eq!(id.payload, "");
    }

    #[test]
    fn test_parse_group_subcommand() {
        let parser = ConsoleParser::new("alice", "console");
        let ev = parser.parse("/network insights scan depth=2", groups).unwrap();
        assert_eq!(ev.kind, InteractionKind::Command);
        assert_eq!(ev.command_path(), "network insights scan");
        assert_eq!(ev.option("depth"), Some("2"));
    }

    #[test]
    fn test_parse_plain_subcommand() {
        let parser = ConsoleParser::new("alice", "console");
        let ev = parser.parse("/plugin enable name=weather", groups).unwrap();
        assert_eq!(ev.group_name, None);
        assert_eq!(ev.subcommand_name.as_deref(), Some("enable"));
    }

    #[test]
    fn test_parse_quoted_option() {
        let parser = ConsoleParser::new("alice", "console");
        let ev = parser.parse(r#"/weather city="New York""#, groups).unwrap();
        assert_eq!(ev.option("city"), Some("New York"));
    }

    #[test]
    fn test_parse_autocomplete_focuses_last_option() {
        let parser = ConsoleParser::new("alice", "console");
        let ev = parser.parse("?weather units=metric city=Lon", groups).unwrap();
        assert_eq!(ev.kind, InteractionKind::Autocomplete);
        assert_eq!(ev.focused_option.as_deref(), Some("city"));
        assert_eq!(ev.focused_value(), Some("Lon"));
        assert_eq!(ev.option("units"), Some("metric"));
    }

    #[test]
    fn test_parse_component() {
        let parser = ConsoleParser::new("alice", "console");
        let ev = parser.parse("!weather:refresh:London", groups).unwrap();
        assert_eq!(ev.kind, InteractionKind::Component);
        assert_eq!(ev.custom_id.as_deref(), Some("weather:refresh:London"));
    }

    #[test]
    fn test_parse_errors() {
        let parser = ConsoleParser::new("alice", "console");
        assert!(parser.parse("hello", groups).is_err());
        assert!(parser.parse("/", groups).is_err());
        assert!(parser.parse("?weather", groups).is_err());
        assert!(parser.parse("/weather a b c", groups).is_err());
        assert!(parser.parse(r#"/weather city="oops"#, groups).is_err());
    }
}
