use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Serialize;
use std::fmt;

static COMMAND_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_-]{1,32}$").expect("command name pattern compiles"));

/// Check a command, group, or subcommand name against the platform naming rules
pub fn is_valid_command_name(name: &str) -> bool {
    COMMAND_NAME.is_match(name)
}

/// Who answers a command
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "name", rename_all = "lowercase")]
pub enum CommandOwner {
    Core,
    Plugin(String),
}

impl CommandOwner {
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            CommandOwner::Core => None,
            CommandOwner::Plugin(name) => Some(name),
        }
    }
}

impl fmt::Display for CommandOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOwner::Core => f.write_str("core"),
            CommandOwner::Plugin(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Standalone,
    Group,
}

/// A single option (argument) of a command or subcommand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOption {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub autocomplete: bool,
}

impl CommandOption {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            autocomplete: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_autocomplete(mut self) -> Self {
        self.autocomplete = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subcommand {
    pub name: String,
    pub description: String,
    pub options: Vec<CommandOption>,
}

impl Subcommand {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, option: CommandOption) -> Self {
        self.options.push(option);
        self
    }

    fn has_autocomplete(&self) -> bool {
        self.options.iter().any(|o| o.autocomplete)
    }
}

/// One registrable command or subcommand-group
///
/// For a standalone command `name` is the top-level name and `parent_command`
/// is `None`. For a group, `name` is the group name and `parent_command` names
/// the shared top-level command it is merged into.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandDescriptor {
    pub name: String,
    pub description: String,
    pub kind: CommandKind,
    pub parent_command: Option<String>,
    pub parent_description: Option<String>,
    pub owner: CommandOwner,
    pub options: Vec<CommandOption>,
    pub subcommands: Vec<Subcommand>,
}

impl CommandDescriptor {
    pub fn standalone(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind: CommandKind::Standalone,
            parent_command: None,
            parent_description: None,
            owner: CommandOwner::Core,
            options: Vec::new(),
            subcommands: Vec::new(),
        }
    }

    pub fn group(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Group,
            parent_command: Some(parent.into()),
            ..Self::standalone(name)
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Description used for the shared parent command if no other group set one
    pub fn with_parent_description(mut self, desc: impl Into<String>) -> Self {
        self.parent_description = Some(desc.into());
        self
    }

    pub fn with_option(mut self, option: CommandOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn with_subcommand(mut self, sub: Subcommand) -> Self {
        self.subcommands.push(sub);
        self
    }

    pub(crate) fn owned_by(mut self, owner: CommandOwner) -> Self {
        self.owner = owner;
        self
    }

    /// Name the command is published and routed under
    pub fn top_level_name(&self) -> &str {
        self.parent_command.as_deref().unwrap_or(&self.name)
    }

    /// Whether any option of this command (or its subcommands) autocompletes
    pub fn has_autocomplete(&self) -> bool {
        self.options.iter().any(|o| o.autocomplete)
            || self.subcommands.iter().any(Subcommand::has_autocomplete)
    }

    /// Human readable key used in conflict reports
    pub fn registration_key(&self) -> String {
        match &self.parent_command {
            Some(parent) => format!("group '{} {}'", parent, self.name),
            None => format!("command '{}'", self.name),
        }
    }

    /// Validate every name carried by this descriptor
    pub fn validate(&self) -> Result<(), String> {
        let mut names = vec![self.name.as_str()];
        if let Some(parent) = &self.parent_command {
            names.push(parent.as_str());
        }
        names.extend(self.subcommands.iter().map(|s| s.name.as_str()));
        names.extend(self.options.iter().map(|o| o.name.as_str()));
        for sub in &self.subcommands {
            names.extend(sub.options.iter().map(|o| o.name.as_str()));
        }

        match names.into_iter().find(|n| !is_valid_command_name(n)) {
            Some(bad) => Err(format!("'{}' in {}", bad, self.registration_key())),
            None => Ok(()),
        }
    }
}

/// A subcommand-group as it appears in the published tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedGroup {
    pub name: String,
    pub description: String,
    pub subcommands: Vec<Subcommand>,
}

/// A top-level command as handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedCommand {
    pub name: String,
    pub description: String,
    pub options: Vec<CommandOption>,
    pub subcommands: Vec<Subcommand>,
    pub groups: Vec<PublishedGroup>,
}

impl PublishedCommand {
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name_rules() {
        assert!(is_valid_command_name("weather"));
        assert!(is_valid_command_name("device-trigger_2"));
        assert!(!is_valid_command_name("Weather"));
        assert!(!is_valid_command_name(""));
        assert!(!is_valid_command_name("has space"));
        assert!(!is_valid_command_name(&"x".repeat(33)));
    }

    #[test]
    fn test_group_top_level_name() {
        let cmd = CommandDescriptor::group("network", "insights");
        assert_eq!(cmd.kind, CommandKind::Group);
        assert_eq!(cmd.top_level_name(), "network");
        assert_eq!(cmd.registration_key(), "group 'network insights'");

        let cmd = CommandDescriptor::standalone("weather");
        assert_eq!(cmd.top_level_name(), "weather");
    }

    #[test]
    fn test_validate_reports_bad_subcommand() {
        let cmd = CommandDescriptor::group("network", "insights")
            .with_subcommand(Subcommand::new("Scan", "bad casing"));
        let err = cmd.validate().unwrap_err();
        assert!(err.contains("Scan"));
    }

    #[test]
    fn test_autocomplete_detected_in_subcommand() {
        let cmd = CommandDescriptor::group("network", "insights").with_subcommand(
            Subcommand::new("device", "Show a device")
                .with_option(CommandOption::new("name", "Device").with_autocomplete()),
        );
        assert!(cmd.has_autocomplete());
        assert!(!CommandDescriptor::standalone("ping").has_autocomplete());
    }
}
