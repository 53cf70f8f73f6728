//! Domain entities - Core runtime objects with no infrastructure dependencies

pub mod command;
pub mod interaction;
pub mod plugin;
pub mod schema;

pub use command::{
    CommandDescriptor, CommandKind, CommandOption, CommandOwner, PublishedCommand, PublishedGroup,
    Subcommand,
};
pub use interaction::{
    AutocompleteChoice, HandlerOutcome, InteractionEvent, InteractionKind, InteractionResponse,
};
pub use plugin::{is_valid_plugin_name, PluginDescriptor, PluginState};
pub use schema::{ColumnDefault, ColumnDefinition, ColumnType, SchemaExtension};
