//! Interaction handling - console parsing and routing to plugin handlers

pub mod parser;
pub mod router;

pub use parser::{ConsoleParser, CustomId, CORE_NAMESPACE};
pub use router::{HandledBy, InteractionHandler, InteractionRouter, RoutedResponse, UNAVAILABLE_MESSAGE};
