//! Application services - command registry and the kernel's own commands

pub mod command_registry;
pub mod core_commands;

pub use command_registry::{CommandRegistry, CommandResolution, RouteTarget, RoutingTable};
pub use core_commands::CoreCommands;
