//! Application layer - Use cases and business logic
//! 
//! This layer contains:
//! - Services: Command registry and core commands
//! - Errors: Kernel error types
//! - Messaging: Console parsing and interaction routing

pub mod errors;
pub mod services;
pub mod messaging;
