//! Domain layer - Core runtime types with no external dependencies
//! 
//! This layer contains:
//! - Entities: Plugin descriptors, commands, interactions, schema extensions
//! - Traits: Abstractions for infrastructure (Store, CommandTransport)

pub mod entities;
pub mod traits;
