//! Infrastructure layer - External concerns
//! 
//! This layer contains:
//! - Config: Configuration loading
//! - Database/Storage: Store implementations (SQLite, in-memory)
//! - Plugins: Manifests, directory discovery and the factory catalog
//! - Adapters: Transports (console)

pub mod adapters;
pub mod config;
pub mod database;
pub mod plugins;
pub mod storage;
