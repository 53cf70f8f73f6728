//! Plugin sources for the kernel
//!
//! Plugin code is compiled in and registered by name in a `PluginCatalog`.
//! A directory becomes a plugin by holding a `plugin.yaml` manifest; the
//! manifest supplies metadata and dependencies, the catalog supplies the code.

pub mod catalog;
pub mod discovery;
pub mod manifest;

pub use catalog::PluginCatalog;
pub use discovery::{DiscoveredPlugin, PluginDiscovery};
pub use manifest::{PluginManifest, MANIFEST_FILE};
