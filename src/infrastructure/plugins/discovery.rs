//! Plugin discovery - finds plugin directories by their manifest file

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::application::errors::PluginError;
use super::manifest::{PluginManifest, MANIFEST_FILE};

/// A plugin directory with its parsed manifest
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,
    pub dir: PathBuf,
}

/// Scans plugin roots; every direct child directory holding a manifest is a plugin
pub struct PluginDiscovery {
    roots: Vec<PathBuf>,
}

impl PluginDiscovery {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Read a single plugin directory
    pub fn inspect(&self, path: impl AsRef<Path>) -> Result<DiscoveredPlugin, PluginError> {
        let path = path.as_ref();
        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(PluginError::Manifest(format!(
                "Missing {} in {}",
                MANIFEST_FILE,
                path.display()
            )));
        }

        let manifest = PluginManifest::from_file(&manifest_path)?;
        Ok(DiscoveredPlugin {
            manifest,
            dir: path.to_path_buf(),
        })
    }

    /// All plugins under every root, in root order then directory-name order.
    ///
    /// Unreadable manifests are skipped with a warning. When two directories
    /// declare the same name the first one wins.
    pub fn discover(&self) -> Vec<DiscoveredPlugin> {
        let mut plugins = Vec::new();
        let mut seen = HashSet::new();

        for root in &self.roots {
            if !root.exists() {
                tracing::warn!("Plugin directory does not exist: {}", root.display());
                continue;
            }

            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Failed to read plugin directory {}: {}", root.display(), e);
                    continue;
                }
            };

            let mut dirs: Vec<PathBuf> = entries
                .filter_map(|entry| match entry {
                    Ok(e) => Some(e.path()),
                    Err(e) => {
                        tracing::warn!("Failed to read directory entry: {}", e);
                        None
                    }
                })
                .filter(|path| path.is_dir())
                .collect();
            dirs.sort();

            for path in dirs {
                // Skip hidden directories
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.starts_with('.') {
                        continue;
                    }
                }
                if !path.join(MANIFEST_FILE).exists() {
                    continue;
                }

                match self.inspect(&path) {
                    Ok(found) => {
                        if !seen.insert(found.manifest.name.clone()) {
                            tracing::warn!(
                                plugin = %found.manifest.name,
                                "Duplicate plugin name in {}, keeping the first",
                                path.display()
                            );
                            continue;
                        }
                        tracing::debug!(plugin = %found.manifest.name, "Discovered plugin in {}", path.display());
                        plugins.push(found);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read plugin from {}: {}", path.display(), e);
                    }
                }
            }
        }

        plugins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_plugin(root: &Path, dir: &str, manifest: &str) {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(MANIFEST_FILE), manifest).unwrap();
    }

    #[test]
    fn test_discovers_only_manifest_dirs() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "weather", "name: weather\nversion: 1.0.0\n");
        write_plugin(root.path(), ".hidden", "name: hidden\nversion: 1.0.0\n");
        std::fs::create_dir_all(root.path().join("not-a-plugin")).unwrap();
        write_plugin(root.path(), "broken", "name: [\n");

        let found = PluginDiscovery::new(vec![root.path().to_path_buf()]).discover();
        let names: Vec<&str> = found.iter().map(|p| p.manifest.name.as_str()).collect();
        assert_eq!(names, vec!["weather"]);
        assert_eq!(found[0].dir, root.path().join("weather"));
    }

    #[test]
    fn test_duplicate_names_keep_first_root() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_plugin(first.path(), "weather", "name: weather\nversion: 1.0.0\n");
        write_plugin(second.path(), "weather2", "name: weather\nversion: 2.0.0\n");

        let found = PluginDiscovery::new(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ])
        .discover();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].manifest.version, "1.0.0");
    }

    #[test]
    fn test_missing_root_is_not_an_error() {
        let found = PluginDiscovery::new(vec![PathBuf::from("/nonexistent/plugins")]).discover();
        assert!(found.is_empty());
    }
}
