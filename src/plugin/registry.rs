//! Plugin registry
//!
//! Scans a plugins root for `*/plugin.json` descriptors once at startup. A bad
//! descriptor only costs its own plugin: it is logged and skipped, and the scan
//! continues with the remaining directories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ConfigurationError;

use super::metadata::{PluginMetadata, DESCRIPTOR_FILE};

/// A discovered plugin: its metadata plus the directory it was loaded from
#[derive(Debug, Clone)]
pub struct PluginEntry {
    pub metadata: Arc<PluginMetadata>,
    pub dir: PathBuf,
}

/// Immutable protocol id → plugin map
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginEntry>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `root` for plugin directories
    ///
    /// Directories are visited in name order, so when two descriptors claim
    /// the same protocol id the first one in that order wins.
    pub fn discover(root: &Path) -> Self {
        let mut registry = Self::new();

        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "Plugins directory not readable");
                return registry;
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            let descriptor = dir.join(DESCRIPTOR_FILE);
            if !descriptor.is_file() {
                tracing::debug!(dir = %dir.display(), "No plugin descriptor, skipping");
                continue;
            }

            let result = PluginMetadata::load(&descriptor)
                .and_then(|metadata| registry.insert(metadata, dir.clone(), &descriptor));

            match result {
                Ok(protocol) => {
                    tracing::info!(protocol = %protocol, dir = %dir.display(), "Discovered plugin");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Rejected plugin descriptor");
                }
            }
        }

        tracing::info!(count = registry.len(), root = %root.display(), "Plugin discovery complete");
        registry
    }

    /// Add a plugin, refusing a protocol id that is already claimed
    pub fn insert(
        &mut self,
        metadata: PluginMetadata,
        dir: PathBuf,
        descriptor: &Path,
    ) -> Result<String, ConfigurationError> {
        if self.plugins.contains_key(&metadata.protocol) {
            return Err(ConfigurationError::DuplicateProtocol {
                protocol: metadata.protocol,
                path: descriptor.to_path_buf(),
            });
        }

        let protocol = metadata.protocol.clone();
        self.plugins.insert(
            protocol.clone(),
            PluginEntry {
                metadata: Arc::new(metadata),
                dir,
            },
        );
        Ok(protocol)
    }

    /// Look up a plugin by protocol id
    pub fn get(&self, protocol: &str) -> Option<&PluginEntry> {
        self.plugins.get(protocol)
    }

    /// All protocol ids, sorted
    pub fn protocols(&self) -> Vec<String> {
        let mut protocols: Vec<String> = self.plugins.keys().cloned().collect();
        protocols.sort();
        protocols
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = &PluginEntry> {
        self.plugins.values()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
