//! Configuration for a [`SystemContext`](crate::context::SystemContext).
//!
//! The configuration is a small YAML document:
//!
//! ```yaml
//! root-search-depth: 100
//! parent-policy: single-parent
//! key-separator: "."
//! ```
//!
//! Every field is optional and falls back to its default.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Default cap on upward steps when searching for a root item
pub const DEFAULT_ROOT_SEARCH_DEPTH: usize = 100;

/// Default separator between key segments of a flattened path
pub const DEFAULT_KEY_SEPARATOR: &str = ".";

/// How configuration items with more than one parent are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParentPolicy {
    /// Reject a second parent link at insertion time
    #[default]
    SingleParent,

    /// Accept any number of parents; traversals follow the first one found
    FirstFound,
}

/// Configuration file structure for a system context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ContextConfig {
    /// Maximum number of steps `find_root` walks before giving up
    pub root_search_depth: usize,

    /// Multi-parent handling for configuration item links
    pub parent_policy: ParentPolicy,

    /// Separator between key segments in flattened configuration paths
    pub key_separator: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            root_search_depth: DEFAULT_ROOT_SEARCH_DEPTH,
            parent_policy: ParentPolicy::default(),
            key_separator: DEFAULT_KEY_SEPARATOR.to_string(),
        }
    }
}

impl ContextConfig {
    /// Check that the configured values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.root_search_depth == 0 {
            return Err(Error::Config(
                "root-search-depth must be at least 1".to_string(),
            ));
        }

        if self.key_separator.is_empty() {
            return Err(Error::Config("key-separator cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Parse and validate a configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_yaml(&content)
    }

    /// Save configuration to a file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {}", e)))?;
        fs::write(path, content).await?;
        Ok(())
    }
}
