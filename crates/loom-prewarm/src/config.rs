//! Configuration for conversation prewarming.

use serde::Deserialize;

use crate::error::Result;

/// Prewarming is on unless configured otherwise.
pub const DEFAULT_ENABLED: bool = true;

/// Configuration for the prewarm manager.
///
/// Can be embedded in a TOML config file as a `[prewarm]` table:
///
/// ```toml
/// [prewarm]
/// enabled = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PrewarmConfig {
    /// Whether conversations are started speculatively.
    ///
    /// When disabled, prewarm requests are ignored and every conversation
    /// start goes straight to the thread starter.
    pub enabled: bool,
}

impl Default for PrewarmConfig {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_ENABLED,
        }
    }
}

#[derive(Deserialize)]
struct PrewarmSection {
    prewarm: PrewarmConfig,
}

impl PrewarmConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable prewarming.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Parse from TOML.
    ///
    /// Accepts either a document with a `[prewarm]` table or the bare table
    /// contents. Missing fields take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(source)?;
        let has_section = table.contains_key("prewarm");
        let value = toml::Value::Table(table);
        if has_section {
            let section: PrewarmSection = value.try_into()?;
            Ok(section.prewarm)
        } else {
            Ok(value.try_into()?)
        }
    }
}
