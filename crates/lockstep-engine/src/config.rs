//! Configuration loading and typed config structures for the engine.
//!
//! The canonical configuration lives in `lockstep.yaml` next to the
//! binary's working directory. All fields have defaults, so a missing
//! file or an empty document yields a usable two-master setup.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Peer-group topology.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Model selection.
    #[serde(default)]
    pub model: ModelConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents)?)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(yaml)
    }
}

/// Peer-group topology settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClusterConfig {
    /// Number of peer masters.
    #[serde(default = "default_masters")]
    pub masters: u32,

    /// Handler worker threads per master.
    #[serde(default = "default_handlers")]
    pub handlers_per_master: usize,

    /// Steps executed per `run` order.
    #[serde(default = "default_period")]
    pub period: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            masters: default_masters(),
            handlers_per_master: default_handlers(),
            period: default_period(),
        }
    }
}

const fn default_masters() -> u32 {
    2
}

fn default_handlers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(2)
}

const fn default_period() -> u64 {
    1
}

/// Model selection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelConfig {
    /// Name of the built-in model to load.
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Instantiation document loaded by a bare `init` command.
    #[serde(default)]
    pub instance: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            instance: None,
        }
    }
}

fn default_model_name() -> String {
    "drift".to_owned()
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::parse("{}").unwrap();
        assert_eq!(config.cluster.masters, 2);
        assert_eq!(config.cluster.period, 1);
        assert_eq!(config.model.name, "drift");
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn partial_document_overrides_selectively() {
        let config = EngineConfig::parse(
            "cluster:\n  masters: 4\nmodel:\n  name: drift\n  instance: seed.json\n",
        )
        .unwrap();
        assert_eq!(config.cluster.masters, 4);
        assert_eq!(config.model.instance, Some(PathBuf::from("seed.json")));
        // Untouched fields keep their defaults.
        assert_eq!(config.cluster.period, 1);
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        assert!(EngineConfig::parse("cluster: [").is_err());
    }
}
