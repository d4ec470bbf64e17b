//! Configuration loader for remote-marshal
//!
//! Handles loading configuration from TOML files and merging with defaults.

use super::defaults::default_config;
use crate::core::types::Address;
use crate::memory::{MemoryOperations, PatternScanner, StringEncoding};
use crate::provider::MemoryProvider;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// File name looked up when no explicit path is given
pub const DEFAULT_CONFIG_FILE: &str = "remote-marshal.toml";

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_memory")]
    pub memory: MemoryConfig,

    #[serde(default = "default_scanner")]
    pub scanner: ScannerConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,
}

/// Marshaling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_string_bytes")]
    pub max_string_bytes: usize,
    #[serde(default = "default_encoding")]
    pub default_encoding: StringEncoding,
    #[serde(default = "default_auto_protect")]
    pub auto_protect: bool,
    #[serde(default = "default_max_read_size")]
    pub max_read_size: usize,
}

impl MemoryConfig {
    /// Typed operations against `provider` with these settings applied
    pub fn operations<'a>(&self, provider: &'a dyn MemoryProvider) -> MemoryOperations<'a> {
        MemoryOperations::new(provider)
            .with_auto_protect(self.auto_protect)
            .with_max_read_size(self.max_read_size)
    }
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    #[serde(default = "default_max_image_size")]
    pub max_image_size: usize,
}

impl ScannerConfig {
    /// Scanner over one module with these settings applied
    pub fn scanner<'a>(
        &self,
        provider: &'a dyn MemoryProvider,
        module_base: Address,
        module_size: usize,
    ) -> PatternScanner<'a> {
        PatternScanner::new(provider, module_base, module_size)
            .use_parallel(self.parallel)
            .with_max_image_size(self.max_image_size)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

/// Configuration loader
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ConfigLoader {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Loads configuration from file
    pub fn load(&self) -> Result<Config, ConfigError> {
        if !self.config_path.exists() {
            return Err(ConfigError::FileNotFound(
                self.config_path.display().to_string(),
            ));
        }

        let contents = fs::read_to_string(&self.config_path)?;
        let config: Config = toml::from_str(&contents)?;
        debug!(path = %self.config_path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Loads configuration or returns defaults if the file is missing
    ///
    /// A file that exists but fails to parse is still an error.
    pub fn load_or_default(&self) -> Result<Config, ConfigError> {
        match self.load() {
            Err(ConfigError::FileNotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    /// Saves configuration to file
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Loads `path` when given, otherwise the default file if present
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => ConfigLoader::new(path).load(),
        None => ConfigLoader::new(DEFAULT_CONFIG_FILE).load_or_default(),
    }
}

// Default functions for serde
fn default_memory() -> MemoryConfig {
    let defaults = default_config();
    MemoryConfig {
        max_string_bytes: defaults.memory.max_string_bytes,
        default_encoding: defaults.memory.default_encoding,
        auto_protect: defaults.memory.auto_protect,
        max_read_size: defaults.memory.max_read_size,
    }
}

fn default_scanner() -> ScannerConfig {
    let defaults = default_config();
    ScannerConfig {
        parallel: defaults.scanner.parallel,
        max_threads: defaults.scanner.max_threads,
        max_image_size: defaults.scanner.max_image_size,
    }
}

fn default_logging() -> LoggingConfig {
    let defaults = default_config();
    LoggingConfig {
        level: defaults.logging.level,
        ansi: defaults.logging.ansi,
    }
}

// Individual field defaults
fn default_max_string_bytes() -> usize {
    default_config().memory.max_string_bytes
}

fn default_encoding() -> StringEncoding {
    default_config().memory.default_encoding
}

fn default_auto_protect() -> bool {
    default_config().memory.auto_protect
}

fn default_max_read_size() -> usize {
    default_config().memory.max_read_size
}

fn default_parallel() -> bool {
    default_config().scanner.parallel
}

fn default_max_threads() -> usize {
    default_config().scanner.max_threads
}

fn default_max_image_size() -> usize {
    default_config().scanner.max_image_size
}

fn default_log_level() -> String {
    default_config().logging.level
}

fn default_ansi() -> bool {
    default_config().logging.ansi
}

impl Default for Config {
    fn default() -> Self {
        Config {
            memory: default_memory(),
            scanner: default_scanner(),
            logging: default_logging(),
        }
    }
}
