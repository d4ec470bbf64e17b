//! Configuration validator for remote-marshal
//!
//! Validates configuration values to ensure they are within acceptable ranges.

use super::loader::{Config, ConfigError, LoggingConfig, MemoryConfig, ScannerConfig};
use tracing::warn;

/// Largest read the validator accepts without complaint (100MB)
const LARGE_READ_SIZE: usize = 104857600;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire configuration
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        Self::validate_memory(&config.memory)?;
        Self::validate_scanner(&config.scanner)?;
        Self::validate_logging(&config.logging)?;
        Ok(())
    }

    fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
        if memory.max_read_size == 0 {
            return Err(ConfigError::Invalid(
                "Maximum read size must be greater than 0".to_string(),
            ));
        }

        if memory.max_string_bytes == 0 {
            return Err(ConfigError::Invalid(
                "Maximum string length must be greater than 0".to_string(),
            ));
        }

        if memory.max_string_bytes > memory.max_read_size {
            return Err(ConfigError::Invalid(format!(
                "Maximum string length ({}) exceeds maximum read size ({})",
                memory.max_string_bytes, memory.max_read_size
            )));
        }

        if memory.max_read_size > LARGE_READ_SIZE {
            warn!(max_read_size = memory.max_read_size, "Maximum read size exceeds 100MB");
        }

        Ok(())
    }

    fn validate_scanner(scanner: &ScannerConfig) -> Result<(), ConfigError> {
        if scanner.max_threads == 0 {
            return Err(ConfigError::Invalid(
                "Scanner threads must be at least 1".to_string(),
            ));
        }

        if scanner.max_threads > 128 {
            return Err(ConfigError::Invalid(
                "Scanner threads cannot exceed 128".to_string(),
            ));
        }

        if scanner.max_image_size == 0 {
            return Err(ConfigError::Invalid(
                "Maximum image size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                logging.level, valid_levels
            )));
        }

        Ok(())
    }
}

/// Validates a configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    ConfigValidator::validate(config)
}
