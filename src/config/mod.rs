//! Configuration for remote-marshal
//!
//! Provides configuration loading, validation, and default settings
//! for marshaling, scanning and logging.

mod defaults;
mod loader;
mod validator;

pub use defaults::{default_config, ConfigDefaults};
pub use loader::{
    load_config, Config, ConfigError, ConfigLoader, LoggingConfig, MemoryConfig, ScannerConfig,
    DEFAULT_CONFIG_FILE,
};
pub use validator::{validate_config, ConfigValidator};

// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_from_io() {
        use std::io;
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let config_error: ConfigError = io_error.into();
        assert!(matches!(config_error, ConfigError::Io(_)));
    }

    #[test]
    fn test_load_config_explicit_missing() {
        let result: ConfigResult<Config> =
            load_config(Some(std::path::Path::new("missing-remote-marshal.toml")));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
