//! Default configuration values for remote-marshal

use crate::memory::scanner::DEFAULT_MAX_IMAGE_SIZE;
use crate::memory::{StringEncoding, DEFAULT_MAX_STRING_BYTES};
use serde::{Deserialize, Serialize};

/// Default configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDefaults {
    pub memory: MemoryDefaults,
    pub scanner: ScannerDefaults,
    pub logging: LoggingDefaults,
}

/// Default marshaling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDefaults {
    pub max_string_bytes: usize,
    pub default_encoding: StringEncoding,
    pub auto_protect: bool,
    pub max_read_size: usize,
}

/// Default scanner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerDefaults {
    pub parallel: bool,
    pub max_threads: usize,
    pub max_image_size: usize,
}

/// Default logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingDefaults {
    pub level: String,
    pub ansi: bool,
}

/// Returns the default configuration
pub fn default_config() -> ConfigDefaults {
    ConfigDefaults {
        memory: MemoryDefaults {
            max_string_bytes: DEFAULT_MAX_STRING_BYTES,
            default_encoding: StringEncoding::Utf8,
            auto_protect: false,
            max_read_size: 10485760, // 10MB
        },
        scanner: ScannerDefaults {
            parallel: true,
            max_threads: num_cpus::get().min(8),
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
        },
        logging: LoggingDefaults {
            level: "info".to_string(),
            ansi: true,
        },
    }
}
