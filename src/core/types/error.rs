//! Custom error types for remote memory marshaling

use std::fmt;
use thiserror::Error;

/// Main error type for memory operations
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Unsupported type {type_name}: {reason}")]
    UnsupportedType {
        type_name: &'static str,
        reason: String,
    },

    #[error("Invalid memory address: {0}")]
    InvalidAddress(String),

    #[error("Access denied at {address}: {reason}")]
    AccessDenied { address: String, reason: String },

    #[error("Partial write at {address}: requested {requested} bytes, wrote {written} bytes")]
    PartialWrite {
        address: String,
        requested: usize,
        written: usize,
    },

    #[error("Failed to allocate {size} bytes: {reason}")]
    Allocation { size: usize, reason: String },

    #[error("Unsupported string encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Pattern not found: {length} bytes with mask {mask}")]
    PatternNotFound { length: usize, mask: String },

    #[error("Invalid pattern format: {0}")]
    InvalidPattern(String),

    #[error("Duplicate pattern name: {0}")]
    DuplicatePattern(String),

    #[error("Memory protection error: {0}")]
    ProtectionError(String),

    #[error("Allocation at {0} has already been released")]
    AllocationReleased(String),

    #[error("Target context {0} is no longer alive")]
    ContextLost(u64),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Invalid value type: {0}")]
    InvalidValueType(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type alias for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Broad classification used by callers to pick a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller bug, such as marshaling an unsupported type. Abort.
    Programming,
    /// Address inaccessible, context gone, allocation refused. Retry may help.
    Environment,
    /// Pattern or data does not match the target build. Rescan or fail startup.
    DataMismatch,
}

impl MemoryError {
    /// Classifies the error for recovery decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::UnsupportedType { .. }
            | MemoryError::UnsupportedEncoding(_)
            | MemoryError::InvalidPattern(_)
            | MemoryError::DuplicatePattern(_)
            | MemoryError::AllocationReleased(_)
            | MemoryError::InvalidValueType(_) => ErrorKind::Programming,
            MemoryError::PatternNotFound { .. }
            | MemoryError::JsonError(_)
            | MemoryError::TomlError(_) => ErrorKind::DataMismatch,
            MemoryError::InvalidAddress(_)
            | MemoryError::AccessDenied { .. }
            | MemoryError::PartialWrite { .. }
            | MemoryError::Allocation { .. }
            | MemoryError::ProtectionError(_)
            | MemoryError::ContextLost(_)
            | MemoryError::ProcessNotFound(_)
            | MemoryError::InvalidHandle(_)
            | MemoryError::IoError(_) => ErrorKind::Environment,
        }
    }

    /// Creates an unsupported type error
    pub fn unsupported_type(type_name: &'static str, reason: impl Into<String>) -> Self {
        MemoryError::UnsupportedType {
            type_name,
            reason: reason.into(),
        }
    }

    /// Creates an access denied error for an address
    pub fn access_denied(address: impl fmt::Display, reason: impl Into<String>) -> Self {
        MemoryError::AccessDenied {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid address error with context
    pub fn invalid_address(address: impl fmt::Display, reason: impl fmt::Display) -> Self {
        MemoryError::InvalidAddress(format!("{} ({})", address, reason))
    }

    /// Creates a partial write error
    pub fn partial_write(address: impl fmt::Display, requested: usize, written: usize) -> Self {
        MemoryError::PartialWrite {
            address: address.to_string(),
            requested,
            written,
        }
    }

    /// Creates an allocation error
    pub fn allocation(size: usize, reason: impl Into<String>) -> Self {
        MemoryError::Allocation {
            size,
            reason: reason.into(),
        }
    }

    /// Creates a pattern not found error
    pub fn pattern_not_found(length: usize, mask: impl Into<String>) -> Self {
        MemoryError::PatternNotFound {
            length,
            mask: mask.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MemoryError::InvalidAddress("0xDEADBEEF".to_string());
        assert_eq!(err.to_string(), "Invalid memory address: 0xDEADBEEF");

        let err = MemoryError::access_denied("0x1000", "page is read-only");
        assert_eq!(err.to_string(), "Access denied at 0x1000: page is read-only");
    }

    #[test]
    fn test_all_error_variants() {
        let errors: Vec<(MemoryError, &str)> = vec![
            (
                MemoryError::unsupported_type("Foo", "zero-sized"),
                "Unsupported type Foo: zero-sized",
            ),
            (
                MemoryError::partial_write("0x2000", 8, 4),
                "Partial write at 0x2000: requested 8 bytes, wrote 4 bytes",
            ),
            (
                MemoryError::allocation(4096, "out of memory"),
                "Failed to allocate 4096 bytes: out of memory",
            ),
            (
                MemoryError::UnsupportedEncoding("utf-32".to_string()),
                "Unsupported string encoding: utf-32",
            ),
            (
                MemoryError::pattern_not_found(3, "x?x"),
                "Pattern not found: 3 bytes with mask x?x",
            ),
            (
                MemoryError::InvalidPattern("GG".to_string()),
                "Invalid pattern format: GG",
            ),
            (
                MemoryError::DuplicatePattern("PlayerBase".to_string()),
                "Duplicate pattern name: PlayerBase",
            ),
            (
                MemoryError::AllocationReleased("0x10000".to_string()),
                "Allocation at 0x10000 has already been released",
            ),
            (
                MemoryError::ContextLost(7),
                "Target context 7 is no longer alive",
            ),
        ];

        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            MemoryError::unsupported_type("Foo", "x").kind(),
            ErrorKind::Programming
        );
        assert_eq!(
            MemoryError::InvalidAddress("0x0".to_string()).kind(),
            ErrorKind::Environment
        );
        assert_eq!(
            MemoryError::pattern_not_found(1, "x").kind(),
            ErrorKind::DataMismatch
        );
        assert_eq!(
            MemoryError::partial_write("0x0", 2, 1).kind(),
            ErrorKind::Environment
        );
    }

    #[test]
    fn test_from_implementations() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "test");
        let mem_err: MemoryError = io_err.into();
        assert!(matches!(mem_err, MemoryError::IoError(_)));

        let json_err = serde_json::from_str::<String>("invalid json").unwrap_err();
        let mem_err: MemoryError = json_err.into();
        assert!(matches!(mem_err, MemoryError::JsonError(_)));
    }

    #[test]
    fn test_invalid_address_helper() {
        let err = MemoryError::invalid_address("0x1234", "unmapped");
        assert_eq!(err.to_string(), "Invalid memory address: 0x1234 (unmapped)");
    }
}
