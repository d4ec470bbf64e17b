//! Core type definitions
//!
//! Address wrappers, dynamic memory values, pattern scan results and the
//! error types used throughout the crate.

mod address;
mod error;
mod scan_result;
mod value;

pub use address::{to_absolute, to_relative, Address, MemoryAddress};
pub use error::{ErrorKind, MemoryError, MemoryResult};
pub use scan_result::ScanResult;
pub use value::{MemoryValue, ValueType};

/// Identity of a target context as reported by its provider
pub type ContextId = u64;
