//! Core module containing fundamental types shared by every layer
//!
//! Address handling, dynamic values, scan results and the error taxonomy
//! live here so that the layout, memory and provider modules can depend on
//! them without depending on each other.

pub mod types;

pub use types::{Address, MemoryAddress, MemoryError, MemoryResult, MemoryValue, ScanResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
