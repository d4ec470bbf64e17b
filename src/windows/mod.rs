//! Windows API layer backing [`ProcessMemory`](crate::provider::ProcessMemory)
//!
//! All unsafe FFI calls are contained within this module. Callers above it
//! only see `MemoryResult` values with OS error codes already mapped onto
//! the crate's error taxonomy.

pub mod bindings;
pub mod types;

pub use bindings::kernel32;
pub use types::{MemoryBasicInfo, ProcessHandle};
