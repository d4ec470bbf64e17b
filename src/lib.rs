//! remote-marshal: typed access to the memory of another process
//!
//! Values are moved between Rust types and raw bytes in a target address
//! space through a [`MemoryProvider`]. On top of that sit remote allocations
//! with scoped protection changes and a byte-pattern scanner for locating
//! addresses inside module images.
//!
//! ```
//! use remote_marshal::{MemoryOperations, MemoryProvider, ProtectionFlags, SandboxMemory};
//!
//! let target = SandboxMemory::new();
//! let base = target.allocate(64, ProtectionFlags::read_write()).unwrap();
//!
//! let ops = MemoryOperations::new(&target);
//! ops.write(base, &42u32).unwrap();
//! assert_eq!(ops.read::<u32>(base).unwrap(), 42);
//! ```

pub mod config;
pub mod core;
pub mod layout;
pub mod memory;
pub mod provider;
#[cfg(windows)]
pub mod windows;

// Re-export main types from core module
pub use core::types::{
    to_absolute, to_relative, Address, ErrorKind, MemoryAddress, MemoryError, MemoryResult,
    MemoryValue, ScanResult, ValueType,
};
pub use core::VERSION;

pub use layout::{Marshal, TypeCategory, TypeLayout, TypeLayoutRegistry};
pub use memory::scanner::{find, find_all, find_offset, PatternDefinition};
pub use memory::{
    rebase, AllocationState, AllocationTable, BytePattern, MemoryOperations, PatternScanner,
    ProtectionFlags, ProtectionGuard, RegionInfo, RegionState, RemoteAllocation, RemoteRegion,
    StringEncoding,
};
pub use provider::{MemoryProvider, SandboxMemory};
#[cfg(windows)]
pub use provider::ProcessMemory;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_error_kinds_distinguish_reactions() {
        assert_eq!(
            MemoryError::unsupported_type("Foo", "no layout").kind(),
            ErrorKind::Programming
        );
        assert_eq!(
            MemoryError::pattern_not_found(2, "xx").kind(),
            ErrorKind::DataMismatch
        );
        assert_ne!(
            MemoryError::invalid_address(Address::new(0x10), "unmapped").kind(),
            ErrorKind::Programming
        );
    }
}
