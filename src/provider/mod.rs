//! Memory access providers
//!
//! A provider moves raw bytes in and out of one target address space and
//! manages its pages. Everything above this layer (typed marshaling,
//! regions, scanning) talks to a target only through [`MemoryProvider`].

mod sandbox;

#[cfg(windows)]
mod process;

pub use sandbox::{SandboxMemory, SandboxStats, PAGE_SIZE};

#[cfg(windows)]
pub use process::{ProcessAccess, ProcessMemory};

use crate::core::types::{Address, ContextId, MemoryResult};
use crate::memory::regions::{ProtectionFlags, RegionInfo};

/// Raw access to a target address space
///
/// Implementations must be usable from several threads at once. Each call
/// blocks until the underlying operation completes.
pub trait MemoryProvider: Send + Sync {
    /// Identity of the target context, stable for the provider's lifetime
    fn context_id(&self) -> ContextId;

    /// Whether the target context still exists
    fn is_alive(&self) -> bool;

    /// Width in bytes of an address in the target (4 or 8)
    fn pointer_width(&self) -> usize;

    /// Whether the target stores multi-byte values little-endian
    fn is_little_endian(&self) -> bool {
        cfg!(target_endian = "little")
    }

    /// Fill `buffer` from `address`, failing unless every byte was read
    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> MemoryResult<()>;

    /// Write `data` at `address`, returning how many bytes actually landed
    fn write_bytes(&self, address: Address, data: &[u8]) -> MemoryResult<usize>;

    /// Reserve and commit `size` bytes with the given protection
    fn allocate(&self, size: usize, protection: ProtectionFlags) -> MemoryResult<Address>;

    /// Release an allocation previously returned by [`allocate`](Self::allocate)
    fn free(&self, address: Address) -> MemoryResult<()>;

    /// Change protection of `[address, address + size)`, returning the previous flags
    fn change_protection(
        &self,
        address: Address,
        size: usize,
        protection: ProtectionFlags,
    ) -> MemoryResult<ProtectionFlags>;

    /// Describe the region containing `address`
    fn query_region(&self, address: Address) -> MemoryResult<RegionInfo>;

    /// Read `len` bytes into a new buffer
    fn read_vec(&self, address: Address, len: usize) -> MemoryResult<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        if len > 0 {
            self.read_bytes(address, &mut buffer)?;
        }
        Ok(buffer)
    }
}
