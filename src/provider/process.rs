//! Memory provider backed by a live Windows process

use super::MemoryProvider;
use crate::core::types::{Address, ContextId, MemoryError, MemoryResult};
use crate::memory::regions::{ProtectionFlags, RegionInfo};
use crate::windows::bindings::kernel32;
use crate::windows::types::ProcessHandle;
use std::fmt;
use tracing::{debug, trace};

/// Access rights for process handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessAccess {
    value: u32,
}

impl ProcessAccess {
    pub const ALL_ACCESS: Self = Self { value: 0x1FFFFF };
    pub const QUERY_INFORMATION: Self = Self { value: 0x0400 };
    pub const VM_READ: Self = Self { value: 0x0010 };
    pub const VM_WRITE: Self = Self { value: 0x0020 };
    pub const VM_OPERATION: Self = Self { value: 0x0008 };

    /// Combine access rights
    pub fn combine(rights: &[Self]) -> Self {
        let value = rights.iter().fold(0, |acc, right| acc | right.value);
        Self { value }
    }

    /// Everything the provider needs: query, read, write and page management
    pub fn read_write() -> Self {
        Self::combine(&[
            Self::QUERY_INFORMATION,
            Self::VM_READ,
            Self::VM_WRITE,
            Self::VM_OPERATION,
        ])
    }

    pub fn value(&self) -> u32 {
        self.value
    }
}

/// A remote process opened for memory access
pub struct ProcessMemory {
    handle: ProcessHandle,
    pointer_width: usize,
}

impl ProcessMemory {
    /// Open `pid` with query, read, write and page management rights
    pub fn open(pid: u32) -> MemoryResult<Self> {
        Self::open_with(pid, ProcessAccess::read_write())
    }

    /// Open `pid` with explicit access rights
    pub fn open_with(pid: u32, access: ProcessAccess) -> MemoryResult<Self> {
        let handle = ProcessHandle::open(pid, access.value())?;
        let pointer_width = if handle.is_wow64()? {
            4
        } else {
            std::mem::size_of::<usize>()
        };

        debug!(pid, pointer_width, "Opened process");
        Ok(ProcessMemory {
            handle,
            pointer_width,
        })
    }

    /// Open the calling process
    pub fn current() -> MemoryResult<Self> {
        Self::open(std::process::id())
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }
}

impl fmt::Debug for ProcessMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessMemory")
            .field("handle", &self.handle)
            .field("pointer_width", &self.pointer_width)
            .finish()
    }
}

impl MemoryProvider for ProcessMemory {
    fn context_id(&self) -> ContextId {
        u64::from(self.handle.pid())
    }

    fn is_alive(&self) -> bool {
        self.handle.is_running()
    }

    fn pointer_width(&self) -> usize {
        self.pointer_width
    }

    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> MemoryResult<()> {
        // SAFETY: the handle is owned by self and open for VM_READ
        let read = unsafe { kernel32::read_process_memory(self.handle.raw(), address, buffer)? };
        trace!(pid = self.pid(), %address, len = buffer.len(), "Read");
        if read != buffer.len() {
            return Err(MemoryError::invalid_address(
                address,
                format!("read {} of {} bytes", read, buffer.len()),
            ));
        }
        Ok(())
    }

    fn write_bytes(&self, address: Address, data: &[u8]) -> MemoryResult<usize> {
        // SAFETY: the handle is owned by self and open for VM_WRITE
        let written = unsafe { kernel32::write_process_memory(self.handle.raw(), address, data)? };
        trace!(pid = self.pid(), %address, len = data.len(), written, "Wrote");
        Ok(written)
    }

    fn allocate(&self, size: usize, protection: ProtectionFlags) -> MemoryResult<Address> {
        if size == 0 {
            return Err(MemoryError::allocation(size, "size must be non-zero"));
        }
        // SAFETY: the handle is owned by self and open for VM_OPERATION
        unsafe { kernel32::virtual_alloc_ex(self.handle.raw(), size, protection.raw()) }
    }

    fn free(&self, address: Address) -> MemoryResult<()> {
        // SAFETY: the handle is owned by self and open for VM_OPERATION
        unsafe { kernel32::virtual_free_ex(self.handle.raw(), address) }
    }

    fn change_protection(
        &self,
        address: Address,
        size: usize,
        protection: ProtectionFlags,
    ) -> MemoryResult<ProtectionFlags> {
        // SAFETY: the handle is owned by self and open for VM_OPERATION
        let previous = unsafe {
            kernel32::virtual_protect_ex(self.handle.raw(), address, size, protection.raw())?
        };
        Ok(ProtectionFlags::new(previous))
    }

    fn query_region(&self, address: Address) -> MemoryResult<RegionInfo> {
        // SAFETY: the handle is owned by self and open for query
        let info = unsafe { kernel32::virtual_query_ex(self.handle.raw(), address)? };
        Ok(RegionInfo::from(info))
    }
}
