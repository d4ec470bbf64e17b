//! Typed memory operations over a [`MemoryProvider`]
//!
//! This module provides the marshaling engine:
//! - Typed reads and writes driven by the layout registry
//! - Bulk array transfers with a single provider call where possible
//! - Null-terminated strings in several encodings
//! - Region and allocation lifecycle (see [`regions`])
//! - Byte-pattern scanning over module images (see [`scanner`])

pub mod reader;
pub mod regions;
pub mod scanner;
pub mod strings;
pub mod writer;

pub use reader::MemoryReader;
pub use regions::{
    AllocationState, AllocationTable, ProtectionFlags, ProtectionGuard, RegionInfo, RegionState,
    RemoteAllocation, RemoteRegion,
};
pub use scanner::{BytePattern, PatternScanner};
pub use strings::{StringEncoding, StringRead};
pub use writer::MemoryWriter;

use crate::core::types::{Address, MemoryAddress, MemoryError, MemoryResult, MemoryValue, ValueType};
use crate::layout::{Marshal, TypeLayoutRegistry};
use crate::provider::MemoryProvider;

/// Default number of bytes scanned for a string terminator
pub const DEFAULT_MAX_STRING_BYTES: usize = 512;

/// Everything a typed operation needs to reach one target
#[derive(Clone, Copy)]
pub struct MarshalContext<'a> {
    provider: &'a dyn MemoryProvider,
    registry: &'a TypeLayoutRegistry,
    module_base: Option<Address>,
    max_read_size: usize,
}

impl<'a> MarshalContext<'a> {
    /// Context using the process-wide layout registry
    pub fn new(provider: &'a dyn MemoryProvider) -> Self {
        MarshalContext {
            provider,
            registry: TypeLayoutRegistry::global(),
            module_base: None,
            max_read_size: usize::MAX,
        }
    }

    pub fn provider(&self) -> &'a dyn MemoryProvider {
        self.provider
    }

    pub fn registry(&self) -> &'a TypeLayoutRegistry {
        self.registry
    }

    pub fn module_base(&self) -> Option<Address> {
        self.module_base
    }

    /// Resolve a caller-supplied address against the module base
    pub fn resolve(&self, address: impl Into<MemoryAddress>) -> MemoryResult<Address> {
        address.into().resolve(self.module_base)
    }

    pub(crate) fn check_read_size(&self, len: usize) -> MemoryResult<()> {
        if len > self.max_read_size {
            return Err(MemoryError::InvalidValueType(format!(
                "read of {} bytes exceeds the {} byte limit",
                len, self.max_read_size
            )));
        }
        Ok(())
    }
}

/// Unified entry point for typed memory access against one target
pub struct MemoryOperations<'a> {
    context: MarshalContext<'a>,
    auto_protect: bool,
}

impl<'a> MemoryOperations<'a> {
    /// Create a memory operations context for a provider
    pub fn new(provider: &'a dyn MemoryProvider) -> Self {
        MemoryOperations {
            context: MarshalContext::new(provider),
            auto_protect: false,
        }
    }

    /// Use a private layout registry instead of the global one
    pub fn with_registry(mut self, registry: &'a TypeLayoutRegistry) -> Self {
        self.context.registry = registry;
        self
    }

    /// Base that module-relative addresses resolve against
    pub fn with_module_base(mut self, base: Address) -> Self {
        self.context.module_base = Some(base);
        self
    }

    /// Temporarily lift write protection around writes to read-only pages
    pub fn with_auto_protect(mut self, enabled: bool) -> Self {
        self.auto_protect = enabled;
        self
    }

    /// Refuse single reads larger than `bytes`
    pub fn with_max_read_size(mut self, bytes: usize) -> Self {
        self.context.max_read_size = bytes;
        self
    }

    pub fn context(&self) -> MarshalContext<'a> {
        self.context
    }

    pub fn reader(&self) -> MemoryReader<'a> {
        MemoryReader::new(self.context)
    }

    pub fn writer(&self) -> MemoryWriter<'a> {
        MemoryWriter::new(self.context).with_auto_protect(self.auto_protect)
    }

    /// Read a value from memory
    pub fn read<T: Marshal>(&self, address: impl Into<MemoryAddress>) -> MemoryResult<T> {
        self.reader().read(address)
    }

    /// Write a value to memory
    pub fn write<T: Marshal>(&self, address: impl Into<MemoryAddress>, value: &T) -> MemoryResult<()> {
        self.writer().write(address, value)
    }

    /// Read `count` consecutive values
    pub fn read_array<T: Marshal>(
        &self,
        address: impl Into<MemoryAddress>,
        count: usize,
    ) -> MemoryResult<Vec<T>> {
        self.reader().read_array(address, count)
    }

    /// Write consecutive values with one provider call
    pub fn write_array<T: Marshal>(
        &self,
        address: impl Into<MemoryAddress>,
        values: &[T],
    ) -> MemoryResult<()> {
        self.writer().write_array(address, values)
    }

    /// Read a null-terminated string
    pub fn read_string(
        &self,
        address: impl Into<MemoryAddress>,
        encoding: StringEncoding,
        max_bytes: usize,
    ) -> MemoryResult<String> {
        self.reader().read_string(address, encoding, max_bytes)
    }

    /// Write a string, optionally followed by its terminator
    pub fn write_string(
        &self,
        address: impl Into<MemoryAddress>,
        text: &str,
        encoding: StringEncoding,
        append_terminator: bool,
    ) -> MemoryResult<()> {
        self.writer().write_string(address, text, encoding, append_terminator)
    }

    /// Read a runtime-typed value
    pub fn read_dynamic(
        &self,
        address: impl Into<MemoryAddress>,
        value_type: ValueType,
        len: Option<usize>,
    ) -> MemoryResult<MemoryValue> {
        self.reader().read_dynamic(address, value_type, len)
    }

    /// Write a runtime-typed value
    pub fn write_dynamic(
        &self,
        address: impl Into<MemoryAddress>,
        value: &MemoryValue,
    ) -> MemoryResult<()> {
        self.writer().write_dynamic(address, value)
    }
}

/// Re-express an absolute address as an offset from `module_base`
///
/// Pure arithmetic; wraps instead of failing so that it can also be used
/// to compare addresses that lie below the base.
pub fn rebase(address: Address, module_base: Address) -> Address {
    Address::new(address.as_usize().wrapping_sub(module_base.as_usize()))
}
