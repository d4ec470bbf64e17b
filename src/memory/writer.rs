//! Type-directed memory writing

use super::regions::{ProtectionFlags, ProtectionGuard};
use super::{MarshalContext, StringEncoding};
use crate::core::types::{Address, MemoryAddress, MemoryError, MemoryResult, MemoryValue};
use crate::layout::{Marshal, TypeCategory, TypeLayout};
use tracing::debug;

/// Writes typed values into a target
#[derive(Clone, Copy)]
pub struct MemoryWriter<'a> {
    pub(super) context: MarshalContext<'a>,
    auto_protect: bool,
}

impl<'a> MemoryWriter<'a> {
    /// Create a new memory writer
    pub fn new(context: MarshalContext<'a>) -> Self {
        MemoryWriter {
            context,
            auto_protect: false,
        }
    }

    /// Lift write protection for the duration of each write when needed
    pub fn with_auto_protect(mut self, enabled: bool) -> Self {
        self.auto_protect = enabled;
        self
    }

    /// Write raw bytes with a single provider call
    ///
    /// Fewer bytes written than requested is reported as
    /// [`MemoryError::PartialWrite`] and never retried.
    pub fn write_bytes(&self, address: impl Into<MemoryAddress>, data: &[u8]) -> MemoryResult<()> {
        let address = self.context.resolve(address)?;
        if data.is_empty() {
            return Ok(());
        }

        let _guards = if self.auto_protect {
            self.unprotect(address, data.len())?
        } else {
            Vec::new()
        };

        let written = self.context.provider().write_bytes(address, data)?;
        if written != data.len() {
            return Err(MemoryError::partial_write(address, data.len(), written));
        }
        Ok(())
    }

    /// Write a typed value to memory
    pub fn write<T: Marshal>(&self, address: impl Into<MemoryAddress>, value: &T) -> MemoryResult<()> {
        let layout = self.context.registry().resolve::<T>()?;
        let mut staging = Vec::with_capacity(layout.size);
        self.stage(&layout, value, &mut staging)?;
        self.write_bytes(address, &staging)
    }

    /// Serialize every value into one buffer and write it with one call
    pub fn write_array<T: Marshal>(
        &self,
        address: impl Into<MemoryAddress>,
        values: &[T],
    ) -> MemoryResult<()> {
        let layout = self.context.registry().resolve::<T>()?;
        let mut staging = Vec::with_capacity(layout.size.saturating_mul(values.len()));
        for value in values {
            self.stage(&layout, value, &mut staging)?;
        }
        self.write_bytes(address, &staging)
    }

    /// Write an address as a pointer-width slot in the target's byte order
    pub fn write_pointer(&self, address: impl Into<MemoryAddress>, pointer: Address) -> MemoryResult<()> {
        let mut staging = Vec::with_capacity(8);
        self.stage_pointer(pointer, &mut staging)?;
        self.write_bytes(address, &staging)
    }

    /// Write a runtime-typed value
    ///
    /// Strings are written as UTF-8 with a terminator.
    pub fn write_dynamic(&self, address: impl Into<MemoryAddress>, value: &MemoryValue) -> MemoryResult<()> {
        match value {
            MemoryValue::Pointer(pointer) => self.write_pointer(address, *pointer),
            MemoryValue::String(text) => self.write_string(address, text, StringEncoding::Utf8, true),
            other => self.write_bytes(address, &other.to_bytes()),
        }
    }

    fn stage<T: Marshal>(&self, layout: &TypeLayout, value: &T, out: &mut Vec<u8>) -> MemoryResult<()> {
        let start = out.len();
        value.encode(out);

        if layout.category == TypeCategory::Address {
            let raw = out.split_off(start);
            let pointer = Address::decode(&raw)?;
            return self.stage_pointer(pointer, out);
        }

        let encoded = out.len() - start;
        if encoded != layout.size {
            return Err(MemoryError::InvalidValueType(format!(
                "{} encoded {} bytes, layout says {}",
                layout.type_name, encoded, layout.size
            )));
        }
        Ok(())
    }

    fn stage_pointer(&self, pointer: Address, out: &mut Vec<u8>) -> MemoryResult<()> {
        let provider = self.context.provider();
        let width = provider.pointer_width();
        let value = pointer.as_usize() as u64;
        if width < 8 && value >> (width * 8) != 0 {
            return Err(MemoryError::invalid_address(
                pointer,
                format!("does not fit a {}-byte pointer", width),
            ));
        }

        if provider.is_little_endian() {
            out.extend_from_slice(&value.to_le_bytes()[..width]);
        } else {
            out.extend_from_slice(&value.to_be_bytes()[8 - width..]);
        }
        Ok(())
    }

    /// Make every page of `[address, address + len)` writable
    ///
    /// Each protection run is lifted separately so that restoring puts back
    /// its own flags. Uncommitted pages are left for the write to report.
    fn unprotect(&self, address: Address, len: usize) -> MemoryResult<Vec<ProtectionGuard<'a>>> {
        let provider = self.context.provider();
        let end = address.checked_add(len)?;
        let mut guards = Vec::new();
        let mut cursor = address;

        while cursor < end {
            let region = provider.query_region(cursor)?;
            let run_end = region.end().min(end);
            if !region.is_committed() || run_end <= cursor {
                break;
            }
            if !region.protection.is_writable() {
                let span = run_end.offset_from(cursor)?;
                debug!(
                    address = %cursor,
                    len = span,
                    protection = %region.protection,
                    "Lifting write protection"
                );
                guards.push(ProtectionGuard::apply(
                    provider,
                    cursor,
                    span,
                    ProtectionFlags::execute_read_write(),
                    true,
                )?);
            }
            cursor = run_end;
        }
        Ok(guards)
    }
}
