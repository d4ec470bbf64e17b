//! Type-directed memory reading

use super::{MarshalContext, StringEncoding, DEFAULT_MAX_STRING_BYTES};
use crate::core::types::{Address, MemoryAddress, MemoryError, MemoryResult, MemoryValue, ValueType};
use crate::layout::{Marshal, TypeCategory, TypeLayout};

/// Reads typed values out of a target
#[derive(Clone, Copy)]
pub struct MemoryReader<'a> {
    pub(super) context: MarshalContext<'a>,
}

impl<'a> MemoryReader<'a> {
    /// Create a new memory reader
    pub fn new(context: MarshalContext<'a>) -> Self {
        MemoryReader { context }
    }

    /// Read raw bytes from memory
    pub fn read_bytes(&self, address: impl Into<MemoryAddress>, len: usize) -> MemoryResult<Vec<u8>> {
        let address = self.context.resolve(address)?;
        self.read_block(address, len)
    }

    /// Read a typed value from memory
    pub fn read<T: Marshal>(&self, address: impl Into<MemoryAddress>) -> MemoryResult<T> {
        let layout = self.context.registry().resolve::<T>()?;
        let address = self.context.resolve(address)?;
        self.read_with_layout(address, &layout)
    }

    /// Read `count` consecutive values of `T`
    ///
    /// Categories with a bulk-copy mapping are fetched with one provider
    /// call and therefore form a consistent snapshot. Addresses and
    /// aggregates are read element by element, so a concurrent writer in
    /// the target can produce a torn result.
    pub fn read_array<T: Marshal>(
        &self,
        address: impl Into<MemoryAddress>,
        count: usize,
    ) -> MemoryResult<Vec<T>> {
        let layout = self.context.registry().resolve::<T>()?;
        let address = self.context.resolve(address)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        if layout.category.supports_bulk_copy() {
            let total = layout.size.checked_mul(count).ok_or_else(|| {
                MemoryError::InvalidValueType(format!(
                    "{} elements of {} bytes overflow",
                    count, layout.size
                ))
            })?;
            let bytes = self.read_block(address, total)?;
            return bytes.chunks_exact(layout.size).map(T::decode).collect();
        }

        let stride = self.stride(&layout);
        (0..count)
            .map(|index| {
                let element = address.checked_add(index * stride)?;
                self.read_with_layout(element, &layout)
            })
            .collect()
    }

    /// Read a pointer-width slot and widen it to a local address
    pub fn read_pointer(&self, address: impl Into<MemoryAddress>) -> MemoryResult<Address> {
        let address = self.context.resolve(address)?;
        self.read_pointer_at(address)
    }

    /// Follow a chain of offsets: each step reads a pointer and adds the next offset
    pub fn read_pointer_chain(
        &self,
        address: impl Into<MemoryAddress>,
        offsets: &[isize],
    ) -> MemoryResult<Address> {
        let mut current = self.context.resolve(address)?;
        for &offset in offsets {
            let pointer = self.read_pointer_at(current)?;
            if pointer.is_null() {
                return Err(MemoryError::invalid_address(current, "null pointer in chain"));
            }
            current = pointer.offset(offset);
        }
        Ok(current)
    }

    /// Read a null-terminated string, decoding the whole buffer if no terminator is found
    pub fn read_string(
        &self,
        address: impl Into<MemoryAddress>,
        encoding: StringEncoding,
        max_bytes: usize,
    ) -> MemoryResult<String> {
        self.read_string_detailed(address, encoding, max_bytes)
            .map(|read| read.text)
    }

    /// Read a runtime-typed value
    ///
    /// `len` is required for [`ValueType::Bytes`]; for [`ValueType::String`]
    /// it bounds the UTF-8 terminator search.
    pub fn read_dynamic(
        &self,
        address: impl Into<MemoryAddress>,
        value_type: ValueType,
        len: Option<usize>,
    ) -> MemoryResult<MemoryValue> {
        let address = self.context.resolve(address)?;
        match (value_type.category(), value_type) {
            (Some(TypeCategory::Address), _) => {
                Ok(MemoryValue::Pointer(self.read_pointer_at(address)?))
            }
            (Some(category), _) => {
                let size = category.fixed_size().ok_or_else(|| {
                    MemoryError::InvalidValueType(format!("{:?} has no fixed size", value_type))
                })?;
                let bytes = self.read_block(address, size)?;
                MemoryValue::from_bytes(&bytes, value_type)
            }
            (None, ValueType::String) => {
                let max_bytes = len.unwrap_or(DEFAULT_MAX_STRING_BYTES);
                self.read_string(address, StringEncoding::Utf8, max_bytes)
                    .map(MemoryValue::String)
            }
            (None, _) => {
                let len = len.ok_or_else(|| {
                    MemoryError::InvalidValueType("byte reads need a length".to_string())
                })?;
                self.read_block(address, len).map(MemoryValue::Bytes)
            }
        }
    }

    pub(super) fn read_block(&self, address: Address, len: usize) -> MemoryResult<Vec<u8>> {
        self.context.check_read_size(len)?;
        self.context.provider().read_vec(address, len)
    }

    pub(super) fn read_pointer_at(&self, address: Address) -> MemoryResult<Address> {
        let provider = self.context.provider();
        let bytes = self.read_block(address, provider.pointer_width())?;
        widen_pointer(&bytes, provider.is_little_endian())
            .ok_or_else(|| MemoryError::invalid_address(address, "pointer does not fit a local address"))
    }

    fn read_with_layout<T: Marshal>(&self, address: Address, layout: &TypeLayout) -> MemoryResult<T> {
        match layout.category {
            TypeCategory::Address => {
                let pointer = self.read_pointer_at(address)?;
                T::decode(&pointer.as_usize().to_ne_bytes())
            }
            _ => {
                let bytes = self.read_block(address, layout.size)?;
                T::decode(&bytes)
            }
        }
    }

    /// Distance between consecutive elements in the target
    pub(super) fn stride(&self, layout: &TypeLayout) -> usize {
        if layout.category == TypeCategory::Address {
            self.context.provider().pointer_width()
        } else {
            layout.size
        }
    }
}

/// Interpret a 4- or 8-byte slot as an address in the target's byte order
fn widen_pointer(bytes: &[u8], little_endian: bool) -> Option<Address> {
    let mut slot = [0u8; 8];
    let value = if little_endian {
        slot[..bytes.len()].copy_from_slice(bytes);
        u64::from_le_bytes(slot)
    } else {
        slot[8 - bytes.len()..].copy_from_slice(bytes);
        u64::from_be_bytes(slot)
    };
    usize::try_from(value).ok().map(Address::new)
}
