//! Memory address wrapper types with hex parsing and module-relative resolution

use super::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents an absolute address in a target address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub usize);

impl Address {
    /// Creates a new address from a usize value
    pub const fn new(value: usize) -> Self {
        Address(value)
    }

    /// Creates a null address (0x0)
    pub const fn null() -> Self {
        Address(0)
    }

    /// Checks if the address is null
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the address is aligned to the specified boundary
    pub const fn is_aligned(&self, alignment: usize) -> bool {
        alignment != 0 && self.0 % alignment == 0
    }

    /// Aligns the address down to the specified boundary
    pub const fn align_down(&self, alignment: usize) -> Self {
        if alignment == 0 {
            return *self;
        }
        Address(self.0 & !(alignment - 1))
    }

    /// Aligns the address up to the specified boundary
    pub const fn align_up(&self, alignment: usize) -> Self {
        if alignment == 0 {
            return *self;
        }
        Address((self.0 + alignment - 1) & !(alignment - 1))
    }

    /// Adds a signed offset to the address, wrapping on overflow
    pub const fn offset(&self, offset: isize) -> Self {
        Address(self.0.wrapping_add_signed(offset))
    }

    /// Adds an unsigned offset, failing instead of wrapping
    pub fn checked_add(&self, offset: usize) -> MemoryResult<Self> {
        self.0
            .checked_add(offset)
            .map(Address)
            .ok_or_else(|| MemoryError::invalid_address(self, format!("overflow adding {:#x}", offset)))
    }

    /// Re-expresses an address loaded at `from` as if the module were loaded at `to`
    pub const fn rebase(&self, from: Address, to: Address) -> Self {
        Address(self.0.wrapping_sub(from.0).wrapping_add(to.0))
    }

    /// Returns the distance from `base` to this address
    pub fn offset_from(&self, base: Address) -> MemoryResult<usize> {
        self.0
            .checked_sub(base.0)
            .ok_or_else(|| MemoryError::invalid_address(self, format!("below base {}", base)))
    }

    /// Returns the raw usize value
    pub const fn as_usize(&self) -> usize {
        self.0
    }
}

impl FromStr for Address {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            usize::from_str_radix(hex, 16)
        } else if let Some(hex) = s.strip_prefix('$') {
            usize::from_str_radix(hex, 16)
        } else if s.chars().any(|c| c.is_ascii_alphabetic()) {
            usize::from_str_radix(s, 16)
        } else {
            s.parse::<usize>().or_else(|_| usize::from_str_radix(s, 16))
        };

        value
            .map(Address::new)
            .map_err(|_| MemoryError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<usize> for Address {
    fn from(value: usize) -> Self {
        Address::new(value)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address::new(value as usize)
    }
}

/// An address as the caller expressed it: either absolute, or an offset
/// from a module's load base that is only meaningful once resolved.
///
/// Deliberately neither `PartialEq` nor `Serialize`: a module-relative value
/// compared or persisted without a base is a different address in every
/// context it is resolved against.
#[derive(Debug, Clone, Copy)]
pub enum MemoryAddress {
    /// Raw address in the target context
    Absolute(Address),
    /// Offset added to the module base at resolution time
    ModuleRelative(usize),
}

impl MemoryAddress {
    /// Creates a module-relative address
    pub const fn relative(offset: usize) -> Self {
        MemoryAddress::ModuleRelative(offset)
    }

    /// Whether this address still needs a module base
    pub const fn is_relative(&self) -> bool {
        matches!(self, MemoryAddress::ModuleRelative(_))
    }

    /// Resolves to an absolute address against `module_base`
    pub fn resolve(&self, module_base: Option<Address>) -> MemoryResult<Address> {
        match *self {
            MemoryAddress::Absolute(address) => Ok(address),
            MemoryAddress::ModuleRelative(offset) => match module_base {
                Some(base) => to_absolute(offset, base),
                None => Err(MemoryError::InvalidAddress(format!(
                    "module-relative offset {:#x} used without a module base",
                    offset
                ))),
            },
        }
    }
}

impl From<Address> for MemoryAddress {
    fn from(address: Address) -> Self {
        MemoryAddress::Absolute(address)
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryAddress::Absolute(address) => write!(f, "{}", address),
            MemoryAddress::ModuleRelative(offset) => write!(f, "module+{:#x}", offset),
        }
    }
}

/// Turns a module-relative offset into an absolute address
pub fn to_absolute(offset: usize, module_base: Address) -> MemoryResult<Address> {
    module_base.checked_add(offset)
}

/// Turns an absolute address into an offset from `module_base`
pub fn to_relative(address: Address, module_base: Address) -> MemoryResult<usize> {
    address.offset_from(module_base)
}
