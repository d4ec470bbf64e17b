//! Memory protection flags and scoped protection changes

use crate::core::types::{Address, MemoryError, MemoryResult};
use crate::provider::MemoryProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Memory protection flags using the Windows `PAGE_*` encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectionFlags {
    value: u32,
}

impl ProtectionFlags {
    pub const PAGE_NOACCESS: u32 = 0x01;
    pub const PAGE_READONLY: u32 = 0x02;
    pub const PAGE_READWRITE: u32 = 0x04;
    pub const PAGE_WRITECOPY: u32 = 0x08;
    pub const PAGE_EXECUTE: u32 = 0x10;
    pub const PAGE_EXECUTE_READ: u32 = 0x20;
    pub const PAGE_EXECUTE_READWRITE: u32 = 0x40;
    pub const PAGE_EXECUTE_WRITECOPY: u32 = 0x80;
    pub const PAGE_GUARD: u32 = 0x100;
    pub const PAGE_NOCACHE: u32 = 0x200;

    /// Create new protection flags
    pub const fn new(value: u32) -> Self {
        ProtectionFlags { value }
    }

    pub const fn no_access() -> Self {
        ProtectionFlags::new(Self::PAGE_NOACCESS)
    }

    pub const fn read_only() -> Self {
        ProtectionFlags::new(Self::PAGE_READONLY)
    }

    pub const fn read_write() -> Self {
        ProtectionFlags::new(Self::PAGE_READWRITE)
    }

    pub const fn execute() -> Self {
        ProtectionFlags::new(Self::PAGE_EXECUTE)
    }

    pub const fn execute_read() -> Self {
        ProtectionFlags::new(Self::PAGE_EXECUTE_READ)
    }

    pub const fn execute_read_write() -> Self {
        ProtectionFlags::new(Self::PAGE_EXECUTE_READWRITE)
    }

    fn base(&self) -> u32 {
        self.value & 0xFF
    }

    /// Check if protection allows reading
    pub fn is_readable(&self) -> bool {
        !self.is_guard()
            && (self.base()
                & (Self::PAGE_READONLY
                    | Self::PAGE_READWRITE
                    | Self::PAGE_WRITECOPY
                    | Self::PAGE_EXECUTE_READ
                    | Self::PAGE_EXECUTE_READWRITE
                    | Self::PAGE_EXECUTE_WRITECOPY))
                != 0
    }

    /// Check if protection allows writing
    pub fn is_writable(&self) -> bool {
        !self.is_guard()
            && (self.base()
                & (Self::PAGE_READWRITE
                    | Self::PAGE_WRITECOPY
                    | Self::PAGE_EXECUTE_READWRITE
                    | Self::PAGE_EXECUTE_WRITECOPY))
                != 0
    }

    /// Check if protection allows execution
    pub fn is_executable(&self) -> bool {
        (self.base()
            & (Self::PAGE_EXECUTE
                | Self::PAGE_EXECUTE_READ
                | Self::PAGE_EXECUTE_READWRITE
                | Self::PAGE_EXECUTE_WRITECOPY))
            != 0
    }

    /// Check if guard page flag is set
    pub fn is_guard(&self) -> bool {
        (self.value & Self::PAGE_GUARD) != 0
    }

    /// Add guard page flag
    pub fn with_guard(mut self) -> Self {
        self.value |= Self::PAGE_GUARD;
        self
    }

    /// Remove guard page flag
    pub fn without_guard(mut self) -> Self {
        self.value &= !Self::PAGE_GUARD;
        self
    }

    /// Get the raw protection value
    pub const fn raw(&self) -> u32 {
        self.value
    }

    fn format_string(&self) -> String {
        let base = match self.base() {
            Self::PAGE_NOACCESS => "NOACCESS",
            Self::PAGE_READONLY => "R",
            Self::PAGE_READWRITE => "RW",
            Self::PAGE_WRITECOPY => "WC",
            Self::PAGE_EXECUTE => "X",
            Self::PAGE_EXECUTE_READ => "RX",
            Self::PAGE_EXECUTE_READWRITE => "RWX",
            Self::PAGE_EXECUTE_WRITECOPY => "WCX",
            _ => "UNKNOWN",
        };

        let mut flags = String::from(base);
        if self.is_guard() {
            flags.push_str("+G");
        }
        if (self.value & Self::PAGE_NOCACHE) != 0 {
            flags.push_str("+NC");
        }
        flags
    }
}

impl std::fmt::Display for ProtectionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format_string())
    }
}

/// A protection change that can be rolled back
///
/// With `auto_restore` the previous protection is put back when the guard
/// goes out of scope, whichever way the enclosing block exits. Restore
/// failures on drop are logged and swallowed; call [`restore`] to observe
/// them instead.
///
/// [`restore`]: ProtectionGuard::restore
#[must_use = "dropping the guard immediately restores the previous protection"]
pub struct ProtectionGuard<'a> {
    provider: &'a dyn MemoryProvider,
    address: Address,
    size: usize,
    previous: ProtectionFlags,
    applied: ProtectionFlags,
    auto_restore: bool,
    restored: bool,
}

impl<'a> ProtectionGuard<'a> {
    /// Apply `flags` to `[address, address + size)`
    pub fn apply(
        provider: &'a dyn MemoryProvider,
        address: Address,
        size: usize,
        flags: ProtectionFlags,
        auto_restore: bool,
    ) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::ProtectionError(format!(
                "cannot change protection of an empty range at {}",
                address
            )));
        }

        let previous = provider.change_protection(address, size, flags)?;
        debug!(%address, size, %previous, applied = %flags, "Changed protection");

        Ok(ProtectionGuard {
            provider,
            address,
            size,
            previous,
            applied: flags,
            auto_restore,
            restored: false,
        })
    }

    /// Protection in effect before the change
    pub fn previous(&self) -> ProtectionFlags {
        self.previous
    }

    /// Protection applied by this guard
    pub fn applied(&self) -> ProtectionFlags {
        self.applied
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Restore the previous protection now, reporting any failure
    pub fn restore(mut self) -> MemoryResult<()> {
        self.restored = true;
        self.restore_previous()
    }

    fn restore_previous(&self) -> MemoryResult<()> {
        self.provider
            .change_protection(self.address, self.size, self.previous)
            .map(|_| ())
    }
}

impl Drop for ProtectionGuard<'_> {
    fn drop(&mut self) {
        if !self.auto_restore || self.restored {
            return;
        }
        self.restored = true;
        if let Err(err) = self.restore_previous() {
            warn!(address = %self.address, error = %err, "Failed to restore protection");
        }
    }
}
