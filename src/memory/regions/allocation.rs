//! Owned remote allocations and the table that tracks them

use super::{ProtectionFlags, ProtectionGuard, RegionState, RemoteRegion};
use crate::core::types::{Address, ContextId, MemoryError, MemoryResult};
use crate::layout::Marshal;
use crate::memory::MemoryOperations;
use crate::provider::MemoryProvider;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a remote allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    /// Address space exists but no pages are committed
    Uncommitted,
    Committed,
    Released,
}

/// Memory allocated in a target and owned by this value
///
/// The allocation is freed at most once. With `must_be_disposed` set it is
/// freed when dropped; otherwise dropping leaves the memory in the target.
pub struct RemoteAllocation {
    provider: Arc<dyn MemoryProvider>,
    base: AtomicUsize,
    size: usize,
    released: AtomicBool,
    must_be_disposed: bool,
}

impl RemoteAllocation {
    /// Allocate `size` bytes in the target
    pub fn allocate(
        provider: Arc<dyn MemoryProvider>,
        size: usize,
        protection: ProtectionFlags,
        must_be_disposed: bool,
    ) -> MemoryResult<Self> {
        let base = provider.allocate(size, protection).map_err(|err| match err {
            err @ MemoryError::Allocation { .. } => err,
            other => MemoryError::allocation(size, other.to_string()),
        })?;

        info!(
            context = provider.context_id(),
            %base,
            size,
            %protection,
            "Allocated remote memory"
        );
        Ok(RemoteAllocation {
            provider,
            base: AtomicUsize::new(base.as_usize()),
            size,
            released: AtomicBool::new(false),
            must_be_disposed,
        })
    }

    /// Base address, or `AllocationReleased` once freed
    pub fn base(&self) -> MemoryResult<Address> {
        let base = Address::new(self.base.load(Ordering::Acquire));
        if self.is_released() || base.is_null() {
            return Err(MemoryError::AllocationReleased(base.to_string()));
        }
        Ok(base)
    }

    /// Requested size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn context_id(&self) -> ContextId {
        self.provider.context_id()
    }

    pub fn must_be_disposed(&self) -> bool {
        self.must_be_disposed
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn state(&self) -> AllocationState {
        let Ok(base) = self.base() else {
            return AllocationState::Released;
        };
        match self.provider.query_region(base) {
            Ok(info) if info.state == RegionState::Reserved => AllocationState::Uncommitted,
            _ => AllocationState::Committed,
        }
    }

    /// Not released, context alive, and the target still has the pages
    pub fn is_valid(&self) -> bool {
        self.region().map(|region| region.is_valid()).unwrap_or(false)
    }

    /// Live view of the allocated span
    pub fn region(&self) -> MemoryResult<RemoteRegion> {
        Ok(RemoteRegion::new(Arc::clone(&self.provider), self.base()?))
    }

    /// Typed access where module-relative addresses are offsets into the allocation
    pub fn memory(&self) -> MemoryResult<MemoryOperations<'_>> {
        Ok(MemoryOperations::new(self.provider.as_ref()).with_module_base(self.base()?))
    }

    /// Read a value at `offset` from the start of the allocation
    pub fn read<T: Marshal>(&self, offset: usize) -> MemoryResult<T> {
        let address = self.base()?.checked_add(offset)?;
        MemoryOperations::new(self.provider.as_ref()).read(address)
    }

    /// Write a value at `offset` from the start of the allocation
    pub fn write<T: Marshal>(&self, offset: usize, value: &T) -> MemoryResult<()> {
        let address = self.base()?.checked_add(offset)?;
        MemoryOperations::new(self.provider.as_ref()).write(address, value)
    }

    /// Change protection of the allocation
    pub fn change_protection(
        &self,
        flags: ProtectionFlags,
        auto_restore: bool,
    ) -> MemoryResult<ProtectionGuard<'_>> {
        ProtectionGuard::apply(
            self.provider.as_ref(),
            self.base()?,
            self.size,
            flags,
            auto_restore,
        )
    }

    /// Free the allocation; returns whether this call did the work
    ///
    /// Only the first call reaches the provider. Free failures are logged
    /// and swallowed since the target may already be gone.
    pub fn release(&self) -> bool {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let base = Address::new(self.base.swap(0, Ordering::AcqRel));
        match self.provider.free(base) {
            Ok(()) => info!(context = self.provider.context_id(), %base, "Released remote memory"),
            Err(err) => warn!(
                context = self.provider.context_id(),
                %base,
                error = %err,
                "Failed to release remote memory"
            ),
        }
        true
    }
}

impl Drop for RemoteAllocation {
    fn drop(&mut self) {
        if self.must_be_disposed {
            self.release();
        } else if !self.is_released() {
            debug!(base = self.base.load(Ordering::Relaxed), "Leaving allocation in target");
        }
    }
}

impl fmt::Debug for RemoteAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAllocation")
            .field("context", &self.context_id())
            .field("base", &Address::new(self.base.load(Ordering::Relaxed)))
            .field("size", &self.size)
            .field("released", &self.is_released())
            .field("must_be_disposed", &self.must_be_disposed)
            .finish()
    }
}

/// Sole owner of a set of allocations, keyed by base address
///
/// Anything still tracked is released when the table is dropped.
#[derive(Default)]
pub struct AllocationTable {
    entries: Mutex<BTreeMap<Address, RemoteAllocation>>,
}

impl AllocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an allocation
    pub fn adopt(&self, allocation: RemoteAllocation) -> MemoryResult<Address> {
        let base = allocation.base()?;
        let mut entries = self.entries.lock();
        if entries.contains_key(&base) {
            return Err(MemoryError::invalid_address(base, "already tracked"));
        }
        entries.insert(base, allocation);
        Ok(base)
    }

    /// Allocate and adopt in one step
    pub fn allocate(
        &self,
        provider: Arc<dyn MemoryProvider>,
        size: usize,
        protection: ProtectionFlags,
    ) -> MemoryResult<Address> {
        self.adopt(RemoteAllocation::allocate(provider, size, protection, true)?)
    }

    /// Run `f` against a tracked allocation
    ///
    /// An allocation that `f` released is dropped from the table.
    pub fn with<R>(&self, base: Address, f: impl FnOnce(&RemoteAllocation) -> R) -> Option<R> {
        let mut entries = self.entries.lock();
        let result = entries.get(&base).map(f)?;
        if entries.get(&base).is_some_and(RemoteAllocation::is_released) {
            entries.remove(&base);
        }
        Some(result)
    }

    /// Stop tracking an allocation and hand ownership back
    pub fn take(&self, base: Address) -> Option<RemoteAllocation> {
        self.entries.lock().remove(&base)
    }

    /// Release and forget one allocation
    pub fn release(&self, base: Address) -> bool {
        match self.take(base) {
            Some(allocation) => allocation.release(),
            None => false,
        }
    }

    /// Release everything, returning how many allocations were freed
    pub fn release_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.entries.lock());
        drained
            .into_values()
            .filter(|allocation| allocation.release())
            .count()
    }

    pub fn contains(&self, base: Address) -> bool {
        self.entries.lock().contains_key(&base)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Drop for AllocationTable {
    fn drop(&mut self) {
        let released = self.release_all();
        if released > 0 {
            debug!(released, "Allocation table dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SandboxMemory;

    #[test]
    fn test_release_is_idempotent() {
        let sandbox = Arc::new(SandboxMemory::new());
        let allocation =
            RemoteAllocation::allocate(sandbox.clone(), 64, ProtectionFlags::read_write(), false)
                .unwrap();
        assert!(allocation.is_valid());
        assert_eq!(allocation.state(), AllocationState::Committed);

        assert!(allocation.release());
        assert!(!allocation.release());
        assert_eq!(sandbox.stats().frees, 1);
        assert!(!allocation.is_valid());
        assert_eq!(allocation.state(), AllocationState::Released);
        assert!(matches!(
            allocation.base(),
            Err(MemoryError::AllocationReleased(_))
        ));
        assert!(matches!(
            allocation.read::<u32>(0),
            Err(MemoryError::AllocationReleased(_))
        ));
    }

    #[test]
    fn test_drop_releases_when_disposable() {
        let sandbox = Arc::new(SandboxMemory::new());
        let base = {
            let allocation =
                RemoteAllocation::allocate(sandbox.clone(), 16, ProtectionFlags::read_write(), true)
                    .unwrap();
            allocation.base().unwrap()
        };
        assert_eq!(sandbox.stats().frees, 1);
        assert_eq!(sandbox.query_region(base).unwrap().state, RegionState::Free);

        {
            let _kept =
                RemoteAllocation::allocate(sandbox.clone(), 16, ProtectionFlags::read_write(), false)
                    .unwrap();
        }
        assert_eq!(sandbox.stats().frees, 1);
    }

    #[test]
    fn test_allocation_failure() {
        let sandbox = Arc::new(SandboxMemory::new().with_limit(0x1000));
        assert!(matches!(
            RemoteAllocation::allocate(sandbox.clone(), 0x2000, ProtectionFlags::read_write(), true),
            Err(MemoryError::Allocation { .. })
        ));
        assert_eq!(sandbox.stats().allocations, 0);

        sandbox.terminate();
        assert!(matches!(
            RemoteAllocation::allocate(sandbox, 16, ProtectionFlags::read_write(), true),
            Err(MemoryError::Allocation { .. })
        ));
    }

    #[test]
    fn test_release_failure_is_swallowed() {
        let sandbox = Arc::new(SandboxMemory::new());
        let allocation =
            RemoteAllocation::allocate(sandbox.clone(), 16, ProtectionFlags::read_write(), true)
                .unwrap();
        sandbox.terminate();
        assert!(allocation.release());
        assert!(allocation.is_released());
    }

    #[test]
    fn test_typed_access() {
        let sandbox = Arc::new(SandboxMemory::new());
        let allocation =
            RemoteAllocation::allocate(sandbox, 32, ProtectionFlags::read_write(), true).unwrap();
        allocation.write(8, &1.5f64).unwrap();
        assert_eq!(allocation.read::<f64>(8).unwrap(), 1.5);
    }

    #[test]
    fn test_table_owns_allocations() {
        let sandbox = Arc::new(SandboxMemory::new());
        let table = AllocationTable::new();

        let first = table
            .allocate(sandbox.clone(), 16, ProtectionFlags::read_write())
            .unwrap();
        let second = table
            .adopt(
                RemoteAllocation::allocate(sandbox.clone(), 16, ProtectionFlags::read_write(), false)
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.with(first, |a| a.size()), Some(16));

        assert!(table.release(first));
        assert!(!table.contains(first));
        assert!(!table.release(first));

        drop(table);
        assert_eq!(sandbox.stats().frees, 2);
        assert_eq!(sandbox.query_region(second).unwrap().state, RegionState::Free);
    }

    #[test]
    fn test_release_through_with_untracks() {
        let sandbox = Arc::new(SandboxMemory::new());
        let table = AllocationTable::new();
        let base = table
            .allocate(sandbox.clone(), 16, ProtectionFlags::read_write())
            .unwrap();
        let kept = table
            .allocate(sandbox.clone(), 16, ProtectionFlags::read_write())
            .unwrap();

        assert_eq!(table.with(base, RemoteAllocation::release), Some(true));
        assert!(!table.contains(base));
        assert_eq!(table.with(base, RemoteAllocation::release), None);
        assert!(table.contains(kept));
        assert_eq!(table.len(), 1);
        assert_eq!(sandbox.stats().frees, 1);

        drop(table);
        assert_eq!(sandbox.stats().frees, 2);
    }

    #[test]
    fn test_table_rejects_released() {
        let sandbox = Arc::new(SandboxMemory::new());
        let allocation =
            RemoteAllocation::allocate(sandbox, 16, ProtectionFlags::read_write(), true).unwrap();
        allocation.release();
        let table = AllocationTable::new();
        assert!(table.adopt(allocation).is_err());
        assert!(table.is_empty());
    }
}
