//! A span of memory inside one target context

use super::{ProtectionFlags, ProtectionGuard, RegionInfo, RegionState};
use crate::core::types::{Address, ContextId, MemoryResult};
use crate::memory::MemoryOperations;
use crate::provider::MemoryProvider;
use std::fmt;
use std::sync::Arc;

/// A region of a target address space, queried live on every access
///
/// Size, protection and state are never cached: another thread or the
/// target itself may change them at any time.
#[derive(Clone)]
pub struct RemoteRegion {
    provider: Arc<dyn MemoryProvider>,
    base: Address,
}

impl RemoteRegion {
    pub fn new(provider: Arc<dyn MemoryProvider>, base: Address) -> Self {
        RemoteRegion { provider, base }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn context_id(&self) -> ContextId {
        self.provider.context_id()
    }

    pub fn provider(&self) -> &Arc<dyn MemoryProvider> {
        &self.provider
    }

    /// Current attributes as reported by the provider
    pub fn information(&self) -> MemoryResult<RegionInfo> {
        self.provider.query_region(self.base)
    }

    pub fn size(&self) -> MemoryResult<usize> {
        self.information().map(|info| info.size)
    }

    pub fn protection(&self) -> MemoryResult<ProtectionFlags> {
        self.information().map(|info| info.protection)
    }

    pub fn state(&self) -> MemoryResult<RegionState> {
        self.information().map(|info| info.state)
    }

    /// True while the owning context is alive and the region is not free
    pub fn is_valid(&self) -> bool {
        !self.base.is_null()
            && self.provider.is_alive()
            && self
                .information()
                .map(|info| info.state != RegionState::Free)
                .unwrap_or(false)
    }

    /// Change protection of the whole region
    ///
    /// With `auto_restore` the previous protection comes back when the
    /// returned guard is dropped.
    pub fn change_protection(
        &self,
        flags: ProtectionFlags,
        auto_restore: bool,
    ) -> MemoryResult<ProtectionGuard<'_>> {
        let size = self.size()?;
        ProtectionGuard::apply(self.provider.as_ref(), self.base, size, flags, auto_restore)
    }

    /// Typed access where module-relative addresses are offsets into this region
    pub fn memory(&self) -> MemoryOperations<'_> {
        MemoryOperations::new(self.provider.as_ref()).with_module_base(self.base)
    }
}

impl PartialEq for RemoteRegion {
    fn eq(&self, other: &Self) -> bool {
        self.context_id() == other.context_id()
            && self.base == other.base
            && matches!((self.size(), other.size()), (Ok(a), Ok(b)) if a == b)
    }
}

impl fmt::Debug for RemoteRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRegion")
            .field("context", &self.context_id())
            .field("base", &self.base)
            .finish()
    }
}
