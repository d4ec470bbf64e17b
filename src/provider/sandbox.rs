//! In-process simulated address space
//!
//! `SandboxMemory` behaves like a remote target: memory is page-granular,
//! every page carries its own protection, and only committed pages can be
//! touched. Module images can be mapped at fixed bases so that pattern
//! scans and module-relative addressing work without a live process.

use super::MemoryProvider;
use crate::core::types::{Address, ContextId, MemoryError, MemoryResult};
use crate::memory::regions::{ProtectionFlags, RegionInfo, RegionState};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

/// Page granularity of the sandbox
pub const PAGE_SIZE: usize = 0x1000;

const ALLOCATION_START: usize = 0x10000;
const DEFAULT_LIMIT: usize = 1 << 30;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MappingKind {
    Allocation,
    Image,
}

struct Mapping {
    kind: MappingKind,
    state: RegionState,
    data: Vec<u8>,
    pages: Vec<ProtectionFlags>,
}

impl Mapping {
    /// `len` must already be a whole number of pages
    fn new(kind: MappingKind, state: RegionState, len: usize, protection: ProtectionFlags) -> Self {
        Mapping {
            kind,
            state,
            data: vec![0; len],
            pages: vec![protection; len / PAGE_SIZE],
        }
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

struct AddressSpace {
    mappings: BTreeMap<usize, Mapping>,
    next_base: usize,
    committed: usize,
}

impl AddressSpace {
    /// Mapping holding all of `[address, address + len)`
    fn locate(&self, address: Address, len: usize) -> MemoryResult<(usize, &Mapping)> {
        let start = address.as_usize();
        let end = address.checked_add(len.max(1))?.as_usize();
        match self.mappings.range(..=start).next_back() {
            Some((&base, mapping)) if start < base + mapping.len() => {
                if end > base + mapping.len() {
                    return Err(MemoryError::invalid_address(
                        address,
                        format!("{} bytes run past the end of the region", len),
                    ));
                }
                Ok((base, mapping))
            }
            _ => Err(MemoryError::invalid_address(address, "unmapped")),
        }
    }

    fn locate_mut(&mut self, address: Address, len: usize) -> MemoryResult<(usize, &mut Mapping)> {
        let (base, _) = self.locate(address, len)?;
        let mapping = self
            .mappings
            .get_mut(&base)
            .ok_or_else(|| MemoryError::invalid_address(address, "unmapped"))?;
        Ok((base, mapping))
    }

    /// End of the mapping that collides with `[base, base + len)`, if any
    fn conflict(&self, base: usize, len: usize) -> Option<usize> {
        let end = base.saturating_add(len);
        self.mappings
            .range(..end)
            .next_back()
            .map(|(&start, mapping)| start + mapping.len())
            .filter(|&mapping_end| mapping_end > base)
    }
}

fn round_to_page(len: usize) -> Option<usize> {
    len.checked_next_multiple_of(PAGE_SIZE)
}

fn page_span(base: usize, address: Address, len: usize) -> std::ops::Range<usize> {
    let offset = address.as_usize() - base;
    let first = offset / PAGE_SIZE;
    let last = (offset + len.max(1) - 1) / PAGE_SIZE;
    first..last + 1
}

/// Traffic counters for a sandbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SandboxStats {
    pub reads: u64,
    pub writes: u64,
    pub allocations: u64,
    pub frees: u64,
    pub protection_changes: u64,
}

#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    allocations: AtomicU64,
    frees: AtomicU64,
    protection_changes: AtomicU64,
}

/// Simulated target address space
pub struct SandboxMemory {
    id: ContextId,
    pointer_width: usize,
    limit: usize,
    alive: AtomicBool,
    space: Mutex<AddressSpace>,
    counters: Counters,
}

impl SandboxMemory {
    /// Create an empty 64-bit-pointer sandbox
    pub fn new() -> Self {
        SandboxMemory {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            pointer_width: std::mem::size_of::<usize>(),
            limit: DEFAULT_LIMIT,
            alive: AtomicBool::new(true),
            space: Mutex::new(AddressSpace {
                mappings: BTreeMap::new(),
                next_base: ALLOCATION_START,
                committed: 0,
            }),
            counters: Counters::default(),
        }
    }

    /// Simulate a target with a different pointer width (4 or 8)
    pub fn with_pointer_width(mut self, width: usize) -> MemoryResult<Self> {
        if width != 4 && width != 8 {
            return Err(MemoryError::InvalidValueType(format!(
                "pointer width must be 4 or 8, got {}",
                width
            )));
        }
        self.pointer_width = width;
        Ok(self)
    }

    /// Cap the total bytes that `allocate` may hand out
    pub fn with_limit(mut self, bytes: usize) -> Self {
        self.limit = bytes;
        self
    }

    /// Map a module image at a fixed, page-aligned base
    pub fn map_image(
        &self,
        base: Address,
        image: &[u8],
        protection: ProtectionFlags,
    ) -> MemoryResult<()> {
        self.ensure_alive()?;
        if base.is_null() || !base.is_aligned(PAGE_SIZE) {
            return Err(MemoryError::invalid_address(base, "image base must be page aligned"));
        }
        if image.is_empty() {
            return Err(MemoryError::InvalidValueType("image is empty".to_string()));
        }

        let rounded = round_to_page(image.len())
            .filter(|&len| base.as_usize().checked_add(len).is_some())
            .ok_or_else(|| MemoryError::invalid_address(base, "image does not fit the address space"))?;

        let mut space = self.space.lock();
        if space.conflict(base.as_usize(), rounded).is_some() {
            return Err(MemoryError::invalid_address(base, "overlaps an existing region"));
        }

        let mut mapping = Mapping::new(MappingKind::Image, RegionState::Committed, rounded, protection);
        mapping.data[..image.len()].copy_from_slice(image);
        space.mappings.insert(base.as_usize(), mapping);
        trace!(context = self.id, %base, len = image.len(), "Mapped image");
        Ok(())
    }

    /// Reserve address space without committing it
    pub fn reserve(&self, size: usize) -> MemoryResult<Address> {
        self.insert_allocation(size, ProtectionFlags::no_access(), RegionState::Reserved)
    }

    /// Mark the simulated target as gone
    pub fn terminate(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Read bytes regardless of page protection
    pub fn peek(&self, address: Address, len: usize) -> MemoryResult<Vec<u8>> {
        let space = self.space.lock();
        let (base, mapping) = space.locate(address, len)?;
        let offset = address.as_usize() - base;
        Ok(mapping.data[offset..offset + len].to_vec())
    }

    /// Write bytes regardless of page protection
    pub fn poke(&self, address: Address, data: &[u8]) -> MemoryResult<()> {
        let mut space = self.space.lock();
        let (base, mapping) = space.locate_mut(address, data.len())?;
        let offset = address.as_usize() - base;
        mapping.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Snapshot of the traffic counters
    pub fn stats(&self) -> SandboxStats {
        SandboxStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            allocations: self.counters.allocations.load(Ordering::Relaxed),
            frees: self.counters.frees.load(Ordering::Relaxed),
            protection_changes: self.counters.protection_changes.load(Ordering::Relaxed),
        }
    }

    fn ensure_alive(&self) -> MemoryResult<()> {
        if self.alive.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(MemoryError::ContextLost(self.id))
        }
    }

    fn insert_allocation(
        &self,
        size: usize,
        protection: ProtectionFlags,
        state: RegionState,
    ) -> MemoryResult<Address> {
        self.ensure_alive()?;
        if size == 0 {
            return Err(MemoryError::allocation(size, "size must be non-zero"));
        }
        let rounded = round_to_page(size)
            .ok_or_else(|| MemoryError::allocation(size, "size exceeds the address space"))?;

        let mut space = self.space.lock();
        if space.committed.saturating_add(rounded) > self.limit {
            return Err(MemoryError::allocation(
                size,
                format!("sandbox limit of {} bytes reached", self.limit),
            ));
        }

        let out_of_space = || MemoryError::allocation(size, "no free range large enough");
        let mut base = space.next_base;
        while let Some(end) = space.conflict(base, rounded) {
            base = end.checked_add(PAGE_SIZE).ok_or_else(out_of_space)?;
        }
        let next_base = base
            .checked_add(rounded)
            .and_then(|end| end.checked_add(PAGE_SIZE))
            .ok_or_else(out_of_space)?;

        space
            .mappings
            .insert(base, Mapping::new(MappingKind::Allocation, state, rounded, protection));
        space.committed += rounded;
        space.next_base = next_base;
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);

        let address = Address::new(base);
        trace!(context = self.id, %address, size = rounded, %protection, "Allocated");
        Ok(address)
    }
}

impl Default for SandboxMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider for SandboxMemory {
    fn context_id(&self) -> ContextId {
        self.id
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn pointer_width(&self) -> usize {
        self.pointer_width
    }

    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> MemoryResult<()> {
        self.ensure_alive()?;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);

        let space = self.space.lock();
        let (base, mapping) = space.locate(address, buffer.len())?;
        if mapping.state != RegionState::Committed {
            return Err(MemoryError::invalid_address(address, "region is not committed"));
        }
        for page in page_span(base, address, buffer.len()) {
            let flags = mapping.pages[page];
            if !flags.is_readable() {
                return Err(MemoryError::access_denied(
                    address,
                    format!("page protection {} does not allow reads", flags),
                ));
            }
        }

        let offset = address.as_usize() - base;
        buffer.copy_from_slice(&mapping.data[offset..offset + buffer.len()]);
        trace!(context = self.id, %address, len = buffer.len(), "Read");
        Ok(())
    }

    fn write_bytes(&self, address: Address, data: &[u8]) -> MemoryResult<usize> {
        self.ensure_alive()?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);

        let mut space = self.space.lock();
        let (base, mapping) = space.locate_mut(address, data.len())?;
        if mapping.state != RegionState::Committed {
            return Err(MemoryError::invalid_address(address, "region is not committed"));
        }
        for page in page_span(base, address, data.len()) {
            let flags = mapping.pages[page];
            if !flags.is_writable() {
                return Err(MemoryError::access_denied(
                    address,
                    format!("page protection {} does not allow writes", flags),
                ));
            }
        }

        let offset = address.as_usize() - base;
        mapping.data[offset..offset + data.len()].copy_from_slice(data);
        trace!(context = self.id, %address, len = data.len(), "Wrote");
        Ok(data.len())
    }

    fn allocate(&self, size: usize, protection: ProtectionFlags) -> MemoryResult<Address> {
        self.insert_allocation(size, protection, RegionState::Committed)
    }

    fn free(&self, address: Address) -> MemoryResult<()> {
        self.ensure_alive()?;

        let mut space = self.space.lock();
        match space.mappings.get(&address.as_usize()) {
            Some(mapping) if mapping.kind == MappingKind::Allocation => {}
            Some(_) => return Err(MemoryError::invalid_address(address, "cannot free a mapped image")),
            None => return Err(MemoryError::invalid_address(address, "not an allocation base")),
        }
        if let Some(mapping) = space.mappings.remove(&address.as_usize()) {
            space.committed -= mapping.len();
        }
        self.counters.frees.fetch_add(1, Ordering::Relaxed);
        trace!(context = self.id, %address, "Freed");
        Ok(())
    }

    fn change_protection(
        &self,
        address: Address,
        size: usize,
        protection: ProtectionFlags,
    ) -> MemoryResult<ProtectionFlags> {
        self.ensure_alive()?;
        if size == 0 {
            return Err(MemoryError::ProtectionError(format!(
                "empty range at {}",
                address
            )));
        }

        let mut space = self.space.lock();
        let (base, mapping) = space.locate_mut(address, size)?;
        if mapping.state != RegionState::Committed {
            return Err(MemoryError::ProtectionError(format!(
                "region at {} is not committed",
                address
            )));
        }

        let span = page_span(base, address, size);
        let previous = mapping.pages[span.start];
        for page in span {
            mapping.pages[page] = protection;
        }
        self.counters.protection_changes.fetch_add(1, Ordering::Relaxed);
        Ok(previous)
    }

    fn query_region(&self, address: Address) -> MemoryResult<RegionInfo> {
        self.ensure_alive()?;
        let page_base = address.align_down(PAGE_SIZE);

        let space = self.space.lock();
        match space.locate(address, 1) {
            Ok((base, mapping)) => {
                let first = (page_base.as_usize() - base) / PAGE_SIZE;
                let protection = mapping.pages[first];
                let run = mapping.pages[first..]
                    .iter()
                    .take_while(|flags| **flags == protection)
                    .count();
                Ok(RegionInfo {
                    base: page_base,
                    size: run * PAGE_SIZE,
                    protection,
                    state: mapping.state,
                })
            }
            Err(_) => {
                let size = space
                    .mappings
                    .range(address.as_usize()..)
                    .next()
                    .map(|(&next, _)| next - page_base.as_usize())
                    .unwrap_or(PAGE_SIZE);
                Ok(RegionInfo {
                    base: page_base,
                    size,
                    protection: ProtectionFlags::no_access(),
                    state: RegionState::Free,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_allocate_rounds_to_pages() {
        let sandbox = SandboxMemory::new();
        let first = sandbox.allocate(10, ProtectionFlags::read_write()).unwrap();
        let second = sandbox.allocate(PAGE_SIZE + 1, ProtectionFlags::read_write()).unwrap();

        assert!(first.is_aligned(PAGE_SIZE));
        assert!(second.as_usize() >= first.as_usize() + PAGE_SIZE);
        assert_eq!(sandbox.query_region(first).unwrap().size, PAGE_SIZE);
        assert_eq!(sandbox.query_region(second).unwrap().size, 2 * PAGE_SIZE);
    }

    #[test]
    fn test_read_write_round_trip() {
        let sandbox = SandboxMemory::new();
        let base = sandbox.allocate(64, ProtectionFlags::read_write()).unwrap();

        assert_eq!(sandbox.write_bytes(base.offset(8), &[1, 2, 3]).unwrap(), 3);
        assert_eq!(sandbox.read_vec(base.offset(7), 5).unwrap(), vec![0, 1, 2, 3, 0]);
        assert_eq!(sandbox.stats().writes, 1);
        assert_eq!(sandbox.stats().reads, 1);
    }

    #[test]
    fn test_unmapped_and_protected_access() {
        let sandbox = SandboxMemory::new();
        let mut buffer = [0u8; 4];

        assert!(matches!(
            sandbox.read_bytes(Address::new(0x10), &mut buffer),
            Err(MemoryError::InvalidAddress(_))
        ));

        let locked = sandbox.allocate(16, ProtectionFlags::no_access()).unwrap();
        assert!(matches!(
            sandbox.read_bytes(locked, &mut buffer),
            Err(MemoryError::AccessDenied { .. })
        ));

        let read_only = sandbox.allocate(16, ProtectionFlags::read_only()).unwrap();
        assert!(sandbox.read_bytes(read_only, &mut buffer).is_ok());
        assert!(matches!(
            sandbox.write_bytes(read_only, &[1]),
            Err(MemoryError::AccessDenied { .. })
        ));
    }

    #[test]
    fn test_range_past_region_end() {
        let sandbox = SandboxMemory::new();
        let base = sandbox.allocate(PAGE_SIZE, ProtectionFlags::read_write()).unwrap();
        assert!(matches!(
            sandbox.read_vec(base.offset(PAGE_SIZE as isize - 2), 4),
            Err(MemoryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_free_and_query() {
        let sandbox = SandboxMemory::new();
        let base = sandbox.allocate(32, ProtectionFlags::read_write()).unwrap();
        assert_eq!(sandbox.query_region(base).unwrap().state, RegionState::Committed);

        sandbox.free(base).unwrap();
        assert_eq!(sandbox.query_region(base).unwrap().state, RegionState::Free);
        assert!(sandbox.free(base).is_err());
        assert_eq!(sandbox.stats().frees, 1);
    }

    #[test]
    fn test_reserved_memory_is_not_accessible() {
        let sandbox = SandboxMemory::new();
        let base = sandbox.reserve(PAGE_SIZE).unwrap();
        assert_eq!(sandbox.query_region(base).unwrap().state, RegionState::Reserved);
        assert!(matches!(
            sandbox.read_vec(base, 1),
            Err(MemoryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_protection_changes_split_regions() {
        let sandbox = SandboxMemory::new();
        let base = sandbox.allocate(3 * PAGE_SIZE, ProtectionFlags::read_write()).unwrap();

        let previous = sandbox
            .change_protection(base.offset(PAGE_SIZE as isize), 1, ProtectionFlags::read_only())
            .unwrap();
        assert_eq!(previous, ProtectionFlags::read_write());

        let head = sandbox.query_region(base).unwrap();
        assert_eq!(head.size, PAGE_SIZE);
        let middle = sandbox.query_region(base.offset(PAGE_SIZE as isize + 5)).unwrap();
        assert_eq!(middle.base, base.offset(PAGE_SIZE as isize));
        assert_eq!(middle.protection, ProtectionFlags::read_only());
        assert_eq!(sandbox.stats().protection_changes, 1);
    }

    #[test]
    fn test_map_image() {
        let sandbox = SandboxMemory::new();
        let base = Address::new(0x40_0000);
        sandbox
            .map_image(base, &[0x90, 0xAA, 0xBB], ProtectionFlags::execute_read())
            .unwrap();

        assert_eq!(sandbox.read_vec(base.offset(1), 2).unwrap(), vec![0xAA, 0xBB]);
        assert!(sandbox.map_image(base, &[0], ProtectionFlags::read_only()).is_err());
        assert!(sandbox
            .map_image(Address::new(0x40_0010), &[0], ProtectionFlags::read_only())
            .is_err());
        assert!(matches!(
            sandbox.free(base),
            Err(MemoryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_allocations_skip_mapped_images() {
        let sandbox = SandboxMemory::new();
        sandbox
            .map_image(Address::new(ALLOCATION_START), &[1; 16], ProtectionFlags::read_only())
            .unwrap();
        let base = sandbox.allocate(16, ProtectionFlags::read_write()).unwrap();
        assert!(base.as_usize() > ALLOCATION_START);
    }

    #[test]
    fn test_allocation_limit() {
        let sandbox = SandboxMemory::new().with_limit(PAGE_SIZE);
        assert!(sandbox.allocate(PAGE_SIZE, ProtectionFlags::read_write()).is_ok());
        assert!(matches!(
            sandbox.allocate(1, ProtectionFlags::read_write()),
            Err(MemoryError::Allocation { .. })
        ));
        assert!(matches!(
            sandbox.allocate(0, ProtectionFlags::read_write()),
            Err(MemoryError::Allocation { .. })
        ));
    }

    #[test]
    fn test_oversized_allocation_is_rejected() {
        let sandbox = SandboxMemory::new().with_limit(usize::MAX);
        for size in [usize::MAX, usize::MAX - PAGE_SIZE + 2] {
            assert!(matches!(
                sandbox.allocate(size, ProtectionFlags::read_write()),
                Err(MemoryError::Allocation { .. })
            ));
        }
        assert_eq!(sandbox.stats().allocations, 0);
        assert_eq!(
            sandbox.query_region(Address::new(ALLOCATION_START)).unwrap().state,
            RegionState::Free
        );
    }

    #[test]
    fn test_terminate() {
        let sandbox = SandboxMemory::new();
        let base = sandbox.allocate(16, ProtectionFlags::read_write()).unwrap();
        sandbox.terminate();

        assert!(!sandbox.is_alive());
        assert!(matches!(
            sandbox.read_vec(base, 1),
            Err(MemoryError::ContextLost(_))
        ));
    }

    #[test]
    fn test_context_ids_are_distinct() {
        assert_ne!(SandboxMemory::new().context_id(), SandboxMemory::new().context_id());
        assert!(SandboxMemory::new().with_pointer_width(3).is_err());
        assert_eq!(
            SandboxMemory::new().with_pointer_width(4).unwrap().pointer_width(),
            4
        );
    }
}
