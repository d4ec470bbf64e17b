//! Conversion of MEMORY_BASIC_INFORMATION into provider region info

use crate::core::types::Address;
use crate::memory::regions::{ProtectionFlags, RegionInfo, RegionState};
use winapi::um::winnt::{MEMORY_BASIC_INFORMATION, MEM_COMMIT, MEM_RESERVE};

/// Owned copy of the fields of MEMORY_BASIC_INFORMATION this crate uses
#[derive(Debug, Clone, Copy)]
pub struct MemoryBasicInfo {
    pub base_address: Address,
    pub allocation_base: Address,
    pub region_size: usize,
    pub state: u32,
    pub protect: u32,
}

impl From<MEMORY_BASIC_INFORMATION> for MemoryBasicInfo {
    fn from(mbi: MEMORY_BASIC_INFORMATION) -> Self {
        MemoryBasicInfo {
            base_address: Address::new(mbi.BaseAddress as usize),
            allocation_base: Address::new(mbi.AllocationBase as usize),
            region_size: mbi.RegionSize,
            state: mbi.State,
            protect: mbi.Protect,
        }
    }
}

impl MemoryBasicInfo {
    pub fn region_state(&self) -> RegionState {
        match self.state {
            MEM_COMMIT => RegionState::Committed,
            MEM_RESERVE => RegionState::Reserved,
            _ => RegionState::Free,
        }
    }
}

impl From<MemoryBasicInfo> for RegionInfo {
    fn from(info: MemoryBasicInfo) -> Self {
        let state = info.region_state();
        // free and reserved regions report a protection of zero
        let protection = if state == RegionState::Committed {
            ProtectionFlags::new(info.protect)
        } else {
            ProtectionFlags::no_access()
        };
        RegionInfo {
            base: info.base_address,
            size: info.region_size,
            protection,
            state,
        }
    }
}
