//! Remote allocation lifecycle and protection guards

use remote_marshal::{
    AllocationState, AllocationTable, MemoryAddress, MemoryError, MemoryProvider, ProtectionFlags,
    RegionState, RemoteAllocation, SandboxMemory,
};
use std::sync::Arc;
use std::thread;

#[test]
fn test_double_release_frees_once() {
    let sandbox = Arc::new(SandboxMemory::new());
    let allocation =
        RemoteAllocation::allocate(sandbox.clone(), 128, ProtectionFlags::read_write(), true)
            .unwrap();
    let base = allocation.base().unwrap();
    assert!(allocation.is_valid());

    assert!(allocation.release());
    assert!(!allocation.release());
    assert!(!allocation.is_valid());
    assert_eq!(allocation.state(), AllocationState::Released);
    assert_eq!(sandbox.stats().frees, 1);
    assert_eq!(sandbox.query_region(base).unwrap().state, RegionState::Free);

    drop(allocation);
    assert_eq!(sandbox.stats().frees, 1);
}

#[test]
fn test_concurrent_release_frees_once() {
    let sandbox = Arc::new(SandboxMemory::new());
    let allocation = Arc::new(
        RemoteAllocation::allocate(sandbox.clone(), 64, ProtectionFlags::read_write(), true)
            .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let allocation = Arc::clone(&allocation);
            thread::spawn(move || allocation.release())
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|released| *released)
        .count();

    assert_eq!(winners, 1);
    assert_eq!(sandbox.stats().frees, 1);
}

#[test]
fn test_validity_tracks_target() {
    let sandbox = Arc::new(SandboxMemory::new());
    let allocation =
        RemoteAllocation::allocate(sandbox.clone(), 64, ProtectionFlags::read_write(), false)
            .unwrap();
    assert!(allocation.is_valid());

    sandbox.free(allocation.base().unwrap()).unwrap();
    assert!(!allocation.is_valid());
    assert!(!allocation.is_released());
}

#[test]
fn test_guard_restores_on_error_path() {
    let sandbox = Arc::new(SandboxMemory::new());
    let allocation =
        RemoteAllocation::allocate(sandbox.clone(), 64, ProtectionFlags::read_only(), true)
            .unwrap();

    let failing = || -> Result<(), MemoryError> {
        let _guard = allocation.change_protection(ProtectionFlags::read_write(), true)?;
        allocation.write(0, &5u32)?;
        allocation.write(4096, &5u32)?;
        Ok(())
    };
    assert!(failing().is_err());

    let region = allocation.region().unwrap();
    assert_eq!(region.protection().unwrap(), ProtectionFlags::read_only());
    assert_eq!(allocation.read::<u32>(0).unwrap(), 5);
}

#[test]
fn test_guard_without_restore_keeps_flags() {
    let sandbox = Arc::new(SandboxMemory::new());
    let allocation =
        RemoteAllocation::allocate(sandbox.clone(), 64, ProtectionFlags::read_only(), true)
            .unwrap();

    let guard = allocation
        .change_protection(ProtectionFlags::read_write(), false)
        .unwrap();
    assert_eq!(guard.previous(), ProtectionFlags::read_only());
    drop(guard);

    let region = allocation.region().unwrap();
    assert_eq!(region.protection().unwrap(), ProtectionFlags::read_write());
}

#[test]
fn test_allocation_memory_view() {
    let sandbox = Arc::new(SandboxMemory::new());
    let allocation =
        RemoteAllocation::allocate(sandbox, 64, ProtectionFlags::read_write(), true).unwrap();

    let ops = allocation.memory().unwrap();
    ops.write_array(MemoryAddress::relative(8), &[1u16, 2, 3])
        .unwrap();
    assert_eq!(allocation.read::<u16>(10).unwrap(), 2);
}

#[test]
fn test_reserved_allocation_is_uncommitted() {
    let sandbox = Arc::new(SandboxMemory::new());
    let reserved = sandbox.reserve(0x1000).unwrap();
    let region = remote_marshal::RemoteRegion::new(sandbox.clone(), reserved);
    assert_eq!(region.state().unwrap(), RegionState::Reserved);
    assert!(region.is_valid());
}

#[test]
fn test_table_is_release_authority() {
    let sandbox = Arc::new(SandboxMemory::new());
    {
        let table = AllocationTable::new();
        for _ in 0..3 {
            table
                .allocate(sandbox.clone(), 32, ProtectionFlags::read_write())
                .unwrap();
        }
        assert_eq!(table.len(), 3);
    }
    assert_eq!(sandbox.stats().allocations, 3);
    assert_eq!(sandbox.stats().frees, 3);
}

#[test]
fn test_allocation_failure_is_reported() {
    let sandbox = Arc::new(SandboxMemory::new());
    assert!(matches!(
        RemoteAllocation::allocate(sandbox.clone(), 0, ProtectionFlags::read_write(), true),
        Err(MemoryError::Allocation { .. })
    ));
    assert!(matches!(
        RemoteAllocation::allocate(sandbox.clone(), usize::MAX, ProtectionFlags::read_write(), true),
        Err(MemoryError::Allocation { .. })
    ));
    assert_eq!(sandbox.stats().allocations, 0);
}
