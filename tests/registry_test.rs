//! Layout resolution under concurrent first use

use bytemuck::{Pod, Zeroable};
use remote_marshal::{blittable, Address, TypeCategory, TypeLayoutRegistry};
use std::sync::{Arc, Barrier};
use std::thread;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Header {
    magic: u32,
    version: u16,
    flags: u16,
    length: u64,
}

blittable!(Header {
    magic: u32,
    version: u16,
    flags: u16,
    length: u64,
});

#[test]
fn test_concurrent_first_use_yields_one_descriptor() {
    let registry = Arc::new(TypeLayoutRegistry::new());
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.resolve::<Header>().unwrap()
            })
        })
        .collect();
    let layouts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let first = &layouts[0];
    assert_eq!(first.size, 16);
    assert_eq!(first.category, TypeCategory::Aggregate);
    for layout in &layouts {
        assert!(Arc::ptr_eq(first, layout));
        assert_eq!(**layout, **first);
    }
}

#[test]
fn test_address_layout_is_address_sized() {
    let registry = TypeLayoutRegistry::new();
    let layout = registry.resolve::<Address>().unwrap();
    assert!(layout.is_address_sized);
    assert_eq!(layout.category, TypeCategory::Address);

    let number = registry.resolve::<u64>().unwrap();
    assert!(!number.is_address_sized);
    assert!(registry.contains::<u64>());
    assert_eq!(registry.len(), 2);
}
