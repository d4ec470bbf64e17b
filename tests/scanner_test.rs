//! Pattern scanning over module images

use pretty_assertions::assert_eq;
use remote_marshal::memory::scanner::pattern_file;
use remote_marshal::{
    find, find_offset, Address, BytePattern, MemoryError, MemoryOperations, PatternDefinition,
    PatternScanner, ProtectionFlags, SandboxMemory,
};
use std::io::Write;

const IMAGE: [u8; 5] = [0x90, 0x90, 0xAA, 0xBB, 0x90];
const BASE: Address = Address(0x40_0000);

#[test]
fn test_reference_image() {
    let pattern = |text: &str| BytePattern::from_text(text).unwrap();
    assert_eq!(find_offset(&IMAGE, &pattern("AA BB")).unwrap(), 2);
    assert_eq!(find_offset(&IMAGE, &pattern("AA ??")).unwrap(), 2);
    assert!(matches!(
        find_offset(&IMAGE, &pattern("CC")),
        Err(MemoryError::PatternNotFound { length: 1, .. })
    ));
}

/// Image holding `mov rax, [rip+disp]` style code with an embedded pointer
fn code_image() -> Vec<u8> {
    let mut image = vec![0xCC; 0x40];
    image[0x10..0x13].copy_from_slice(&[0x48, 0x8B, 0x05]);
    let pointer = 0x2000usize.to_ne_bytes();
    image[0x13..0x13 + pointer.len()].copy_from_slice(&pointer);
    image
}

#[test]
fn test_offset_mode_and_rebase_conventions() {
    let image = code_image();
    let sandbox = SandboxMemory::new();
    sandbox
        .map_image(BASE, &image, ProtectionFlags::execute_read())
        .unwrap();
    let scanner = PatternScanner::new(&sandbox, BASE, image.len());

    let direct = BytePattern::from_text("48 8B 05").unwrap();
    let result = scanner.find(&direct).unwrap();
    assert_eq!(result.match_offset, 0x10);
    assert_eq!(result.address, Address::new(0x40_0010));

    let rebased = scanner.find(&direct.clone().with_rebase(true)).unwrap();
    assert_eq!(rebased.address, Address::new(0x10));

    let pointer = direct.clone().with_offset(3).with_offset_mode(true);
    let result = scanner.find(&pointer).unwrap();
    assert_eq!(result.original_address, Address::new(0x2000));
    assert_eq!(result.address, Address::new(0x40_2000));

    let absolute = Address::new(0x40_2000);
    sandbox
        .poke(BASE.offset(0x13), &absolute.as_usize().to_ne_bytes())
        .unwrap();
    let fresh = PatternScanner::new(&sandbox, BASE, image.len());
    let result = fresh.find(&pointer.with_rebase(true)).unwrap();
    assert_eq!(result.original_address, absolute);
    assert_eq!(result.address, Address::new(0x2000));

    // matches the detached scan over the same bytes
    let snapshot = sandbox.peek(BASE, image.len()).unwrap();
    assert_eq!(
        find(
            &snapshot,
            &BytePattern::from_text("48 8B 05")
                .unwrap()
                .with_offset(3)
                .with_offset_mode(true)
                .with_rebase(true),
            BASE,
            std::mem::size_of::<usize>(),
        )
        .unwrap(),
        result
    );
}

#[test]
fn test_scan_result_feeds_marshaling() {
    let image = code_image();
    let sandbox = SandboxMemory::new();
    sandbox
        .map_image(BASE, &image, ProtectionFlags::read_write())
        .unwrap();
    let scanner = PatternScanner::new(&sandbox, BASE, image.len());

    let found = scanner
        .find(&BytePattern::from_text("48 8B 05").unwrap().with_offset(3))
        .unwrap();
    let value = MemoryOperations::new(&sandbox)
        .read::<Address>(found.address)
        .unwrap();
    assert_eq!(value, Address::new(0x2000));
}

#[test]
fn test_pattern_file_batch() {
    let image = code_image();
    let sandbox = SandboxMemory::new();
    sandbox
        .map_image(BASE, &image, ProtectionFlags::execute_read())
        .unwrap();

    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{"patterns": [
            {{"name": "Load", "pattern": "48 8B 05"}},
            {{"name": "Global", "pattern": "48 8B 05 ?? ??", "offset": 3, "offset_mode": true}},
            {{"name": "Padding", "pattern": "CC CC", "rebase": true}}
        ]}}"#
    )
    .unwrap();
    let definitions = pattern_file::load(file.path()).unwrap();

    let scanner = PatternScanner::new(&sandbox, BASE, image.len()).use_parallel(true);
    let found = scanner.collect_from_pattern_set(&definitions).unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(found["Load"], Address::new(0x40_0010));
    assert_eq!(found["Global"], Address::new(0x40_2000));
    assert_eq!(found["Padding"], Address::new(0));

    let mut with_missing = definitions.clone();
    with_missing.push(PatternDefinition::new("Missing", "DE AD BE EF"));
    assert!(matches!(
        scanner.collect_from_pattern_set(&with_missing),
        Err(MemoryError::PatternNotFound { length: 4, .. })
    ));
}

#[test]
fn test_unreadable_module() {
    let sandbox = SandboxMemory::new();
    let scanner = PatternScanner::new(&sandbox, BASE, 0x100);
    assert!(matches!(
        scanner.find(&BytePattern::from_text("90").unwrap()),
        Err(MemoryError::InvalidAddress(_))
    ));
}
