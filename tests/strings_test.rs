//! Null-terminated string handling

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use remote_marshal::provider::PAGE_SIZE;
use remote_marshal::{
    Address, MemoryError, MemoryOperations, MemoryProvider, ProtectionFlags, SandboxMemory,
    StringEncoding,
};

fn target() -> (SandboxMemory, Address) {
    let sandbox = SandboxMemory::new();
    let base = sandbox.allocate(PAGE_SIZE, ProtectionFlags::read_write()).unwrap();
    (sandbox, base)
}

proptest! {
    #[test]
    fn prop_ascii_round_trip(text in "[ -~]{0,64}") {
        let (sandbox, base) = target();
        let ops = MemoryOperations::new(&sandbox);
        ops.write_string(base, &text, StringEncoding::Ascii, true).unwrap();
        prop_assert_eq!(ops.read_string(base, StringEncoding::Ascii, 128).unwrap(), text);
    }

    #[test]
    fn prop_utf8_round_trip(text in "[^\u{0}]{0,32}") {
        let (sandbox, base) = target();
        let ops = MemoryOperations::new(&sandbox);
        ops.write_string(base, &text, StringEncoding::Utf8, true).unwrap();
        prop_assert_eq!(ops.read_string(base, StringEncoding::Utf8, 256).unwrap(), text);
    }

    #[test]
    fn prop_utf16_round_trip(text in "[^\u{0}]{0,32}") {
        let (sandbox, base) = target();
        let ops = MemoryOperations::new(&sandbox);
        ops.write_string(base, &text, StringEncoding::Utf16, true).unwrap();
        prop_assert_eq!(ops.read_string(base, StringEncoding::Utf16, 256).unwrap(), text);
    }
}

#[test]
fn test_text_after_terminator_is_dropped() {
    let (sandbox, base) = target();
    sandbox.poke(base, b"first\0second\0").unwrap();
    let ops = MemoryOperations::new(&sandbox);
    assert_eq!(ops.read_string(base, StringEncoding::Utf8, 64).unwrap(), "first");
}

#[test]
fn test_exactly_max_bytes_without_terminator() {
    let (sandbox, base) = target();
    sandbox.poke(base, b"ABCDEFGH\0").unwrap();
    let ops = MemoryOperations::new(&sandbox);

    let read = ops
        .reader()
        .read_string_detailed(base, StringEncoding::Ascii, 8)
        .unwrap();
    assert_eq!(read.text, "ABCDEFGH");
    assert!(!read.terminated);
    assert_eq!(read.byte_len, 8);

    let read = ops
        .reader()
        .read_string_detailed(base, StringEncoding::Ascii, 9)
        .unwrap();
    assert!(read.terminated);
}

#[test]
fn test_utf16_terminator_alignment() {
    let (sandbox, base) = target();
    let ops = MemoryOperations::new(&sandbox);
    ops.write_string(base, "A\u{100}", StringEncoding::Utf16, true)
        .unwrap();
    assert_eq!(
        ops.read_string(base, StringEncoding::Utf16, 32).unwrap(),
        "A\u{100}"
    );
}

#[test]
fn test_write_without_terminator() {
    let (sandbox, base) = target();
    sandbox.poke(base, &[0xFF; 8]).unwrap();
    let ops = MemoryOperations::new(&sandbox);
    ops.write_string(base, "abc", StringEncoding::Utf8, false)
        .unwrap();
    assert_eq!(sandbox.peek(base, 4).unwrap(), vec![b'a', b'b', b'c', 0xFF]);
}

#[test]
fn test_read_is_shortened_at_region_end() {
    let (sandbox, base) = target();
    let tail = base.offset((PAGE_SIZE - 4) as isize);
    sandbox.poke(tail, b"tail").unwrap();
    let ops = MemoryOperations::new(&sandbox);

    let read = ops
        .reader()
        .read_string_detailed(tail, StringEncoding::Utf8, 512)
        .unwrap();
    assert_eq!(read.text, "tail");
    assert!(!read.terminated);
}

#[test]
fn test_read_spans_protection_runs() {
    let sandbox = SandboxMemory::new();
    let base = sandbox
        .allocate(2 * PAGE_SIZE, ProtectionFlags::read_write())
        .unwrap();
    let second = base.offset(PAGE_SIZE as isize);
    sandbox.poke(second.offset(-4), b"tailmore\0").unwrap();
    sandbox
        .change_protection(second, 1, ProtectionFlags::read_only())
        .unwrap();
    let ops = MemoryOperations::new(&sandbox);

    let read = ops
        .reader()
        .read_string_detailed(second.offset(-4), StringEncoding::Utf8, 2 * PAGE_SIZE)
        .unwrap();
    assert_eq!(read.text, "tailmore");
    assert!(read.terminated);
}

#[test]
fn test_read_stops_at_unreadable_page() {
    let sandbox = SandboxMemory::new();
    let base = sandbox
        .allocate(2 * PAGE_SIZE, ProtectionFlags::read_write())
        .unwrap();
    let second = base.offset(PAGE_SIZE as isize);
    sandbox.poke(second.offset(-4), b"tailmore\0").unwrap();
    sandbox
        .change_protection(second, 1, ProtectionFlags::no_access())
        .unwrap();
    let ops = MemoryOperations::new(&sandbox);

    let read = ops
        .reader()
        .read_string_detailed(second.offset(-4), StringEncoding::Utf8, 64)
        .unwrap();
    assert_eq!(read.text, "tail");
    assert!(!read.terminated);
    assert!(matches!(
        ops.read_string(second, StringEncoding::Utf8, 64),
        Err(MemoryError::AccessDenied { .. })
    ));
}

#[test]
fn test_unsupported_encoding_name() {
    assert!(matches!(
        "shift-jis".parse::<StringEncoding>(),
        Err(MemoryError::UnsupportedEncoding(_))
    ));
}
