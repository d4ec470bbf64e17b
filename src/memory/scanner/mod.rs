//! Byte-pattern scanning over captured module images
//!
//! Matching is a plain left-to-right walk: at every offset the pattern is
//! compared byte by byte, wildcards always match, and the lowest matching
//! offset wins. A match is then turned into an address:
//!
//! - Direct mode: `module_base + offset + adjustment`, or just
//!   `offset + adjustment` when rebasing.
//! - Offset mode: a pointer-width value is read at `offset + adjustment`.
//!   The result is `module_base + value`, or `value - module_base` when
//!   rebasing.

pub mod pattern;
pub mod pattern_file;

pub use pattern::BytePattern;
pub use pattern_file::PatternDefinition;

use crate::core::types::{Address, MemoryError, MemoryResult, ScanResult};
use crate::provider::MemoryProvider;
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Default cap on how much of a module is captured for scanning
pub const DEFAULT_MAX_IMAGE_SIZE: usize = 256 * 1024 * 1024;

/// Lowest offset at which `pattern` matches `image`
pub fn find_offset(image: &[u8], pattern: &BytePattern) -> MemoryResult<usize> {
    if pattern.len() <= image.len() {
        for offset in 0..=image.len() - pattern.len() {
            if pattern.matches_at(image, offset) {
                return Ok(offset);
            }
        }
    }
    Err(MemoryError::pattern_not_found(pattern.len(), pattern.mask()))
}

/// Every offset at which `pattern` matches, in ascending order
pub fn find_all(image: &[u8], pattern: &BytePattern) -> Vec<usize> {
    if pattern.len() > image.len() {
        return Vec::new();
    }
    (0..=image.len() - pattern.len())
        .filter(|&offset| pattern.matches_at(image, offset))
        .collect()
}

/// Scan a detached image that was loaded at `module_base`
///
/// Offset-mode values are decoded in native byte order and must lie inside
/// the image.
pub fn find(
    image: &[u8],
    pattern: &BytePattern,
    module_base: Address,
    pointer_width: usize,
) -> MemoryResult<ScanResult> {
    let offset = find_offset(image, pattern)?;
    resolve_match(pattern, offset, module_base, |position| {
        read_image_value(image, position, pointer_width, cfg!(target_endian = "little"))
            .ok_or_else(|| {
                MemoryError::invalid_address(
                    module_base.offset(position as isize),
                    "offset value lies outside the image",
                )
            })
    })
}

/// Apply the direct/offset and rebase rules to a match at `offset`
fn resolve_match(
    pattern: &BytePattern,
    offset: usize,
    module_base: Address,
    read_value: impl FnOnce(usize) -> MemoryResult<usize>,
) -> MemoryResult<ScanResult> {
    let position = offset.wrapping_add_signed(pattern.offset_adjustment);

    if !pattern.offset_mode {
        let original = module_base.offset(position as isize);
        let address = if pattern.rebase {
            Address::new(position)
        } else {
            original
        };
        return Ok(ScanResult::new(offset, address, original));
    }

    let value = read_value(position)?;
    let address = if pattern.rebase {
        Address::new(value.wrapping_sub(module_base.as_usize()))
    } else {
        Address::new(module_base.as_usize().wrapping_add(value))
    };
    Ok(ScanResult::new(offset, address, Address::new(value)))
}

fn read_image_value(
    image: &[u8],
    position: usize,
    width: usize,
    little_endian: bool,
) -> Option<usize> {
    let bytes = image.get(position..position.checked_add(width)?)?;
    let mut raw = [0u8; 8];
    let value = if little_endian {
        raw[..width].copy_from_slice(bytes);
        u64::from_le_bytes(raw)
    } else {
        raw[8 - width..].copy_from_slice(bytes);
        u64::from_be_bytes(raw)
    };
    usize::try_from(value).ok()
}

/// Scanner bound to one module of a target
///
/// The module image is captured through the provider on first use and
/// reused for every later scan.
pub struct PatternScanner<'a> {
    provider: &'a dyn MemoryProvider,
    module_base: Address,
    module_size: usize,
    max_image_size: usize,
    image: OnceCell<Vec<u8>>,
    use_parallel: bool,
}

impl<'a> PatternScanner<'a> {
    pub fn new(provider: &'a dyn MemoryProvider, module_base: Address, module_size: usize) -> Self {
        PatternScanner {
            provider,
            module_base,
            module_size,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            image: OnceCell::new(),
            use_parallel: false,
        }
    }

    /// Scan a pattern set on the rayon pool
    pub fn use_parallel(mut self, parallel: bool) -> Self {
        self.use_parallel = parallel;
        self
    }

    pub fn with_max_image_size(mut self, limit: usize) -> Self {
        self.max_image_size = limit;
        self
    }

    pub fn module_base(&self) -> Address {
        self.module_base
    }

    pub fn module_size(&self) -> usize {
        self.module_size
    }

    /// The captured module image
    pub fn image(&self) -> MemoryResult<&[u8]> {
        self.image
            .get_or_try_init(|| {
                if self.module_size > self.max_image_size {
                    return Err(MemoryError::invalid_address(
                        self.module_base,
                        format!(
                            "module image of {} bytes exceeds the {} byte limit",
                            self.module_size, self.max_image_size
                        ),
                    ));
                }
                let image = self.provider.read_vec(self.module_base, self.module_size)?;
                debug!(
                    base = %self.module_base,
                    size = self.module_size,
                    "Captured module image"
                );
                Ok(image)
            })
            .map(Vec::as_slice)
    }

    /// First match of `pattern`, resolved to an address
    ///
    /// Offset-mode values outside the image are read live from the target.
    pub fn find(&self, pattern: &BytePattern) -> MemoryResult<ScanResult> {
        let image = self.image()?;
        let offset = find_offset(image, pattern)?;
        let width = self.provider.pointer_width();
        let little_endian = self.provider.is_little_endian();

        resolve_match(pattern, offset, self.module_base, |position| {
            match read_image_value(image, position, width, little_endian) {
                Some(value) => Ok(value),
                None => self.read_live_value(self.module_base.offset(position as isize)),
            }
        })
    }

    /// Every match offset of `pattern`
    pub fn find_all(&self, pattern: &BytePattern) -> MemoryResult<Vec<usize>> {
        Ok(find_all(self.image()?, pattern))
    }

    /// Scan each named pattern, keyed by name
    ///
    /// Names must be unique. The first pattern that fails to parse or match
    /// aborts the batch.
    pub fn scan_set(
        &self,
        definitions: &[PatternDefinition],
    ) -> MemoryResult<BTreeMap<String, ScanResult>> {
        pattern_file::ensure_unique(definitions)?;
        self.image()?;

        let scan = |definition: &PatternDefinition| {
            let pattern = definition.to_pattern()?;
            self.find(&pattern)
                .map(|result| (definition.name.clone(), result))
        };

        let results: MemoryResult<Vec<_>> = if self.use_parallel {
            definitions.par_iter().map(scan).collect()
        } else {
            definitions.iter().map(scan).collect()
        };
        let results: BTreeMap<_, _> = results?.into_iter().collect();

        info!(
            base = %self.module_base,
            patterns = results.len(),
            parallel = self.use_parallel,
            "Pattern set resolved"
        );
        Ok(results)
    }

    /// Scan each named pattern and keep only the resolved addresses
    pub fn collect_from_pattern_set(
        &self,
        definitions: &[PatternDefinition],
    ) -> MemoryResult<BTreeMap<String, Address>> {
        Ok(self
            .scan_set(definitions)?
            .into_iter()
            .map(|(name, result)| (name, result.address))
            .collect())
    }

    fn read_live_value(&self, address: Address) -> MemoryResult<usize> {
        let width = self.provider.pointer_width();
        let mut buffer = vec![0u8; width];
        self.provider.read_bytes(address, &mut buffer)?;
        read_image_value(&buffer, 0, width, self.provider.is_little_endian())
            .ok_or_else(|| MemoryError::invalid_address(address, "pointer does not fit usize"))
    }
}
