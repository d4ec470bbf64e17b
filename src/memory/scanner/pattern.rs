//! Wildcard byte patterns

use crate::core::types::{MemoryError, MemoryResult};
use std::fmt;
use std::str::FromStr;

/// Byte sequence with wildcards plus rules for turning a match into an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytePattern {
    bytes: Vec<Option<u8>>,
    /// Added to the match offset before the address is computed
    pub offset_adjustment: isize,
    /// The match locates a pointer-sized value instead of the address itself
    pub offset_mode: bool,
    pub rebase: bool,
}

impl BytePattern {
    /// Create a pattern from literal bytes and wildcards (`None`)
    pub fn new(bytes: Vec<Option<u8>>) -> MemoryResult<Self> {
        if bytes.is_empty() {
            return Err(MemoryError::InvalidPattern("Empty pattern".to_string()));
        }
        Ok(BytePattern {
            bytes,
            offset_adjustment: 0,
            offset_mode: false,
            rebase: false,
        })
    }

    /// Parse text such as `"48 8B ?? ?? 89"`; `?` and `??` are wildcards
    pub fn from_text(pattern: &str) -> MemoryResult<Self> {
        let bytes = pattern
            .split_whitespace()
            .map(|part| match part {
                "?" | "??" => Ok(None),
                _ => {
                    let decoded = hex::decode(part).map_err(|_| {
                        MemoryError::InvalidPattern(format!("Invalid hex byte '{}'", part))
                    })?;
                    match decoded.as_slice() {
                        [byte] => Ok(Some(*byte)),
                        _ => Err(MemoryError::InvalidPattern(format!(
                            "Invalid hex byte '{}': must be 2 digits",
                            part
                        ))),
                    }
                }
            })
            .collect::<MemoryResult<Vec<_>>>()?;
        Self::new(bytes)
    }

    /// Build from raw bytes and an `x`/`?` mask of equal length
    pub fn from_bytes_and_mask(bytes: &[u8], mask: &str) -> MemoryResult<Self> {
        if bytes.len() != mask.len() {
            return Err(MemoryError::InvalidPattern(format!(
                "{} bytes but mask has {} entries",
                bytes.len(),
                mask.len()
            )));
        }
        let pattern = bytes
            .iter()
            .zip(mask.chars())
            .map(|(&byte, flag)| match flag {
                'x' | 'X' => Ok(Some(byte)),
                '?' => Ok(None),
                other => Err(MemoryError::InvalidPattern(format!(
                    "Invalid mask character '{}'",
                    other
                ))),
            })
            .collect::<MemoryResult<Vec<_>>>()?;
        Self::new(pattern)
    }

    pub fn with_offset(mut self, adjustment: isize) -> Self {
        self.offset_adjustment = adjustment;
        self
    }

    pub fn with_offset_mode(mut self, enabled: bool) -> Self {
        self.offset_mode = enabled;
        self
    }

    pub fn with_rebase(mut self, enabled: bool) -> Self {
        self.rebase = enabled;
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; construction rejects empty patterns
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[Option<u8>] {
        &self.bytes
    }

    /// `x` for literal bytes, `?` for wildcards
    pub fn mask(&self) -> String {
        self.bytes
            .iter()
            .map(|b| if b.is_some() { 'x' } else { '?' })
            .collect()
    }

    /// Whether the pattern matches `image` starting at `offset`
    pub fn matches_at(&self, image: &[u8], offset: usize) -> bool {
        match image.get(offset..offset + self.bytes.len()) {
            Some(window) => self
                .bytes
                .iter()
                .zip(window)
                .all(|(expected, actual)| expected.map_or(true, |b| b == *actual)),
            None => false,
        }
    }
}

impl FromStr for BytePattern {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_text(s)
    }
}

impl fmt::Display for BytePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.bytes.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            match byte {
                Some(b) => write!(f, "{:02X}", b)?,
                None => f.write_str("??")?,
            }
        }
        Ok(())
    }
}
