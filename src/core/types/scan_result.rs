//! Result of a byte-pattern match

use super::address::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a pattern matched and which address it resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Byte offset of the match inside the scanned image
    pub match_offset: usize,
    /// Address after offset, dereference and rebase rules are applied
    pub address: Address,
    /// Address before rebasing
    pub original_address: Address,
}

impl ScanResult {
    /// Creates a new scan result
    pub fn new(match_offset: usize, address: Address, original_address: Address) -> Self {
        ScanResult {
            match_offset,
            address,
            original_address,
        }
    }

    /// Whether rebasing changed the reported address
    pub fn is_rebased(&self) -> bool {
        self.address != self.original_address
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{:#x} -> {} (original {})",
            self.match_offset, self.address, self.original_address
        )
    }
}
