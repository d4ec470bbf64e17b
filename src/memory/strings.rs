//! Null-terminated strings in single-byte, UTF-8 and UTF-16 encodings

use super::reader::MemoryReader;
use super::writer::MemoryWriter;
use crate::core::types::{Address, MemoryAddress, MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Text encodings understood by the string operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StringEncoding {
    /// 7-bit ASCII; other bytes decode as `?`
    Ascii,
    Utf8,
    /// UTF-16 in the target's byte order
    Utf16,
}

impl StringEncoding {
    /// Byte width of the null terminator
    pub const fn terminator_width(&self) -> usize {
        match self {
            StringEncoding::Ascii | StringEncoding::Utf8 => 1,
            StringEncoding::Utf16 => 2,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            StringEncoding::Ascii => "ascii",
            StringEncoding::Utf8 => "utf-8",
            StringEncoding::Utf16 => "utf-16",
        }
    }

    /// Encode `text` without a terminator
    pub fn encode(&self, text: &str, little_endian: bool) -> Vec<u8> {
        match self {
            StringEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            StringEncoding::Utf8 => text.as_bytes().to_vec(),
            StringEncoding::Utf16 => text
                .encode_utf16()
                .flat_map(|unit| {
                    if little_endian {
                        unit.to_le_bytes()
                    } else {
                        unit.to_be_bytes()
                    }
                })
                .collect(),
        }
    }

    /// Decode bytes that contain no terminator, replacing invalid sequences
    pub fn decode(&self, bytes: &[u8], little_endian: bool) -> String {
        match self {
            StringEncoding::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '?' })
                .collect(),
            StringEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            StringEncoding::Utf16 => {
                let units = bytes.chunks_exact(2).map(|pair| {
                    let pair = [pair[0], pair[1]];
                    if little_endian {
                        u16::from_le_bytes(pair)
                    } else {
                        u16::from_be_bytes(pair)
                    }
                });
                char::decode_utf16(units)
                    .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect()
            }
        }
    }

    /// Offset of the first terminator, stepping by the terminator width
    pub fn find_terminator(&self, bytes: &[u8]) -> Option<usize> {
        let width = self.terminator_width();
        bytes
            .chunks_exact(width)
            .position(|unit| unit.iter().all(|&b| b == 0))
            .map(|index| index * width)
    }
}

impl FromStr for StringEncoding {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ascii" | "us-ascii" => Ok(StringEncoding::Ascii),
            "utf-8" | "utf8" => Ok(StringEncoding::Utf8),
            "utf-16" | "utf16" | "utf-16le" | "unicode" => Ok(StringEncoding::Utf16),
            other => Err(MemoryError::UnsupportedEncoding(other.to_string())),
        }
    }
}

impl TryFrom<String> for StringEncoding {
    type Error = MemoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StringEncoding> for String {
    fn from(encoding: StringEncoding) -> Self {
        encoding.name().to_string()
    }
}

impl fmt::Display for StringEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a string read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRead {
    pub text: String,
    /// False when no terminator appeared and the whole buffer was decoded
    pub terminated: bool,
    /// Raw bytes consumed, excluding the terminator
    pub byte_len: usize,
}

impl MemoryReader<'_> {
    /// Read a null-terminated string and report whether the terminator was found
    ///
    /// Reads up to `max_bytes`. If that range runs into unmapped or
    /// unreadable memory, the read stops at the last readable byte.
    pub fn read_string_detailed(
        &self,
        address: impl Into<MemoryAddress>,
        encoding: StringEncoding,
        max_bytes: usize,
    ) -> MemoryResult<StringRead> {
        let address = self.context.resolve(address)?;
        let bytes = self.read_up_to(address, max_bytes)?;
        let little_endian = self.context.provider().is_little_endian();

        let read = match encoding.find_terminator(&bytes) {
            Some(end) => StringRead {
                text: encoding.decode(&bytes[..end], little_endian),
                terminated: true,
                byte_len: end,
            },
            None => {
                warn!(
                    %address,
                    max_bytes,
                    %encoding,
                    "No string terminator found, decoding the whole buffer"
                );
                StringRead {
                    text: encoding.decode(&bytes, little_endian),
                    terminated: false,
                    byte_len: bytes.len(),
                }
            }
        };
        Ok(read)
    }

    fn read_up_to(&self, address: Address, max_bytes: usize) -> MemoryResult<Vec<u8>> {
        match self.read_block(address, max_bytes) {
            Err(err @ (MemoryError::InvalidAddress(_) | MemoryError::AccessDenied { .. })) => {
                let available = self.readable_span(address, max_bytes)?;
                if available == 0 || available >= max_bytes {
                    return Err(err);
                }
                self.read_block(address, available)
            }
            other => other,
        }
    }

    /// Bytes readable from `address` before the first inaccessible page, capped at `limit`
    fn readable_span(&self, address: Address, limit: usize) -> MemoryResult<usize> {
        let provider = self.context.provider();
        let end = address.as_usize().saturating_add(limit);
        let mut cursor = address;

        while cursor.as_usize() < end {
            let region = provider.query_region(cursor)?;
            if !region.is_committed() || !region.protection.is_readable() || region.end() <= cursor {
                break;
            }
            cursor = region.end();
        }
        Ok(cursor.as_usize().min(end) - address.as_usize())
    }
}

impl MemoryWriter<'_> {
    /// Encode and write `text`, optionally followed by its terminator
    pub fn write_string(
        &self,
        address: impl Into<MemoryAddress>,
        text: &str,
        encoding: StringEncoding,
        append_terminator: bool,
    ) -> MemoryResult<()> {
        let little_endian = self.context.provider().is_little_endian();
        let mut bytes = encoding.encode(text, little_endian);
        if append_terminator {
            bytes.resize(bytes.len() + encoding.terminator_width(), 0);
        }
        self.write_bytes(address, &bytes)
    }
}
