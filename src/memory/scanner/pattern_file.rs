//! Named pattern definitions stored in JSON or TOML files
//!
//! JSON files hold either a bare array of definitions or an object with a
//! `patterns` array. TOML files use `[[pattern]]` tables:
//!
//! ```toml
//! [[pattern]]
//! name = "PlayerBase"
//! pattern = "48 8B 05 ?? ?? ?? ??"
//! offset = 3
//! offset_mode = true
//! ```

use super::BytePattern;
use crate::core::types::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// One named pattern and its address rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub name: String,
    /// Text form, e.g. `"AA ?? BB"`
    pub pattern: String,
    #[serde(default)]
    pub offset: isize,
    #[serde(default)]
    pub offset_mode: bool,
    #[serde(default)]
    pub rebase: bool,
}

impl PatternDefinition {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        PatternDefinition {
            name: name.into(),
            pattern: pattern.into(),
            offset: 0,
            offset_mode: false,
            rebase: false,
        }
    }

    pub fn with_offset(mut self, offset: isize) -> Self {
        self.offset = offset;
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

    /// Parse the text form and attach the address rules
    pub fn to_pattern(&self) -> MemoryResult<BytePattern> {
        let pattern = BytePattern::from_text(&self.pattern).map_err(|err| match err {
            MemoryError::InvalidPattern(reason) => {
                MemoryError::InvalidPattern(format!("{}: {}", self.name, reason))
            }
            other => other,
        })?;
        Ok(pattern
            .with_offset(self.offset)
            .with_offset_mode(self.offset_mode)
            .with_rebase(self.rebase))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonPatterns {
    List(Vec<PatternDefinition>),
    Wrapped { patterns: Vec<PatternDefinition> },
}

#[derive(Deserialize)]
struct TomlPatterns {
    #[serde(default)]
    pattern: Vec<PatternDefinition>,
}

/// Reject a set in which two definitions share a name
pub fn ensure_unique(definitions: &[PatternDefinition]) -> MemoryResult<()> {
    let mut seen = HashSet::with_capacity(definitions.len());
    for definition in definitions {
        if !seen.insert(definition.name.as_str()) {
            return Err(MemoryError::DuplicatePattern(definition.name.clone()));
        }
    }
    Ok(())
}

pub fn from_json_str(content: &str) -> MemoryResult<Vec<PatternDefinition>> {
    let definitions = match serde_json::from_str(content)? {
        JsonPatterns::List(list) => list,
        JsonPatterns::Wrapped { patterns } => patterns,
    };
    validate(definitions)
}

pub fn from_toml_str(content: &str) -> MemoryResult<Vec<PatternDefinition>> {
    let file: TomlPatterns = toml::from_str(content)?;
    validate(file.pattern)
}

/// Load definitions, picking the format from the file extension
///
/// Files without a `.toml` extension are read as JSON.
pub fn load<P: AsRef<Path>>(path: P) -> MemoryResult<Vec<PatternDefinition>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let definitions = if is_toml {
        from_toml_str(&content)?
    } else {
        from_json_str(&content)?
    };
    debug!(path = %path.display(), count = definitions.len(), "Loaded pattern definitions");
    Ok(definitions)
}

fn validate(definitions: Vec<PatternDefinition>) -> MemoryResult<Vec<PatternDefinition>> {
    ensure_unique(&definitions)?;
    for definition in &definitions {
        definition.to_pattern()?;
    }
    Ok(definitions)
}
