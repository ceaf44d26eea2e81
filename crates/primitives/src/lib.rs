//! Identifier newtypes shared by every layer of the store.
//!
//! Kept deliberately tiny and dependency-free (mirrors `spacetimedb-primitives`):
//! these are the vocabulary types that `schema`, `table`, `query`, `domain` and
//! `store` all pass around instead of raw `String`/`u64`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The full name of a registered type, e.g. `"Item"` or `"Trade"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeName(pub String);

impl TypeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for TypeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The name of a key (primary, unique, index or list-index) declared on a type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyName(pub String);

impl KeyName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for KeyName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The name of a named, monotonically increasing sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceName(pub String);

impl SequenceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SequenceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A stable handle to a record within its type's arena.
///
/// Indexes store `RecordId`s rather than records themselves, so records and
/// indexes never hold direct references to each other (see the arena +
/// record-id design note: this is what keeps the ownership graph acyclic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl RecordId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for RecordId {
    fn from(id: usize) -> Self {
        Self(id as u64)
    }
}

impl From<RecordId> for usize {
    fn from(id: RecordId) -> Self {
        id.0 as usize
    }
}
