//! The schema registry's data model: [`KeyValue`], [`KeyDescriptor`] and
//! [`TypeDescription`].
//!
//! A `TypeDescription` is immutable once registered (invariant from the
//! record store design) and is the single source of truth the table, query
//! and domain-completeness layers consult to know which fields are indexed
//! and how.

use std::collections::BTreeMap;
use std::fmt;

use cachecore_primitives::KeyName;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The declared data kind of a key value. Dates are stored as ticks (an
/// integer count, e.g. .NET-style 100ns ticks) but are tagged distinctly from
/// plain integers so a caller can't accidentally compare a date to a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    Int,
    Str,
    Date,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Int => f.write_str("int"),
            KeyKind::Str => f.write_str("string"),
            KeyKind::Date => f.write_str("date"),
        }
    }
}

/// A single scalar key value, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyValue {
    Int(i64),
    Str(String),
    /// Ticks since epoch.
    Date(i64),
}

impl KeyValue {
    pub fn kind(&self) -> KeyKind {
        match self {
            KeyValue::Int(_) => KeyKind::Int,
            KeyValue::Str(_) => KeyKind::Str,
            KeyValue::Date(_) => KeyKind::Date,
        }
    }
}

// Values are only ever compared within a single key's bucket, where every
// value shares a kind (the table layer enforces this at insert time), so the
// cross-kind ordering below only needs to be *consistent*, not meaningful.
impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use KeyValue::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Int(_), _) => std::cmp::Ordering::Less,
            (_, Int(_)) => std::cmp::Ordering::Greater,
            (Str(_), Date(_)) => std::cmp::Ordering::Less,
            (Date(_), Str(_)) => std::cmp::Ordering::Greater,
        }
    }
}

impl std::hash::Hash for KeyValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            KeyValue::Int(v) | KeyValue::Date(v) => v.hash(state),
            KeyValue::Str(v) => v.hash(state),
        }
    }
}

/// The role a key plays within a type, and whatever extra shape that role
/// implies (an index can additionally be ordered; a list-index is always a
/// set of scalars, never itself ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRole {
    Primary,
    Unique,
    Index { ordered: bool },
    ListIndex,
}

impl KeyRole {
    pub fn is_list(&self) -> bool {
        matches!(self, KeyRole::ListIndex)
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, KeyRole::Index { ordered: true })
    }
}

/// One declared key field: its name, kind and role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    pub name: KeyName,
    pub kind: KeyKind,
    pub role: KeyRole,
}

impl KeyDescriptor {
    pub fn new(name: impl Into<KeyName>, kind: KeyKind, role: KeyRole) -> Self {
        Self {
            name: name.into(),
            kind,
            role,
        }
    }
}

/// The full, immutable schema of a registered type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescription {
    pub type_name: String,
    pub primary_key: KeyDescriptor,
    pub unique_keys: Vec<KeyDescriptor>,
    pub index_keys: Vec<KeyDescriptor>,
    pub list_index_keys: Vec<KeyDescriptor>,
}

impl TypeDescription {
    pub fn new(type_name: impl Into<String>, primary_key: KeyDescriptor) -> Self {
        Self {
            type_name: type_name.into(),
            primary_key,
            unique_keys: Vec::new(),
            index_keys: Vec::new(),
            list_index_keys: Vec::new(),
        }
    }

    pub fn with_unique(mut self, key: KeyDescriptor) -> Self {
        self.unique_keys.push(key);
        self
    }

    pub fn with_index(mut self, key: KeyDescriptor) -> Self {
        self.index_keys.push(key);
        self
    }

    pub fn with_list_index(mut self, key: KeyDescriptor) -> Self {
        self.list_index_keys.push(key);
        self
    }

    /// Every declared key, primary first, in a stable order. Used to build
    /// up a `TypeStore`'s index set and to validate incoming records.
    pub fn all_keys(&self) -> impl Iterator<Item = &KeyDescriptor> {
        std::iter::once(&self.primary_key)
            .chain(self.unique_keys.iter())
            .chain(self.index_keys.iter())
            .chain(self.list_index_keys.iter())
    }

    pub fn find_key(&self, name: &KeyName) -> Option<&KeyDescriptor> {
        self.all_keys().find(|k| &k.name == name)
    }

    /// Validates that `descriptions` don't redeclare `self` with a different
    /// shape under the same type name (the `AlreadyRegisteredWithDifferentSchema`
    /// error from the wire contract).
    pub fn compatible_with(&self, other: &TypeDescription) -> bool {
        self == other
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("type `{0}` is already registered with a different schema")]
    AlreadyRegisteredWithDifferentSchema(String),
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("key `{0}` is not declared on this type")]
    UnknownKey(String),
}

/// All registered `TypeDescription`s, keyed by type name. This is the
/// "schema registry" component from the system overview; it only ever grows
/// by registering new, compatible descriptions.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, TypeDescription>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `description`. Idempotent if an identical description for
    /// the same type name is already registered.
    pub fn register(&mut self, description: TypeDescription) -> Result<(), SchemaError> {
        match self.types.get(&description.type_name) {
            Some(existing) if existing.compatible_with(&description) => Ok(()),
            Some(_) => Err(SchemaError::AlreadyRegisteredWithDifferentSchema(
                description.type_name,
            )),
            None => {
                self.types.insert(description.type_name.clone(), description);
                Ok(())
            }
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeDescription> {
        self.types.get(type_name)
    }

    pub fn require(&self, type_name: &str) -> Result<&TypeDescription, SchemaError> {
        self.get(type_name)
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_owned()))
    }

    pub fn known_types(&self) -> impl Iterator<Item = &TypeDescription> {
        self.types.values()
    }
}
