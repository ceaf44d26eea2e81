use std::collections::BTreeMap;

use cachecore_primitives::KeyName;
use cachecore_schema::KeyValue;
use serde::{Deserialize, Serialize};

/// An immutable snapshot of a typed object at a given mutation.
///
/// The store never looks inside `payload` — it is the opaque, client-supplied
/// serialized object. Everything the store indexes on has already been
/// extracted into `scalar_keys`/`list_keys` by the caller (the client-side
/// object-to-schema reflection layer is out of scope for this crate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub payload: Vec<u8>,
    pub scalar_keys: BTreeMap<KeyName, KeyValue>,
    pub list_keys: BTreeMap<KeyName, Vec<KeyValue>>,
}

impl Record {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            scalar_keys: BTreeMap::new(),
            list_keys: BTreeMap::new(),
        }
    }

    pub fn with_scalar(mut self, name: impl Into<KeyName>, value: KeyValue) -> Self {
        self.scalar_keys.insert(name.into(), value);
        self
    }

    pub fn with_list(mut self, name: impl Into<KeyName>, values: Vec<KeyValue>) -> Self {
        self.list_keys.insert(name.into(), values);
        self
    }

    pub fn scalar(&self, name: &KeyName) -> Option<&KeyValue> {
        self.scalar_keys.get(name)
    }

    pub fn list(&self, name: &KeyName) -> Option<&[KeyValue]> {
        self.list_keys.get(name).map(|v| v.as_slice())
    }
}
