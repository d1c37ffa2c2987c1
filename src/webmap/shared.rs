use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Opaque JSON fragment handed over by the live map (layer definitions,
/// popup configuration). Fragments are reference counted, so several layers
/// may point at the very same fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedJson(Arc<Value>);

impl SharedJson {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Copy that no longer shares identity with `self`.
    pub fn deep_clone(&self) -> Self {
        Self::new(self.0.as_ref().clone())
    }

    pub fn ptr_eq(&self, other: &SharedJson) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl From<Value> for SharedJson {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl Serialize for SharedJson {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SharedJson {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(SharedJson::new)
    }
}

/// Tracks fragment identity during a document walk. A fragment already
/// visited is dropped from the slot holding it, so the serialized document
/// never repeats a shared fragment.
#[derive(Debug, Default)]
pub struct IdentityWalk {
    seen: HashSet<usize>,
}

impl IdentityWalk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visit(&mut self, slot: &mut Option<SharedJson>) {
        if let Some(fragment) = slot {
            if !self.seen.insert(fragment.identity()) {
                *slot = None;
            }
        }
    }

    pub fn visited(&self) -> usize {
        self.seen.len()
    }
}
