//! Provider-native resource payloads.
//!
//! The library never interprets a payload beyond reading and writing named
//! fields. Nested fields are addressed with dotted paths such as
//! `properties.addressSpace.addressPrefixes`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resource tags as reported by the provider.
pub type Tags = BTreeMap<String, String>;

/// Opaque JSON object exchanged with the provider.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON value, returning `None` when it is not an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Returns the payload as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Consumes the payload into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Reads a field by dotted path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        parts.try_fold(self.0.get(first)?, |current, part| current.get(part))
    }

    /// Mutable access to a field by dotted path.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        parts.try_fold(self.0.get_mut(first)?, |current, part| current.get_mut(part))
    }

    /// Reads a string field by dotted path.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Reads an unsigned integer field by dotted path.
    #[must_use]
    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }

    /// Reads an array field by dotted path, yielding an empty slice when the
    /// field is absent or not an array.
    #[must_use]
    pub fn get_array(&self, path: &str) -> &[Value] {
        self.get(path)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Writes a field by dotted path, creating intermediate objects. A
    /// non-object value standing in the way is replaced.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let mut parts: Vec<&str> = path.split('.').collect();
        let Some(last) = parts.pop() else {
            return;
        };
        let mut current = &mut self.0;
        for part in parts {
            let slot = current
                .entry(part.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(next) = slot else {
                return;
            };
            current = next;
        }
        current.insert(last.to_owned(), value.into());
    }

    /// Removes a field by dotted path, returning the previous value.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let mut parts: Vec<&str> = path.split('.').collect();
        let last = parts.pop()?;
        let mut current = &mut self.0;
        for part in parts {
            current = current.get_mut(part)?.as_object_mut()?;
        }
        current.remove(last)
    }

    /// Resource name reported by the provider.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    /// Fully-qualified identifier reported by the provider.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }

    /// Region the resource lives in.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.get_str("location")
    }

    /// Tags attached to the resource; non-string values are skipped.
    #[must_use]
    pub fn tags(&self) -> Tags {
        self.get("tags")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(key, value)| {
                        value.as_str().map(|text| (key.clone(), text.to_owned()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replaces the tag map.
    pub fn set_tags(&mut self, tags: &Tags) {
        let map: Map<String, Value> = tags
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        self.set("tags", Value::Object(map));
    }

    /// Provisioning state reported by the provider.
    #[must_use]
    pub fn provisioning_state(&self) -> Option<&str> {
        self.get_str("properties.provisioningState")
    }

    /// Edits the first object of an array field in place. Returns `false`
    /// when the array is absent, empty, or starts with a non-object.
    pub(crate) fn edit_first(&mut self, path: &str, edit: impl FnOnce(&mut Self)) -> bool {
        let Some(first) = self
            .get_mut(path)
            .and_then(Value::as_array_mut)
            .and_then(|items| items.first_mut())
            .filter(|item| item.is_object())
        else {
            return false;
        };
        let Some(mut item) = Self::from_value(first.take()) else {
            return false;
        };
        edit(&mut item);
        *first = item.into_value();
        true
    }
}

/// Builds a `{ "id": ... }` reference object.
pub(crate) fn reference(id: &impl ToString) -> Value {
    serde_json::json!({ "id": id.to_string() })
}
