use crate::error::{StoreError, StoreResult};
use std::fmt;

/// Joins a namespace and a key
pub const SEPARATOR: char = ':';

/// Validated namespace: non-empty and free of [`SEPARATOR`].
///
/// Because the namespace never contains the separator, the first separator
/// in a full key always marks the boundary, and distinct `(namespace, key)`
/// pairs map to distinct full keys even when keys contain `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> StoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(StoreError::Validation("namespace must not be empty".to_string()));
        }
        if name.contains(SEPARATOR) {
            return Err(StoreError::Validation(format!(
                "namespace {:?} must not contain {:?}",
                name, SEPARATOR
            )));
        }
        Ok(Namespace(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key for `key` in this namespace; rejects empty keys
    pub fn full_key(&self, key: &str) -> StoreResult<String> {
        if key.is_empty() {
            return Err(StoreError::Validation("key must not be empty".to_string()));
        }
        Ok(full_key(&self.0, key))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `namespace + ":" + key`, without validation
pub fn full_key(namespace: &str, key: &str) -> String {
    let mut full = String::with_capacity(namespace.len() + 1 + key.len());
    full.push_str(namespace);
    full.push(SEPARATOR);
    full.push_str(key);
    full
}

/// Inverse of [`full_key`] for keys built from a validated namespace
pub fn split_key(full: &str) -> Option<(&str, &str)> {
    full.split_once(SEPARATOR)
}
