//! Namespaced JSON records
//!
//! A [`Table`] binds a namespace to a shared [`ConnectionManager`]. Every
//! operation takes an unprefixed key, validates its input before touching the
//! network, fetches the manager's current handle and issues one command (two
//! for `update`).
//!
//! ```rust,ignore
//! let manager = Arc::new(ConnectionManager::from_env()?);
//! let users = Table::bind(manager, TableOptions::new("users"))?;
//! users.create("42", &json!({"name": "ada"}), None).await?;
//! users.update("42", &json!({"admin": true}), Some(3600)).await?;
//! ```

pub mod codec;
pub mod dst;
pub mod keyspace;

pub use keyspace::{full_key, split_key, Namespace, SEPARATOR};

use crate::connection::{ConnectionManager, Handle};
use crate::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Binding parameters for [`Table::bind`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    pub namespace: String,
    /// Applied by `create` and `update` when the call gives no expiry
    pub default_expire_seconds: Option<u64>,
}

impl TableOptions {
    pub fn new(namespace: impl Into<String>) -> Self {
        TableOptions {
            namespace: namespace.into(),
            default_expire_seconds: None,
        }
    }

    #[must_use]
    pub fn with_default_expire(mut self, seconds: u64) -> Self {
        self.default_expire_seconds = Some(seconds);
        self
    }
}

#[derive(Clone)]
pub struct Table {
    manager: Arc<ConnectionManager>,
    namespace: Namespace,
    default_expire_seconds: Option<u64>,
}

impl Table {
    /// Bind `options.namespace` to `manager`. Does not connect.
    pub fn bind(manager: Arc<ConnectionManager>, options: TableOptions) -> StoreResult<Self> {
        let namespace = Namespace::new(options.namespace)?;
        if let Some(seconds) = options.default_expire_seconds {
            positive_seconds(seconds)?;
        }
        Ok(Table {
            manager,
            namespace,
            default_expire_seconds: options.default_expire_seconds,
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn default_expire_seconds(&self) -> Option<u64> {
        self.default_expire_seconds
    }

    /// `None` when the key is missing or expired
    pub async fn read(&self, key: &str) -> StoreResult<Option<Value>> {
        let full = self.namespace.full_key(key)?;
        let raw = self.handle().await?.get(&full).await?;
        Ok(raw.as_deref().map(codec::decode))
    }

    /// `read`, then deserialize into `T`. Scalars are stored as text, so
    /// only string, object and array shaped types read back cleanly.
    pub async fn read_as<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.read(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Unconditional upsert. With an expiry (explicit or the binding default)
    /// value and TTL are written atomically; without one any previous TTL is
    /// cleared.
    pub async fn create(
        &self,
        key: &str,
        value: &Value,
        expire_seconds: Option<u64>,
    ) -> StoreResult<()> {
        let full = self.namespace.full_key(key)?;
        let expire = match expire_seconds.or(self.default_expire_seconds) {
            Some(seconds) => Some(positive_seconds(seconds)?),
            None => None,
        };
        let encoded = codec::encode(value);

        let handle = self.handle().await?;
        match expire {
            Some(seconds) => handle.set_ex(&full, &encoded, seconds).await,
            None => handle.set(&full, &encoded).await,
        }
    }

    pub async fn create_from<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expire_seconds: Option<u64>,
    ) -> StoreResult<()> {
        let value = serde_json::to_value(value)?;
        self.create(key, &value, expire_seconds).await
    }

    /// Shallow-merge `partial` into an existing object record and write it
    /// back through `create`; returns the merged record.
    ///
    /// A missing key yields `None` and writes nothing. The previous TTL is
    /// not carried over: the write uses `expire_seconds`, or the binding's
    /// default expiry when that is `None`, exactly as `create` does. Read and
    /// write are separate commands, so a concurrent writer between them can
    /// be overwritten.
    pub async fn update(
        &self,
        key: &str,
        partial: &Value,
        expire_seconds: Option<u64>,
    ) -> StoreResult<Option<Value>> {
        self.namespace.full_key(key)?;
        let Value::Object(changes) = partial else {
            return Err(StoreError::Validation(format!(
                "update for {} needs an object, got {}",
                key,
                json_kind(partial)
            )));
        };
        if let Some(seconds) = expire_seconds {
            positive_seconds(seconds)?;
        }

        let Some(existing) = self.read(key).await? else {
            debug!(namespace = %self.namespace, key, "update target missing, nothing written");
            return Ok(None);
        };
        let mut merged = match existing {
            Value::Object(fields) => fields,
            other => {
                return Err(StoreError::TypeMismatch {
                    key: key.to_string(),
                    found: json_kind(&other),
                })
            }
        };
        for (field, value) in changes {
            merged.insert(field.clone(), value.clone());
        }

        let merged = Value::Object(merged);
        self.create(key, &merged, expire_seconds).await?;
        Ok(Some(merged))
    }

    /// True iff a key was removed
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        let full = self.namespace.full_key(key)?;
        self.handle().await?.del(&full).await
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        let full = self.namespace.full_key(key)?;
        self.handle().await?.exists(&full).await
    }

    /// False when the key does not exist
    pub async fn set_expiration(&self, key: &str, seconds: u64) -> StoreResult<bool> {
        let full = self.namespace.full_key(key)?;
        let seconds = positive_seconds(seconds)?;
        self.handle().await?.expire(&full, seconds).await
    }

    /// Remaining seconds to live. `None` both for a key without expiry and
    /// for a missing key; use [`Table::exists`] to tell them apart.
    pub async fn remaining_ttl(&self, key: &str) -> StoreResult<Option<u64>> {
        let full = self.namespace.full_key(key)?;
        Ok(self.handle().await?.ttl(&full).await?.seconds())
    }

    async fn handle(&self) -> StoreResult<Handle> {
        self.manager.handle().await
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("namespace", &self.namespace)
            .field("default_expire_seconds", &self.default_expire_seconds)
            .finish_non_exhaustive()
    }
}

fn positive_seconds(seconds: u64) -> StoreResult<u64> {
    if seconds == 0 {
        return Err(StoreError::Validation(
            "expiration must be at least one second".to_string(),
        ));
    }
    Ok(seconds)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
