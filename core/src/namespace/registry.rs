//! Namespace registry: the list of every namespace ever used in a backend.
//!
//! Kept under one reserved physical key (`REGISTRY_KEY`) as an encoded
//! array, in first-registration order with no duplicates. Entries are
//! never removed.

use serde_json::Value;

use crate::backend::StorageBackend;
use crate::codec;
use crate::error::{StoreError, StoreResult};

use super::key::REGISTRY_KEY;


/// Registry view over one backend.
pub struct NamespaceRegistry<'a> {
    backend: &'a dyn StorageBackend,
}

impl<'a> NamespaceRegistry<'a> {
    pub fn new(backend: &'a dyn StorageBackend) -> Self {
        NamespaceRegistry { backend }
    }

    /// All registered namespaces, oldest first. Empty if none were ever
    /// registered.
    pub fn list(&self) -> StoreResult<Vec<String>> {
        let stored = match self.backend.get_item(REGISTRY_KEY) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        match codec::decode(&stored)? {
            Value::Null => Ok(Vec::new()),
            Value::String(s) if s.is_empty() => Ok(Vec::new()),
            other => serde_json::from_value(other).map_err(|e| StoreError::malformed(&stored, e)),
        }
    }

    pub fn contains(&self, namespace: &str) -> StoreResult<bool> {
        Ok(self.list()?.iter().any(|ns| ns == namespace))
    }

    /// Append `namespace` if it is non-empty and not yet listed.
    ///
    /// Returns true if the registry was written.
    pub fn register(&self, namespace: &str) -> StoreResult<bool> {
        if namespace.is_empty() {
            return Ok(false);
        }
        let mut namespaces = self.list()?;
        if namespaces.iter().any(|ns| ns == namespace) {
            return Ok(false);
        }
        namespaces.push(namespace.to_string());
        let encoded = codec::encode(&Value::from(namespaces));
        self.backend.set_item(REGISTRY_KEY, &encoded)?;
        tracing::info!(namespace, "namespace registered");
        Ok(true)
    }
}


/// Register `namespace` in `backend`'s registry. Empty namespaces and
/// repeats are no-ops.
pub fn register_namespace(namespace: &str, backend: &dyn StorageBackend) -> StoreResult<()> {
    NamespaceRegistry::new(backend).register(namespace)?;
    Ok(())
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
