//! Logical-to-physical key mapping.
//!
//! A namespace `ns` owns every physical key of the form `ns.<logical>`.
//! Without a namespace, logical and physical keys are the same string.

use crate::error::{StoreError, StoreResult};


/// Physical key that holds the namespace registry in every backend.
pub const REGISTRY_KEY: &str = "CheapStateNamespaces";


/// The `"<namespace>."` prefix, or `""` when there is no namespace.
pub fn namespace_prefix(namespace: &str) -> String {
    if namespace.is_empty() {
        String::new()
    } else {
        format!("{}.", namespace)
    }
}


/// Map a logical key into its namespace.
///
/// Returns `"<namespace>.<key>"`. Returns `""` when `namespace` is empty,
/// and also when `key` already starts with `"<namespace>."` so it is never
/// namespaced twice. An empty `key` is an `InvalidKey` error.
pub fn namespaced_key_name(namespace: &str, key: &str) -> StoreResult<String> {
    if key.is_empty() {
        return Err(StoreError::invalid_key("key is required"));
    }
    if namespace.is_empty() {
        return Ok(String::new());
    }
    let prefix = namespace_prefix(namespace);
    if key.starts_with(&prefix) {
        return Ok(String::new());
    }
    Ok(format!("{}{}", prefix, key))
}


/// Strip `"<namespace>."` from the front of a physical key, if present.
pub fn strip_namespace<'a>(namespace: &str, physical: &'a str) -> &'a str {
    if namespace.is_empty() {
        return physical;
    }
    physical
        .strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(physical)
}


/// True if a physical key is owned by `namespace`.
///
/// With no namespace every key but the registry key qualifies.
pub fn owns_physical_key(namespace: &str, physical: &str) -> bool {
    if namespace.is_empty() {
        physical != REGISTRY_KEY
    } else {
        physical.len() > namespace.len() + 1 && physical.starts_with(&namespace_prefix(namespace))
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
