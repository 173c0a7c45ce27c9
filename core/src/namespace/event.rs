//! Notifications a store sends to its observers.

use serde::{Deserialize, Serialize};

use crate::codec::StoreValue;


/// A change to a store, local or external.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StoreEvent {
    /// A key was written through this store.
    Set {
        key: String,
        /// The encoded string that was stored.
        value: String,
        /// Decoded previous value, if the key existed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_value: Option<StoreValue>,
    },
    /// A key was deleted through this store.
    Delete {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_value: Option<StoreValue>,
    },
    /// Another execution context changed the backend. Values are the raw
    /// stored strings.
    ExternalChange {
        /// Logical key (namespace prefix stripped when present).
        key: String,
        old_value: Option<String>,
        new_value: Option<String>,
    },
}

impl StoreEvent {
    /// The logical key the event is about.
    pub fn key(&self) -> &str {
        match self {
            StoreEvent::Set { key, .. }
            | StoreEvent::Delete { key, .. }
            | StoreEvent::ExternalChange { key, .. } => key,
        }
    }
}
