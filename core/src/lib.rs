//! Cheap State: namespaced key-value state over string-only storage.
//!
//! Several logical stores share one physical backend without key
//! collisions: each `Store` prefixes its keys with `<namespace>.`, encodes
//! structured values to strings and infers their type on the way back,
//! records its namespace in a per-backend registry, and notifies
//! subscribers about its own writes as well as writes made by other
//! execution contexts on the same backend.
//!
//! ```
//! use cheap_state::{StorageContext, Store};
//! use serde_json::json;
//!
//! let context = StorageContext::in_memory();
//! let store = Store::new("prefs", "local", &context)?;
//! store.set("theme", "dark")?;
//! store.set("layout", json!({"cols": 2}))?;
//! assert_eq!(store.get("layout")?, Some(json!({"cols": 2})));
//! assert_eq!(store.size(), 2);
//! # Ok::<(), cheap_state::StoreError>(())
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod namespace;
pub mod observer;

pub use backend::{
    BackendKind, FileBackend, ListenerId, MemoryArea, MemoryBackend, StorageBackend,
    StorageContext, StorageEvent, StorageListener,
};
pub use codec::{decode, decode_value, encode, StoreValue};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use namespace::{
    namespaced_key_name, register_namespace, NamespaceRegistry, Store, StoreEvent, REGISTRY_KEY,
};
pub use observer::{ObserverId, ObserverList};
