//! Namespaced stores: key mapping, namespace registry and the store itself.
//!
//! Many logical stores share one physical backend by prefixing their keys
//! with `<namespace>.`; the registry remembers which namespaces a backend
//! has seen, and each `Store` relays both its own writes and other
//! contexts' writes to its observers.

pub mod event;
pub mod key;
pub mod registry;
pub mod store;

pub use event::StoreEvent;
pub use key::{namespace_prefix, namespaced_key_name, strip_namespace, REGISTRY_KEY};
pub use registry::{register_namespace, NamespaceRegistry};
pub use store::Store;
