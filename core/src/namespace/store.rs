//! Namespaced store over a string-only backend.
//!
//! Binds a namespace to one backend. Logical keys map to physical
//! `namespace.key` entries, values go through the codec, and every local
//! mutation plus every change made by another execution context is
//! delivered to this store's observers.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::backend::{BackendKind, ListenerId, StorageBackend, StorageContext, StorageEvent};
use crate::codec::{self, StoreValue};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::observer::{ObserverId, ObserverList};

use super::event::StoreEvent;
use super::key::{namespaced_key_name, owns_physical_key, strip_namespace};
use super::registry::{register_namespace, NamespaceRegistry};


/// A namespace bound to one backend.
///
/// Several stores may share a backend and even a namespace; each keeps its
/// own observer list. Dropping a store detaches it from the backend's
/// change channel and leaves the stored data alone.
pub struct Store {
    namespace: String,
    kind: BackendKind,
    backend: Arc<dyn StorageBackend>,
    observers: Arc<ObserverList<StoreEvent>>,
    listener: ListenerId,
}

impl Store {
    /// Create a store on `context`'s backend named by `kind`
    /// (`"local"`, `"session"`, `"localStorage"`, ... case-insensitive).
    ///
    /// An unrecognized kind is `InvalidConfiguration`. A non-empty
    /// namespace is registered in the backend's namespace registry.
    pub fn new(namespace: &str, kind: &str, context: &StorageContext) -> StoreResult<Self> {
        let kind = BackendKind::parse(kind)?;
        Self::with_kind(namespace, kind, context)
    }

    pub fn with_kind(
        namespace: &str,
        kind: BackendKind,
        context: &StorageContext,
    ) -> StoreResult<Self> {
        Self::bind(namespace, kind, context.backend(kind))
    }

    /// Create a store directly on an injected backend, recording which
    /// kind of backend it is.
    pub fn with_backend(
        namespace: &str,
        kind: BackendKind,
        backend: Arc<dyn StorageBackend>,
    ) -> StoreResult<Self> {
        Self::bind(namespace, kind, backend)
    }

    /// Create a store from a loaded `StoreConfig`.
    pub fn open(config: &StoreConfig, context: &StorageContext) -> StoreResult<Self> {
        Self::with_kind(&config.namespace, config.kind, context)
    }

    fn bind(
        namespace: &str,
        kind: BackendKind,
        backend: Arc<dyn StorageBackend>,
    ) -> StoreResult<Self> {
        register_namespace(namespace, backend.as_ref())?;

        let observers: Arc<ObserverList<StoreEvent>> = Arc::new(ObserverList::new());
        let relay = Arc::clone(&observers);
        let ns = namespace.to_string();
        let listener = backend.subscribe(Box::new(move |event: &StorageEvent| {
            let key = strip_namespace(&ns, &event.key).to_string();
            tracing::debug!(namespace = %ns, physical = %event.key, key = %key, "external change");
            relay.notify(&StoreEvent::ExternalChange {
                key,
                old_value: event.old_value.clone(),
                new_value: event.new_value.clone(),
            });
        }));

        Ok(Store {
            namespace: namespace.to_string(),
            kind,
            backend,
            observers,
            listener,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// Decoded value for `key`, or `None` if nothing is stored.
    pub fn get(&self, key: &str) -> StoreResult<Option<StoreValue>> {
        let physical = self.physical_key(key)?;
        self.backend
            .get_item(&physical)
            .map(|stored| codec::decode(&stored))
            .transpose()
    }

    /// `get` followed by deserialization into `T`.
    ///
    /// Subject to decode inference: a stored `"42"` is a number and will
    /// not deserialize into a `String`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key)? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::TypeMismatch {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// True if `key` is currently one of this namespace's logical keys.
    pub fn has(&self, key: &str) -> bool {
        self.entries().iter().any(|(logical, _)| logical == key)
    }

    /// Logical keys in scan order (highest physical index first).
    pub fn keys(&self) -> Vec<String> {
        self.entries().into_iter().map(|(logical, _)| logical).collect()
    }

    /// Every entry in this namespace, logical key to decoded value, in scan
    /// order (highest physical index first).
    pub fn items(&self) -> StoreResult<Map<String, StoreValue>> {
        let mut items = Map::new();
        for (logical, physical) in self.entries() {
            if let Some(stored) = self.backend.get_item(&physical) {
                items.insert(logical, codec::decode(&stored)?);
            }
        }
        Ok(items)
    }

    /// Number of entries in this namespace.
    pub fn size(&self) -> usize {
        self.entries().len()
    }

    /// Same as `size`.
    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Namespaces registered in this store's backend, oldest first.
    pub fn namespaces(&self) -> StoreResult<Vec<String>> {
        NamespaceRegistry::new(self.backend.as_ref()).list()
    }

    pub fn has_namespace(&self, namespace: &str) -> StoreResult<bool> {
        NamespaceRegistry::new(self.backend.as_ref()).contains(namespace)
    }

    // -------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------

    /// Encode and store `value` under `key`, then notify a `Set` event
    /// carrying the encoded value and the previous decoded value if any.
    pub fn set(&self, key: &str, value: impl Into<StoreValue>) -> StoreResult<()> {
        let value = value.into();
        let physical = self.physical_key(key)?;
        let encoded = codec::encode(&value);
        let old_value = self.previous_value(&physical);

        self.backend.set_item(&physical, &encoded)?;
        tracing::debug!(namespace = %self.namespace, key, physical = %physical, "set");

        self.observers.notify(&StoreEvent::Set {
            key: key.to_string(),
            value: encoded,
            old_value,
        });
        Ok(())
    }

    /// Serialize `value` with serde and `set` the result.
    pub fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| StoreError::InvalidArgument(format!("cannot serialize value: {}", e)))?;
        self.set(key, value)
    }

    /// Store each entry of a collection under its own key.
    ///
    /// Keyed data (structs, maps, JSON objects) uses its own keys; ordered
    /// data (sequences, sets) uses stringified indices `"0"`, `"1"`, ....
    /// Entries are `set` one by one in iteration order with no atomicity:
    /// a failure leaves earlier entries written. Anything that does not
    /// serialize to an object or array is `InvalidArgument`.
    pub fn set_object<T: Serialize + ?Sized>(&self, data: &T) -> StoreResult<()> {
        let cloned = serde_json::to_value(data).map_err(|e| {
            StoreError::InvalidArgument(format!("set_object must be sent an object: {}", e))
        })?;

        let entries: Vec<(String, StoreValue)> = match cloned {
            Value::Object(map) => map.into_iter().collect(),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            other => {
                return Err(StoreError::InvalidArgument(format!(
                    "set_object must be sent an object, got {}",
                    shape_name(&other)
                )))
            }
        };

        for (key, value) in entries {
            self.set(&key, value)?;
        }
        Ok(())
    }

    /// Remove `key` and notify a `Delete` event with the previous decoded
    /// value if there was one. Deleting an absent key still notifies.
    pub fn delete(&self, key: &str) -> StoreResult<()> {
        let physical = self.physical_key(key)?;
        self.delete_physical(key, &physical)
    }

    /// Delete every entry in this namespace, one `delete` at a time.
    ///
    /// Not atomic; a failure leaves the remaining entries in place.
    pub fn clear(&self) -> StoreResult<()> {
        for (logical, physical) in self.entries() {
            self.delete_physical(&logical, &physical)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------

    /// Receive every `StoreEvent` from this store.
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    // -------------------------------------------------------------------
    // Internal
    // -------------------------------------------------------------------

    /// Physical key for a logical key.
    ///
    /// Without a namespace the key is used as-is. A key that already
    /// starts with `"<namespace>."` is rejected rather than mapped to the
    /// empty key.
    fn physical_key(&self, key: &str) -> StoreResult<String> {
        if self.namespace.is_empty() {
            if key.is_empty() {
                return Err(StoreError::invalid_key("key is required"));
            }
            return Ok(key.to_string());
        }
        let physical = namespaced_key_name(&self.namespace, key)?;
        if physical.is_empty() {
            return Err(StoreError::invalid_key(format!(
                "'{}' already carries the '{}.' namespace prefix",
                key, self.namespace
            )));
        }
        Ok(physical)
    }

    /// `(logical, physical)` pairs owned by this namespace, scanned from
    /// the highest backend index down to zero.
    fn entries(&self) -> Vec<(String, String)> {
        self.backend
            .keys()
            .into_iter()
            .rev()
            .filter(|physical| owns_physical_key(&self.namespace, physical))
            .map(|physical| (strip_namespace(&self.namespace, &physical).to_string(), physical))
            .collect()
    }

    /// Decoded value being replaced or removed, for the event payload.
    ///
    /// A corrupt stored value is reported as absent so it can still be
    /// overwritten or deleted.
    fn previous_value(&self, physical: &str) -> Option<StoreValue> {
        let stored = self.backend.get_item(physical)?;
        match codec::decode(&stored) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, physical, error = %e, "replacing undecodable value");
                None
            }
        }
    }

    fn delete_physical(&self, key: &str, physical: &str) -> StoreResult<()> {
        let old_value = self.previous_value(physical);

        self.backend.remove_item(physical)?;
        tracing::debug!(namespace = %self.namespace, key, physical, "delete");

        self.observers.notify(&StoreEvent::Delete {
            key: key.to_string(),
            old_value,
        });
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.backend.unsubscribe(self.listener);
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("namespace", &self.namespace)
            .field("kind", &self.kind)
            .field("observers", &self.observers.len())
            .finish()
    }
}


fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileBackend, MemoryArea, MemoryBackend};
    use crate::namespace::key::REGISTRY_KEY;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet, HashMap};
    use std::sync::Mutex;

    fn local(namespace: &str) -> (Store, StorageContext) {
        let context = StorageContext::in_memory();
        let store = Store::new(namespace, "local", &context).unwrap();
        (store, context)
    }

    fn recorder(store: &Store) -> Arc<Mutex<Vec<StoreEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        store.subscribe(move |e| s.lock().unwrap().push(e.clone()));
        seen
    }

    // -- construction -------------------------------------------------------

    #[test]
    fn create_without_namespace() {
        let (store, context) = local("");
        assert_eq!(store.namespace(), "");
        assert_eq!(store.kind(), BackendKind::Local);
        assert_eq!(context.backend(BackendKind::Local).get_item(REGISTRY_KEY), None);
    }

    #[test]
    fn create_with_namespace_registers_it() {
        let (store, _context) = local("foo");
        assert_eq!(store.namespace(), "foo");
        assert_eq!(store.namespaces().unwrap(), vec!["foo"]);
    }

    #[test]
    fn invalid_kind_is_rejected() {
        let context = StorageContext::in_memory();
        match Store::new("foo", "foo", &context) {
            Err(StoreError::InvalidConfiguration(msg)) => {
                assert!(msg.contains("\"local\" or \"session\""))
            }
            other => panic!("expected InvalidConfiguration, got {:?}", other),
        }
    }

    #[test]
    fn kind_selects_backend() {
        let context = StorageContext::in_memory();
        let store = Store::new("set-test", "session", &context).unwrap();
        store.set("foo", "bar").unwrap();
        assert_eq!(
            context.backend(BackendKind::Session).get_item("set-test.foo").as_deref(),
            Some("bar")
        );
        assert_eq!(context.backend(BackendKind::Local).get_item("set-test.foo"), None);

        let store = Store::new("set-test", "localStorage", &context).unwrap();
        assert_eq!(store.kind(), BackendKind::Local);
    }

    #[test]
    fn open_from_config() {
        let context = StorageContext::in_memory();
        let config = StoreConfig {
            namespace: "cfg".into(),
            kind: BackendKind::Session,
        };
        let store = Store::open(&config, &context).unwrap();
        assert_eq!(store.kind(), BackendKind::Session);
        assert!(store.has_namespace("cfg").unwrap());
    }

    // -- get / set / delete -------------------------------------------------

    #[test]
    fn set_and_get() {
        let (store, context) = local("set-test");
        store.set("foo", "bar").unwrap();
        assert_eq!(store.get("foo").unwrap(), Some(json!("bar")));
        assert_eq!(
            context.backend(BackendKind::Local).get_item("set-test.foo").as_deref(),
            Some("bar")
        );
    }

    #[test]
    fn set_and_get_shapes() {
        let (store, _context) = local("shapes");
        store.set("num", 1).unwrap();
        store.set("obj", json!({"a": 1})).unwrap();
        store.set("list", json!(["x", "y"])).unwrap();
        store.set("flag", true).unwrap();
        store.set("nothing", Value::Null).unwrap();

        assert_eq!(store.get("num").unwrap(), Some(json!(1)));
        assert_eq!(store.get("obj").unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.get("list").unwrap(), Some(json!(["x", "y"])));
        assert_eq!(store.get("flag").unwrap(), Some(json!(true)));
        assert_eq!(store.get("nothing").unwrap(), Some(Value::Null));
    }

    #[test]
    fn get_missing_is_none() {
        let (store, _context) = local("get-test");
        assert_eq!(store.get("nope").unwrap(), None);
    }

    #[test]
    fn delete_removes() {
        let (store, _context) = local("delete-test");
        store.set("foo", "bar").unwrap();
        store.delete("foo").unwrap();
        assert_eq!(store.get("foo").unwrap(), None);
    }

    #[test]
    fn no_namespace_uses_bare_keys() {
        let (store, context) = local("");
        store.set("plain", 5).unwrap();
        assert_eq!(
            context.backend(BackendKind::Local).get_item("plain").as_deref(),
            Some("5")
        );
        assert_eq!(store.get("plain").unwrap(), Some(json!(5)));
    }

    #[test]
    fn empty_key_is_invalid() {
        let (store, _context) = local("keys");
        assert!(matches!(store.set("", 1), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.get(""), Err(StoreError::InvalidKey(_))));
        let (bare, _context) = local("");
        assert!(matches!(bare.delete(""), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn prefixed_key_is_rejected_not_collided() {
        let (store, context) = local("ns");
        match store.set("ns.foo", 1) {
            Err(StoreError::InvalidKey(msg)) => assert!(msg.contains("'ns.'")),
            other => panic!("expected InvalidKey, got {:?}", other),
        }
        assert_eq!(context.backend(BackendKind::Local).get_item(""), None);
    }

    #[test]
    fn typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Prefs {
            theme: String,
            font_size: u32,
        }

        let (store, _context) = local("typed");
        let prefs = Prefs { theme: "dark".into(), font_size: 14 };
        store.set_as("prefs", &prefs).unwrap();
        assert_eq!(store.get_as::<Prefs>("prefs").unwrap(), Some(prefs));
        assert_eq!(store.get_as::<Prefs>("missing").unwrap(), None);

        // A numeric-looking string comes back as a number.
        store.set_as("code", "42").unwrap();
        assert_eq!(store.get_as::<u32>("code").unwrap(), Some(42));
        assert!(matches!(
            store.get_as::<String>("code"),
            Err(StoreError::TypeMismatch { ref key, .. }) if key == "code"
        ));
    }

    // -- enumeration --------------------------------------------------------

    #[test]
    fn size_counts_namespace_entries() {
        let (store, _context) = local("size-test");
        assert_eq!(store.size(), 0);
        assert!(store.is_empty());
        store.set("foo", "bar").unwrap();
        store.set("bar", 1).unwrap();
        store.set("baz", json!({"a": 1})).unwrap();
        assert_eq!(store.size(), 3);
        assert_eq!(store.len(), store.size());
    }

    #[test]
    fn items_decodes_in_reverse_index_order() {
        let (store, _context) = local("map-test1");
        store.set("foo", "bar").unwrap();
        store.set("bar", 1).unwrap();
        store.set("baz", json!({"a": 1})).unwrap();
        store.set("beep", true).unwrap();

        let items = store.items().unwrap();
        assert_eq!(items.get("foo"), Some(&json!("bar")));
        assert_eq!(items.get("bar"), Some(&json!(1)));
        assert_eq!(items.get("baz"), Some(&json!({"a": 1})));
        assert_eq!(items.get("beep"), Some(&json!(true)));

        // Memory backends enumerate sorted, so the scan runs in reverse.
        let keys: Vec<&String> = items.keys().collect();
        assert_eq!(keys, vec!["foo", "beep", "baz", "bar"]);
        assert_eq!(store.keys(), vec!["foo", "beep", "baz", "bar"]);
    }

    #[test]
    fn namespaces_do_not_leak_into_each_other() {
        let area = MemoryArea::new();
        let context = StorageContext::attach(&area);
        let short = Store::new("foo", "local", &context).unwrap();
        let long = Store::new("foobar", "local", &context).unwrap();

        short.set("a", 1).unwrap();
        long.set("b", 2).unwrap();

        assert_eq!(short.keys(), vec!["a"]);
        assert_eq!(long.keys(), vec!["b"]);
    }

    #[test]
    fn bare_store_sees_everything_but_the_registry() {
        let context = StorageContext::in_memory();
        let named = Store::new("ns", "local", &context).unwrap();
        let bare = Store::new("", "local", &context).unwrap();
        named.set("a", 1).unwrap();
        bare.set("b", 2).unwrap();

        let mut keys = bare.keys();
        keys.sort();
        assert_eq!(keys, vec!["b", "ns.a"]);
    }

    #[test]
    fn has_reports_presence() {
        let (store, _context) = local("has-test");
        assert!(!store.has("foo"));
        store.set("foo", "bar").unwrap();
        assert!(store.has("foo"));
        assert!(!store.has("booo"));
        store.delete("foo").unwrap();
        assert!(!store.has("foo"));
    }

    #[test]
    fn has_namespace() {
        let (store, _context) = local("has-namespace");
        assert!(store.has_namespace("has-namespace").unwrap());
        assert!(!store.has_namespace("no-namespace").unwrap());
    }

    #[test]
    fn namespaces_is_empty_without_registration() {
        let (store, _context) = local("");
        assert!(store.namespaces().unwrap().is_empty());
    }

    // -- set_object ---------------------------------------------------------

    #[test]
    fn set_object_from_keyed_value() {
        let (store, _context) = local("set-object-test");
        store
            .set_object(&json!({"foo": "bar", "bar": 1, "baz": {"a": 1}, "beep": true}))
            .unwrap();
        assert_eq!(store.get("foo").unwrap(), Some(json!("bar")));
        assert_eq!(store.get("bar").unwrap(), Some(json!(1)));
        assert_eq!(store.get("baz").unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.get("beep").unwrap(), Some(json!(true)));
    }

    #[test]
    fn set_object_from_sequence_and_set() {
        let (store, _context) = local("set-object-test-array");
        store.set_object(&vec!["foo", "bar"]).unwrap();
        assert_eq!(store.get("0").unwrap(), Some(json!("foo")));
        assert_eq!(store.get("1").unwrap(), Some(json!("bar")));

        let (store, _context) = local("set-set-test-set");
        let set: BTreeSet<&str> = ["bar", "foo"].into_iter().collect();
        store.set_object(&set).unwrap();
        assert_eq!(store.get("0").unwrap(), Some(json!("bar")));
        assert_eq!(store.get("1").unwrap(), Some(json!("foo")));
    }

    #[test]
    fn set_object_from_map() {
        let (store, _context) = local("set-object-test-map");
        let mut map = BTreeMap::new();
        map.insert("foo", "ood");
        map.insert("bar", "ard");
        store.set_object(&map).unwrap();
        assert_eq!(store.get("foo").unwrap(), Some(json!("ood")));
        assert_eq!(store.get("bar").unwrap(), Some(json!("ard")));

        let mut numbered: HashMap<u32, bool> = HashMap::new();
        numbered.insert(7, true);
        store.set_object(&numbered).unwrap();
        assert_eq!(store.get("7").unwrap(), Some(json!(true)));
    }

    #[test]
    fn set_object_notifies_once_per_entry_in_order() {
        let (store, _context) = local("set-object-order");
        let seen = recorder(&store);
        store.set_object(&json!({"z": 1, "a": 2, "m": 3})).unwrap();
        let keys: Vec<String> = seen.lock().unwrap().iter().map(|e| e.key().to_string()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn set_object_rejects_non_objects() {
        let (store, _context) = local("set-object-test");
        for bad in [Value::Null, json!(1), json!("text"), json!(true)] {
            match store.set_object(&bad) {
                Err(StoreError::InvalidArgument(msg)) => {
                    assert!(msg.starts_with("set_object must be sent an object"))
                }
                other => panic!("expected InvalidArgument, got {:?}", other),
            }
        }
        assert!(store.is_empty());
    }

    #[test]
    fn set_object_is_not_atomic() {
        let area = MemoryArea::with_quota(64);
        let backend: Arc<dyn StorageBackend> = Arc::new(area.open());
        let store = Store::with_backend("q", BackendKind::Local, backend).unwrap();
        let big = "x".repeat(40);
        let result = store.set_object(&json!({"a": "small", "b": big}));
        assert!(matches!(result, Err(StoreError::QuotaExceeded { .. })));
        assert_eq!(store.get("a").unwrap(), Some(json!("small")));
        assert_eq!(store.get("b").unwrap(), None);
    }

    // -- clear --------------------------------------------------------------

    #[test]
    fn clear_empties_only_this_namespace() {
        let context = StorageContext::in_memory();
        let store = Store::new("clear-test", "local", &context).unwrap();
        let other = Store::new("other", "local", &context).unwrap();
        store.set("oof", "rab").unwrap();
        store.set("two", 2).unwrap();
        other.set("keep", 1).unwrap();

        let seen = recorder(&store);
        store.clear().unwrap();

        assert_eq!(store.get("oof").unwrap(), None);
        assert_eq!(store.size(), 0);
        assert_eq!(other.size(), 1);
        assert!(store.has_namespace("clear-test").unwrap());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    // -- notifications ------------------------------------------------------

    #[test]
    fn set_and_delete_notify() {
        let (store, _context) = local("notify");
        let seen = recorder(&store);

        store.set("foo", json!({"a": 1})).unwrap();
        store.set("foo", 2).unwrap();
        store.delete("foo").unwrap();
        store.delete("foo").unwrap();

        let events = seen.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                StoreEvent::Set { key: "foo".into(), value: r#"{"a":1}"#.into(), old_value: None },
                StoreEvent::Set {
                    key: "foo".into(),
                    value: "2".into(),
                    old_value: Some(json!({"a": 1})),
                },
                StoreEvent::Delete { key: "foo".into(), old_value: Some(json!(2)) },
                StoreEvent::Delete { key: "foo".into(), old_value: None },
            ]
        );
    }

    #[test]
    fn unsubscribed_observer_is_silent() {
        let (store, _context) = local("unsub");
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        let id = store.subscribe(move |_| *c.lock().unwrap() += 1);
        store.set("a", 1).unwrap();
        assert!(store.unsubscribe(id));
        store.set("a", 2).unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn external_changes_reach_other_contexts_only() {
        let area = MemoryArea::new();
        let tab_a = StorageContext::attach(&area);
        let tab_b = StorageContext::attach(&area);
        let store_a = Store::new("shared", "local", &tab_a).unwrap();
        let store_b = Store::new("shared", "local", &tab_b).unwrap();
        let seen_a = recorder(&store_a);
        let seen_b = recorder(&store_b);

        store_a.set("foo", "bar").unwrap();
        store_a.delete("foo").unwrap();

        let a = seen_a.lock().unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|e| !matches!(e, StoreEvent::ExternalChange { .. })));

        let b = seen_b.lock().unwrap();
        assert_eq!(
            *b,
            vec![
                StoreEvent::ExternalChange {
                    key: "foo".into(),
                    old_value: None,
                    new_value: Some("bar".into()),
                },
                StoreEvent::ExternalChange {
                    key: "foo".into(),
                    old_value: Some("bar".into()),
                    new_value: None,
                },
            ]
        );
        assert_eq!(store_b.get("foo").unwrap(), None);
    }

    #[test]
    fn external_changes_outside_namespace_are_relayed_unstripped() {
        let area = MemoryArea::new();
        let tab_a = StorageContext::attach(&area);
        let tab_b = StorageContext::attach(&area);
        let watcher = Store::new("mine", "local", &tab_b).unwrap();
        let seen = recorder(&watcher);

        let writer = Store::new("theirs", "local", &tab_a).unwrap();
        writer.set("k", 1).unwrap();

        let keys: Vec<String> = seen.lock().unwrap().iter().map(|e| e.key().to_string()).collect();
        assert_eq!(keys, vec![REGISTRY_KEY.to_string(), "theirs.k".to_string()]);
    }

    #[test]
    fn dropping_store_detaches_listener() {
        let area = MemoryArea::new();
        let handle = Arc::new(area.open());
        let backend: Arc<dyn StorageBackend> = handle.clone();

        let store = Store::with_backend("drop", BackendKind::Local, backend).unwrap();
        assert!(format!("{:?}", handle).contains("listeners: 1"));
        drop(store);
        assert!(format!("{:?}", handle).contains("listeners: 0"));
    }

    #[test]
    fn observer_may_read_store_during_notification() {
        let area = MemoryArea::new();
        let tab_a = StorageContext::attach(&area);
        let tab_b = StorageContext::attach(&area);
        let writer = Store::new("re", "local", &tab_a).unwrap();
        let reader = Arc::new(Store::new("re", "local", &tab_b).unwrap());

        let observed = Arc::new(Mutex::new(None));
        let o = Arc::clone(&observed);
        let weak = Arc::downgrade(&reader);
        reader.subscribe(move |event| {
            if let (StoreEvent::ExternalChange { key, .. }, Some(store)) = (event, weak.upgrade()) {
                *o.lock().unwrap() = store.get(key).ok().flatten();
            }
        });

        writer.set("n", 3).unwrap();
        assert_eq!(*observed.lock().unwrap(), Some(json!(3)));
    }

    #[test]
    fn quota_errors_propagate_without_notifying() {
        let area = MemoryArea::with_quota(40);
        let backend: Arc<dyn StorageBackend> = Arc::new(area.open());
        let store = Store::with_backend("q", BackendKind::Local, backend).unwrap();
        let seen = recorder(&store);

        let result = store.set("big", "x".repeat(100));
        assert!(matches!(result, Err(StoreError::QuotaExceeded { .. })));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_stored_value_propagates() {
        let (store, context) = local("bad");
        context
            .backend(BackendKind::Local)
            .set_item("bad.k", "{broken")
            .unwrap();
        assert!(matches!(store.get("k"), Err(StoreError::MalformedStoredValue { .. })));
        assert!(store.items().is_err());
        // Presence checks do not decode.
        assert!(store.has("k"));
    }

    #[test]
    fn malformed_stored_value_can_be_replaced_and_removed() {
        let (store, context) = local("bad");
        let raw = context.backend(BackendKind::Local);
        raw.set_item("bad.k", "{broken").unwrap();
        let seen = recorder(&store);

        store.set("k", "fresh").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!("fresh")));

        raw.set_item("bad.k", "{broken").unwrap();
        store.delete("k").unwrap();
        assert!(!store.has("k"));

        raw.set_item("bad.k", "{broken").unwrap();
        raw.set_item("bad.other", "[1,").unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|event| match event {
            StoreEvent::Set { old_value, .. } | StoreEvent::Delete { old_value, .. } =>
                old_value.is_none(),
            StoreEvent::ExternalChange { .. } => false,
        }));
    }

    // -- persistent backend -------------------------------------------------

    #[test]
    fn works_over_a_file_backend() {
        let dir = std::env::temp_dir().join(format!("cheap-state-store-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("state.json");

        let writer_backend = Arc::new(FileBackend::open(&path).unwrap());
        let writer = Store::with_backend("disk", BackendKind::Local, writer_backend).unwrap();
        let reader_backend = Arc::new(FileBackend::open(&path).unwrap());
        let reader =
            Store::with_backend("disk", BackendKind::Local, reader_backend.clone()).unwrap();
        let seen = recorder(&reader);

        writer.set("foo", json!({"a": [1, 2]})).unwrap();
        // The reader opened after registration, so only the new key is news.
        assert_eq!(reader_backend.poll_external_changes().unwrap(), 1);

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key(), "foo");
        assert_eq!(reader.get("foo").unwrap(), Some(json!({"a": [1, 2]})));
        assert_eq!(reader.namespaces().unwrap(), vec!["disk"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn memory_backend_type_is_usable_directly() {
        let backend: Arc<MemoryBackend> = Arc::new(MemoryArea::new().open());
        let store = Store::with_backend("direct", BackendKind::Local, backend).unwrap();
        store.set("a", 1).unwrap();
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn injected_backend_keeps_its_kind() {
        let context = StorageContext::in_memory();
        let session = context.backend(BackendKind::Session);
        let store = Store::with_backend("tab", BackendKind::Session, session.clone()).unwrap();
        assert_eq!(store.kind(), BackendKind::Session);

        store.set("a", 1).unwrap();
        assert_eq!(session.get_item("tab.a").as_deref(), Some("1"));
        assert!(context.backend(BackendKind::Local).get_item("tab.a").is_none());
    }
}
