//! Volatile in-process storage shared between simulated execution contexts.
//!
//! A `MemoryArea` is the physical data. Each `open()` hands out a
//! `MemoryBackend` standing for one execution context; writes through one
//! handle are delivered to the listeners of every other live handle, the
//! way browser storage events reach other tabs but not the writer.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::error::{StoreError, StoreResult};
use crate::observer::ObserverList;

use super::{ListenerId, StorageBackend, StorageEvent, StorageListener};


type Listeners = ObserverList<StorageEvent>;

struct AreaState {
    /// Entries sorted by physical key, so index lookups are direct.
    entries: Vec<(String, String)>,
    /// Byte budget over all keys and values, if limited.
    quota: Option<usize>,
    /// Live handles and their listener lists.
    contexts: Vec<(u64, Weak<Listeners>)>,
    next_context: u64,
}

impl AreaState {
    fn position(&self, key: &str) -> Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.as_str().cmp(key))
    }

    fn get(&self, key: &str) -> Option<&String> {
        self.position(key).ok().map(|i| &self.entries[i].1)
    }

    fn insert(&mut self, key: &str, value: &str) -> Option<String> {
        match self.position(key) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i].1, value.to_string())),
            Err(i) => {
                self.entries.insert(i, (key.to_string(), value.to_string()));
                None
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).ok().map(|i| self.entries.remove(i).1)
    }
}


/// Shared volatile physical storage.
#[derive(Clone)]
pub struct MemoryArea {
    state: Arc<RwLock<AreaState>>,
}

impl MemoryArea {
    /// An empty area with no size limit.
    pub fn new() -> Self {
        MemoryArea {
            state: Arc::new(RwLock::new(AreaState {
                entries: Vec::new(),
                quota: None,
                contexts: Vec::new(),
                next_context: 1,
            })),
        }
    }

    /// An empty area that refuses writes once keys plus values exceed
    /// `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        let area = Self::new();
        area.write().quota = Some(bytes);
        area
    }

    /// Open a handle for a new execution context.
    pub fn open(&self) -> MemoryBackend {
        let listeners = Arc::new(Listeners::new());
        let mut state = self.write();
        let context = state.next_context;
        state.next_context += 1;
        state.contexts.retain(|(_, weak)| weak.strong_count() > 0);
        state.contexts.push((context, Arc::downgrade(&listeners)));
        MemoryBackend {
            area: self.clone(),
            context,
            listeners,
        }
    }

    /// Bytes currently used by keys and values.
    pub fn used_bytes(&self) -> usize {
        self.read()
            .entries
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    fn read(&self) -> RwLockReadGuard<'_, AreaState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AreaState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryArea {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("MemoryArea")
            .field("entries", &state.entries.len())
            .field("quota", &state.quota)
            .field("contexts", &state.contexts.len())
            .finish()
    }
}


/// One execution context's handle on a `MemoryArea`.
pub struct MemoryBackend {
    area: MemoryArea,
    context: u64,
    listeners: Arc<Listeners>,
}

impl MemoryBackend {
    /// The area this handle reads and writes.
    pub fn area(&self) -> &MemoryArea {
        &self.area
    }

    /// Listener lists of every other live context, collected under the
    /// lock so delivery can happen after it is released.
    fn peers(&self, state: &AreaState) -> Vec<Arc<Listeners>> {
        state
            .contexts
            .iter()
            .filter(|(context, _)| *context != self.context)
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    fn broadcast(peers: Vec<Arc<Listeners>>, event: StorageEvent) {
        for peer in peers {
            peer.notify(&event);
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Option<String> {
        self.area.read().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        let (old_value, peers) = {
            let mut state = self.area.write();
            if let Some(limit) = state.quota {
                let others: usize = state
                    .entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                let needed = others + key.len() + value.len();
                if needed > limit {
                    return Err(StoreError::QuotaExceeded {
                        key: key.to_string(),
                        needed,
                        limit,
                    });
                }
            }
            let old = state.insert(key, value);
            (old, self.peers(&state))
        };

        if old_value.as_deref() != Some(value) {
            Self::broadcast(
                peers,
                StorageEvent {
                    key: key.to_string(),
                    old_value,
                    new_value: Some(value.to_string()),
                },
            );
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        let (removed, peers) = {
            let mut state = self.area.write();
            let removed = state.remove(key);
            (removed, self.peers(&state))
        };

        if removed.is_some() {
            Self::broadcast(
                peers,
                StorageEvent {
                    key: key.to_string(),
                    old_value: removed,
                    new_value: None,
                },
            );
        }
        Ok(())
    }

    fn key(&self, index: usize) -> Option<String> {
        self.area.read().entries.get(index).map(|(k, _)| k.clone())
    }

    fn keys(&self) -> Vec<String> {
        self.area.read().entries.iter().map(|(k, _)| k.clone()).collect()
    }

    fn length(&self) -> usize {
        self.area.read().entries.len()
    }

    fn subscribe(&self, listener: StorageListener) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        let context = self.context;
        self.area.write().contexts.retain(|(c, _)| *c != context);
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("context", &self.context)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
