//! Storage backends that stores read and write.
//!
//! Provides the `StorageBackend` trait plus two implementations: an
//! in-process volatile area shared between simulated execution contexts
//! (`memory`), and a JSON-file persistent store (`file`). A
//! `StorageContext` bundles the local and session backends visible to one
//! execution context.

pub mod file;
pub mod memory;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::observer::ObserverId;

pub use file::FileBackend;
pub use memory::{MemoryArea, MemoryBackend};


/// Handle for a listener registered on a backend's change channel.
pub type ListenerId = ObserverId;

/// Callback receiving changes made by other execution contexts.
pub type StorageListener = Box<dyn Fn(&StorageEvent) + Send + Sync>;


/// One physical-key mutation observed from another execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEvent {
    /// Physical key that changed.
    pub key: String,
    /// Stored string before the change, if any.
    pub old_value: Option<String>,
    /// Stored string after the change; `None` when the key was removed.
    pub new_value: Option<String>,
}


/// Capability a store needs from a physical string-keyed store.
///
/// Keys are enumerable by index in `0..length()`. The change channel only
/// reports mutations made through other handles on the same physical data,
/// never the subscriber's own writes.
pub trait StorageBackend: Send + Sync {
    /// Read the stored string for a physical key.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Write a stored string, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove a physical key. Removing an absent key is not an error.
    fn remove_item(&self, key: &str) -> StoreResult<()>;

    /// Physical key at `index`, or `None` past the end.
    fn key(&self, index: usize) -> Option<String>;

    /// Number of physical keys currently stored.
    fn length(&self) -> usize;

    /// Every physical key in index order.
    ///
    /// The default walks `key(0..length())`; implementations override it
    /// to take one consistent snapshot.
    fn keys(&self) -> Vec<String> {
        (0..self.length()).filter_map(|index| self.key(index)).collect()
    }

    /// Register for changes made by other execution contexts.
    fn subscribe(&self, listener: StorageListener) -> ListenerId;

    /// Drop a listener. Returns false if it was not registered.
    fn unsubscribe(&self, id: ListenerId) -> bool;
}


/// Which of a context's two backends a store binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum BackendKind {
    /// Long-lived storage shared by every context on the same area.
    #[default]
    Local,
    /// Storage scoped to a single context.
    Session,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Session => "session",
        }
    }

    /// Parse a kind name, ignoring case, surrounding whitespace and one
    /// occurrence of the word "storage" (so `localStorage` is `local`).
    pub fn parse(name: &str) -> StoreResult<Self> {
        let lowered = name.to_lowercase();
        let normalized = lowered.replacen("storage", "", 1);
        match normalized.trim() {
            "local" => Ok(BackendKind::Local),
            "session" => Ok(BackendKind::Session),
            _ => Err(StoreError::InvalidConfiguration(format!(
                "backend kind must be either \"local\" or \"session\", got '{}'",
                name
            ))),
        }
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::parse(s)
    }
}

impl TryFrom<String> for BackendKind {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        BackendKind::parse(&s)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


/// The pair of backends one execution context can see.
#[derive(Clone)]
pub struct StorageContext {
    local: Arc<dyn StorageBackend>,
    session: Arc<dyn StorageBackend>,
}

impl StorageContext {
    pub fn new(local: Arc<dyn StorageBackend>, session: Arc<dyn StorageBackend>) -> Self {
        StorageContext { local, session }
    }

    /// A context with fresh, unshared in-memory local and session areas.
    pub fn in_memory() -> Self {
        Self::attach(&MemoryArea::new())
    }

    /// A new context sharing `local` with every other context attached to
    /// it, with its own private session area.
    pub fn attach(local: &MemoryArea) -> Self {
        StorageContext {
            local: Arc::new(local.open()),
            session: Arc::new(MemoryArea::new().open()),
        }
    }

    pub fn backend(&self, kind: BackendKind) -> Arc<dyn StorageBackend> {
        match kind {
            BackendKind::Local => Arc::clone(&self.local),
            BackendKind::Session => Arc::clone(&self.session),
        }
    }
}

impl fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageContext")
            .field("local_length", &self.local.length())
            .field("session_length", &self.session.length())
            .finish()
    }
}
