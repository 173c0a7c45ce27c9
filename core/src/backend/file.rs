//! Persistent storage in a single JSON object file.
//!
//! The file maps physical keys to stored strings. Every mutation holds an
//! advisory lock on a sibling `.<name>.lock` file while it re-reads the
//! file, applies the change and writes it back, so handles in different
//! threads or processes never drop each other's keys. Writes are atomic
//! (unique temp file in the same directory, then rename). Other handles'
//! edits are picked up by `poll_external_changes`, which diffs the file
//! against this handle's last known view and reports each difference as a
//! `StorageEvent`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::observer::ObserverList;

use super::{ListenerId, StorageBackend, StorageEvent, StorageListener};


type Entries = BTreeMap<String, String>;


/// Entries plus their keys in index order.
struct View {
    entries: Entries,
    order: Vec<String>,
}

impl View {
    fn new(entries: Entries) -> Self {
        let order = entries.keys().cloned().collect();
        View { entries, order }
    }
}


/// A backend whose data lives in one JSON file on disk.
pub struct FileBackend {
    path: PathBuf,
    /// This handle's view of the file as of its last read or write.
    view: RwLock<View>,
    listeners: ObserverList<StorageEvent>,
}

impl FileBackend {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file is an empty store; the file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let entries = read_entries(&path)?;
        Ok(FileBackend {
            path,
            view: RwLock::new(View::new(entries)),
            listeners: ObserverList::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and report keys changed by someone else.
    ///
    /// Returns the number of events delivered. Changes this handle wrote
    /// itself are already in its view and never reported.
    pub fn poll_external_changes(&self) -> StoreResult<usize> {
        let on_disk = read_entries(&self.path)?;
        let events = {
            let mut view = self.write();
            let events = diff_entries(&view.entries, &on_disk);
            *view = View::new(on_disk);
            events
        };
        self.deliver(&events);
        Ok(events.len())
    }

    /// Apply one mutation on top of the current file contents and persist it.
    ///
    /// External edits found on the way are delivered once the file lock is
    /// released, so listeners may write back through this handle.
    fn mutate<F>(&self, apply: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Entries),
    {
        let events = {
            let _lock = FileLock::acquire(&sibling(&self.path, "lock"))?;
            let on_disk = read_entries(&self.path)?;
            let mut view = self.write();
            let events = diff_entries(&view.entries, &on_disk);

            let mut next = on_disk;
            apply(&mut next);
            write_entries(&self.path, &next)?;
            *view = View::new(next);
            events
        };
        self.deliver(&events);
        Ok(())
    }

    fn deliver(&self, events: &[StorageEvent]) {
        if events.is_empty() {
            return;
        }
        tracing::debug!(
            path = %self.path.display(),
            changes = events.len(),
            "external changes detected"
        );
        for event in events {
            self.listeners.notify(event);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, View> {
        self.view.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, View> {
        self.view.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl StorageBackend for FileBackend {
    fn get_item(&self, key: &str) -> Option<String> {
        self.read().entries.get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        if !self.read().entries.contains_key(key) && !self.path.exists() {
            return Ok(());
        }
        self.mutate(|entries| {
            entries.remove(key);
        })
    }

    fn key(&self, index: usize) -> Option<String> {
        self.read().order.get(index).cloned()
    }

    fn length(&self) -> usize {
        self.read().order.len()
    }

    fn keys(&self) -> Vec<String> {
        self.read().order.clone()
    }

    fn subscribe(&self, listener: StorageListener) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

impl fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("entries", &self.read().order.len())
            .finish()
    }
}


// ---------------------------------------------------------------------------
// Internal: file I/O and diffing
// ---------------------------------------------------------------------------

fn read_entries(path: &Path) -> StoreResult<Entries> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if contents.trim().is_empty() {
        tracing::warn!(path = %path.display(), "store file is empty, treating as no entries");
        return Ok(Entries::new());
    }
    serde_json::from_str(&contents).map_err(|e| StoreError::malformed(&contents, e))
}

fn write_entries(path: &Path, entries: &Entries) -> StoreResult<()> {
    static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

    let parent = parent_dir(path);
    fs::create_dir_all(&parent).map_err(|e| StoreError::io(&parent, e))?;

    let object: Map<String, Value> = entries
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let json = format!("{:#}", Value::Object(object));

    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp_path = sibling(path, &format!("{}.{}.tmp", std::process::id(), seq));
    fs::write(&tmp_path, json).map_err(|e| StoreError::io(&tmp_path, e))?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(path, e));
    }

    tracing::debug!(path = %path.display(), entries = entries.len(), "store file written");
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// `.<file name>.<suffix>` next to `path`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    parent_dir(path).join(format!(".{}.{}", file_name, suffix))
}


/// Exclusive advisory lock held until dropped.
///
/// The lock file is never deleted: unlinking it would let a later
/// handle lock a fresh inode while a waiter still holds the old one.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(lock_path: &Path) -> StoreResult<Self> {
        let parent = parent_dir(lock_path);
        fs::create_dir_all(&parent).map_err(|e| StoreError::io(&parent, e))?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| StoreError::io(lock_path, e))?;
        lock_exclusive(&file).map_err(|e| StoreError::io(lock_path, e))?;
        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if ret == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

// No advisory locking off unix; writes stay atomic but unserialized.
#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

/// One event per key whose value differs between `old` and `new`, in key order.
fn diff_entries(old: &Entries, new: &Entries) -> Vec<StorageEvent> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let before = old.get(key);
            let after = new.get(key);
            if before == after {
                return None;
            }
            Some(StorageEvent {
                key: key.clone(),
                old_value: before.cloned(),
                new_value: after.cloned(),
            })
        })
        .collect()
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
