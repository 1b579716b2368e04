//! In-memory namespace store.
//!
//! One coarse read/write lock guards the key table, the children lists and
//! the checkpoint queue: lookups take the read lock, mutations the write
//! lock. Per-key application is already single-threaded (one stream per
//! replication group), but different groups run concurrently and may touch
//! overlapping structures, such as a child and its not-yet-materialized
//! parent, so a single lock is used rather than per-entry locks.
//!
//! Mutating methods are meant to be called only by the edit state machine;
//! they are the only place the live-object counter moves.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::arena::{SlotArena, SlotId};
use crate::inode::InodeRecord;
use crate::pathkey;
use crate::types::{EntryState, InstanceId, NnError, TimestampMs};

/// One pooled namespace entry: the inode plus its tree links.
struct NamespaceEntry {
    inode: InodeRecord,
    parent: Option<SlotId>,
    children: Vec<SlotId>,
}

struct NamespaceInner {
    arena: SlotArena<NamespaceEntry>,
    by_key: HashMap<String, SlotId>,
    /// Entries in checkpoint order (creation order for directories,
    /// close order for files).
    checkpoint_q: VecDeque<SlotId>,
}

/// Pool-backed hierarchical namespace indexed by encoded path key.
pub struct NamespaceStore {
    inner: RwLock<NamespaceInner>,
    live: AtomicU64,
    ceiling: u64,
}

impl NamespaceStore {
    /// Creates a store admitting at most `ceiling` live entries.
    pub fn new(ceiling: u64) -> Self {
        Self {
            inner: RwLock::new(NamespaceInner {
                arena: SlotArena::with_capacity(ceiling as usize),
                by_key: HashMap::new(),
                checkpoint_q: VecDeque::new(),
            }),
            live: AtomicU64::new(0),
            ceiling,
        }
    }

    /// Number of live entries.
    pub fn live_count(&self) -> u64 {
        self.live.load(Ordering::SeqCst)
    }

    /// True if admitting `n` more entries would exceed the ceiling.
    ///
    /// Checked up front so rejected operations never reach the consensus
    /// gateway; the counter itself only moves inside the state machine.
    pub fn would_exceed(&self, n: u64) -> bool {
        self.live.load(Ordering::SeqCst) + n > self.ceiling
    }

    /// Configured ceiling.
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Returns a copy of the record for `key`, if present.
    pub fn lookup(&self, key: &str) -> Option<InodeRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let slot = *inner.by_key.get(key)?;
        inner.arena.get(slot).map(|e| e.inode.clone())
    }

    /// Returns the existing ancestors of `path`, root first, stopping at
    /// the first missing segment. The target itself is included when it
    /// exists.
    pub fn resolve_ancestors(&self, path: &str) -> Vec<InodeRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        for key in pathkey::ancestor_keys(path) {
            let Some(slot) = inner.by_key.get(&key) else {
                break;
            };
            match inner.arena.get(*slot) {
                Some(entry) => out.push(entry.inode.clone()),
                None => break,
            }
        }
        out
    }

    /// Returns a snapshot copy of a directory's children, decoupling the
    /// caller from the live structure.
    pub fn list_children(&self, key: &str) -> Result<Vec<InodeRecord>, NnError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let slot = *inner
            .by_key
            .get(key)
            .ok_or_else(|| NnError::KeyNotFound(key.to_string()))?;
        let entry = inner
            .arena
            .get(slot)
            .ok_or_else(|| NnError::KeyNotFound(key.to_string()))?;
        if !entry.inode.is_directory {
            let path = pathkey::key_to_path(key).unwrap_or_else(|_| key.to_string());
            return Err(NnError::NotDirectory(path));
        }
        Ok(entry
            .children
            .iter()
            .filter_map(|c| inner.arena.get(*c))
            .map(|e| e.inode.clone())
            .collect())
    }

    /// Child count of a directory, if present.
    pub fn child_count(&self, key: &str) -> Option<usize> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let slot = *inner.by_key.get(key)?;
        inner.arena.get(slot).map(|e| e.children.len())
    }

    /// Inserts an entry and links it under its parent and onto the
    /// checkpoint queue. The parent (if any) must already exist.
    ///
    /// Used for MKDIR materialization and image restore.
    pub fn insert_linked(&self, inode: InodeRecord) -> Result<(), NnError> {
        let key = inode.key.clone();
        let mtime = inode.mtime;
        let parent_key = pathkey::key_to_path(&key)
            .ok()
            .and_then(|p| pathkey::parent_key(&p));

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.by_key.contains_key(&key) {
            return Err(NnError::KeyExists(key));
        }
        let parent_slot = match &parent_key {
            Some(pk) => Some(
                *inner
                    .by_key
                    .get(pk)
                    .ok_or_else(|| NnError::KeyNotFound(pk.clone()))?,
            ),
            None => None,
        };

        let slot = inner.arena.insert(NamespaceEntry {
            inode,
            parent: parent_slot,
            children: Vec::new(),
        })?;
        inner.by_key.insert(key, slot);
        inner.checkpoint_q.push_back(slot);
        if let Some(pslot) = parent_slot {
            if let Some(parent) = inner.arena.get_mut(pslot) {
                parent.children.push(slot);
                parent.inode.mtime = mtime;
            }
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Inserts a CREATING entry reachable by key only; it joins its
    /// parent's children and the checkpoint queue at CLOSE time.
    pub fn insert_creating(&self, inode: InodeRecord) -> Result<(), NnError> {
        let key = inode.key.clone();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.by_key.contains_key(&key) {
            return Err(NnError::KeyExists(key));
        }
        let slot = inner.arena.insert(NamespaceEntry {
            inode,
            parent: None,
            children: Vec::new(),
        })?;
        inner.by_key.insert(key, slot);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Applies `f` to the record behind `key` under the write lock.
    pub fn update<F>(&self, key: &str, f: F) -> Result<(), NnError>
    where
        F: FnOnce(&mut InodeRecord) -> Result<(), NnError>,
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let slot = *inner
            .by_key
            .get(key)
            .ok_or_else(|| NnError::KeyNotFound(key.to_string()))?;
        let entry = inner
            .arena
            .get_mut(slot)
            .ok_or_else(|| NnError::KeyNotFound(key.to_string()))?;
        f(&mut entry.inode)
    }

    /// Refreshes the stored creation id; replay of an already-materialized
    /// MKDIR reduces to this.
    pub fn refresh_creation_id(&self, key: &str, id: InstanceId) -> Result<(), NnError> {
        self.update(key, |inode| {
            inode.creation_id = id;
            Ok(())
        })
    }

    /// Transitions a CREATING entry to OK and links it into its parent's
    /// children and the checkpoint queue.
    pub fn finalize(
        &self,
        key: &str,
        mtime: TimestampMs,
        length: u64,
        replication: u16,
    ) -> Result<(), NnError> {
        let parent_key = pathkey::key_to_path(key)
            .ok()
            .and_then(|p| pathkey::parent_key(&p));

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let slot = *inner
            .by_key
            .get(key)
            .ok_or_else(|| NnError::KeyNotFound(key.to_string()))?;
        let parent_slot = match &parent_key {
            Some(pk) => Some(
                *inner
                    .by_key
                    .get(pk)
                    .ok_or_else(|| NnError::KeyNotFound(pk.clone()))?,
            ),
            None => None,
        };

        {
            let entry = inner
                .arena
                .get_mut(slot)
                .ok_or_else(|| NnError::KeyNotFound(key.to_string()))?;
            entry.inode.state = EntryState::Ok;
            entry.inode.mtime = mtime;
            entry.inode.length = length;
            entry.inode.replication = replication;
            entry.parent = parent_slot;
        }
        inner.checkpoint_q.push_back(slot);
        if let Some(pslot) = parent_slot {
            if let Some(parent) = inner.arena.get_mut(pslot) {
                parent.children.push(slot);
                parent.inode.mtime = mtime;
            }
        }
        Ok(())
    }

    /// Removes a single file entry, returning its record so block deletion
    /// can be signaled. Updates the parent's mtime.
    pub fn remove_file(&self, key: &str, mtime: TimestampMs) -> Result<InodeRecord, NnError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let slot = *inner
            .by_key
            .get(key)
            .ok_or_else(|| NnError::KeyNotFound(key.to_string()))?;
        let entry = inner
            .arena
            .remove(slot)
            .ok_or_else(|| NnError::KeyNotFound(key.to_string()))?;
        inner.by_key.remove(key);
        inner.checkpoint_q.retain(|s| *s != slot);
        if let Some(pslot) = entry.parent {
            if let Some(parent) = inner.arena.get_mut(pslot) {
                parent.children.retain(|c| *c != slot);
                parent.inode.mtime = mtime;
            }
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(entry.inode)
    }

    /// Removes a directory and all descendants with an iterative walk,
    /// returning every removed record (files and directories).
    pub fn remove_subtree(
        &self,
        key: &str,
        mtime: TimestampMs,
    ) -> Result<Vec<InodeRecord>, NnError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let root_slot = *inner
            .by_key
            .get(key)
            .ok_or_else(|| NnError::KeyNotFound(key.to_string()))?;

        // unlink the subtree root from its parent first
        let parent = inner.arena.get(root_slot).and_then(|e| e.parent);
        if let Some(pslot) = parent {
            if let Some(p) = inner.arena.get_mut(pslot) {
                p.children.retain(|c| *c != root_slot);
                p.inode.mtime = mtime;
            }
        }

        let mut removed = Vec::new();
        let mut stack = vec![root_slot];
        while let Some(slot) = stack.pop() {
            let Some(entry) = inner.arena.remove(slot) else {
                continue;
            };
            stack.extend(entry.children.iter().copied());
            inner.by_key.remove(&entry.inode.key);
            removed.push(entry.inode);
        }
        let NamespaceInner {
            arena,
            checkpoint_q,
            ..
        } = &mut *inner;
        checkpoint_q.retain(|s| arena.get(*s).is_some());

        self.live.fetch_sub(removed.len() as u64, Ordering::SeqCst);
        Ok(removed)
    }

    /// Removes an abandoned CREATING entry (create-timeout expiry).
    /// Already-finalized or absent entries are left untouched.
    pub fn purge_creating(&self, key: &str) -> Option<InodeRecord> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let slot = *inner.by_key.get(key)?;
        let state = inner.arena.get(slot).map(|e| e.inode.state)?;
        if state != EntryState::Creating {
            return None;
        }
        let entry = inner.arena.remove(slot)?;
        inner.by_key.remove(key);
        self.live.fetch_sub(1, Ordering::SeqCst);
        Some(entry.inode)
    }

    /// Copies the checkpoint queue contents in order under the read lock.
    /// Callers write the snapshot to disk only after this returns, so no
    /// disk I/O ever happens while the lock is held.
    pub fn checkpoint_snapshot(&self) -> Vec<InodeRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .checkpoint_q
            .iter()
            .filter_map(|s| inner.arena.get(*s))
            .map(|e| e.inode.clone())
            .collect()
    }

    /// Counts entries reachable from root via children links (plus any
    /// unlinked CREATING entries are excluded). Test support for the
    /// counter invariant.
    pub fn reachable_from_root(&self) -> u64 {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let Some(root) = inner.by_key.get(&pathkey::root_key()).copied() else {
            return 0;
        };
        let mut count = 0u64;
        let mut stack = vec![root];
        while let Some(slot) = stack.pop() {
            if let Some(entry) = inner.arena.get(slot) {
                count += 1;
                stack.extend(entry.children.iter().copied());
            }
        }
        count
    }
}
