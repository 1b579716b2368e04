//! Deterministic application of agreed edit operations.
//!
//! Every replica feeds the same ordered stream of [`EditOp`]s through
//! [`EditStateMachine::apply`], so application must be a pure function of
//! (current state, operation, instance id). Wall-clock reads are forbidden
//! here; timestamps always ride in the operation payload. Replay of an
//! already-applied operation must converge to the same state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::blocks::BlockIndex;
use crate::datanode::DataNodeIndex;
use crate::inode::{InodeRecord, BLOCK_SLOTS};
use crate::namespace::NamespaceStore;
use crate::ops::EditOp;
use crate::pathkey;
use crate::timer::TimerQueue;
use crate::types::{EntryState, InstanceId, NnError, TimestampMs};

/// Applies agreed operations to the namespace, block index and
/// datanode deletion queues.
pub struct EditStateMachine {
    namespace: Arc<NamespaceStore>,
    blocks: Arc<BlockIndex>,
    datanodes: Arc<DataNodeIndex>,
    /// Create-timeout timers keyed by encoded path key.
    create_timers: Mutex<TimerQueue<String>>,
    create_timeout_ms: u64,
    applied: AtomicU64,
}

impl EditStateMachine {
    /// Builds a state machine over the shared stores.
    pub fn new(
        namespace: Arc<NamespaceStore>,
        blocks: Arc<BlockIndex>,
        datanodes: Arc<DataNodeIndex>,
        create_timeout_ms: u64,
    ) -> Self {
        Self {
            namespace,
            blocks,
            datanodes,
            create_timers: Mutex::new(TimerQueue::new()),
            create_timeout_ms,
            applied: AtomicU64::new(0),
        }
    }

    /// Total operations applied since startup (image restore excluded).
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    /// Applies one agreed operation.
    ///
    /// `instance` is the consensus instance id the operation was agreed
    /// at; it becomes the creation id of entries the operation touches.
    pub fn apply(&self, instance: InstanceId, op: &EditOp) -> Result<(), NnError> {
        let result = match op {
            EditOp::Mkdir {
                key,
                permission,
                owner,
                group,
                mtime,
            } => self.apply_mkdir(instance, key, *permission, owner, group, *mtime),
            EditOp::Create {
                key,
                permission,
                owner,
                group,
                mtime,
                blk_id,
                blk_size,
                blk_replication,
                blk_seq,
                total_blk,
            } => self.apply_create(
                instance,
                key,
                *permission,
                owner,
                group,
                *mtime,
                *blk_id,
                *blk_size,
                *blk_replication,
                *blk_seq,
                *total_blk,
            ),
            EditOp::AddBlock {
                key,
                blk_id,
                blk_size,
                blk_replication,
            } => self.apply_add_block(key, *blk_id, *blk_size, *blk_replication),
            EditOp::Close {
                key,
                mtime,
                length,
                blk_replication,
            } => self.apply_close(key, *mtime, *length, *blk_replication),
            EditOp::Rm { key, mtime } => self.apply_rm(key, *mtime),
            EditOp::Rmr { key, mtime } => self.apply_rmr(key, *mtime),
        };
        if result.is_ok() {
            self.applied.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    /// Materializes the target directory and every missing ancestor,
    /// root first. Existing ancestors are left alone; an existing target
    /// only gets its creation id refreshed (log replay).
    fn apply_mkdir(
        &self,
        instance: InstanceId,
        key: &str,
        permission: u16,
        owner: &str,
        group: &str,
        mtime: TimestampMs,
    ) -> Result<(), NnError> {
        let path = pathkey::key_to_path(key)?;
        for ancestor in pathkey::ancestor_paths(&path) {
            let akey = pathkey::path_to_key(&ancestor);
            match self.namespace.lookup(&akey) {
                Some(existing) => {
                    if !existing.is_directory {
                        return Err(NnError::NotDirectory(ancestor));
                    }
                    if akey == key {
                        self.namespace.refresh_creation_id(&akey, instance)?;
                    }
                }
                None => {
                    let mut rec =
                        InodeRecord::new_directory(akey, permission, owner, group, mtime);
                    rec.creation_id = instance;
                    self.namespace.insert_linked(rec)?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_create(
        &self,
        instance: InstanceId,
        key: &str,
        permission: u16,
        owner: &str,
        group: &str,
        mtime: TimestampMs,
        blk_id: crate::types::BlockId,
        blk_size: u64,
        blk_replication: u16,
        blk_seq: u32,
        total_blk: u32,
    ) -> Result<(), NnError> {
        if blk_seq < 1 || blk_seq > total_blk || total_blk as usize > BLOCK_SLOTS {
            return Err(NnError::BadBlockSequence {
                seq: blk_seq,
                total: total_blk,
            });
        }
        if let Some(existing) = self.namespace.lookup(key) {
            if existing.state == EntryState::Creating {
                // replay: refresh creation id and re-arm the timeout
                self.namespace.refresh_creation_id(key, instance)?;
                self.arm_create_timer(key, mtime);
                return Ok(());
            }
            return Err(NnError::KeyExists(key.to_string()));
        }
        let mut rec = InodeRecord::new_file(
            key.to_string(),
            permission,
            owner,
            group,
            mtime,
            blk_id,
            blk_size,
            blk_replication,
            blk_seq,
            total_blk,
        );
        rec.creation_id = instance;
        self.namespace.insert_creating(rec)?;
        self.arm_create_timer(key, mtime);
        Ok(())
    }

    fn apply_add_block(
        &self,
        key: &str,
        blk_id: crate::types::BlockId,
        blk_size: u64,
        blk_replication: u16,
    ) -> Result<(), NnError> {
        let mut mtime = TimestampMs::ZERO;
        self.namespace.update(key, |inode| {
            if inode.state != EntryState::Creating {
                return Err(NnError::KeyExists(key.to_string()));
            }
            mtime = inode.mtime;
            if inode.blocks.contains(&blk_id) {
                // replay
                return Ok(());
            }
            inode.push_block(blk_id)?;
            inode.blk_size = blk_size;
            inode.replication = blk_replication;
            Ok(())
        })?;
        self.arm_create_timer(key, mtime);
        Ok(())
    }

    fn apply_close(
        &self,
        key: &str,
        mtime: TimestampMs,
        length: u64,
        blk_replication: u16,
    ) -> Result<(), NnError> {
        let existing = self
            .namespace
            .lookup(key)
            .ok_or_else(|| NnError::KeyNotFound(key.to_string()))?;
        if existing.state == EntryState::Ok {
            // replay: already finalized and linked
            return Ok(());
        }
        self.namespace.finalize(key, mtime, length, blk_replication)?;
        self.cancel_create_timer(key);
        Ok(())
    }

    fn apply_rm(&self, key: &str, mtime: TimestampMs) -> Result<(), NnError> {
        // an earlier edit (or an enclosing RMR routed to another group)
        // may have removed the target already; the edit is satisfied
        let Some(existing) = self.namespace.lookup(key) else {
            tracing::debug!(key, "rm target already absent");
            return Ok(());
        };
        if existing.is_directory {
            let path = pathkey::key_to_path(key).unwrap_or_else(|_| key.to_string());
            return Err(NnError::NotFile(path));
        }
        let removed = self.namespace.remove_file(key, mtime)?;
        self.cancel_create_timer(key);
        self.signal_block_deletions(&removed);
        Ok(())
    }

    fn apply_rmr(&self, key: &str, mtime: TimestampMs) -> Result<(), NnError> {
        let Some(existing) = self.namespace.lookup(key) else {
            tracing::debug!(key, "rmr target already absent");
            return Ok(());
        };
        if !existing.is_directory {
            let path = pathkey::key_to_path(key).unwrap_or_else(|_| key.to_string());
            return Err(NnError::NotDirectory(path));
        }
        let removed = self.namespace.remove_subtree(key, mtime)?;
        for rec in &removed {
            self.cancel_create_timer(&rec.key);
            self.signal_block_deletions(rec);
        }
        tracing::info!(key, count = removed.len(), "removed subtree");
        Ok(())
    }

    /// Restores one image record at startup. Records arrive in checkpoint
    /// order, so every parent is inserted before its children.
    pub fn restore_record(&self, record: InodeRecord) -> Result<(), NnError> {
        self.namespace.insert_linked(record)
    }

    /// Purges CREATING entries whose create timeout has passed and
    /// signals deletion of any blocks they had accumulated.
    pub fn tick(&self, now: TimestampMs) {
        let expired = {
            let mut timers = self
                .create_timers
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            timers.expired(now)
        };
        for key in expired {
            if let Some(rec) = self.namespace.purge_creating(&key) {
                tracing::warn!(key = %key, "create timed out, purging abandoned entry");
                self.signal_block_deletions(&rec);
            }
        }
    }

    fn arm_create_timer(&self, key: &str, from: TimestampMs) {
        let mut timers = self
            .create_timers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        timers.arm(key.to_string(), from.plus_ms(self.create_timeout_ms));
    }

    fn cancel_create_timer(&self, key: &str) {
        let mut timers = self
            .create_timers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        timers.cancel(&key.to_string());
    }

    /// Drops the file's blocks from the index and queues deletion on every
    /// host known to have held them. Hosts that died in the meantime are
    /// skipped.
    fn signal_block_deletions(&self, record: &InodeRecord) {
        for blk in &record.blocks {
            if let Some(br) = self.blocks.remove(*blk) {
                for host in &br.hosts {
                    if self.datanodes.enqueue_deletion(host, *blk).is_err() {
                        tracing::debug!(block = %blk, host = %host, "deletion host no longer registered");
                    }
                }
            }
        }
    }
}
