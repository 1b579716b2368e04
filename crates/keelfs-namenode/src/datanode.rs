//! Storage-node (datanode) registry: health, hosted blocks, and the
//! per-node pending-deletion queues drained by heartbeats.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::timer::TimerQueue;
use crate::types::{BlockId, DatanodeId, NnError, TimestampMs};

/// Capacity report carried by register and heartbeat requests.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysInfo {
    /// Total capacity in bytes.
    pub capacity: u64,
    /// Bytes used by the DFS.
    pub dfs_used: u64,
    /// Bytes remaining.
    pub remaining: u64,
}

/// Registry entry for one storage node.
#[derive(Clone, Debug)]
pub struct DataNodeRecord {
    /// Node id (address string).
    pub id: DatanodeId,
    /// Last reported capacity numbers.
    pub sys: SysInfo,
    /// Blocks this node reported hosting.
    pub hosted_blocks: Vec<BlockId>,
    pending_deletions: VecDeque<BlockId>,
}

struct DnInner {
    nodes: HashMap<DatanodeId, DataNodeRecord>,
    /// Registration order; placement currently picks from the front.
    order: Vec<DatanodeId>,
    timers: TimerQueue<DatanodeId>,
}

/// Concurrent datanode registry with liveness timers.
pub struct DataNodeIndex {
    inner: RwLock<DnInner>,
    timeout_ms: u64,
    deletion_batch: usize,
    namespace_id: u64,
}

impl DataNodeIndex {
    /// Creates a registry.
    ///
    /// `timeout_ms` is the heartbeat silence after which a node is declared
    /// dead; `deletion_batch` bounds the pending deletions returned per
    /// heartbeat.
    pub fn new(timeout_ms: u64, deletion_batch: usize, namespace_id: u64) -> Self {
        Self {
            inner: RwLock::new(DnInner {
                nodes: HashMap::new(),
                order: Vec::new(),
                timers: TimerQueue::new(),
            }),
            timeout_ms,
            deletion_batch,
            namespace_id,
        }
    }

    /// Registers a node, returning the cluster namespace id. Idempotent:
    /// a known node just gets its capacity numbers and liveness refreshed.
    pub fn register(&self, id: DatanodeId, sys: SysInfo, now: TimestampMs) -> u64 {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let deadline = now.plus_ms(self.timeout_ms);
        match inner.nodes.get_mut(&id) {
            Some(node) => {
                node.sys = sys;
            }
            None => {
                tracing::info!(node = %id, capacity = sys.capacity, "datanode registered");
                inner.nodes.insert(
                    id.clone(),
                    DataNodeRecord {
                        id: id.clone(),
                        sys,
                        hosted_blocks: Vec::new(),
                        pending_deletions: VecDeque::new(),
                    },
                );
                inner.order.push(id.clone());
            }
        }
        inner.timers.arm(id, deadline);
        self.namespace_id
    }

    /// Processes a heartbeat: refreshes capacity and liveness and drains at
    /// most `deletion_batch` pending deletions, each consumed exactly once.
    /// Errors if the node never registered.
    pub fn heartbeat(
        &self,
        id: &DatanodeId,
        sys: SysInfo,
        now: TimestampMs,
    ) -> Result<Vec<BlockId>, NnError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let deadline = now.plus_ms(self.timeout_ms);
        let batch = self.deletion_batch;
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| NnError::NotRegistered(id.clone()))?;
        node.sys = sys;
        let take = node.pending_deletions.len().min(batch);
        let deletions: Vec<BlockId> = node.pending_deletions.drain(..take).collect();
        inner.timers.arm(id.clone(), deadline);
        Ok(deletions)
    }

    /// Queues a block for deletion on `host` at its next heartbeats.
    pub fn enqueue_deletion(&self, host: &DatanodeId, block: BlockId) -> Result<(), NnError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let node = inner
            .nodes
            .get_mut(host)
            .ok_or_else(|| NnError::NotRegistered(host.clone()))?;
        node.pending_deletions.push_back(block);
        Ok(())
    }

    /// Replaces the hosted-block list of `host` with a full report.
    pub fn replace_blocks(&self, host: &DatanodeId, blocks: Vec<BlockId>) -> Result<(), NnError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let node = inner
            .nodes
            .get_mut(host)
            .ok_or_else(|| NnError::NotRegistered(host.clone()))?;
        node.hosted_blocks = blocks;
        Ok(())
    }

    /// Records that `host` reported hosting `block`.
    pub fn record_block(&self, host: &DatanodeId, block: BlockId) -> Result<(), NnError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let node = inner
            .nodes
            .get_mut(host)
            .ok_or_else(|| NnError::NotRegistered(host.clone()))?;
        if !node.hosted_blocks.contains(&block) {
            node.hosted_blocks.push(block);
        }
        Ok(())
    }

    /// Picks hosting nodes for a new block.
    ///
    /// TODO(placement): replace first-available with a remaining-capacity
    /// aware policy; the contract (factor in, bounded host list out) stays.
    pub fn generate_replica_targets(
        &self,
        replication: u16,
    ) -> Result<Vec<DatanodeId>, NnError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        if inner.order.is_empty() {
            return Err(NnError::NoDatanode);
        }
        let want = (replication.max(1) as usize).min(inner.order.len()).min(1);
        Ok(inner.order.iter().take(want).cloned().collect())
    }

    /// Removes every node whose liveness timer expired by `now`, dropping
    /// its pending-deletion queue. Does not re-replicate the node's
    /// blocks; their host entries go stale (documented gap).
    pub fn expire_dead(&self, now: TimestampMs) -> Vec<DatanodeId> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let dead = inner.timers.expired(now);
        for id in &dead {
            tracing::warn!(node = %id, "datanode liveness expired, removing (blocks not re-replicated)");
            inner.nodes.remove(id);
            inner.order.retain(|n| n != id);
        }
        dead
    }

    /// True if the node is currently registered.
    pub fn is_registered(&self, id: &DatanodeId) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.nodes.contains_key(id)
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.nodes.len()
    }

    /// True if no node is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending deletion count for a node (test support).
    pub fn pending_deletions(&self, id: &DatanodeId) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .nodes
            .get(id)
            .map(|n| n.pending_deletions.len())
            .unwrap_or(0)
    }
}
