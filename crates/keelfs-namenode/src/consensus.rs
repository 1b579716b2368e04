//! Consensus-log seam: key-to-group routing, the replication trait, and
//! an in-process implementation used by tests and single-node deployments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ops::EditOp;
use crate::statemachine::EditStateMachine;
use crate::types::{GroupId, InstanceId, NnError, NodeId};

/// Maps a key onto its replication group with a stable polynomial hash.
///
/// The hash must never change across releases: it decides which group's
/// log a key's operations live in, and a remap would split a key's
/// history across groups.
pub fn group_index_for(key: &str, group_count: u32) -> GroupId {
    let mut h: u64 = 0;
    for b in key.bytes() {
        h = h.wrapping_mul(7).wrapping_add(b as u64) % group_count as u64;
    }
    GroupId::new(h as u32)
}

/// Replicated log backend.
///
/// `propose` returns only after the value has been agreed and applied
/// locally; the returned instance id is the position the value was
/// agreed at within the group.
pub trait ConsensusLog: Send + Sync {
    /// Proposes an encoded operation to the group's log.
    fn propose(&self, group: GroupId, value: &[u8]) -> Result<InstanceId, NnError>;

    /// True if this replica currently holds mastership of the group.
    fn is_master(&self, group: GroupId) -> bool;

    /// The replica currently holding mastership, if known.
    fn master_of(&self, group: GroupId) -> Option<NodeId>;

    /// Records that state up to `instance` is captured by a durable
    /// checkpoint, letting the backend trim its log.
    fn set_checkpoint_instance(&self, group: GroupId, instance: InstanceId);
}

/// Key-level façade over the raw group-level log.
pub struct ConsensusGateway {
    log: Arc<dyn ConsensusLog>,
    group_count: u32,
}

impl ConsensusGateway {
    /// Wraps a log backend.
    pub fn new(log: Arc<dyn ConsensusLog>, group_count: u32) -> Self {
        Self { log, group_count }
    }

    /// The replication group responsible for `key`.
    pub fn group_for(&self, key: &str) -> GroupId {
        group_index_for(key, self.group_count)
    }

    /// Errors with a redirect if this replica is not master for the
    /// key's group.
    pub fn ensure_master(&self, key: &str) -> Result<(), NnError> {
        let group = self.group_for(key);
        if self.log.is_master(group) {
            return Ok(());
        }
        Err(NnError::NotMaster {
            master: self.log.master_of(group),
        })
    }

    /// Proposes an operation to the group owning its key.
    ///
    /// Mastership is checked first but not held across the proposal, so
    /// it can be lost in between; that window surfaces as a failed
    /// proposal rather than a redirect.
    pub fn propose(&self, op: &EditOp) -> Result<InstanceId, NnError> {
        let group = self.group_for(op.key());
        if !self.log.is_master(group) {
            return Err(NnError::NotMaster {
                master: self.log.master_of(group),
            });
        }
        let value = op.encode()?;
        self.log.propose(group, &value)
    }

    /// Reports a completed checkpoint to every group.
    pub fn set_checkpoint_instance_all(&self, instance: InstanceId) {
        for g in 0..self.group_count {
            self.log.set_checkpoint_instance(GroupId::new(g), instance);
        }
    }
}

/// In-process log: agreement is trivial, application is synchronous.
///
/// Gives single-node deployments and tests the exact propose/apply
/// contract a replicated backend provides.
pub struct LocalLog {
    node: NodeId,
    sm: Arc<EditStateMachine>,
    next: Vec<AtomicU64>,
    checkpointed: Vec<AtomicU64>,
}

impl LocalLog {
    /// Creates a log with `group_count` independent instance sequences.
    pub fn new(node: NodeId, sm: Arc<EditStateMachine>, group_count: u32) -> Self {
        Self {
            node,
            sm,
            next: (0..group_count).map(|_| AtomicU64::new(0)).collect(),
            checkpointed: (0..group_count).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Latest checkpoint instance reported for `group`.
    pub fn checkpoint_instance(&self, group: GroupId) -> InstanceId {
        match self.checkpointed.get(group.as_u32() as usize) {
            Some(v) => InstanceId::new(v.load(Ordering::SeqCst)),
            None => InstanceId::ZERO,
        }
    }
}

impl ConsensusLog for LocalLog {
    fn propose(&self, group: GroupId, value: &[u8]) -> Result<InstanceId, NnError> {
        let op = EditOp::decode(value)?;
        let seq = self
            .next
            .get(group.as_u32() as usize)
            .ok_or_else(|| NnError::Consensus(format!("unknown group {}", group)))?;
        let instance = InstanceId::new(seq.fetch_add(1, Ordering::SeqCst) + 1);
        self.sm.apply(instance, &op)?;
        Ok(instance)
    }

    fn is_master(&self, _group: GroupId) -> bool {
        true
    }

    fn master_of(&self, _group: GroupId) -> Option<NodeId> {
        Some(self.node)
    }

    fn set_checkpoint_instance(&self, group: GroupId, instance: InstanceId) {
        if let Some(v) = self.checkpointed.get(group.as_u32() as usize) {
            v.store(instance.as_u64(), Ordering::SeqCst);
        }
    }
}
