use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a unique identifier for a namenode replica in the cluster
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Creates a new NodeId from a raw u64 value
    pub fn new(id: u64) -> Self {
        NodeId(id)
    }

    /// Returns the raw u64 value of this node ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one independent replication group (consensus-log shard)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(u32);

impl GroupId {
    /// Creates a new GroupId from a raw u32 value
    pub fn new(id: u32) -> Self {
        GroupId(id)
    }

    /// Returns the raw u32 value of this group ID
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A consensus log instance id, strictly increasing per group.
///
/// Doubles as the creation id stored on each namespace entry so a
/// checkpoint can record exactly how much of the log it reflects.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Instance id zero, used before any operation has been agreed
    pub const ZERO: InstanceId = InstanceId(0);

    /// Creates a new InstanceId from a raw u64 value
    pub fn new(id: u64) -> Self {
        InstanceId(id)
    }

    /// Returns the raw u64 value of this instance ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique identifier of one stored block
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(u64);

impl BlockId {
    /// Creates a new BlockId from a raw u64 value
    pub fn new(id: u64) -> Self {
        BlockId(id)
    }

    /// Returns the raw u64 value of this block ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a storage node by its address string (e.g. "10.0.0.3:8701")
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatanodeId(String);

impl DatanodeId {
    /// Creates a new DatanodeId from an address string
    pub fn new(addr: impl Into<String>) -> Self {
        DatanodeId(addr.into())
    }

    /// Returns the address string of this datanode ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatanodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since the Unix epoch
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampMs(u64);

impl TimestampMs {
    /// Timestamp zero (the epoch)
    pub const ZERO: TimestampMs = TimestampMs(0);

    /// Creates a timestamp from raw milliseconds
    pub fn new(ms: u64) -> Self {
        TimestampMs(ms)
    }

    /// Returns the current wall-clock time
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        TimestampMs(now.as_millis() as u64)
    }

    /// Returns the raw millisecond value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns this timestamp advanced by `ms` milliseconds
    pub fn plus_ms(&self, ms: u64) -> Self {
        TimestampMs(self.0.saturating_add(ms))
    }
}

impl fmt::Display for TimestampMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Creation state of a namespace entry
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    /// File opened by CREATE but not yet finalized by CLOSE
    Creating,
    /// Entry is complete and visible
    Ok,
}

/// Reply code delivered back through the task dispatch layer.
///
/// Every request yields exactly one of these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Operation succeeded
    Succ,
    /// Target key already exists
    KeyExist,
    /// Target key does not exist
    KeyNotExist,
    /// Target key exists but is still being created
    KeyStateCreating,
    /// An ancestor (or the target) is not a directory
    NotDirectory,
    /// The target is a directory where a file was required
    NotFile,
    /// Caller lacks permission on the target or an ancestor
    PermissionDeny,
    /// No registered storage node, or the node is unknown
    NotDatanode,
    /// Admitting the operation would exceed the object ceiling
    FsObjectExceed,
    /// This replica is not master for the key's group; resubmit to the given node
    MasterRedirect(NodeId),
    /// The namenode is in safe mode and refuses mutations
    InSafeMode,
    /// Unclassified failure
    Fail,
}

/// Error type for namenode operations
#[derive(Debug, thiserror::Error)]
pub enum NnError {
    /// The key already maps to a live entry.
    #[error("key '{0}' already exists")]
    KeyExists(String),

    /// No live entry for the key.
    #[error("key '{0}' not found")]
    KeyNotFound(String),

    /// The entry exists but is still in CREATING state.
    #[error("key '{0}' is still being created")]
    StateCreating(String),

    /// An ancestor on the path resolved to a file.
    #[error("'{0}' is not a directory")]
    NotDirectory(String),

    /// The target is a directory where a file was required.
    #[error("'{0}' is not a file")]
    NotFile(String),

    /// Caller failed the user/group permission check.
    #[error("permission denied")]
    PermissionDenied,

    /// This replica is not master for the key's group.
    #[error("not master for this group")]
    NotMaster {
        /// The replica currently holding mastership, if known
        master: Option<NodeId>,
    },

    /// Admission would push the live-object count over the ceiling.
    #[error("fs object ceiling reached ({live} live, ceiling {ceiling})")]
    ObjectCeiling {
        /// Current live-object count
        live: u64,
        /// Configured ceiling
        ceiling: u64,
    },

    /// The entry pool has no free slot left.
    #[error("entry pool exhausted (capacity {0})")]
    PoolExhausted(usize),

    /// No storage node is available to host a new block.
    #[error("no available datanode")]
    NoDatanode,

    /// A heartbeat or block report arrived from an unknown storage node.
    #[error("datanode {0} is not registered")]
    NotRegistered(DatanodeId),

    /// CREATE carried an out-of-range multi-part sequence number.
    #[error("bad block sequence {seq} of {total}")]
    BadBlockSequence {
        /// Sequence number carried by the request (1-based)
        seq: u32,
        /// Total block count declared by the request
        total: u32,
    },

    /// Encoding or decoding a replicated payload or image record failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The consensus runtime rejected or failed a proposal.
    #[error("consensus error: {0}")]
    Consensus(String),

    /// A lower-level I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NnError {
    /// Maps this error onto the wire reply code.
    pub fn status(&self) -> Status {
        match self {
            NnError::KeyExists(_) => Status::KeyExist,
            NnError::KeyNotFound(_) => Status::KeyNotExist,
            NnError::StateCreating(_) => Status::KeyStateCreating,
            NnError::NotDirectory(_) => Status::NotDirectory,
            NnError::NotFile(_) => Status::NotFile,
            NnError::PermissionDenied => Status::PermissionDeny,
            NnError::NotMaster { master } => match master {
                Some(node) => Status::MasterRedirect(*node),
                None => Status::Fail,
            },
            NnError::ObjectCeiling { .. } => Status::FsObjectExceed,
            NnError::PoolExhausted(_) => Status::FsObjectExceed,
            NnError::NoDatanode | NnError::NotRegistered(_) => Status::NotDatanode,
            NnError::BadBlockSequence { .. }
            | NnError::Codec(_)
            | NnError::Consensus(_)
            | NnError::Io(_) => Status::Fail,
        }
    }
}
