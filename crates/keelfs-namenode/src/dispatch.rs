//! Task dispatch: requests are routed to a fixed worker pool by a hash
//! of their routing key, so operations on the same path (or the same
//! datanode) execute in arrival order while unrelated keys proceed in
//! parallel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::datanode::SysInfo;
use crate::service::NamenodeService;
use crate::types::{BlockId, DatanodeId, Status, TimestampMs};

/// MKDIR request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MkdirReq {
    /// Absolute path of the directory to create.
    pub path: String,
    /// Permission bits for the new directory.
    pub permission: u16,
    /// Calling user.
    pub user: String,
    /// Calling user's group.
    pub group: String,
}

/// Path-addressed request (LS, RM, RMR, OPEN, GET_ADDITIONAL_BLK).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathReq {
    /// Absolute target path.
    pub path: String,
    /// Calling user.
    pub user: String,
    /// Calling user's group.
    pub group: String,
}

/// CREATE request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateReq {
    /// Absolute path of the file to create.
    pub path: String,
    /// Permission bits.
    pub permission: u16,
    /// Calling user.
    pub user: String,
    /// Calling user's group.
    pub group: String,
    /// Block size negotiated with the client.
    pub blk_size: u64,
    /// Requested replication factor.
    pub replication: u16,
    /// Multi-part sequence number (1-based).
    pub blk_seq: u32,
    /// Total declared parts.
    pub total_blk: u32,
}

/// CLOSE request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CloseReq {
    /// Absolute path of the CREATING file.
    pub path: String,
    /// Calling user.
    pub user: String,
    /// Calling user's group.
    pub group: String,
    /// Final file length.
    pub length: u64,
}

/// Datanode registration request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnRegisterReq {
    /// Registering node.
    pub node: DatanodeId,
    /// Capacity report.
    pub sys: SysInfo,
}

/// Datanode heartbeat request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnHeartbeatReq {
    /// Reporting node.
    pub node: DatanodeId,
    /// Capacity report.
    pub sys: SysInfo,
}

/// Block report request, incremental or full.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlkReportReq {
    /// Reporting node.
    pub node: DatanodeId,
    /// Reported (block id, size) pairs.
    pub blocks: Vec<(BlockId, u64)>,
}

/// One decoded client or datanode request.
#[derive(Clone, Debug)]
pub enum TaskCommand {
    /// Create a directory chain.
    Mkdir(MkdirReq),
    /// Recursively remove a directory.
    Rmr(PathReq),
    /// List a directory.
    Ls(PathReq),
    /// Create a file and allocate its first block.
    Create(CreateReq),
    /// Allocate one more block for a CREATING file.
    GetAdditionalBlk(PathReq),
    /// Finalize a CREATING file.
    Close(CloseReq),
    /// Remove a single file.
    Rm(PathReq),
    /// Resolve a file's block locations for reading.
    Open(PathReq),
    /// Register a datanode.
    DnRegister(DnRegisterReq),
    /// Process a datanode heartbeat.
    DnHeartbeat(DnHeartbeatReq),
    /// Process an incremental blocks-received report.
    DnRecvBlkReport(BlkReportReq),
    /// Process a full block report.
    DnBlkReport(BlkReportReq),
}

impl TaskCommand {
    /// The key commands are serialized on: the target path for namespace
    /// operations, the node id for datanode traffic.
    pub fn routing_key(&self) -> &str {
        match self {
            TaskCommand::Mkdir(r) => &r.path,
            TaskCommand::Rmr(r)
            | TaskCommand::Ls(r)
            | TaskCommand::GetAdditionalBlk(r)
            | TaskCommand::Rm(r)
            | TaskCommand::Open(r) => &r.path,
            TaskCommand::Create(r) => &r.path,
            TaskCommand::Close(r) => &r.path,
            TaskCommand::DnRegister(r) => r.node.as_str(),
            TaskCommand::DnHeartbeat(r) => r.node.as_str(),
            TaskCommand::DnRecvBlkReport(r) | TaskCommand::DnBlkReport(r) => r.node.as_str(),
        }
    }
}

/// One visible entry in an LS listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    /// Absolute path.
    pub path: String,
    /// True for directories.
    pub is_directory: bool,
    /// File length (0 for directories).
    pub length: u64,
    /// Permission bits.
    pub permission: u16,
    /// Owner user name.
    pub owner: String,
    /// Owner group name.
    pub group: String,
    /// Last modification time.
    pub mtime: TimestampMs,
    /// Replication factor.
    pub replication: u16,
}

/// Block allocation handed back by CREATE and GET_ADDITIONAL_BLK.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAllocation {
    /// Newly allocated block id.
    pub blk_id: BlockId,
    /// Cluster namespace id, echoed so clients can label writes.
    pub namespace_id: u64,
    /// Nodes chosen to host the block.
    pub hosts: Vec<DatanodeId>,
}

/// One located block in an OPEN response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    /// Block id.
    pub id: BlockId,
    /// Reported size.
    pub size: u64,
    /// Nodes known to host the block.
    pub hosts: Vec<DatanodeId>,
}

/// Typed success payload carried by a reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyPayload {
    /// LS listing.
    Listing(Vec<EntryInfo>),
    /// Block allocation for CREATE / GET_ADDITIONAL_BLK.
    Allocation(BlockAllocation),
    /// OPEN block locations plus total length.
    Locations {
        /// File length.
        length: u64,
        /// Ordered block locations.
        blocks: Vec<BlockLocation>,
    },
    /// Registration acknowledgement.
    Registered {
        /// Cluster namespace id.
        namespace_id: u64,
    },
    /// Heartbeat acknowledgement.
    Heartbeat {
        /// Blocks the node must delete, consumed exactly once.
        deletions: Vec<BlockId>,
    },
}

/// Reply delivered for every submitted task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReply {
    /// Outcome code.
    pub status: Status,
    /// Success payload, if the command produces one.
    pub payload: Option<ReplyPayload>,
}

impl TaskReply {
    /// A bare status reply.
    pub fn status(status: Status) -> Self {
        Self {
            status,
            payload: None,
        }
    }

    /// A success reply carrying `payload`.
    pub fn ok(payload: ReplyPayload) -> Self {
        Self {
            status: Status::Succ,
            payload: Some(payload),
        }
    }
}

struct Task {
    command: TaskCommand,
    reply: oneshot::Sender<TaskReply>,
}

/// Fixed worker pool with hash routing.
pub struct Dispatcher {
    workers: Vec<mpsc::UnboundedSender<Task>>,
}

impl Dispatcher {
    /// Spawns `workers` tasks executing commands against `service`.
    pub fn start(workers: usize, service: Arc<NamenodeService>) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
            let service = service.clone();
            tokio::spawn(async move {
                tracing::debug!(worker, "dispatch worker started");
                while let Some(task) = rx.recv().await {
                    let reply = service.handle(task.command);
                    // the submitter may have given up; that is fine
                    let _ = task.reply.send(reply);
                }
                tracing::debug!(worker, "dispatch worker stopped");
            });
            senders.push(tx);
        }
        Self { workers: senders }
    }

    fn worker_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.workers.len() as u64) as usize
    }

    /// Submits a command and awaits its reply.
    pub async fn submit(&self, command: TaskCommand) -> TaskReply {
        let idx = self.worker_for(command.routing_key());
        let (tx, rx) = oneshot::channel();
        let task = Task { command, reply: tx };
        if self.workers[idx].send(task).is_err() {
            return TaskReply::status(Status::Fail);
        }
        match rx.await {
            Ok(reply) => reply,
            Err(_) => TaskReply::status(Status::Fail),
        }
    }
}
