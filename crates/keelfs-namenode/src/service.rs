//! Request handlers: validation, permission checks and admission run on
//! the proposer, then the mutation travels through the consensus gateway
//! and is applied by the state machine before the reply is built.
//!
//! Handlers are synchronous; the dispatch workers call them one task at
//! a time per routing key.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::blocks::{BlockIdGenerator, BlockIndex};
use crate::consensus::ConsensusGateway;
use crate::datanode::DataNodeIndex;
use crate::dispatch::{
    BlkReportReq, BlockAllocation, BlockLocation, CloseReq, CreateReq, DnHeartbeatReq,
    DnRegisterReq, EntryInfo, MkdirReq, PathReq, ReplyPayload, TaskCommand, TaskReply,
};
use crate::inode::{BLOCK_SLOTS, MAX_KEY_LEN, MAX_NAME_LEN};
use crate::namespace::NamespaceStore;
use crate::ops::EditOp;
use crate::pathkey;
use crate::permission::{self, PermissionChecker};
use crate::types::{EntryState, NnError, Status, TimestampMs};

/// The namenode's request-handling context.
pub struct NamenodeService {
    namespace: Arc<NamespaceStore>,
    blocks: Arc<BlockIndex>,
    datanodes: Arc<DataNodeIndex>,
    gateway: Arc<ConsensusGateway>,
    blk_gen: BlockIdGenerator,
    perms: PermissionChecker,
    namespace_id: u64,
    safe_mode: AtomicBool,
}

impl NamenodeService {
    /// Builds the service over the shared stores. Starts in safe mode;
    /// the server lifts it once the image is loaded.
    pub fn new(
        namespace: Arc<NamespaceStore>,
        blocks: Arc<BlockIndex>,
        datanodes: Arc<DataNodeIndex>,
        gateway: Arc<ConsensusGateway>,
        namespace_id: u64,
        superuser: impl Into<String>,
    ) -> Self {
        Self {
            namespace,
            blocks,
            datanodes,
            gateway,
            blk_gen: BlockIdGenerator::new(),
            perms: PermissionChecker::new(superuser),
            namespace_id,
            safe_mode: AtomicBool::new(true),
        }
    }

    /// True while mutations are refused.
    pub fn in_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::SeqCst)
    }

    /// Enters or leaves safe mode.
    pub fn set_safe_mode(&self, on: bool) {
        self.safe_mode.store(on, Ordering::SeqCst);
        tracing::info!(safe_mode = on, "safe mode changed");
    }

    /// Executes one command, producing exactly one reply.
    pub fn handle(&self, command: TaskCommand) -> TaskReply {
        let mutating = matches!(
            command,
            TaskCommand::Mkdir(_)
                | TaskCommand::Rmr(_)
                | TaskCommand::Create(_)
                | TaskCommand::GetAdditionalBlk(_)
                | TaskCommand::Close(_)
                | TaskCommand::Rm(_)
        );
        if mutating && self.in_safe_mode() {
            return TaskReply::status(Status::InSafeMode);
        }
        let result = match command {
            TaskCommand::Mkdir(req) => self.mkdir(req),
            TaskCommand::Rmr(req) => self.rmr(req),
            TaskCommand::Ls(req) => self.ls(req),
            TaskCommand::Create(req) => self.create(req),
            TaskCommand::GetAdditionalBlk(req) => self.get_additional_blk(req),
            TaskCommand::Close(req) => self.close(req),
            TaskCommand::Rm(req) => self.rm(req),
            TaskCommand::Open(req) => self.open(req),
            TaskCommand::DnRegister(req) => self.dn_register(req),
            TaskCommand::DnHeartbeat(req) => self.dn_heartbeat(req),
            TaskCommand::DnRecvBlkReport(req) => self.dn_recv_blk_report(req),
            TaskCommand::DnBlkReport(req) => self.dn_blk_report(req),
        };
        result.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "request rejected");
            TaskReply::status(e.status())
        })
    }

    fn mkdir(&self, req: MkdirReq) -> Result<TaskReply, NnError> {
        let key = validate_path(&req.path)?;
        validate_name(&req.user)?;
        validate_name(&req.group)?;
        if self.namespace.lookup(&key).is_some() {
            return Err(NnError::KeyExists(key));
        }
        let chain = self.namespace.resolve_ancestors(&req.path);
        // the chain may end at a file; never let that reach consensus
        if let Some(deepest) = chain.last() {
            if !deepest.is_directory {
                let path = pathkey::key_to_path(&deepest.key)
                    .unwrap_or_else(|_| deepest.key.clone());
                return Err(NnError::NotDirectory(path));
            }
        }
        self.perms.check_chain(
            &chain,
            &req.user,
            &req.group,
            permission::WRITE | permission::EXECUTE,
        )?;
        let missing = (pathkey::ancestor_paths(&req.path).len() - chain.len()) as u64;
        if self.namespace.would_exceed(missing) {
            return Err(NnError::ObjectCeiling {
                live: self.namespace.live_count(),
                ceiling: self.namespace.ceiling(),
            });
        }
        self.gateway.propose(&EditOp::Mkdir {
            key,
            permission: req.permission,
            owner: req.user,
            group: req.group,
            mtime: TimestampMs::now(),
        })?;
        Ok(TaskReply::status(Status::Succ))
    }

    fn create(&self, req: CreateReq) -> Result<TaskReply, NnError> {
        let key = validate_path(&req.path)?;
        validate_name(&req.user)?;
        validate_name(&req.group)?;
        if req.blk_seq < 1 || req.blk_seq > req.total_blk || req.total_blk as usize > BLOCK_SLOTS {
            return Err(NnError::BadBlockSequence {
                seq: req.blk_seq,
                total: req.total_blk,
            });
        }
        if let Some(existing) = self.namespace.lookup(&key) {
            return Err(match existing.state {
                EntryState::Creating => NnError::StateCreating(key),
                EntryState::Ok => NnError::KeyExists(key),
            });
        }
        let parent = pathkey::parent_path(&req.path)
            .ok_or_else(|| NnError::KeyExists(key.clone()))?;
        let chain = self.namespace.resolve_ancestors(&req.path);
        match chain.last() {
            Some(deepest) if deepest.key == pathkey::path_to_key(&parent) => {
                if !deepest.is_directory {
                    return Err(NnError::NotDirectory(parent));
                }
            }
            _ => return Err(NnError::KeyNotFound(pathkey::path_to_key(&parent))),
        }
        self.perms.check_chain(
            &chain,
            &req.user,
            &req.group,
            permission::WRITE | permission::EXECUTE,
        )?;
        if self.namespace.would_exceed(1) {
            return Err(NnError::ObjectCeiling {
                live: self.namespace.live_count(),
                ceiling: self.namespace.ceiling(),
            });
        }
        let hosts = self.datanodes.generate_replica_targets(req.replication)?;
        let blk_id = self.blk_gen.next_id();
        self.gateway.propose(&EditOp::Create {
            key,
            permission: req.permission,
            owner: req.user,
            group: req.group,
            mtime: TimestampMs::now(),
            blk_id,
            blk_size: req.blk_size,
            blk_replication: req.replication,
            blk_seq: req.blk_seq,
            total_blk: req.total_blk,
        })?;
        Ok(TaskReply::ok(ReplyPayload::Allocation(BlockAllocation {
            blk_id,
            namespace_id: self.namespace_id,
            hosts,
        })))
    }

    fn get_additional_blk(&self, req: PathReq) -> Result<TaskReply, NnError> {
        let key = validate_path(&req.path)?;
        let record = self
            .namespace
            .lookup(&key)
            .ok_or_else(|| NnError::KeyNotFound(key.clone()))?;
        if record.is_directory {
            return Err(NnError::NotFile(req.path));
        }
        if record.state != EntryState::Creating {
            return Err(NnError::KeyExists(key));
        }
        // a full block list cannot take another allocation; refuse here
        // instead of burning a consensus instance on a doomed edit
        if record.blocks.len() >= BLOCK_SLOTS {
            return Err(NnError::BadBlockSequence {
                seq: record.blocks.len() as u32 + 1,
                total: BLOCK_SLOTS as u32,
            });
        }
        let chain = self.namespace.resolve_ancestors(&req.path);
        self.perms
            .check_chain(&chain, &req.user, &req.group, permission::WRITE)?;
        let hosts = self.datanodes.generate_replica_targets(record.replication)?;
        let blk_id = self.blk_gen.next_id();
        self.gateway.propose(&EditOp::AddBlock {
            key,
            blk_id,
            blk_size: record.blk_size,
            blk_replication: record.replication,
        })?;
        Ok(TaskReply::ok(ReplyPayload::Allocation(BlockAllocation {
            blk_id,
            namespace_id: self.namespace_id,
            hosts,
        })))
    }

    fn close(&self, req: CloseReq) -> Result<TaskReply, NnError> {
        let key = validate_path(&req.path)?;
        let record = self
            .namespace
            .lookup(&key)
            .ok_or_else(|| NnError::KeyNotFound(key.clone()))?;
        if record.is_directory {
            return Err(NnError::NotFile(req.path));
        }
        if record.state == EntryState::Ok {
            // already finalized, a retried close succeeds
            return Ok(TaskReply::status(Status::Succ));
        }
        let chain = self.namespace.resolve_ancestors(&req.path);
        self.perms
            .check_chain(&chain, &req.user, &req.group, permission::WRITE)?;
        self.gateway.propose(&EditOp::Close {
            key,
            mtime: TimestampMs::now(),
            length: req.length,
            blk_replication: record.replication,
        })?;
        Ok(TaskReply::status(Status::Succ))
    }

    fn rm(&self, req: PathReq) -> Result<TaskReply, NnError> {
        let key = validate_path(&req.path)?;
        let record = self
            .namespace
            .lookup(&key)
            .ok_or_else(|| NnError::KeyNotFound(key.clone()))?;
        if record.is_directory {
            return Err(NnError::NotFile(req.path));
        }
        let chain = self.namespace.resolve_ancestors(&req.path);
        self.perms
            .check_chain(&chain, &req.user, &req.group, permission::WRITE)?;
        self.gateway.propose(&EditOp::Rm {
            key,
            mtime: TimestampMs::now(),
        })?;
        Ok(TaskReply::status(Status::Succ))
    }

    fn rmr(&self, req: PathReq) -> Result<TaskReply, NnError> {
        let key = validate_path(&req.path)?;
        if key == pathkey::root_key() {
            return Err(NnError::PermissionDenied);
        }
        let record = self
            .namespace
            .lookup(&key)
            .ok_or_else(|| NnError::KeyNotFound(key.clone()))?;
        if !record.is_directory {
            return Err(NnError::NotDirectory(req.path));
        }
        let chain = self.namespace.resolve_ancestors(&req.path);
        self.perms
            .check_chain(&chain, &req.user, &req.group, permission::WRITE)?;
        self.gateway.propose(&EditOp::Rmr {
            key,
            mtime: TimestampMs::now(),
        })?;
        Ok(TaskReply::status(Status::Succ))
    }

    fn ls(&self, req: PathReq) -> Result<TaskReply, NnError> {
        let key = validate_path(&req.path)?;
        let record = self
            .namespace
            .lookup(&key)
            .ok_or_else(|| NnError::KeyNotFound(key.clone()))?;
        let chain = self.namespace.resolve_ancestors(&req.path);
        self.perms
            .check_chain(&chain, &req.user, &req.group, permission::READ_EXECUTE)?;
        let entries = if record.is_directory {
            self.namespace
                .list_children(&key)?
                .into_iter()
                .filter(|r| r.state == EntryState::Ok)
                .map(entry_info)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            vec![entry_info(record)?]
        };
        Ok(TaskReply::ok(ReplyPayload::Listing(entries)))
    }

    fn open(&self, req: PathReq) -> Result<TaskReply, NnError> {
        let key = validate_path(&req.path)?;
        let record = self
            .namespace
            .lookup(&key)
            .ok_or_else(|| NnError::KeyNotFound(key.clone()))?;
        if record.is_directory {
            return Err(NnError::NotFile(req.path));
        }
        if record.state == EntryState::Creating {
            return Err(NnError::StateCreating(key));
        }
        let chain = self.namespace.resolve_ancestors(&req.path);
        self.perms
            .check_chain(&chain, &req.user, &req.group, permission::READ)?;
        let blocks = record
            .blocks
            .iter()
            .map(|id| match self.blocks.lookup(*id) {
                Some(br) => BlockLocation {
                    id: *id,
                    size: br.size,
                    hosts: br.hosts,
                },
                // not reported yet
                None => BlockLocation {
                    id: *id,
                    size: 0,
                    hosts: Vec::new(),
                },
            })
            .collect();
        Ok(TaskReply::ok(ReplyPayload::Locations {
            length: record.length,
            blocks,
        }))
    }

    fn dn_register(&self, req: DnRegisterReq) -> Result<TaskReply, NnError> {
        let namespace_id = self
            .datanodes
            .register(req.node, req.sys, TimestampMs::now());
        Ok(TaskReply::ok(ReplyPayload::Registered { namespace_id }))
    }

    fn dn_heartbeat(&self, req: DnHeartbeatReq) -> Result<TaskReply, NnError> {
        let deletions = self
            .datanodes
            .heartbeat(&req.node, req.sys, TimestampMs::now())?;
        Ok(TaskReply::ok(ReplyPayload::Heartbeat { deletions }))
    }

    /// Incremental report: blocks the node just finished writing.
    fn dn_recv_blk_report(&self, req: BlkReportReq) -> Result<TaskReply, NnError> {
        for (blk, size) in &req.blocks {
            self.blocks.add(*blk, *size, req.node.clone());
            self.datanodes.record_block(&req.node, *blk)?;
        }
        Ok(TaskReply::status(Status::Succ))
    }

    /// Full report: replaces the node's hosted-block list wholesale.
    fn dn_blk_report(&self, req: BlkReportReq) -> Result<TaskReply, NnError> {
        let mut ids = Vec::with_capacity(req.blocks.len());
        for (blk, size) in &req.blocks {
            self.blocks.add(*blk, *size, req.node.clone());
            ids.push(*blk);
        }
        self.datanodes.replace_blocks(&req.node, ids)?;
        Ok(TaskReply::status(Status::Succ))
    }
}

fn validate_path(path: &str) -> Result<String, NnError> {
    if !path.starts_with('/') {
        return Err(NnError::Codec(format!("path '{}' is not absolute", path)));
    }
    let key = pathkey::path_to_key(path);
    if key.len() > MAX_KEY_LEN {
        return Err(NnError::Codec(format!("path '{}' too long", path)));
    }
    Ok(key)
}

fn validate_name(name: &str) -> Result<(), NnError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(NnError::Codec(format!("bad user or group name '{}'", name)));
    }
    Ok(())
}

fn entry_info(record: crate::inode::InodeRecord) -> Result<EntryInfo, NnError> {
    Ok(EntryInfo {
        path: pathkey::key_to_path(&record.key)?,
        is_directory: record.is_directory,
        length: record.length,
        permission: record.permission,
        owner: record.owner,
        group: record.group,
        mtime: record.mtime,
        replication: record.replication,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::LocalLog;
    use crate::datanode::SysInfo;
    use crate::statemachine::EditStateMachine;
    use crate::types::{DatanodeId, NodeId};

    fn service() -> NamenodeService {
        let namespace = Arc::new(NamespaceStore::new(1024));
        let blocks = Arc::new(BlockIndex::new());
        let datanodes = Arc::new(DataNodeIndex::new(60_000, 64, 7));
        let sm = Arc::new(EditStateMachine::new(
            namespace.clone(),
            blocks.clone(),
            datanodes.clone(),
            3_600_000,
        ));
        let log = Arc::new(LocalLog::new(NodeId::new(1), sm, 8));
        let gateway = Arc::new(ConsensusGateway::new(log, 8));
        let svc = NamenodeService::new(namespace, blocks, datanodes, gateway, 7, "root");
        svc.set_safe_mode(false);
        svc
    }

    fn mkdir(svc: &NamenodeService, path: &str) -> TaskReply {
        svc.handle(TaskCommand::Mkdir(MkdirReq {
            path: path.to_string(),
            permission: 0o755,
            user: "alice".into(),
            group: "users".into(),
        }))
    }

    fn create(svc: &NamenodeService, path: &str) -> TaskReply {
        svc.handle(TaskCommand::Create(CreateReq {
            path: path.to_string(),
            permission: 0o644,
            user: "alice".into(),
            group: "users".into(),
            blk_size: 4096,
            replication: 3,
            blk_seq: 1,
            total_blk: 1,
        }))
    }

    fn register_dn(svc: &NamenodeService, addr: &str) {
        let reply = svc.handle(TaskCommand::DnRegister(DnRegisterReq {
            node: DatanodeId::new(addr),
            sys: SysInfo::default(),
        }));
        assert_eq!(reply.status, Status::Succ);
    }

    #[test]
    fn test_mkdir_then_ls() {
        let svc = service();
        assert_eq!(mkdir(&svc, "/a/b").status, Status::Succ);
        let reply = svc.handle(TaskCommand::Ls(PathReq {
            path: "/a".into(),
            user: "alice".into(),
            group: "users".into(),
        }));
        assert_eq!(reply.status, Status::Succ);
        match reply.payload {
            Some(ReplyPayload::Listing(entries)) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].path, "/a/b");
                assert!(entries[0].is_directory);
            }
            other => panic!("expected listing, got {:?}", other),
        }
    }

    #[test]
    fn test_mkdir_existing_fails() {
        let svc = service();
        assert_eq!(mkdir(&svc, "/a").status, Status::Succ);
        assert_eq!(mkdir(&svc, "/a").status, Status::KeyExist);
    }

    #[test]
    fn test_overlong_group_rejected() {
        // every name that enters the namespace must fit the fixed image
        // layout, or checkpoints would fail on serialization forever
        let svc = service();
        let reply = svc.handle(TaskCommand::Mkdir(MkdirReq {
            path: "/a".into(),
            permission: 0o755,
            user: "alice".into(),
            group: "g".repeat(MAX_NAME_LEN + 8),
        }));
        assert_eq!(reply.status, Status::Fail);
        assert!(svc.namespace.lookup(&pathkey::path_to_key("/a")).is_none());

        register_dn(&svc, "10.0.0.1:8701");
        let reply = svc.handle(TaskCommand::Create(CreateReq {
            path: "/f".into(),
            permission: 0o644,
            user: "u".repeat(MAX_NAME_LEN + 1),
            group: "users".into(),
            blk_size: 4096,
            replication: 3,
            blk_seq: 1,
            total_blk: 1,
        }));
        assert_eq!(reply.status, Status::Fail);
        assert!(svc.namespace.lookup(&pathkey::path_to_key("/f")).is_none());
    }

    #[test]
    fn test_mkdir_through_file_rejected() {
        let svc = service();
        register_dn(&svc, "10.0.0.1:8701");
        mkdir(&svc, "/a");
        create(&svc, "/a/f");
        let reply = mkdir(&svc, "/a/f/sub");
        assert_eq!(reply.status, Status::NotDirectory);
        assert!(svc
            .namespace
            .lookup(&pathkey::path_to_key("/a/f/sub"))
            .is_none());
    }

    #[test]
    fn test_block_request_on_full_file_refused() {
        let svc = service();
        register_dn(&svc, "10.0.0.1:8701");
        mkdir(&svc, "/a");
        create(&svc, "/a/f");
        let req = PathReq {
            path: "/a/f".into(),
            user: "alice".into(),
            group: "users".into(),
        };
        // the CREATE took the first slot
        for _ in 1..BLOCK_SLOTS {
            let reply = svc.handle(TaskCommand::GetAdditionalBlk(req.clone()));
            assert_eq!(reply.status, Status::Succ);
        }
        let reply = svc.handle(TaskCommand::GetAdditionalBlk(req));
        assert_eq!(reply.status, Status::Fail);
        let record = svc
            .namespace
            .lookup(&pathkey::path_to_key("/a/f"))
            .unwrap();
        assert_eq!(record.blocks.len(), BLOCK_SLOTS);
    }

    #[test]
    fn test_safe_mode_refuses_mutations() {
        let svc = service();
        svc.set_safe_mode(true);
        assert_eq!(mkdir(&svc, "/a").status, Status::InSafeMode);
        // datanode traffic is still accepted
        register_dn(&svc, "10.0.0.1:8701");
    }

    #[test]
    fn test_create_needs_parent_and_datanode() {
        let svc = service();
        assert_eq!(mkdir(&svc, "/a").status, Status::Succ);
        // no datanode yet
        assert_eq!(create(&svc, "/a/f").status, Status::NotDatanode);

        register_dn(&svc, "10.0.0.1:8701");
        assert_eq!(create(&svc, "/missing/f").status, Status::KeyNotExist);
        let reply = create(&svc, "/a/f");
        assert_eq!(reply.status, Status::Succ);
        match reply.payload {
            Some(ReplyPayload::Allocation(alloc)) => {
                assert_eq!(alloc.namespace_id, 7);
                assert_eq!(alloc.hosts.len(), 1);
            }
            other => panic!("expected allocation, got {:?}", other),
        }
    }

    #[test]
    fn test_create_twice_reports_creating() {
        let svc = service();
        register_dn(&svc, "10.0.0.1:8701");
        mkdir(&svc, "/a");
        assert_eq!(create(&svc, "/a/f").status, Status::Succ);
        assert_eq!(create(&svc, "/a/f").status, Status::KeyStateCreating);
    }

    #[test]
    fn test_full_write_read_cycle() {
        let svc = service();
        register_dn(&svc, "10.0.0.1:8701");
        mkdir(&svc, "/a");
        let created = create(&svc, "/a/f");
        let Some(ReplyPayload::Allocation(alloc)) = created.payload else {
            panic!("expected allocation");
        };

        // one more block, then the datanode reports both written
        let added = svc.handle(TaskCommand::GetAdditionalBlk(PathReq {
            path: "/a/f".into(),
            user: "alice".into(),
            group: "users".into(),
        }));
        let Some(ReplyPayload::Allocation(extra)) = added.payload else {
            panic!("expected allocation");
        };
        let report = svc.handle(TaskCommand::DnRecvBlkReport(BlkReportReq {
            node: DatanodeId::new("10.0.0.1:8701"),
            blocks: vec![(alloc.blk_id, 4096), (extra.blk_id, 100)],
        }));
        assert_eq!(report.status, Status::Succ);

        // open before close is refused
        let open_req = PathReq {
            path: "/a/f".into(),
            user: "alice".into(),
            group: "users".into(),
        };
        let early = svc.handle(TaskCommand::Open(open_req.clone()));
        assert_eq!(early.status, Status::KeyStateCreating);

        let closed = svc.handle(TaskCommand::Close(CloseReq {
            path: "/a/f".into(),
            user: "alice".into(),
            group: "users".into(),
            length: 4196,
        }));
        assert_eq!(closed.status, Status::Succ);

        let opened = svc.handle(TaskCommand::Open(open_req));
        assert_eq!(opened.status, Status::Succ);
        match opened.payload {
            Some(ReplyPayload::Locations { length, blocks }) => {
                assert_eq!(length, 4196);
                assert_eq!(blocks.len(), 2);
                assert_eq!(blocks[0].id, alloc.blk_id);
                assert_eq!(blocks[0].hosts, vec![DatanodeId::new("10.0.0.1:8701")]);
            }
            other => panic!("expected locations, got {:?}", other),
        }
    }

    #[test]
    fn test_rm_queues_deletions_for_heartbeat() {
        let svc = service();
        register_dn(&svc, "10.0.0.1:8701");
        mkdir(&svc, "/a");
        let created = create(&svc, "/a/f");
        let Some(ReplyPayload::Allocation(alloc)) = created.payload else {
            panic!("expected allocation");
        };
        svc.handle(TaskCommand::DnRecvBlkReport(BlkReportReq {
            node: DatanodeId::new("10.0.0.1:8701"),
            blocks: vec![(alloc.blk_id, 4096)],
        }));
        svc.handle(TaskCommand::Close(CloseReq {
            path: "/a/f".into(),
            user: "alice".into(),
            group: "users".into(),
            length: 4096,
        }));
        let rm = svc.handle(TaskCommand::Rm(PathReq {
            path: "/a/f".into(),
            user: "alice".into(),
            group: "users".into(),
        }));
        assert_eq!(rm.status, Status::Succ);

        let hb = svc.handle(TaskCommand::DnHeartbeat(DnHeartbeatReq {
            node: DatanodeId::new("10.0.0.1:8701"),
            sys: SysInfo::default(),
        }));
        match hb.payload {
            Some(ReplyPayload::Heartbeat { deletions }) => {
                assert_eq!(deletions, vec![alloc.blk_id]);
            }
            other => panic!("expected heartbeat payload, got {:?}", other),
        }
    }

    #[test]
    fn test_rmr_refuses_root_and_files() {
        let svc = service();
        register_dn(&svc, "10.0.0.1:8701");
        mkdir(&svc, "/a");
        let root = svc.handle(TaskCommand::Rmr(PathReq {
            path: "/".into(),
            user: "root".into(),
            group: "root".into(),
        }));
        assert_eq!(root.status, Status::PermissionDeny);

        create(&svc, "/a/f");
        let on_file = svc.handle(TaskCommand::Rmr(PathReq {
            path: "/a/f".into(),
            user: "alice".into(),
            group: "users".into(),
        }));
        assert_eq!(on_file.status, Status::NotDirectory);
    }

    #[test]
    fn test_permission_denied_for_stranger() {
        let svc = service();
        mkdir(&svc, "/a"); // owned by alice, 0o755
        let denied = svc.handle(TaskCommand::Mkdir(MkdirReq {
            path: "/a/b".into(),
            permission: 0o755,
            user: "mallory".into(),
            group: "guests".into(),
        }));
        assert_eq!(denied.status, Status::PermissionDeny);
    }

    #[test]
    fn test_heartbeat_from_unknown_node() {
        let svc = service();
        let hb = svc.handle(TaskCommand::DnHeartbeat(DnHeartbeatReq {
            node: DatanodeId::new("10.9.9.9:8701"),
            sys: SysInfo::default(),
        }));
        assert_eq!(hb.status, Status::NotDatanode);
    }

    #[test]
    fn test_relative_path_rejected() {
        let svc = service();
        assert_eq!(mkdir(&svc, "not/absolute").status, Status::Fail);
    }
}
