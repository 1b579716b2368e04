//! Namenode assembly: builds the stores, restores the image, and runs
//! the dispatch pool plus the background tick loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::blocks::BlockIndex;
use crate::checkpoint::CheckpointManager;
use crate::config::NamenodeConfig;
use crate::consensus::{ConsensusGateway, LocalLog};
use crate::datanode::DataNodeIndex;
use crate::dispatch::{Dispatcher, TaskCommand, TaskReply};
use crate::inode::InodeRecord;
use crate::namespace::NamespaceStore;
use crate::pathkey;
use crate::service::NamenodeService;
use crate::statemachine::EditStateMachine;
use crate::types::{NnError, NodeId, TimestampMs};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// A running namenode.
pub struct Namenode {
    service: Arc<NamenodeService>,
    dispatcher: Arc<Dispatcher>,
    checkpoint: Arc<CheckpointManager>,
    shutdown: watch::Sender<bool>,
}

impl Namenode {
    /// Builds the namenode, restores the current image, and starts the
    /// dispatch workers and the tick loop. Safe mode lifts once the
    /// image is loaded.
    pub async fn start(config: NamenodeConfig) -> Result<Self, NnError> {
        let namespace = Arc::new(NamespaceStore::new(config.max_fs_objects));
        let blocks = Arc::new(BlockIndex::new());
        let datanodes = Arc::new(DataNodeIndex::new(
            config.datanode_timeout_ms,
            config.deletion_batch,
            config.namespace_id,
        ));
        let sm = Arc::new(EditStateMachine::new(
            namespace.clone(),
            blocks.clone(),
            datanodes.clone(),
            config.create_timeout_ms,
        ));
        let log = Arc::new(LocalLog::new(
            NodeId::new(config.node_id),
            sm.clone(),
            config.group_count,
        ));
        let gateway = Arc::new(ConsensusGateway::new(log, config.group_count));
        let checkpoint = Arc::new(CheckpointManager::new(
            &config,
            namespace.clone(),
            sm.clone(),
            gateway.clone(),
        ));

        let ckpid = checkpoint.load()?;
        if namespace.lookup(&pathkey::root_key()).is_none() {
            sm.restore_record(InodeRecord::new_directory(
                pathkey::root_key(),
                0o755,
                config.admin_user.clone(),
                config.admin_user.clone(),
                TimestampMs::now(),
            ))?;
            tracing::info!("empty image, root directory created");
        }

        let service = Arc::new(NamenodeService::new(
            namespace,
            blocks,
            datanodes.clone(),
            gateway,
            config.namespace_id,
            config.admin_user.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::start(config.worker_threads, service.clone()));
        service.set_safe_mode(false);

        let (shutdown, mut stopped) = watch::channel(false);
        {
            let sm = sm.clone();
            let datanodes = datanodes.clone();
            let checkpoint = checkpoint.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(TICK_INTERVAL);
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            let now = TimestampMs::now();
                            sm.tick(now);
                            datanodes.expire_dead(now);
                            // image writes are blocking filesystem work;
                            // keep them off the async workers
                            let checkpoint = checkpoint.clone();
                            let cut = tokio::task::spawn_blocking(move || {
                                checkpoint.maybe_checkpoint(now)
                            })
                            .await;
                            match cut {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    tracing::error!(error = %e, "checkpoint failed")
                                }
                                Err(e) => {
                                    tracing::error!(error = %e, "checkpoint task panicked")
                                }
                            }
                        }
                        _ = stopped.changed() => {
                            tracing::info!("tick loop stopping");
                            break;
                        }
                    }
                }
            });
        }

        tracing::info!(node = config.node_id, ckpid = %ckpid, "namenode started");
        Ok(Self {
            service,
            dispatcher,
            checkpoint,
            shutdown,
        })
    }

    /// Submits a command through the dispatch pool.
    pub async fn submit(&self, command: TaskCommand) -> TaskReply {
        self.dispatcher.submit(command).await
    }

    /// The request-handling context.
    pub fn service(&self) -> &Arc<NamenodeService> {
        &self.service
    }

    /// Forces a checkpoint now.
    pub fn checkpoint_now(&self) -> Result<(), NnError> {
        self.checkpoint.do_checkpoint(TimestampMs::now()).map(|_| ())
    }

    /// Stops the background tick loop. Dispatch workers drain and stop
    /// when the namenode is dropped.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{MkdirReq, ReplyPayload, PathReq};
    use crate::types::Status;

    fn test_config(dir: &std::path::Path) -> NamenodeConfig {
        NamenodeConfig {
            fsimage_dir: dir.to_path_buf(),
            worker_threads: 2,
            ..NamenodeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_creates_root() {
        let tmp = tempfile::tempdir().unwrap();
        let nn = Namenode::start(test_config(tmp.path())).await.unwrap();
        let reply = nn
            .submit(TaskCommand::Ls(PathReq {
                path: "/".into(),
                user: "root".into(),
                group: "root".into(),
            }))
            .await;
        assert_eq!(reply.status, Status::Succ);
        nn.shutdown();
    }

    #[tokio::test]
    async fn test_tick_loop_checkpoints() {
        let tmp = tempfile::tempdir().unwrap();
        let config = NamenodeConfig {
            checkpoint_trigger_ops: 1,
            ..test_config(tmp.path())
        };
        let image = config.current_dir().join(crate::image::IMAGE_FILE);
        let nn = Namenode::start(config).await.unwrap();
        let reply = nn
            .submit(TaskCommand::Mkdir(MkdirReq {
                path: "/data".into(),
                permission: 0o755,
                user: "root".into(),
                group: "root".into(),
            }))
            .await;
        assert_eq!(reply.status, Status::Succ);

        // the next tick crosses the trigger and cuts an image
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert!(image.exists());
        nn.shutdown();
    }

    #[tokio::test]
    async fn test_restart_restores_namespace() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let nn = Namenode::start(test_config(tmp.path())).await.unwrap();
            let reply = nn
                .submit(TaskCommand::Mkdir(MkdirReq {
                    path: "/data".into(),
                    permission: 0o755,
                    user: "root".into(),
                    group: "root".into(),
                }))
                .await;
            assert_eq!(reply.status, Status::Succ);
            nn.checkpoint_now().unwrap();
            nn.shutdown();
        }

        let nn = Namenode::start(test_config(tmp.path())).await.unwrap();
        let reply = nn
            .submit(TaskCommand::Ls(PathReq {
                path: "/".into(),
                user: "root".into(),
                group: "root".into(),
            }))
            .await;
        match reply.payload {
            Some(ReplyPayload::Listing(entries)) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].path, "/data");
            }
            other => panic!("expected listing, got {:?}", other),
        }
        nn.shutdown();
    }
}
