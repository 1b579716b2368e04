//! Checkpoint manager: periodically freezes the namespace into an image
//! directory so the consensus log can be trimmed.
//!
//! Directory rotation keeps one complete image recoverable at every step:
//!
//! ```text
//! current/               the image being served from
//! lastcheckpoint.tmp/    the new image, built off to the side
//! previous.checkpoint/   the image before the last rotation
//! ```
//!
//! The new image is written entirely into `lastcheckpoint.tmp` and only
//! rotated into place once its records and ckpid marker are durable, so
//! a failed write never mutates `current` and a retry starts clean. Log
//! trimming happens only after the rotation completes.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::NamenodeConfig;
use crate::consensus::ConsensusGateway;
use crate::image;
use crate::namespace::NamespaceStore;
use crate::statemachine::EditStateMachine;
use crate::types::{InstanceId, NnError, TimestampMs};

/// Cuts and rotates namespace images.
pub struct CheckpointManager {
    namespace: Arc<NamespaceStore>,
    sm: Arc<EditStateMachine>,
    gateway: Arc<ConsensusGateway>,
    current: PathBuf,
    staging: PathBuf,
    previous: PathBuf,
    trigger_ops: u64,
    /// Applied-op count at the last completed checkpoint.
    baseline: AtomicU64,
    running: AtomicBool,
}

impl CheckpointManager {
    /// Builds a manager over the shared stores and the configured
    /// image directory layout.
    pub fn new(
        config: &NamenodeConfig,
        namespace: Arc<NamespaceStore>,
        sm: Arc<EditStateMachine>,
        gateway: Arc<ConsensusGateway>,
    ) -> Self {
        Self {
            namespace,
            sm,
            gateway,
            current: config.current_dir(),
            staging: config.staging_dir(),
            previous: config.previous_dir(),
            trigger_ops: config.checkpoint_trigger_ops as u64,
            baseline: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Restores the namespace from the current image. Returns the
    /// instance id the image reflects (zero on first boot).
    pub fn load(&self) -> Result<InstanceId, NnError> {
        // a crash between the two rotation renames leaves the completed
        // new image parked and no current; finish the rotation
        if !self.current.exists() && self.staging.join(image::CKPID_FILE).exists() {
            fs::rename(&self.staging, &self.current)?;
            tracing::warn!("completed interrupted checkpoint rotation");
        }
        let records = image::read_image(&self.current)?;
        let count = records.len();
        for rec in records {
            self.sm.restore_record(rec)?;
        }
        let ckpid = image::read_ckpid(&self.current)?;
        self.baseline.store(self.sm.applied_count(), Ordering::SeqCst);
        tracing::info!(restored = count, ckpid = %ckpid, "image loaded");
        Ok(ckpid)
    }

    /// Runs a checkpoint if enough operations applied since the last one.
    pub fn maybe_checkpoint(&self, now: TimestampMs) -> Result<(), NnError> {
        let applied = self.sm.applied_count();
        if applied.saturating_sub(self.baseline.load(Ordering::SeqCst)) < self.trigger_ops {
            return Ok(());
        }
        self.do_checkpoint(now).map(|_| ())
    }

    /// Cuts one checkpoint. Entries modified after `start` are left for
    /// the next cut, so a long write never chases a moving namespace.
    /// Returns the instance id the new image reflects; a cut already in
    /// progress yields zero.
    pub fn do_checkpoint(&self, start: TimestampMs) -> Result<InstanceId, NnError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("checkpoint already running, skipping");
            return Ok(InstanceId::ZERO);
        }
        let result = self.run_checkpoint(start);
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn run_checkpoint(&self, start: TimestampMs) -> Result<InstanceId, NnError> {
        let applied_at_start = self.sm.applied_count();
        tracing::info!(start = %start, "checkpoint starting");

        // leftovers from a failed cut
        if self.staging.exists() {
            fs::remove_dir_all(&self.staging)?;
        }

        // copy out under the lock, write with the lock released
        let snapshot = self.namespace.checkpoint_snapshot();
        let mut max_instance = InstanceId::ZERO;
        let mut records = Vec::with_capacity(snapshot.len());
        for rec in snapshot {
            if rec.mtime > start {
                continue;
            }
            if rec.creation_id > max_instance {
                max_instance = rec.creation_id;
            }
            records.push(rec);
        }
        let written = records.len();

        // build the whole image off to the side; current stays untouched
        // until records and ckpid are both durable
        image::write_image(&self.staging, &records)?;
        image::write_ckpid(&self.staging, max_instance)?;

        // rotate: current becomes previous.checkpoint, the new image
        // becomes current
        if self.previous.exists() {
            fs::remove_dir_all(&self.previous)?;
        }
        if self.current.exists() {
            fs::rename(&self.current, &self.previous)?;
        }
        fs::rename(&self.staging, &self.current)?;

        // only now may the backend trim its log
        self.gateway.set_checkpoint_instance_all(max_instance);
        self.baseline.store(applied_at_start, Ordering::SeqCst);
        tracing::info!(records = written, ckpid = %max_instance, "checkpoint complete");
        Ok(max_instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::BlockIndex;
    use crate::consensus::LocalLog;
    use crate::datanode::DataNodeIndex;
    use crate::ops::EditOp;
    use crate::pathkey;
    use crate::types::NodeId;

    struct Fixture {
        namespace: Arc<NamespaceStore>,
        sm: Arc<EditStateMachine>,
        gateway: Arc<ConsensusGateway>,
        config: NamenodeConfig,
        _tmp: tempfile::TempDir,
    }

    fn fixture(trigger: u32) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let config = NamenodeConfig {
            fsimage_dir: tmp.path().to_path_buf(),
            checkpoint_trigger_ops: trigger,
            ..NamenodeConfig::default()
        };
        let namespace = Arc::new(NamespaceStore::new(1024));
        let blocks = Arc::new(BlockIndex::new());
        let datanodes = Arc::new(DataNodeIndex::new(60_000, 64, 1));
        let sm = Arc::new(EditStateMachine::new(
            namespace.clone(),
            blocks,
            datanodes,
            3_600_000,
        ));
        let log = Arc::new(LocalLog::new(NodeId::new(1), sm.clone(), 4));
        let gateway = Arc::new(ConsensusGateway::new(log, 4));
        Fixture {
            namespace,
            sm,
            gateway,
            config,
            _tmp: tmp,
        }
    }

    fn manager(f: &Fixture) -> CheckpointManager {
        CheckpointManager::new(
            &f.config,
            f.namespace.clone(),
            f.sm.clone(),
            f.gateway.clone(),
        )
    }

    fn mkdir(f: &Fixture, path: &str, mtime: u64) {
        let op = EditOp::Mkdir {
            key: pathkey::path_to_key(path),
            permission: 0o755,
            owner: "alice".into(),
            group: "users".into(),
            mtime: TimestampMs::new(mtime),
        };
        f.gateway.propose(&op).unwrap();
    }

    #[test]
    fn test_checkpoint_and_reload_identity() {
        let f = fixture(1);
        mkdir(&f, "/a/b", 10);
        mkdir(&f, "/c", 20);
        let mgr = manager(&f);
        let ckpid = mgr.do_checkpoint(TimestampMs::new(100)).unwrap();
        assert!(ckpid > InstanceId::ZERO);

        // fresh stores, restore from disk
        let g = Fixture {
            config: f.config.clone(),
            ..fixture(1)
        };
        let mgr2 = manager(&g);
        let loaded = mgr2.load().unwrap();
        assert_eq!(loaded, ckpid);
        assert_eq!(g.namespace.live_count(), f.namespace.live_count());
        assert!(g.namespace.lookup(&pathkey::path_to_key("/a/b")).is_some());
        assert!(g.namespace.lookup(&pathkey::path_to_key("/c")).is_some());
    }

    #[test]
    fn test_entries_after_start_excluded() {
        let f = fixture(1);
        mkdir(&f, "/old", 10);
        mkdir(&f, "/new", 200);
        let mgr = manager(&f);
        mgr.do_checkpoint(TimestampMs::new(100)).unwrap();

        let records = image::read_image(&f.config.current_dir()).unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert!(keys.contains(&pathkey::path_to_key("/old").as_str()));
        assert!(!keys.contains(&pathkey::path_to_key("/new").as_str()));
    }

    #[test]
    fn test_rotation_keeps_previous() {
        let f = fixture(1);
        mkdir(&f, "/a", 10);
        let mgr = manager(&f);
        mgr.do_checkpoint(TimestampMs::new(100)).unwrap();
        mkdir(&f, "/b", 20);
        mgr.do_checkpoint(TimestampMs::new(200)).unwrap();

        assert!(f.config.current_dir().join(image::IMAGE_FILE).exists());
        assert!(f.config.previous_dir().join(image::IMAGE_FILE).exists());
        assert!(!f.config.staging_dir().exists());
    }

    #[test]
    fn test_failed_cut_leaves_current_intact() {
        let f = fixture(1);
        mkdir(&f, "/a", 10);
        let mgr = manager(&f);
        let ckpid = mgr.do_checkpoint(TimestampMs::new(100)).unwrap();

        // a record that cannot serialize makes the next cut fail
        let bad = crate::inode::InodeRecord::new_directory(
            pathkey::path_to_key("/bad"),
            0o755,
            "alice",
            "g".repeat(40),
            TimestampMs::new(20),
        );
        f.namespace.insert_linked(bad).unwrap();
        mkdir(&f, "/later", 30);

        assert!(mgr.do_checkpoint(TimestampMs::new(200)).is_err());
        // the last good image and its marker are untouched and loadable
        assert_eq!(image::read_ckpid(&f.config.current_dir()).unwrap(), ckpid);
        let records = image::read_image(&f.config.current_dir()).unwrap();
        assert!(records
            .iter()
            .any(|r| r.key == pathkey::path_to_key("/a")));

        // retrying fails the same way without eating the good image
        assert!(mgr.do_checkpoint(TimestampMs::new(300)).is_err());
        assert_eq!(image::read_ckpid(&f.config.current_dir()).unwrap(), ckpid);
    }

    #[test]
    fn test_interrupted_rotation_recovered_on_load() {
        let f = fixture(1);
        mkdir(&f, "/a", 10);
        let mgr = manager(&f);
        let ckpid = mgr.do_checkpoint(TimestampMs::new(100)).unwrap();

        // crash window: current already parked, new image not yet renamed in
        std::fs::rename(f.config.current_dir(), f.config.staging_dir()).unwrap();

        let g = Fixture {
            config: f.config.clone(),
            ..fixture(1)
        };
        let mgr2 = manager(&g);
        assert_eq!(mgr2.load().unwrap(), ckpid);
        assert!(f.config.current_dir().join(image::IMAGE_FILE).exists());
        assert!(g.namespace.lookup(&pathkey::path_to_key("/a")).is_some());
    }

    #[test]
    fn test_trigger_threshold() {
        let f = fixture(3);
        let mgr = manager(&f);
        mkdir(&f, "/a", 10);
        mgr.maybe_checkpoint(TimestampMs::new(100)).unwrap();
        assert!(!f.config.current_dir().join(image::IMAGE_FILE).exists());

        mkdir(&f, "/b", 20);
        mkdir(&f, "/c", 30);
        mgr.maybe_checkpoint(TimestampMs::new(100)).unwrap();
        assert!(f.config.current_dir().join(image::IMAGE_FILE).exists());
    }
}
