use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime configuration for one namenode replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamenodeConfig {
    /// This replica's node id within the cluster.
    pub node_id: u64,
    /// Namespace id handed to datanodes at registration, fixed at format time.
    pub namespace_id: u64,
    /// Directory holding `current/`, `lastcheckpoint.tmp` and `previous.checkpoint`.
    pub fsimage_dir: PathBuf,
    /// Number of independent replication groups. Changing this requires reformatting.
    pub group_count: u32,
    /// Ceiling on live namespace entries, enforced before admission.
    pub max_fs_objects: u64,
    /// Applied-edit count that triggers a checkpoint.
    pub checkpoint_trigger_ops: u32,
    /// Milliseconds a CREATING entry may wait for CLOSE before being purged.
    pub create_timeout_ms: u64,
    /// Milliseconds without a heartbeat before a datanode is declared dead.
    pub datanode_timeout_ms: u64,
    /// Maximum pending block deletions returned per heartbeat.
    pub deletion_batch: usize,
    /// Number of task-dispatch worker threads.
    pub worker_threads: usize,
    /// Superuser name; bypasses permission checks.
    pub admin_user: String,
}

impl Default for NamenodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            namespace_id: 1,
            fsimage_dir: PathBuf::from("/var/lib/keelfs/name"),
            group_count: 8,
            max_fs_objects: 1_000_000,
            checkpoint_trigger_ops: 10_000,
            create_timeout_ms: 60 * 60 * 1000,
            datanode_timeout_ms: 30_000,
            deletion_batch: 64,
            worker_threads: 4,
            admin_user: String::from("root"),
        }
    }
}

impl NamenodeConfig {
    /// Loads a config from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: NamenodeConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no namenode can run with. Key routing takes the
    /// group count as a modulus, so zero groups is unrepresentable.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.group_count > 0, "group_count must be positive");
        anyhow::ensure!(self.max_fs_objects > 0, "max_fs_objects must be positive");
        anyhow::ensure!(self.worker_threads > 0, "worker_threads must be positive");
        Ok(())
    }

    /// Path of the live image directory.
    pub fn current_dir(&self) -> PathBuf {
        self.fsimage_dir.join("current")
    }

    /// Path of the checkpoint staging directory.
    pub fn staging_dir(&self) -> PathBuf {
        self.fsimage_dir.join("lastcheckpoint.tmp")
    }

    /// Path of the previous valid checkpoint directory.
    pub fn previous_dir(&self) -> PathBuf {
        self.fsimage_dir.join("previous.checkpoint")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = NamenodeConfig::default();
        assert_eq!(config.node_id, 1);
        assert_eq!(config.group_count, 8);
        assert_eq!(config.max_fs_objects, 1_000_000);
        assert_eq!(config.deletion_batch, 64);
        assert_eq!(config.create_timeout_ms, 3_600_000);
        assert_eq!(config.admin_user, "root");
    }

    #[test]
    fn test_derived_dirs() {
        let config = NamenodeConfig {
            fsimage_dir: PathBuf::from("/data/nn"),
            ..Default::default()
        };
        assert_eq!(config.current_dir(), PathBuf::from("/data/nn/current"));
        assert_eq!(
            config.staging_dir(),
            PathBuf::from("/data/nn/lastcheckpoint.tmp")
        );
        assert_eq!(
            config.previous_dir(),
            PathBuf::from("/data/nn/previous.checkpoint")
        );
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
node_id = 3
namespace_id = 77
fsimage_dir = "/tmp/nn"
group_count = 4
max_fs_objects = 128
checkpoint_trigger_ops = 100
create_timeout_ms = 5000
datanode_timeout_ms = 9000
deletion_batch = 8
worker_threads = 2
admin_user = "admin"
"#
        )
        .unwrap();

        let config = NamenodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node_id, 3);
        assert_eq!(config.namespace_id, 77);
        assert_eq!(config.group_count, 4);
        assert_eq!(config.deletion_batch, 8);
        assert_eq!(config.admin_user, "admin");
    }

    #[test]
    fn test_from_json_file() {
        let config = NamenodeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = NamenodeConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.max_fs_objects, config.max_fs_objects);
    }

    #[test]
    fn test_zero_group_count_rejected() {
        let mut config = NamenodeConfig::default();
        config.group_count = 0;
        let json = serde_json::to_string(&config).unwrap();
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(json.as_bytes()).unwrap();
        assert!(NamenodeConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_zero_object_ceiling_rejected() {
        let config = NamenodeConfig {
            max_fs_objects: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(NamenodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(NamenodeConfig::from_file(file.path()).is_err());
    }
}
