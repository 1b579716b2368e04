//! Replicated edit-log operations.
//!
//! Every namespace mutation travels through consensus as one of these
//! variants; adding an operation without handling it at apply time is a
//! compile error. Payloads are bincode-encoded.

use serde::{Deserialize, Serialize};

use crate::types::{BlockId, NnError, TimestampMs};

/// One decoded operation agreed through the consensus log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditOp {
    /// Create a directory, materializing missing ancestors in one pass.
    Mkdir {
        /// Target key.
        key: String,
        /// Permission bits.
        permission: u16,
        /// Owner user name.
        owner: String,
        /// Owner group name.
        group: String,
        /// Modification time stamped by the proposer.
        mtime: TimestampMs,
    },
    /// Open a new file in CREATING state with its first block.
    Create {
        /// Target key.
        key: String,
        /// Permission bits.
        permission: u16,
        /// Owner user name.
        owner: String,
        /// Owner group name.
        group: String,
        /// Modification time stamped by the proposer.
        mtime: TimestampMs,
        /// First block id allocated by the proposer.
        blk_id: BlockId,
        /// Block size negotiated with the client.
        blk_size: u64,
        /// Replication factor.
        blk_replication: u16,
        /// Multi-part sequence number (1-based).
        blk_seq: u32,
        /// Total declared parts.
        total_blk: u32,
    },
    /// Append one more block to a CREATING file.
    AddBlock {
        /// Target key.
        key: String,
        /// Newly allocated block id.
        blk_id: BlockId,
        /// Block size.
        blk_size: u64,
        /// Replication factor.
        blk_replication: u16,
    },
    /// Finalize a CREATING file.
    Close {
        /// Target key.
        key: String,
        /// Modification time stamped by the proposer.
        mtime: TimestampMs,
        /// Final file length.
        length: u64,
        /// Final replication factor.
        blk_replication: u16,
    },
    /// Remove a single file.
    Rm {
        /// Target key.
        key: String,
        /// Modification time stamped by the proposer.
        mtime: TimestampMs,
    },
    /// Recursively remove a directory.
    Rmr {
        /// Target key.
        key: String,
        /// Modification time stamped by the proposer.
        mtime: TimestampMs,
    },
}

impl EditOp {
    /// The key this operation targets, used for group routing.
    pub fn key(&self) -> &str {
        match self {
            EditOp::Mkdir { key, .. }
            | EditOp::Create { key, .. }
            | EditOp::AddBlock { key, .. }
            | EditOp::Close { key, .. }
            | EditOp::Rm { key, .. }
            | EditOp::Rmr { key, .. } => key,
        }
    }

    /// Encodes the operation for proposal.
    pub fn encode(&self) -> Result<Vec<u8>, NnError> {
        bincode::serialize(self).map_err(|e| NnError::Codec(e.to_string()))
    }

    /// Decodes an agreed value back into an operation.
    pub fn decode(bytes: &[u8]) -> Result<Self, NnError> {
        bincode::deserialize(bytes).map_err(|e| NnError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let op = EditOp::Create {
            key: "L2EvYg==".into(),
            permission: 0o644,
            owner: "alice".into(),
            group: "users".into(),
            mtime: TimestampMs::new(99),
            blk_id: BlockId::new(1234),
            blk_size: 4096,
            blk_replication: 3,
            blk_seq: 1,
            total_blk: 2,
        };
        let decoded = EditOp::decode(&op.encode().unwrap()).unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn test_key_accessor() {
        let op = EditOp::Rm {
            key: "abc".into(),
            mtime: TimestampMs::ZERO,
        };
        assert_eq!(op.key(), "abc");
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(EditOp::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
