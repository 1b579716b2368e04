//! Inode records and their fixed on-disk image layout.
//!
//! One `InodeRecord` describes a file or directory. The image encoding is a
//! hand-written fixed layout (`IMAGE_RECORD_LEN` bytes, little-endian) so
//! every replica writes byte-identical records regardless of serializer
//! defaults; the fsimage is read back verbatim on startup.

use serde::{Deserialize, Serialize};

use crate::types::{BlockId, EntryState, InstanceId, NnError, TimestampMs};

/// Maximum block ids one file can hold.
pub const BLOCK_SLOTS: usize = 16;

/// Maximum encoded key length storable in an image record.
pub const MAX_KEY_LEN: usize = 256;

/// Maximum owner/group name length storable in an image record.
pub const MAX_NAME_LEN: usize = 32;

/// Exact byte length of one image record.
pub const IMAGE_RECORD_LEN: usize = 2
    + MAX_KEY_LEN
    + 1
    + MAX_NAME_LEN
    + 1
    + MAX_NAME_LEN
    + 8 // creation id
    + 2 // permission
    + 1 // flags
    + 8 // mtime
    + 8 // length
    + 2 // replication
    + 8 // blk_size
    + 4 // blk_seq
    + 4 // total_blk
    + 8 * BLOCK_SLOTS;

const FLAG_DIRECTORY: u8 = 0b0000_0001;
const FLAG_CREATING: u8 = 0b0000_0010;

/// Metadata record for one file or directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRecord {
    /// Encoded path key (unique within the namespace).
    pub key: String,
    /// Consensus instance id that created this entry.
    pub creation_id: InstanceId,
    /// Permission bits (octal, lower 9 bits used).
    pub permission: u16,
    /// Owner user name.
    pub owner: String,
    /// Owner group name.
    pub group: String,
    /// Last modification time.
    pub mtime: TimestampMs,
    /// True for directories.
    pub is_directory: bool,
    /// File length in bytes (0 for directories).
    pub length: u64,
    /// Replication factor requested at create time.
    pub replication: u16,
    /// Ordered block ids, bounded by `BLOCK_SLOTS`.
    pub blocks: Vec<BlockId>,
    /// Block size negotiated at create time.
    pub blk_size: u64,
    /// Multi-part upload sequence number (1-based).
    pub blk_seq: u32,
    /// Total parts declared for a multi-part upload.
    pub total_blk: u32,
    /// Creation state.
    pub state: EntryState,
}

impl InodeRecord {
    /// Creates a directory record.
    pub fn new_directory(
        key: impl Into<String>,
        permission: u16,
        owner: impl Into<String>,
        group: impl Into<String>,
        mtime: TimestampMs,
    ) -> Self {
        Self {
            key: key.into(),
            creation_id: InstanceId::ZERO,
            permission,
            owner: owner.into(),
            group: group.into(),
            mtime,
            is_directory: true,
            length: 0,
            replication: 0,
            blocks: Vec::new(),
            blk_size: 0,
            blk_seq: 0,
            total_blk: 0,
            state: EntryState::Ok,
        }
    }

    /// Creates a file record in CREATING state with its first block.
    #[allow(clippy::too_many_arguments)]
    pub fn new_file(
        key: impl Into<String>,
        permission: u16,
        owner: impl Into<String>,
        group: impl Into<String>,
        mtime: TimestampMs,
        first_block: BlockId,
        blk_size: u64,
        replication: u16,
        blk_seq: u32,
        total_blk: u32,
    ) -> Self {
        Self {
            key: key.into(),
            creation_id: InstanceId::ZERO,
            permission,
            owner: owner.into(),
            group: group.into(),
            mtime,
            is_directory: false,
            length: 0,
            replication,
            blocks: vec![first_block],
            blk_size,
            blk_seq,
            total_blk,
            state: EntryState::Creating,
        }
    }

    /// Appends a block id to the next empty slot.
    pub fn push_block(&mut self, id: BlockId) -> Result<(), NnError> {
        if self.blocks.len() >= BLOCK_SLOTS {
            return Err(NnError::Codec(format!(
                "block list full ({} slots)",
                BLOCK_SLOTS
            )));
        }
        self.blocks.push(id);
        Ok(())
    }

    /// Serializes this record into its fixed image layout.
    pub fn to_image_bytes(&self) -> Result<[u8; IMAGE_RECORD_LEN], NnError> {
        if self.key.len() > MAX_KEY_LEN {
            return Err(NnError::Codec(format!(
                "key length {} exceeds {}",
                self.key.len(),
                MAX_KEY_LEN
            )));
        }
        if self.owner.len() > MAX_NAME_LEN || self.group.len() > MAX_NAME_LEN {
            return Err(NnError::Codec("owner/group name too long".into()));
        }

        let mut buf = [0u8; IMAGE_RECORD_LEN];
        let mut off = 0usize;

        buf[off..off + 2].copy_from_slice(&(self.key.len() as u16).to_le_bytes());
        off += 2;
        buf[off..off + self.key.len()].copy_from_slice(self.key.as_bytes());
        off += MAX_KEY_LEN;

        buf[off] = self.owner.len() as u8;
        off += 1;
        buf[off..off + self.owner.len()].copy_from_slice(self.owner.as_bytes());
        off += MAX_NAME_LEN;

        buf[off] = self.group.len() as u8;
        off += 1;
        buf[off..off + self.group.len()].copy_from_slice(self.group.as_bytes());
        off += MAX_NAME_LEN;

        buf[off..off + 8].copy_from_slice(&self.creation_id.as_u64().to_le_bytes());
        off += 8;
        buf[off..off + 2].copy_from_slice(&self.permission.to_le_bytes());
        off += 2;

        let mut flags = 0u8;
        if self.is_directory {
            flags |= FLAG_DIRECTORY;
        }
        if self.state == EntryState::Creating {
            flags |= FLAG_CREATING;
        }
        buf[off] = flags;
        off += 1;

        buf[off..off + 8].copy_from_slice(&self.mtime.as_u64().to_le_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.length.to_le_bytes());
        off += 8;
        buf[off..off + 2].copy_from_slice(&self.replication.to_le_bytes());
        off += 2;
        buf[off..off + 8].copy_from_slice(&self.blk_size.to_le_bytes());
        off += 8;
        buf[off..off + 4].copy_from_slice(&self.blk_seq.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.total_blk.to_le_bytes());
        off += 4;

        for slot in 0..BLOCK_SLOTS {
            let id = self.blocks.get(slot).map(|b| b.as_u64()).unwrap_or(0);
            buf[off..off + 8].copy_from_slice(&id.to_le_bytes());
            off += 8;
        }
        debug_assert_eq!(off, IMAGE_RECORD_LEN);

        Ok(buf)
    }

    /// Deserializes a record from its fixed image layout.
    pub fn from_image_bytes(buf: &[u8]) -> Result<Self, NnError> {
        if buf.len() < IMAGE_RECORD_LEN {
            return Err(NnError::Codec(format!(
                "short image record: {} bytes",
                buf.len()
            )));
        }
        let mut off = 0usize;

        let read_u16 = |b: &[u8], o: usize| u16::from_le_bytes([b[o], b[o + 1]]);
        let read_u32 =
            |b: &[u8], o: usize| u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]]);
        let read_u64 = |b: &[u8], o: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&b[o..o + 8]);
            u64::from_le_bytes(raw)
        };
        let read_str = |b: &[u8], o: usize, len: usize| -> Result<String, NnError> {
            String::from_utf8(b[o..o + len].to_vec())
                .map_err(|e| NnError::Codec(format!("bad image string: {}", e)))
        };

        let key_len = read_u16(buf, off) as usize;
        off += 2;
        if key_len > MAX_KEY_LEN {
            return Err(NnError::Codec(format!("bad key length {}", key_len)));
        }
        let key = read_str(buf, off, key_len)?;
        off += MAX_KEY_LEN;

        let owner_len = buf[off] as usize;
        off += 1;
        if owner_len > MAX_NAME_LEN {
            return Err(NnError::Codec(format!("bad owner length {}", owner_len)));
        }
        let owner = read_str(buf, off, owner_len)?;
        off += MAX_NAME_LEN;

        let group_len = buf[off] as usize;
        off += 1;
        if group_len > MAX_NAME_LEN {
            return Err(NnError::Codec(format!("bad group length {}", group_len)));
        }
        let group = read_str(buf, off, group_len)?;
        off += MAX_NAME_LEN;

        let creation_id = InstanceId::new(read_u64(buf, off));
        off += 8;
        let permission = read_u16(buf, off);
        off += 2;
        let flags = buf[off];
        off += 1;
        let mtime = TimestampMs::new(read_u64(buf, off));
        off += 8;
        let length = read_u64(buf, off);
        off += 8;
        let replication = read_u16(buf, off);
        off += 2;
        let blk_size = read_u64(buf, off);
        off += 8;
        let blk_seq = read_u32(buf, off);
        off += 4;
        let total_blk = read_u32(buf, off);
        off += 4;

        let mut blocks = Vec::new();
        for _ in 0..BLOCK_SLOTS {
            let raw = read_u64(buf, off);
            off += 8;
            if raw != 0 {
                blocks.push(BlockId::new(raw));
            }
        }
        debug_assert_eq!(off, IMAGE_RECORD_LEN);

        Ok(Self {
            key,
            creation_id,
            permission,
            owner,
            group,
            mtime,
            is_directory: flags & FLAG_DIRECTORY != 0,
            length,
            replication,
            blocks,
            blk_size,
            blk_seq,
            total_blk,
            state: if flags & FLAG_CREATING != 0 {
                EntryState::Creating
            } else {
                EntryState::Ok
            },
        })
    }
}
