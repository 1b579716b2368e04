//! On-disk image files: the fixed-record fsimage and the ckpid marker.
//!
//! An image directory holds two files: `fsimage`, a flat sequence of
//! [`IMAGE_RECORD_LEN`]-byte records in checkpoint order, and `ckpid`,
//! eight little-endian bytes naming the highest consensus instance the
//! image reflects. The byte layout is deterministic so replicas that
//! applied the same log produce identical images.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::inode::{InodeRecord, IMAGE_RECORD_LEN};
use crate::types::{InstanceId, NnError};

/// Name of the record file inside an image directory.
pub const IMAGE_FILE: &str = "fsimage";

/// Name of the checkpoint-instance marker file.
pub const CKPID_FILE: &str = "ckpid";

/// Writes `records` to `dir/fsimage`, creating the directory if needed.
pub fn write_image(dir: &Path, records: &[InodeRecord]) -> Result<(), NnError> {
    fs::create_dir_all(dir)?;
    let file = File::create(dir.join(IMAGE_FILE))?;
    let mut w = BufWriter::new(file);
    for rec in records {
        let bytes = rec.to_image_bytes()?;
        w.write_all(&bytes)?;
    }
    w.flush()?;
    w.into_inner()
        .map_err(|e| NnError::Io(e.into_error()))?
        .sync_all()?;
    Ok(())
}

/// Reads every record from `dir/fsimage`. A missing file yields an
/// empty namespace (first boot).
pub fn read_image(dir: &Path) -> Result<Vec<InodeRecord>, NnError> {
    let path = dir.join(IMAGE_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut r = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    let mut buf = [0u8; IMAGE_RECORD_LEN];
    loop {
        match r.read_exact(&mut buf) {
            Ok(()) => records.push(InodeRecord::from_image_bytes(&buf)?),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(records)
}

/// Writes the checkpoint instance marker to `dir/ckpid`.
pub fn write_ckpid(dir: &Path, instance: InstanceId) -> Result<(), NnError> {
    fs::create_dir_all(dir)?;
    let file = File::create(dir.join(CKPID_FILE))?;
    let mut w = BufWriter::new(file);
    w.write_all(&instance.as_u64().to_le_bytes())?;
    w.flush()?;
    w.into_inner()
        .map_err(|e| NnError::Io(e.into_error()))?
        .sync_all()?;
    Ok(())
}

/// Reads the checkpoint instance marker; a missing file reads as zero.
pub fn read_ckpid(dir: &Path) -> Result<InstanceId, NnError> {
    let path = dir.join(CKPID_FILE);
    if !path.exists() {
        return Ok(InstanceId::ZERO);
    }
    let mut buf = [0u8; 8];
    let mut r = File::open(path)?;
    r.read_exact(&mut buf)?;
    Ok(InstanceId::new(u64::from_le_bytes(buf)))
}
