//! On-disk snapshot format.
//!
//! ```text
//!   0..4    magic          b"TKSS" (little-endian u32)
//!   4..8    version
//!   8..16   flags          bit 0 = clean shutdown
//!   16..24  entry count
//!   24..32  body length
//!   32..64  SHA-256 of body
//!   64..    body           bincode Vec<(TokenScanKey, TokenScanValue)>
//! ```
//!
//! Snapshots are written to a temp file and renamed into place. The clean
//! flag alone can be rewritten in place.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tokenscan_index::{MapHeader, TokenScanKey, TokenScanValue};

use crate::error::{StorageError, StorageResult};

pub const MAGIC_NUMBER: u32 = u32::from_le_bytes(*b"TKSS");
pub const FORMAT_VERSION: u32 = 1;

pub mod flags {
    pub const CLEAN: u64 = 1 << 0;
}

pub type Entries = Vec<(TokenScanKey, TokenScanValue)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    pub flags: u64,
    pub entry_count: u64,
    pub body_len: u64,
    pub checksum: [u8; 32],
}

impl SnapshotHeader {
    pub const SIZE: usize = 64;

    pub fn new(state: MapHeader, entry_count: u64, body: &[u8]) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            version: FORMAT_VERSION,
            flags: 0,
            entry_count,
            body_len: body.len() as u64,
            checksum: checksum(body),
        }
        .with_state(state)
    }

    pub fn with_state(mut self, state: MapHeader) -> Self {
        match state {
            MapHeader::Clean => self.flags |= flags::CLEAN,
            MapHeader::Dirty => self.flags &= !flags::CLEAN,
        }
        self
    }

    pub fn state(&self) -> MapHeader {
        if self.flags & flags::CLEAN != 0 {
            MapHeader::Clean
        } else {
            MapHeader::Dirty
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC_NUMBER && self.version >= 1 && self.version <= FORMAT_VERSION
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&bytes[32..64]);
        Some(Self {
            magic: u32_at(0),
            version: u32_at(4),
            flags: u64_at(8),
            entry_count: u64_at(16),
            body_len: u64_at(24),
            checksum,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.flags.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.entry_count.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.body_len.to_le_bytes());
        bytes[32..64].copy_from_slice(&self.checksum);
        bytes
    }
}

fn checksum(body: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(body);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Read and verify a snapshot. Structural problems are reported as
/// `StorageError::Corrupt`; only genuine I/O failures surface as `Io`.
pub fn read_snapshot(path: &Path) -> StorageResult<(SnapshotHeader, Entries)> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let corrupt = |reason: String| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let header = SnapshotHeader::from_bytes(&bytes)
        .ok_or_else(|| corrupt(format!("file is {} bytes, shorter than the header", bytes.len())))?;
    if !header.is_valid() {
        return Err(corrupt(format!(
            "bad magic {:#x} or version {}",
            header.magic, header.version
        )));
    }
    let body = &bytes[SnapshotHeader::SIZE..];
    if body.len() as u64 != header.body_len {
        return Err(corrupt(format!(
            "body is {} bytes, header says {}",
            body.len(),
            header.body_len
        )));
    }
    if checksum(body) != header.checksum {
        return Err(corrupt("checksum mismatch".to_string()));
    }
    let entries: Entries =
        bincode::deserialize(body).map_err(|e| corrupt(format!("undecodable body: {e}")))?;
    if entries.len() as u64 != header.entry_count {
        return Err(corrupt(format!(
            "{} entries decoded, header says {}",
            entries.len(),
            header.entry_count
        )));
    }
    if entries.windows(2).any(|w| w[0].0 >= w[1].0) {
        return Err(corrupt("entries are not strictly sorted".to_string()));
    }
    Ok((header, entries))
}

/// Atomically replace `path` with a snapshot of `entries`.
pub fn write_snapshot(
    path: &Path,
    entries: &Entries,
    state: MapHeader,
) -> StorageResult<SnapshotHeader> {
    let body = bincode::serialize(entries)?;
    let header = SnapshotHeader::new(state, entries.len() as u64, &body);

    let tmp = path.with_extension("db.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(&body)?;
        file.sync_data()?;
    }
    fs::rename(&tmp, path)?;
    tracing::trace!(
        path = %path.display(),
        entries = entries.len(),
        bytes = body.len() + SnapshotHeader::SIZE,
        clean = state == MapHeader::Clean,
        "wrote token scan snapshot"
    );
    Ok(header)
}

/// Rewrite only the header of an existing snapshot.
pub fn write_header(path: &Path, header: &SnapshotHeader) -> StorageResult<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.to_bytes())?;
    file.sync_data()?;
    Ok(())
}
