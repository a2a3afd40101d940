//! `.shard` binary file format
//!
//! One shard holds the encoded numberings and source ids of a slice of one
//! (chain, species, partition) bucket.
//!
//! # File Structure
//!
//! ```text
//! Offset   Size    Type        Description
//! ─────────────────────────────────────────────────
//! 0x00     8       [u8; 8]     Magic: "ABSHARD1"
//! 0x08     4       u32 LE      Version (1)
//! 0x0C     4       u32 LE      Width (200)
//! 0x10     8       u64 LE      T: record count
//! 0x18     8       u64 LE      Compressed length of numberings section
//! 0x20     8       u64 LE      Compressed length of idxs section
//! 0x28     32      [u8; 32]    SHA-256 of uncompressed numberings || idxs
//! 0x48     8       [u8; 8]     Reserved (zero)
//! ─────────────────────────────────────────────────
//! 0x50     ..      zstd        numberings: T × 200 i8
//!          ..      zstd        idxs: T × (file_id i32 LE, line i32 LE)
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::encoding::EncodedSequence;
use crate::numbering::CANONICAL_WIDTH;

/// Magic bytes identifying a shard file: "ABSHARD1"
pub const MAGIC: [u8; 8] = *b"ABSHARD1";

pub const FORMAT_VERSION: u32 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 80;

/// Bytes per source id record
const ID_RECORD_SIZE: usize = 8;

pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("Invalid shard magic bytes: expected ABSHARD1")]
    InvalidMagic,

    #[error("Unsupported shard version: {0}")]
    UnsupportedVersion(u32),

    #[error("Width mismatch: expected {expected}, got {actual}")]
    WidthMismatch { expected: u32, actual: u32 },

    #[error("Shard truncated: need {expected} bytes, have {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("Section {section} has {actual} bytes, expected {expected}")]
    LengthMismatch {
        section: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("Shard checksum mismatch")]
    ChecksumMismatch,

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Loader worker for {path:?} exited without a result")]
    LoaderDisconnected { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Provenance of a stored record: source file id and line within that file.
///
/// Ordered by file id, then line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId {
    pub file_id: i32,
    pub line: i32,
}

impl SourceId {
    pub const fn new(file_id: i32, line: i32) -> Self {
        Self { file_id, line }
    }
}

/// Decoded shard: parallel numberings and ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardData {
    numberings: Vec<EncodedSequence>,
    ids: Vec<SourceId>,
}

impl ShardData {
    pub fn new(numberings: Vec<EncodedSequence>, ids: Vec<SourceId>) -> Result<Self, ShardError> {
        if numberings.len() != ids.len() {
            return Err(ShardError::LengthMismatch {
                section: "idxs",
                expected: numberings.len() as u64,
                actual: ids.len() as u64,
            });
        }
        Ok(Self { numberings, ids })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.numberings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.numberings.is_empty()
    }

    pub fn numberings(&self) -> &[EncodedSequence] {
        &self.numberings
    }

    pub fn ids(&self) -> &[SourceId] {
        &self.ids
    }
}

/// Parsed shard header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShardHeader {
    pub version: u32,
    pub width: u32,
    pub count: u64,
    pub numberings_len: u64,
    pub idxs_len: u64,
    #[serde(skip)]
    pub checksum: [u8; 32],
}

impl ShardHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShardError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ShardError::Truncated {
                expected: HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        if bytes[0..8] != MAGIC {
            return Err(ShardError::InvalidMagic);
        }

        let version = read_u32(bytes, 8);
        if version != FORMAT_VERSION {
            return Err(ShardError::UnsupportedVersion(version));
        }

        let width = read_u32(bytes, 12);
        if width as usize != CANONICAL_WIDTH {
            return Err(ShardError::WidthMismatch {
                expected: CANONICAL_WIDTH as u32,
                actual: width,
            });
        }

        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&bytes[40..72]);

        Ok(Self {
            version,
            width,
            count: read_u64(bytes, 16),
            numberings_len: read_u64(bytes, 24),
            idxs_len: read_u64(bytes, 32),
            checksum,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.width.to_le_bytes());
        buf[16..24].copy_from_slice(&self.count.to_le_bytes());
        buf[24..32].copy_from_slice(&self.numberings_len.to_le_bytes());
        buf[32..40].copy_from_slice(&self.idxs_len.to_le_bytes());
        buf[40..72].copy_from_slice(&self.checksum);
        // bytes 72..80 are reserved (zero)
        buf
    }

    /// Total file size implied by the header.
    pub fn file_len(&self) -> Option<u64> {
        (HEADER_SIZE as u64)
            .checked_add(self.numberings_len)?
            .checked_add(self.idxs_len)
    }
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

#[inline]
fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

#[inline]
fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_le_bytes(buf)
}

fn checksum(numberings: &[u8], idxs: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(numberings);
    hasher.update(idxs);
    hasher.finalize().into()
}

/// Streams records into a new shard file.
///
/// Records are buffered in memory and written in one pass by [`finish`],
/// through a temporary sibling that is renamed into place.
///
/// [`finish`]: ShardWriter::finish
pub struct ShardWriter {
    path: PathBuf,
    numberings: Vec<u8>,
    idxs: Vec<u8>,
    count: u64,
    level: i32,
}

impl ShardWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_level(path, DEFAULT_ZSTD_LEVEL)
    }

    pub fn with_level<P: AsRef<Path>>(path: P, level: i32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            numberings: Vec::new(),
            idxs: Vec::new(),
            count: 0,
            level,
        }
    }

    pub fn push(&mut self, sequence: &EncodedSequence, id: SourceId) {
        let codes: &[i8] = sequence.codes();
        self.numberings.extend_from_slice(bytemuck::cast_slice(codes));
        self.idxs.extend_from_slice(&id.file_id.to_le_bytes());
        self.idxs.extend_from_slice(&id.line.to_le_bytes());
        self.count += 1;
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compress, checksum and persist. Returns the number of records written.
    pub fn finish(self) -> Result<u64, ShardError> {
        let digest = checksum(&self.numberings, &self.idxs);
        let numberings = zstd::encode_all(self.numberings.as_slice(), self.level)
            .map_err(|e| ShardError::Compression(e.to_string()))?;
        let idxs = zstd::encode_all(self.idxs.as_slice(), self.level)
            .map_err(|e| ShardError::Compression(e.to_string()))?;

        let header = ShardHeader {
            version: FORMAT_VERSION,
            width: CANONICAL_WIDTH as u32,
            count: self.count,
            numberings_len: numberings.len() as u64,
            idxs_len: idxs.len() as u64,
            checksum: digest,
        };

        let tmp_path = tmp_sibling(&self.path);
        let written = (|| -> Result<(), ShardError> {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(&header.to_bytes())?;
            writer.write_all(&numberings)?;
            writer.write_all(&idxs)?;
            writer.flush()?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &self.path)?;
            Ok(())
        })();

        if let Err(err) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(err);
        }

        tracing::debug!(
            "wrote shard {:?}: {} records, {} compressed bytes",
            self.path,
            self.count,
            header.file_len().unwrap_or_default()
        );
        Ok(self.count)
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write a complete shard in one call.
pub fn write_shard<P: AsRef<Path>>(path: P, data: &ShardData, level: i32) -> Result<u64, ShardError> {
    let mut writer = ShardWriter::with_level(path, level);
    for (sequence, id) in data.numberings().iter().zip(data.ids()) {
        writer.push(sequence, *id);
    }
    writer.finish()
}

/// Output bound of one zstd byte: a 4-byte RLE block expands to at most 128 KiB.
const MAX_ZSTD_RATIO: u64 = 1 << 15;

/// Decompress one section into exactly `expected` bytes.
///
/// The header's record count is checked against the section size before
/// anything is allocated, and the output buffer never grows past `expected`.
fn decompress_section(
    section: &'static str,
    compressed: &[u8],
    expected: u64,
) -> Result<Vec<u8>, ShardError> {
    let bound = (compressed.len() as u64).saturating_mul(MAX_ZSTD_RATIO);
    if expected > bound {
        return Err(ShardError::LengthMismatch {
            section,
            expected,
            actual: bound,
        });
    }
    let capacity = usize::try_from(expected).map_err(|_| ShardError::LengthMismatch {
        section,
        expected,
        actual: usize::MAX as u64,
    })?;

    let out = zstd::bulk::decompress(compressed, capacity)
        .map_err(|e| ShardError::Compression(format!("{section}: {e}")))?;
    if out.len() as u64 != expected {
        return Err(ShardError::LengthMismatch {
            section,
            expected,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

/// Decode a shard from its raw bytes, verifying every section.
pub fn read_shard_bytes(bytes: &[u8]) -> Result<ShardData, ShardError> {
    let header = ShardHeader::from_bytes(bytes)?;

    let numberings_end = (HEADER_SIZE as u64)
        .checked_add(header.numberings_len)
        .ok_or(ShardError::Truncated {
            expected: u64::MAX,
            actual: bytes.len() as u64,
        })?;
    let file_len = header.file_len().ok_or(ShardError::Truncated {
        expected: u64::MAX,
        actual: bytes.len() as u64,
    })?;
    if (bytes.len() as u64) < file_len {
        return Err(ShardError::Truncated {
            expected: file_len,
            actual: bytes.len() as u64,
        });
    }

    let numberings_section = &bytes[HEADER_SIZE..numberings_end as usize];
    let idxs_section = &bytes[numberings_end as usize..file_len as usize];

    let numberings = decompress_section(
        "numberings",
        numberings_section,
        header.count.saturating_mul(CANONICAL_WIDTH as u64),
    )?;
    let idxs = decompress_section(
        "idxs",
        idxs_section,
        header.count.saturating_mul(ID_RECORD_SIZE as u64),
    )?;

    if checksum(&numberings, &idxs) != header.checksum {
        return Err(ShardError::ChecksumMismatch);
    }

    let sequences = numberings
        .chunks_exact(CANONICAL_WIDTH)
        .map(|chunk| {
            let codes: &[i8] = bytemuck::cast_slice(chunk);
            EncodedSequence::from_codes(codes).map_err(|_| ShardError::WidthMismatch {
                expected: CANONICAL_WIDTH as u32,
                actual: codes.len() as u32,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ids = idxs
        .chunks_exact(ID_RECORD_SIZE)
        .map(|chunk| SourceId::new(read_i32(chunk, 0), read_i32(chunk, 4)))
        .collect();

    ShardData::new(sequences, ids)
}

/// Map and decode a shard file.
pub fn read_shard<P: AsRef<Path>>(path: P) -> Result<ShardData, ShardError> {
    let file = File::open(path.as_ref())?;
    let len = file.metadata()?.len();
    if len < HEADER_SIZE as u64 {
        return Err(ShardError::Truncated {
            expected: HEADER_SIZE as u64,
            actual: len,
        });
    }
    let mmap = unsafe { Mmap::map(&file)? };
    read_shard_bytes(&mmap)
}

/// Read only the header of a shard file.
pub fn read_shard_header<P: AsRef<Path>>(path: P) -> Result<ShardHeader, ShardError> {
    let file = File::open(path.as_ref())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE);
    file.take(HEADER_SIZE as u64).read_to_end(&mut buf)?;
    ShardHeader::from_bytes(&buf)
}
