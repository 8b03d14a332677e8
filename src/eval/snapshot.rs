//! Binary checkpoint format for feature evaluation progress.
//!
//! A snapshot is a 32-byte header followed by a Postcard-encoded
//! [`Snapshot`] payload:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Header (32 bytes)                        │
//! ├────────────────────────────────────────────────────────────┤
//! │                    Payload (variable)                       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Files are replaced atomically: the new snapshot is written to a temporary
//! file in the target directory and renamed over the old one, so a crash
//! mid-write leaves the previous snapshot intact.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::callbacks::ProgressMarker;
use super::options::FeatureEvalOptions;
use super::summary::FeatureEvaluationSummary;

/// Magic bytes identifying a feature evaluation snapshot.
pub const MAGIC: &[u8; 4] = b"BEVS";

/// Current format version (major).
pub const CURRENT_VERSION_MAJOR: u8 = 1;

/// Current format version (minor).
pub const CURRENT_VERSION_MINOR: u8 = 0;

/// Size of the snapshot header in bytes.
pub const HEADER_SIZE: usize = 32;

/// Bitfield flags describing the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotFlags(u16);

impl SnapshotFlags {
    /// Payload carries a progress marker.
    pub const HAS_MARKER: u16 = 1 << 0;
    /// Summary holds at least one testing result.
    pub const HAS_TESTING: u16 = 1 << 1;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }

    pub fn set(&mut self, flag: u16) {
        self.0 |= flag;
    }
}

/// 32-byte snapshot header.
///
/// # Layout
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     Magic ("BEVS")
/// 4       1     Version major
/// 5       1     Version minor
/// 6       2     Reserved
/// 8       2     Flags (bitfield)
/// 10      2     Reserved
/// 12      4     Payload size (bytes)
/// 16      4     CRC32 checksum of payload
/// 20      4     Number of feature sets
/// 24      4     Number of metrics
/// 28      4     Reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub flags: SnapshotFlags,
    pub payload_size: u32,
    pub checksum: u32,
    /// Number of feature sets in the summary.
    pub n_feature_sets: u32,
    /// Number of metrics tracked by the summary.
    pub n_metrics: u32,
}

impl SnapshotHeader {
    /// Create a header with the current version.
    pub fn new(n_feature_sets: u32, n_metrics: u32) -> Self {
        Self {
            version_major: CURRENT_VERSION_MAJOR,
            version_minor: CURRENT_VERSION_MINOR,
            flags: SnapshotFlags::empty(),
            payload_size: 0,
            checksum: 0,
            n_feature_sets,
            n_metrics,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version_major;
        buf[5] = self.version_minor;
        buf[8..10].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        buf[20..24].copy_from_slice(&self.n_feature_sets.to_le_bytes());
        buf[24..28].copy_from_slice(&self.n_metrics.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self, SnapshotError> {
        if &buf[0..4] != MAGIC {
            return Err(SnapshotError::NotASnapshot);
        }

        let version_major = buf[4];
        let version_minor = buf[5];
        if version_major != CURRENT_VERSION_MAJOR {
            return Err(SnapshotError::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            });
        }

        let read_u32 = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        Ok(Self {
            version_major,
            version_minor,
            flags: SnapshotFlags::from_bits(u16::from_le_bytes([buf[8], buf[9]])),
            payload_size: read_u32(12),
            checksum: read_u32(16),
            n_feature_sets: read_u32(20),
            n_metrics: read_u32(24),
        })
    }
}

/// Errors raised while writing or reading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// File does not start with the snapshot magic.
    #[error("not a feature evaluation snapshot")]
    NotASnapshot,

    #[error("snapshot format {major}.{minor} is not supported")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("snapshot truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Header fields disagree with the decoded payload.
    #[error("snapshot header {field} is {header}, payload has {payload}")]
    HeaderMismatch {
        field: &'static str,
        header: u32,
        payload: u32,
    },

    #[error("encoding error: {0}")]
    Encoding(#[source] postcard::Error),

    #[error("decoding error: {0}")]
    Decoding(#[source] postcard::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to resume an interrupted evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub summary: FeatureEvaluationSummary,
    /// Last completed `(fold_range_begin, feature_set_idx, is_test, fold_idx)`.
    pub marker: Option<ProgressMarker>,
    /// Options the snapshot was produced with.
    pub options: FeatureEvalOptions,
}

impl Snapshot {
    pub fn as_ref(&self) -> SnapshotRef<'_> {
        SnapshotRef {
            summary: &self.summary,
            marker: self.marker,
            options: &self.options,
        }
    }
}

/// Borrowed form of [`Snapshot`]; encodes to the same bytes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SnapshotRef<'a> {
    pub summary: &'a FeatureEvaluationSummary,
    pub marker: Option<ProgressMarker>,
    pub options: &'a FeatureEvalOptions,
}

impl SnapshotRef<'_> {
    fn header(&self) -> SnapshotHeader {
        let mut header = SnapshotHeader::new(
            self.summary.feature_sets().len() as u32,
            self.summary.metric_names().len() as u32,
        );
        if self.marker.is_some() {
            header.flags.set(SnapshotFlags::HAS_MARKER);
        }
        if self.summary.has_testing_results() {
            header.flags.set(SnapshotFlags::HAS_TESTING);
        }
        header
    }
}

/// Write header and payload to a writer, filling in size and checksum.
pub fn write_to<W: Write>(
    writer: &mut W,
    header: &mut SnapshotHeader,
    payload: &[u8],
) -> Result<(), SnapshotError> {
    header.payload_size = payload.len() as u32;
    header.checksum = crc32fast::hash(payload);
    writer.write_all(&header.to_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Read and verify header and payload from a reader.
pub fn read_from<R: Read>(reader: &mut R) -> Result<(SnapshotHeader, Vec<u8>), SnapshotError> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SnapshotError::Truncated {
                expected: HEADER_SIZE,
                actual: 0,
            }
        } else {
            SnapshotError::Io(e)
        }
    })?;

    let header = SnapshotHeader::from_bytes(&header_buf)?;

    let expected = header.payload_size as usize;
    let mut payload = Vec::with_capacity(expected);
    reader
        .take(expected as u64)
        .read_to_end(&mut payload)?;
    if payload.len() != expected {
        return Err(SnapshotError::Truncated {
            expected,
            actual: payload.len(),
        });
    }

    let actual = crc32fast::hash(&payload);
    if actual != header.checksum {
        return Err(SnapshotError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    Ok((header, payload))
}

/// Encode a snapshot to bytes with header.
pub fn encode(snapshot: SnapshotRef<'_>) -> Result<Vec<u8>, SnapshotError> {
    let payload = postcard::to_allocvec(&snapshot).map_err(SnapshotError::Encoding)?;
    let mut header = snapshot.header();
    let mut output = Vec::with_capacity(HEADER_SIZE + payload.len());
    write_to(&mut output, &mut header, &payload)?;
    Ok(output)
}

/// Decode a snapshot produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
    let mut reader = bytes;
    let (header, payload) = read_from(&mut reader)?;
    decode_payload(&header, &payload)
}

/// Decode the payload and check it against the header it was written with.
fn decode_payload(header: &SnapshotHeader, payload: &[u8]) -> Result<Snapshot, SnapshotError> {
    let snapshot: Snapshot = postcard::from_bytes(payload).map_err(SnapshotError::Decoding)?;
    let expected = snapshot.as_ref().header();
    let fields = [
        ("feature set count", header.n_feature_sets, expected.n_feature_sets),
        ("metric count", header.n_metrics, expected.n_metrics),
        ("flags", u32::from(header.flags.bits()), u32::from(expected.flags.bits())),
    ];
    for (field, header, payload) in fields {
        if header != payload {
            return Err(SnapshotError::HeaderMismatch { field, header, payload });
        }
    }
    Ok(snapshot)
}

/// Atomically replace the snapshot at `path`.
pub fn save_snapshot(path: &Path, snapshot: SnapshotRef<'_>) -> Result<(), SnapshotError> {
    let bytes = encode(snapshot)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| SnapshotError::Io(e.error))?;
    Ok(())
}

/// Read the snapshot at `path`.
pub fn load_snapshot(path: &Path) -> Result<Snapshot, SnapshotError> {
    let mut reader = BufReader::new(File::open(path)?);
    let (header, payload) = read_from(&mut reader)?;
    decode_payload(&header, &payload)
}
