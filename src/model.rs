//! The ztoc value type and its parts: [`Ztoc`], [`FileMetadata`], and
//! [`CompressionInfo`]. A `Ztoc` is a plain, immutable value — no I/O, no
//! interior mutability — once a builder or the codec hands one back.

use std::path::PathBuf;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};

pub const ZTOC_SCHEMA_VERSION: &str = "0.9";

/// The stable media type of a marshalled ztoc blob.
pub const ZTOC_MEDIA_TYPE: &str = "application/vnd.ztoc.v0+bin";

/// The media type of the enclosing index manifest that lists ztocs
/// alongside their layer descriptors. Defined by the image-artifact layer,
/// not interpreted here; the core only ever treats it as an inert string.
pub const ZTOC_INDEX_MEDIA_TYPE: &str = "application/vnd.ztoc.index.v0+json";

/// A `(media_type, digest, size)` triple identifying a blob by content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

/// The compressed-stream format a ztoc's checkpoints were built for.
///
/// Closed set for now, extensible: adding a variant and a matching arm in
/// [`crate::zinfo`] does not touch the on-disk schema, since `checkpoints`
/// stays an opaque blob (see invariant on [`CompressionInfo`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    Gzip,
}

impl CompressionAlgorithm {
    pub(crate) fn tag(self) -> u8 {
        match self {
            CompressionAlgorithm::Gzip => 0,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionAlgorithm::Gzip),
            other => Err(Error::Corrupt(format!(
                "unknown compression algorithm tag {other}"
            ))),
        }
    }
}

/// A tar entry's type, restricted to the closed set the format records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Hardlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Other,
}

impl EntryKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            EntryKind::Regular => 0,
            EntryKind::Directory => 1,
            EntryKind::Symlink => 2,
            EntryKind::Hardlink => 3,
            EntryKind::CharDevice => 4,
            EntryKind::BlockDevice => 5,
            EntryKind::Fifo => 6,
            EntryKind::Other => 7,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => EntryKind::Regular,
            1 => EntryKind::Directory,
            2 => EntryKind::Symlink,
            3 => EntryKind::Hardlink,
            4 => EntryKind::CharDevice,
            5 => EntryKind::BlockDevice,
            6 => EntryKind::Fifo,
            7 => EntryKind::Other,
            other => return Err(Error::Corrupt(format!("unknown entry kind tag {other}"))),
        })
    }
}

impl From<tar::EntryType> for EntryKind {
    fn from(ty: tar::EntryType) -> Self {
        match ty {
            tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::Regular,
            tar::EntryType::Directory => EntryKind::Directory,
            tar::EntryType::Symlink => EntryKind::Symlink,
            tar::EntryType::Link => EntryKind::Hardlink,
            tar::EntryType::Char => EntryKind::CharDevice,
            tar::EntryType::Block => EntryKind::BlockDevice,
            tar::EntryType::Fifo => EntryKind::Fifo,
            _ => EntryKind::Other,
        }
    }
}

/// One tar member's worth of metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub name: PathBuf,
    pub kind: EntryKind,
    pub uncompressed_offset: u64,
    pub uncompressed_size: u64,
    pub linkname: Option<PathBuf>,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub uname: Option<String>,
    pub gname: Option<String>,
    pub devmajor: Option<u32>,
    pub devminor: Option<u32>,
    pub modtime: NaiveDateTime,
    /// `(key, value)` pairs in the order the walker observed them in the
    /// tar's PAX records. Never reordered into a map: digest determinism
    /// depends on this staying input-observation order rather than hash
    /// order.
    pub xattrs: Vec<(String, String)>,
}

/// The random-access index over a layer's compressed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionInfo {
    pub span_size: u64,
    pub max_span_id: u32,
    pub compression_algorithm: CompressionAlgorithm,
    /// Algorithm-private. For gzip, an ordered sequence of fixed-size
    /// checkpoint records; see [`crate::zinfo::encode_checkpoints`].
    pub checkpoints: Vec<u8>,
}

/// The top-level ztoc value.
#[derive(Debug, Clone, PartialEq)]
pub struct Ztoc {
    pub version: String,
    pub build_tool_id: String,
    pub compressed_archive_size: u64,
    pub uncompressed_archive_size: u64,
    pub toc: Vec<FileMetadata>,
    pub compression_info: CompressionInfo,
}

impl Ztoc {
    /// Checks invariants 1 and 2: `toc` is non-decreasing by
    /// `uncompressed_offset`, and every entry fits within the declared
    /// archive size. The builder always calls this before returning a
    /// `Ztoc`; `unmarshal` does not call it automatically (untrusted input
    /// should call it explicitly — see DESIGN.md).
    pub fn validate(&self) -> Result<()> {
        let mut last_offset = 0u64;
        for (i, entry) in self.toc.iter().enumerate() {
            if i > 0 && entry.uncompressed_offset < last_offset {
                return Err(Error::Corrupt(format!(
                    "toc entry {} ({:?}) has offset {} before preceding offset {}",
                    i, entry.name, entry.uncompressed_offset, last_offset
                )));
            }
            last_offset = entry.uncompressed_offset;

            let end = entry
                .uncompressed_offset
                .checked_add(entry.uncompressed_size)
                .ok_or_else(|| {
                    Error::Corrupt(format!("toc entry {:?} size overflows u64", entry.name))
                })?;
            if end > self.uncompressed_archive_size {
                return Err(Error::Corrupt(format!(
                    "toc entry {:?} spans [{}, {}) past archive size {}",
                    entry.name, entry.uncompressed_offset, end, self.uncompressed_archive_size
                )));
            }
        }
        Ok(())
    }

    /// Borrowed view of the table of contents, per the external interface.
    pub fn toc(&self) -> &[FileMetadata] {
        &self.toc
    }

    /// Borrowed view of the compression index metadata.
    pub fn compression_info(&self) -> &CompressionInfo {
        &self.compression_info
    }
}
