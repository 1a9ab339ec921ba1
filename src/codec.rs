//! Marshals a [`Ztoc`] to and from a versioned, schema-described binary
//! container. The layout is fixed: magic, an explicit schema-version tag,
//! a table-of-offsets prologue, then the TOC block and the compression
//! block described in the data model.
//!
//! A generated flatbuffers schema would cover the same shape (magic,
//! version tag, offset prologue, typed fixed-order fields), but without
//! the `.fbs` schema and `flatc` compiler on hand this container is
//! hand-rolled instead. See DESIGN.md for the exact byte layout.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::{
    CompressionAlgorithm, CompressionInfo, Descriptor, EntryKind, FileMetadata, Ztoc,
    ZTOC_MEDIA_TYPE, ZTOC_SCHEMA_VERSION,
};

const MAGIC: &[u8; 4] = b"ZTOC";
const SCHEMA_VERSION: u16 = 1;
const HEADER_FIXED_LEN: usize = 4 + 2 + 2 + 8 + 8 + 8 + 8 + 8 + 8 + 8;

/// Serializes `ztoc` and returns the bytes together with their content
/// descriptor. Deterministic: the same `ztoc` value always serializes to
/// the same bytes, hence the same digest.
pub fn marshal(ztoc: &Ztoc) -> Result<(Vec<u8>, Descriptor)> {
    let mut w = Writer::default();

    let version_bytes = ztoc.version.as_bytes();
    let build_tool_bytes = ztoc.build_tool_id.as_bytes();
    let header_extra_len = 2 + version_bytes.len() + 2 + build_tool_bytes.len();

    let toc_block = encode_toc(&ztoc.toc)?;
    let compression_block = encode_compression_info(&ztoc.compression_info);

    let toc_offset = (HEADER_FIXED_LEN + header_extra_len) as u64;
    let toc_len = toc_block.len() as u64;
    let compression_offset = toc_offset + toc_len;
    let compression_len = compression_block.len() as u64;
    let total_len = compression_offset + compression_len;

    w.bytes(MAGIC);
    w.u16(SCHEMA_VERSION);
    w.u16(0); // reserved
    w.u64(total_len);
    w.u64(toc_offset);
    w.u64(toc_len);
    w.u64(compression_offset);
    w.u64(compression_len);
    w.u64(ztoc.compressed_archive_size);
    w.u64(ztoc.uncompressed_archive_size);
    w.string(&ztoc.version);
    w.string(&ztoc.build_tool_id);
    w.bytes(&toc_block);
    w.bytes(&compression_block);

    let bytes = w.into_inner();
    debug_assert_eq!(bytes.len() as u64, total_len);

    let digest = Sha256::digest(&bytes);
    let descriptor = Descriptor {
        media_type: ZTOC_MEDIA_TYPE.to_string(),
        digest: format!("sha256:{digest:x}"),
        size: bytes.len() as u64,
    };

    Ok((bytes, descriptor))
}

/// Deserializes a ztoc from `data`. Never panics, including on uniformly
/// random input: every read is bounds-checked and yields `Truncated` or
/// `Corrupt` instead of indexing out of range.
pub fn unmarshal(data: &[u8]) -> Result<Ztoc> {
    let mut r = Reader::new(data);

    let magic = r.bytes(4)?;
    if magic != MAGIC {
        return Err(Error::Corrupt("bad magic".into()));
    }
    let schema_version = r.u16()?;
    if schema_version != SCHEMA_VERSION {
        return Err(Error::SchemaVersion(format!(
            "unknown ztoc schema version {schema_version}"
        )));
    }
    let _reserved = r.u16()?;
    let total_len = r.u64()?;
    if total_len as usize != data.len() {
        return Err(Error::Corrupt(format!(
            "declared length {} does not match buffer length {}",
            total_len,
            data.len()
        )));
    }
    let toc_offset = r.u64()?;
    let toc_len = r.u64()?;
    let compression_offset = r.u64()?;
    let compression_len = r.u64()?;
    let compressed_archive_size = r.u64()?;
    let uncompressed_archive_size = r.u64()?;
    let version = r.string()?;
    if version != ZTOC_SCHEMA_VERSION {
        return Err(Error::SchemaVersion(format!(
            "unknown ztoc version tag {version:?}"
        )));
    }
    let build_tool_id = r.string()?;

    let toc_block = slice_block(data, toc_offset, toc_len)?;
    let compression_block = slice_block(data, compression_offset, compression_len)?;

    let toc = decode_toc(toc_block)?;
    let compression_info = decode_compression_info(compression_block)?;

    Ok(Ztoc {
        version,
        build_tool_id,
        compressed_archive_size,
        uncompressed_archive_size,
        toc,
        compression_info,
    })
}

fn slice_block(data: &[u8], offset: u64, len: u64) -> Result<&[u8]> {
    let offset = usize::try_from(offset).map_err(|_| Error::Corrupt("block offset overflow".into()))?;
    let len = usize::try_from(len).map_err(|_| Error::Corrupt("block length overflow".into()))?;
    let end = offset
        .checked_add(len)
        .ok_or_else(|| Error::Corrupt("block end overflow".into()))?;
    data.get(offset..end)
        .ok_or_else(|| Error::Truncated("block extends past end of buffer".into()))
}

fn encode_toc(entries: &[FileMetadata]) -> Result<Vec<u8>> {
    let mut w = Writer::default();
    w.u32(entries.len() as u32);
    for entry in entries {
        encode_file_metadata(&mut w, entry)?;
    }
    Ok(w.into_inner())
}

fn encode_file_metadata(w: &mut Writer, entry: &FileMetadata) -> Result<()> {
    let name = path_to_str(&entry.name)?;
    w.string(name);
    w.u8(entry.kind.tag());
    w.u64(entry.uncompressed_offset);
    w.u64(entry.uncompressed_size);

    w.option_string(entry.linkname.as_deref().map(path_to_str).transpose()?);
    w.u32(entry.mode);
    w.u64(entry.uid);
    w.u64(entry.gid);
    w.option_string(entry.uname.as_deref());
    w.option_string(entry.gname.as_deref());
    w.option_u32(entry.devmajor);
    w.option_u32(entry.devminor);
    w.i64(entry.modtime.and_utc().timestamp());
    w.u32(entry.modtime.and_utc().timestamp_subsec_nanos());

    w.u32(entry.xattrs.len() as u32);
    for (key, value) in &entry.xattrs {
        w.string(key);
        w.string(value);
    }
    Ok(())
}

fn decode_toc(data: &[u8]) -> Result<Vec<FileMetadata>> {
    let mut r = Reader::new(data);
    let count = r.u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(decode_file_metadata(&mut r)?);
    }
    Ok(out)
}

fn decode_file_metadata(r: &mut Reader) -> Result<FileMetadata> {
    let name = PathBuf::from(r.string()?);
    let kind = EntryKind::from_tag(r.u8()?)?;
    let uncompressed_offset = r.u64()?;
    let uncompressed_size = r.u64()?;
    let linkname = r.option_string()?.map(PathBuf::from);
    let mode = r.u32()?;
    let uid = r.u64()?;
    let gid = r.u64()?;
    let uname = r.option_string()?;
    let gname = r.option_string()?;
    let devmajor = r.option_u32()?;
    let devminor = r.option_u32()?;
    let secs = r.i64()?;
    let nanos = r.u32()?;
    let modtime = chrono::NaiveDateTime::from_timestamp_opt(secs, nanos)
        .ok_or_else(|| Error::Corrupt("modtime out of range".into()))?;

    let xattr_count = r.u32()?;
    let mut xattrs = Vec::with_capacity(xattr_count as usize);
    for _ in 0..xattr_count {
        let key = r.string()?;
        let value = r.string()?;
        xattrs.push((key, value));
    }

    Ok(FileMetadata {
        name,
        kind,
        uncompressed_offset,
        uncompressed_size,
        linkname,
        mode,
        uid,
        gid,
        uname,
        gname,
        devmajor,
        devminor,
        modtime,
        xattrs,
    })
}

fn encode_compression_info(info: &CompressionInfo) -> Vec<u8> {
    let mut w = Writer::default();
    w.u64(info.span_size);
    w.u32(info.max_span_id);
    w.u8(info.compression_algorithm.tag());
    w.u64(info.checkpoints.len() as u64);
    w.bytes(&info.checkpoints);
    w.into_inner()
}

fn decode_compression_info(data: &[u8]) -> Result<CompressionInfo> {
    let mut r = Reader::new(data);
    let span_size = r.u64()?;
    let max_span_id = r.u32()?;
    let compression_algorithm = CompressionAlgorithm::from_tag(r.u8()?)?;
    let checkpoints_len = r.u64()?;
    let checkpoints = r
        .bytes(usize::try_from(checkpoints_len).map_err(|_| Error::Corrupt("checkpoints length overflow".into()))?)?
        .to_vec();
    Ok(CompressionInfo {
        span_size,
        max_span_id,
        compression_algorithm,
        checkpoints,
    })
}

fn path_to_str(path: &std::path::Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::Corrupt(format!("non-UTF-8 path {path:?}")))
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn string(&mut self, s: &str) {
        self.u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }
    fn option_string(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.u8(1);
                self.string(s);
            }
            None => self.u8(0),
        }
    }
    fn option_u32(&mut self, v: Option<u32>) {
        match v {
            Some(v) => {
                self.u8(1);
                self.u32(v);
            }
            None => self.u8(0),
        }
    }
    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| Error::Corrupt("length overflow".into()))?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| Error::Truncated("unexpected end of ztoc buffer".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }
    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }
    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }
    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }
    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }
    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::Corrupt("invalid UTF-8 string".into()))
    }
    fn option_string(&mut self) -> Result<Option<String>> {
        if self.u8()? == 0 {
            Ok(None)
        } else {
            Ok(Some(self.string()?))
        }
    }
    fn option_u32(&mut self) -> Result<Option<u32>> {
        if self.u8()? == 0 {
            Ok(None)
        } else {
            Ok(Some(self.u32()?))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::EntryKind;
    use chrono::NaiveDateTime;

    fn sample_ztoc() -> Ztoc {
        Ztoc {
            version: ZTOC_SCHEMA_VERSION.to_string(),
            build_tool_id: "test".to_string(),
            compressed_archive_size: 100,
            uncompressed_archive_size: 200,
            toc: vec![FileMetadata {
                name: PathBuf::from("a/b.txt"),
                kind: EntryKind::Regular,
                uncompressed_offset: 0,
                uncompressed_size: 200,
                linkname: None,
                mode: 0o644,
                uid: 1000,
                gid: 1000,
                uname: Some("me".into()),
                gname: None,
                devmajor: None,
                devminor: None,
                modtime: NaiveDateTime::from_timestamp_opt(1_700_000_000, 123).unwrap(),
                xattrs: vec![("user.foo".into(), "bar".into())],
            }],
            compression_info: CompressionInfo {
                span_size: 4096,
                max_span_id: 0,
                compression_algorithm: CompressionAlgorithm::Gzip,
                checkpoints: vec![1, 2, 3, 4, 5],
            },
        }
    }

    #[test]
    fn test_round_trip() {
        let ztoc = sample_ztoc();
        let (bytes, _descriptor) = marshal(&ztoc).unwrap();
        let decoded = unmarshal(&bytes).unwrap();
        assert_eq!(ztoc, decoded);
    }

    #[test]
    fn test_digest_is_deterministic() {
        let ztoc = sample_ztoc();
        let (_, d1) = marshal(&ztoc).unwrap();
        let (_, d2) = marshal(&ztoc).unwrap();
        assert_eq!(d1, d2);
    }

    #[test]
    fn test_unknown_schema_version_is_rejected() {
        let ztoc = sample_ztoc();
        let (mut bytes, _) = marshal(&ztoc).unwrap();
        bytes[4] = 0xff;
        bytes[5] = 0xff;
        let err = unmarshal(&bytes).unwrap_err();
        assert!(matches!(err, Error::SchemaVersion(_)));
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let ztoc = sample_ztoc();
        let (mut bytes, _) = marshal(&ztoc).unwrap();
        bytes[0] = b'X';
        let err = unmarshal(&bytes).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_garbage_never_panics() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        for seed in 0..50u64 {
            let mut state = DefaultHasher::new();
            seed.hash(&mut state);
            let mut h = state.finish();
            let mut garbage = Vec::with_capacity(50_000);
            while garbage.len() < 50_000 {
                h = h.wrapping_mul(6364136223846793005).wrapping_add(1);
                garbage.extend_from_slice(&h.to_le_bytes());
            }
            let result = unmarshal(&garbage);
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_truncated_buffer_is_truncated_or_corrupt() {
        let ztoc = sample_ztoc();
        let (bytes, _) = marshal(&ztoc).unwrap();
        for cut in [0usize, 1, 4, 10, 40, bytes.len() / 2] {
            let err = unmarshal(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, Error::Truncated(_) | Error::Corrupt(_)));
        }
    }
}
