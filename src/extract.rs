//! Given a ztoc and a random-access handle to the compressed layer,
//! returns the exact uncompressed bytes of any named file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::model::{EntryKind, FileMetadata, Ztoc};
use crate::source::ByteSource;
use crate::zinfo::{decode_checkpoints, extract as zinfo_extract};

/// A name-indexed view over a ztoc's table of contents, built lazily on
/// first use so that ztocs which are only ever walked sequentially never
/// pay for the index.
pub struct Extractor<'a> {
    ztoc: &'a Ztoc,
    by_name: OnceLock<HashMap<&'a Path, usize>>,
}

impl<'a> Extractor<'a> {
    pub fn new(ztoc: &'a Ztoc) -> Self {
        Self {
            ztoc,
            by_name: OnceLock::new(),
        }
    }

    fn index(&self) -> &HashMap<&'a Path, usize> {
        self.by_name.get_or_init(|| {
            self.ztoc
                .toc
                .iter()
                .enumerate()
                .map(|(i, e)| (e.name.as_path(), i))
                .collect()
        })
    }

    fn lookup(&self, name: &str) -> Result<&'a FileMetadata> {
        let idx = *self
            .index()
            .get(Path::new(name))
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(&self.ztoc.toc[idx])
    }

    /// Returns the full uncompressed bytes of the regular file `name`.
    pub fn extract_file(&self, src: &dyn ByteSource, name: &str, cancel: &CancelToken) -> Result<Vec<u8>> {
        let entry = self.lookup(name)?;
        self.extract_entry_range(entry, 0, entry.uncompressed_size, src, cancel)
    }

    /// Returns the sub-range `[a, b)` of the regular file `name`.
    pub fn extract_range(
        &self,
        src: &dyn ByteSource,
        name: &str,
        a: u64,
        b: u64,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        let entry = self.lookup(name)?;
        self.extract_entry_range(entry, a, b, src, cancel)
    }

    fn extract_entry_range(
        &self,
        entry: &FileMetadata,
        a: u64,
        b: u64,
        src: &dyn ByteSource,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        if !matches!(entry.kind, EntryKind::Regular) {
            return Err(Error::WrongType {
                name: entry.name.to_string_lossy().to_string(),
                actual: to_tar_entry_type(entry.kind),
            });
        }
        if a > b || b > entry.uncompressed_size {
            return Err(Error::OutOfBounds {
                requested_lo: a,
                requested_hi: b,
                entry_len: entry.uncompressed_size,
            });
        }
        if a == b {
            return Ok(Vec::new());
        }

        debug!(name = %entry.name.display(), lo = a, hi = b, "extracting range");

        let checkpoints = decode_checkpoints(&self.ztoc.compression_info.checkpoints)?;
        let zinfo = crate::zinfo::GzipZinfo {
            checkpoints,
            span_size: self.ztoc.compression_info.span_size,
            total_in: self.ztoc.compressed_archive_size,
            total_out: self.ztoc.uncompressed_archive_size,
        };

        let lo = entry.uncompressed_offset + a;
        let hi = entry.uncompressed_offset + b;
        zinfo_extract(src, &zinfo, lo, hi, cancel)
    }
}

fn to_tar_entry_type(kind: EntryKind) -> tar::EntryType {
    match kind {
        EntryKind::Regular => tar::EntryType::Regular,
        EntryKind::Directory => tar::EntryType::Directory,
        EntryKind::Symlink => tar::EntryType::Symlink,
        EntryKind::Hardlink => tar::EntryType::Link,
        EntryKind::CharDevice => tar::EntryType::Char,
        EntryKind::BlockDevice => tar::EntryType::Block,
        EntryKind::Fifo => tar::EntryType::Fifo,
        // GNU long-name/long-link, sparse, and other header types the walker
        // folds into `Other`. None of tar::EntryType's named variants apply,
        // and aliasing to `Regular` would misreport the entry's real type to
        // the caller, so this is a byte with no named meaning of its own.
        EntryKind::Other => tar::EntryType::new(0),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::{build, BuildConfig};
    use crate::source::MemorySource;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};
    use tar::{Builder, Header};

    fn gzip_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_uid(0);
            header.set_gid(0);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        let tar = builder.into_inner().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_extract_file_matches_source() {
        let file1 = vec![7u8; 10];
        let file2 = (0..15u32).map(|i| i as u8).collect::<Vec<_>>();
        let data = gzip_tar(&[("file1", &file1), ("file2", &file2)]);
        let ztoc = build(Cursor::new(&data), &BuildConfig { span_size: 64, ..Default::default() }, &CancelToken::none()).unwrap();

        let source = MemorySource::new(data);
        let extractor = Extractor::new(&ztoc);
        let got1 = extractor.extract_file(&source, "file1", &CancelToken::none()).unwrap();
        assert_eq!(got1, file1);
        let got2 = extractor.extract_file(&source, "file2", &CancelToken::none()).unwrap();
        assert_eq!(got2, file2);
    }

    #[test]
    fn test_extract_range_matches_full_slice() {
        let file: Vec<u8> = (0..5000u32).map(|i| (i % 250) as u8).collect();
        let data = gzip_tar(&[("big", &file)]);
        let ztoc = build(Cursor::new(&data), &BuildConfig { span_size: 256, ..Default::default() }, &CancelToken::none()).unwrap();
        let source = MemorySource::new(data);
        let extractor = Extractor::new(&ztoc);

        let full = extractor.extract_file(&source, "big", &CancelToken::none()).unwrap();
        let partial = extractor.extract_range(&source, "big", 1234, 2345, &CancelToken::none()).unwrap();
        assert_eq!(partial, full[1234..2345]);
    }

    #[test]
    fn test_extract_not_found() {
        let data = gzip_tar(&[("file1", b"hi")]);
        let ztoc = build(Cursor::new(&data), &BuildConfig::default(), &CancelToken::none()).unwrap();
        let source = MemorySource::new(data);
        let extractor = Extractor::new(&ztoc);
        let err = extractor.extract_file(&source, "missing", &CancelToken::none()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_extract_out_of_bounds() {
        let data = gzip_tar(&[("file1", b"hello")]);
        let ztoc = build(Cursor::new(&data), &BuildConfig::default(), &CancelToken::none()).unwrap();
        let source = MemorySource::new(data);
        let extractor = Extractor::new(&ztoc);
        let err = extractor
            .extract_range(&source, "file1", 0, 100, &CancelToken::none())
            .unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { .. }));
    }

    #[test]
    fn test_extract_empty_range_does_not_touch_source() {
        struct PanicSource;
        impl ByteSource for PanicSource {
            fn read_at(&self, _offset: u64, _len: usize) -> std::io::Result<Vec<u8>> {
                panic!("source should not be touched for an empty range");
            }
            fn size(&self) -> std::io::Result<u64> {
                panic!("source should not be touched for an empty range");
            }
        }
        let data = gzip_tar(&[("file1", b"hello")]);
        let ztoc = build(Cursor::new(&data), &BuildConfig::default(), &CancelToken::none()).unwrap();
        let extractor = Extractor::new(&ztoc);
        let got = extractor
            .extract_range(&PanicSource, "file1", 2, 2, &CancelToken::none())
            .unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn test_extract_directory_is_wrong_type() {
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_path("dir/").unwrap();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        builder.append(&header, std::io::empty()).unwrap();
        let tar = builder.into_inner().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).unwrap();
        let data = encoder.finish().unwrap();

        let ztoc = build(Cursor::new(&data), &BuildConfig::default(), &CancelToken::none()).unwrap();
        let source = MemorySource::new(data);
        let extractor = Extractor::new(&ztoc);
        let err = extractor
            .extract_file(&source, "dir/", &CancelToken::none())
            .unwrap_err();
        assert!(matches!(err, Error::WrongType { .. }));
    }
}
