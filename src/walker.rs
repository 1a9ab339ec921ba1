//! Parses the uncompressed tar stream produced by [`crate::zinfo`] during a
//! build into an ordered sequence of [`FileMetadata`] records.

use std::io::{self, Read};
use std::path::PathBuf;
use std::str::Utf8Error;

use chrono::NaiveDateTime;
use tar::Archive;

use crate::error::{Error, Result};
use crate::model::{EntryKind, FileMetadata};

const XATTR_PREFIX: &str = "SCHILY.xattr.";

/// Walks every member of `reader` and returns one [`FileMetadata`] per
/// entry, in tar order. A malformed header anywhere fails the whole walk:
/// a silent skip would corrupt the offset-ordering invariant.
pub fn walk<R: Read>(reader: R) -> Result<Vec<FileMetadata>> {
    let mut archive = Archive::new(reader);
    archive.set_unpack_xattrs(true);
    archive.set_preserve_permissions(true);

    let mut out = Vec::new();
    for entry in archive.entries().map_err(tar_err)? {
        let entry = entry.map_err(tar_err)?;
        out.push(to_file_metadata(entry)?);
    }
    Ok(out)
}

fn to_file_metadata<R: Read>(mut entry: tar::Entry<'_, R>) -> Result<FileMetadata> {
    let kind = EntryKind::from(entry.header().entry_type());

    let mut xattrs = Vec::new();
    let mut mtime_override = None;
    if let Some(extensions) = entry.pax_extensions().map_err(tar_err)? {
        for ext in extensions {
            let ext = ext.map_err(tar_err)?;
            let key = ext.key().map_err(map_utf8_error)?;
            let value = ext.value().map_err(map_utf8_error)?;
            if let Some(attr) = key.strip_prefix(XATTR_PREFIX) {
                xattrs.push((attr.to_string(), value.to_string()));
            } else if key == "mtime" {
                mtime_override = parse_pax_fractional_seconds(value);
            }
        }
    }

    let modtime = match mtime_override {
        Some((secs, nanos)) => NaiveDateTime::from_timestamp_opt(secs, nanos),
        None => NaiveDateTime::from_timestamp_opt(entry.header().mtime().map_err(tar_err)? as i64, 0),
    }
    .ok_or_else(|| Error::MalformedTar("modtime out of range".into()))?;

    let mut devmajor = None;
    let mut devminor = None;
    if matches!(kind, EntryKind::CharDevice | EntryKind::BlockDevice) {
        devmajor = entry.header().device_major().map_err(tar_err)?;
        devminor = entry.header().device_minor().map_err(tar_err)?;
    }

    Ok(FileMetadata {
        name: entry.path().map_err(tar_err)?.into_owned(),
        kind,
        uncompressed_offset: entry.raw_file_position(),
        uncompressed_size: entry.size(),
        linkname: entry.link_name().map_err(tar_err)?.map(PathBuf::from),
        mode: entry.header().mode().map_err(tar_err)?,
        uid: entry.header().uid().map_err(tar_err)?,
        gid: entry.header().gid().map_err(tar_err)?,
        uname: entry
            .header()
            .username()
            .map_err(map_utf8_error)?
            .map(String::from),
        gname: entry
            .header()
            .groupname()
            .map_err(map_utf8_error)?
            .map(String::from),
        devmajor,
        devminor,
        modtime,
        xattrs,
    })
}

/// Parses a PAX `mtime` value (`SECONDS` or `SECONDS.FRACTION`) into
/// `(seconds, nanoseconds)`. `NaiveDateTime` has nanosecond resolution, so
/// this is where the format's nanosecond-precise `modtime` comes from.
fn parse_pax_fractional_seconds(raw: &str) -> Option<(i64, u32)> {
    let mut parts = raw.splitn(2, '.');
    let secs: i64 = parts.next()?.parse().ok()?;
    let nanos = match parts.next() {
        Some(frac) => {
            let mut digits: String = frac.chars().take(9).collect();
            while digits.len() < 9 {
                digits.push('0');
            }
            digits.parse().ok()?
        }
        None => 0,
    };
    Some((secs, nanos))
}

fn tar_err(e: io::Error) -> Error {
    match e.downcast::<Error>() {
        Ok(err) => err,
        Err(e) => Error::MalformedTar(e.to_string()),
    }
}

fn map_utf8_error(_: Utf8Error) -> Error {
    Error::MalformedTar("non-UTF-8 tar field".into())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;
    use tar::{Builder, Header};

    fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
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
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_walk_basic() {
        let tar = build_tar(&[("file1", b"0123456789"), ("file2", b"hello world!!!!")]);
        let meta = walk(Cursor::new(tar)).unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[0].name, PathBuf::from("file1"));
        assert_eq!(meta[0].uncompressed_size, 10);
        assert_eq!(meta[1].name, PathBuf::from("file2"));
        assert_eq!(meta[1].uncompressed_size, 15);
        assert!(meta[0].uncompressed_offset < meta[1].uncompressed_offset);
    }

    #[test]
    fn test_walk_offsets_non_decreasing() {
        let tar = build_tar(&[("a", &[1u8; 600]), ("b", &[2u8; 10]), ("c", &[])]);
        let meta = walk(Cursor::new(tar)).unwrap();
        let mut last = 0u64;
        for entry in &meta {
            assert!(entry.uncompressed_offset >= last);
            last = entry.uncompressed_offset;
        }
    }

    #[test]
    fn test_parse_pax_fractional_seconds() {
        assert_eq!(parse_pax_fractional_seconds("1700000000"), Some((1700000000, 0)));
        assert_eq!(
            parse_pax_fractional_seconds("1700000000.5"),
            Some((1700000000, 500_000_000))
        );
        assert_eq!(
            parse_pax_fractional_seconds("1700000000.123456789"),
            Some((1700000000, 123_456_789))
        );
    }

    #[test]
    fn test_malformed_tar_surfaces_typed_error() {
        let garbage = vec![1u8, 2, 3, 4, 5];
        let err = walk(Cursor::new(garbage)).unwrap_err();
        assert!(matches!(err, Error::MalformedTar(_)));
    }
}
