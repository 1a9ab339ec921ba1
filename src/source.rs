//! The random-access byte source abstraction external collaborators use to
//! hand this crate a compressed layer: a local file, an HTTP range reader,
//! or a registry blob client all satisfy the same shape.

use std::fs::File;
use std::io::{self, Read};
use std::sync::Mutex;

#[cfg(unix)]
use std::os::unix::fs::FileExt as UnixFileExt;

/// A seekable, randomly-addressable view of a compressed layer.
///
/// Implementations only need to support independent, out-of-order reads;
/// they do not need to be `Read + Seek` since callers may be backed by
/// something with no natural stream cursor (e.g. an HTTP range client).
pub trait ByteSource: Send + Sync {
    /// Reads exactly `len` bytes starting at `offset`, or fewer at EOF.
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Total size of the underlying compressed stream, in bytes.
    fn size(&self) -> io::Result<u64>;
}

/// A `ByteSource` backed by a local file.
pub struct FileSource {
    file: Mutex<File>,
}

impl FileSource {
    pub fn open(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        Ok(Self {
            file: Mutex::new(File::open(path)?),
        })
    }

    pub fn from_file(file: File) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }
}

impl ByteSource for FileSource {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let file = self.file.lock().expect("file source mutex poisoned");
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        loop {
            if filled == buf.len() {
                break;
            }
            let read = UnixFileExt::read_at(&*file, &mut buf[filled..], offset + filled as u64)?;
            if read == 0 {
                buf.truncate(filled);
                break;
            }
            filled += read;
        }
        Ok(buf)
    }

    #[cfg(not(unix))]
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        use std::io::{Seek, SeekFrom};
        let mut file = self.file.lock().expect("file source mutex poisoned");
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        loop {
            if filled == buf.len() {
                break;
            }
            let read = file.read(&mut buf[filled..])?;
            if read == 0 {
                buf.truncate(filled);
                break;
            }
            filled += read;
        }
        Ok(buf)
    }

    fn size(&self) -> io::Result<u64> {
        let file = self.file.lock().expect("file source mutex poisoned");
        Ok(file.metadata()?.len())
    }
}

/// A `ByteSource` backed by an in-memory buffer, useful for tests and for
/// layers small enough to hold entirely in RAM.
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for MemorySource {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let start = offset.min(self.data.len() as u64) as usize;
        let end = (start + len).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }
}

/// Adapts a [`ByteSource`] into a sequential [`Read`] starting at a given
/// offset, for feeding the zlib bindings that only know how to consume a
/// forward-moving input cursor.
pub(crate) struct SourceCursor<'a> {
    source: &'a dyn ByteSource,
    pos: u64,
    chunk: usize,
}

impl<'a> SourceCursor<'a> {
    pub(crate) fn new(source: &'a dyn ByteSource, start: u64, chunk: usize) -> Self {
        Self {
            source,
            pos: start,
            chunk,
        }
    }
}

impl<'a> Read for SourceCursor<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = buf.len().min(self.chunk).max(1);
        let data = self.source.read_at(self.pos, want)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}
