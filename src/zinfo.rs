// This code is based on the classic zlib "zran" random-access recipe,
// adapted to Rust and generalized from a one-shot index builder into a type
// that also restarts decompression from a captured checkpoint.
//
// The checkpoint-capture loop (inflate with Z_BLOCK, watch data_type for a
// block boundary, snapshot the last 32 KiB of output) is the same technique
// soci-snapshotter's Go implementation and zlib's zran.c example use; the
// restart path (raw inflate, inflatePrime, then inflateSetDictionary) is
// that recipe run in reverse.

/*
   Copyright The Soci Snapshotter Authors.

   Licensed under the Apache License, Version 2.0 (the "License");
   you may not use this file except in compliance with the License.
   You may obtain a copy of the License at

       http://www.apache.org/licenses/LICENSE-2.0

   Unless required by applicable law or agreed to in writing, software
   distributed under the License is distributed on an "AS IS" BASIS,
   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
   See the License for the specific language governing permissions and
   limitations under the License.
*/

/*
  Copyright (C) 1995-2017 Jean-loup Gailly and Mark Adler
  This software is provided 'as-is', without any express or implied
  warranty.  In no event will the authors be held liable for any damages
  arising from the use of this software.
  Permission is granted to anyone to use this software for any purpose,
  including commercial applications, and to alter it and redistribute it
  freely, subject to the following restrictions:
  1. The origin of this software must not be misrepresented; you must not
     claim that you wrote the original software. If you use this software
     in a product, an acknowledgment in the product documentation would be
     appreciated but is not required.
  2. Altered source versions must be plainly marked as such, and must not be
     misrepresented as being the original software.
  3. This notice may not be removed or altered from any source distribution.
  Jean-loup Gailly        Mark Adler
  jloup@gzip.org          madler@alumni.caltech.edu
*/

use std::{
    alloc::{self, Layout},
    cmp,
    ffi::CStr,
    io::{self, Read},
    mem, ptr,
};

use libc::{c_int, c_void};
use libz_sys::{
    inflate, inflateEnd, inflateInit2_, inflatePrime, inflateReset2, inflateSetDictionary, uInt,
    z_stream, zlibVersion, Z_BLOCK, Z_BUF_ERROR, Z_DATA_ERROR, Z_MEM_ERROR, Z_NEED_DICT,
    Z_NO_FLUSH, Z_OK, Z_STREAM_END, Z_STREAM_ERROR, Z_VERSION_ERROR,
};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::source::{ByteSource, SourceCursor};

/// Gzip is always decompressed with a 32 KiB window.
pub const WINSIZE: usize = 32768;
const CHUNK: usize = 1 << 14;
/// Auto-detect zlib or gzip headers (`MAX_WBITS` + 32, see zlib.h).
const AUTO_HEADER_WBITS: c_int = 47;
/// Raw deflate, no header, used to restart decompression mid-stream.
const RAW_WBITS: c_int = -15;

/// A checkpoint capturing the decompressor state at a span or gzip-member
/// boundary, sufficient to resume decompression from that point without
/// replaying anything before it.
#[derive(Clone, PartialEq, Eq)]
pub struct GzipCheckpoint {
    /// Uncompressed-stream offset this checkpoint resumes from.
    pub out: u64,
    /// Compressed-stream byte offset, counting a partially consumed byte as
    /// consumed (the `bits` field says how much of it is still unconsumed).
    pub r#in: u64,
    /// Number of bits of the byte at `in - 1` not yet fed to the decoder.
    /// Zero when `fresh_header` is set or the checkpoint lands byte-aligned.
    pub bits: u8,
    /// True at the very start of the stream and at every subsequent gzip
    /// member boundary: restarting here means parsing a fresh gzip header
    /// with an empty dictionary, not priming raw deflate state.
    pub fresh_header: bool,
    /// The 32 KiB of uncompressed output immediately preceding `out`
    /// (zero-padded at the front when `out < WINSIZE`). Unused when
    /// `fresh_header` is set.
    pub window: [u8; WINSIZE],
}

impl std::fmt::Debug for GzipCheckpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipCheckpoint")
            .field("out", &self.out)
            .field("in", &self.r#in)
            .field("bits", &format_args!("0b{:08b}", self.bits))
            .field("fresh_header", &self.fresh_header)
            .finish()
    }
}

/// The random-access index for one gzip stream: an ordered list of
/// checkpoints plus the configured span size and observed totals.
#[derive(Debug, PartialEq, Eq)]
pub struct GzipZinfo {
    pub checkpoints: Vec<GzipCheckpoint>,
    pub span_size: u64,
    pub total_in: u64,
    pub total_out: u64,
}

/// A wrapper around the underlying [`z_stream`].
struct ZStream {
    stream: Box<z_stream>,
}

impl ZStream {
    fn new(window_bits: c_int) -> Result<Self> {
        let mut stream = Box::new(z_stream {
            next_in: ptr::null_mut(),
            avail_in: 0,
            total_in: 0,
            next_out: ptr::null_mut(),
            avail_out: 0,
            total_out: 0,
            msg: ptr::null_mut(),
            state: ptr::null_mut(),
            opaque: ptr::null_mut(),
            data_type: 0,
            adler: 0,
            reserved: 0,
            zalloc,
            zfree,
        });
        check_error(
            unsafe {
                inflateInit2_(
                    stream.as_mut() as *mut z_stream,
                    window_bits,
                    zlibVersion(),
                    mem::size_of::<z_stream>() as c_int,
                )
            },
            None,
        )?;

        Ok(Self { stream })
    }

    fn available_in(&self) -> u32 {
        self.stream.avail_in
    }

    fn available_out(&self) -> u32 {
        self.stream.avail_out
    }

    fn data_type(&self) -> i32 {
        self.stream.data_type
    }

    /// Sets the input buffer the stream will read from.
    ///
    /// Safety: `in_buf` must remain valid and unmoved until the next
    /// `inflate` call returns.
    unsafe fn next_in(&mut self, in_buf: &mut [u8]) {
        self.stream.avail_in = in_buf.len() as u32;
        self.stream.next_in = in_buf.as_mut_ptr();
    }

    /// Sets the output buffer the stream will write to.
    ///
    /// Safety: `out` must remain valid and unmoved until the next `inflate`
    /// call returns.
    unsafe fn next_out(&mut self, out: &mut [u8]) {
        self.stream.avail_out = out.len() as u32;
        self.stream.next_out = out.as_mut_ptr();
    }

    fn inflate(&mut self, flush: c_int) -> Result<c_int> {
        check_error(
            unsafe { inflate(self.stream.as_mut() as *mut z_stream, flush) },
            Some(&self.stream),
        )
    }

    fn prime(&mut self, bits: i32, value: i32) -> Result<()> {
        check_error(
            unsafe { inflatePrime(self.stream.as_mut() as *mut z_stream, bits, value) },
            Some(&self.stream),
        )?;
        Ok(())
    }

    fn set_dictionary(&mut self, dict: &[u8]) -> Result<()> {
        check_error(
            unsafe {
                inflateSetDictionary(
                    self.stream.as_mut() as *mut z_stream,
                    dict.as_ptr(),
                    dict.len() as uInt,
                )
            },
            Some(&self.stream),
        )?;
        Ok(())
    }

    fn reset2(&mut self, window_bits: c_int) -> Result<()> {
        check_error(
            unsafe { inflateReset2(self.stream.as_mut() as *mut z_stream, window_bits) },
            Some(&self.stream),
        )?;
        Ok(())
    }
}

impl Drop for ZStream {
    fn drop(&mut self) {
        unsafe {
            inflateEnd(self.stream.as_mut() as *mut z_stream);
        }
    }
}

/// Converts a zlib return code into a [`Result`], classifying the common
/// failure codes into this crate's error taxonomy.
fn check_error(ret: c_int, stream: Option<&z_stream>) -> Result<c_int> {
    let msg = stream.and_then(|stream| {
        if !stream.msg.is_null() {
            Some(unsafe { CStr::from_ptr(stream.msg).to_string_lossy().to_string() })
        } else {
            None
        }
    });
    match ret {
        r if r >= Z_OK => Ok(r),
        Z_STREAM_ERROR | Z_DATA_ERROR | Z_VERSION_ERROR => Err(Error::UnsupportedFormat(
            msg.unwrap_or_else(|| format!("zlib error {ret}")),
        )),
        Z_MEM_ERROR => Err(Error::Io(io::Error::new(
            io::ErrorKind::OutOfMemory,
            msg.unwrap_or_else(|| "zlib memory error".into()),
        ))),
        Z_BUF_ERROR => Err(Error::Truncated(
            msg.unwrap_or_else(|| "zlib buffer error".into()),
        )),
        _ => Err(Error::UnsupportedFormat(
            msg.unwrap_or_else(|| format!("zlib unknown error {ret}")),
        )),
    }
}

/// A Gzip decompressor that also generates compression metadata which can be
/// used to read parts of the compressed payload without needing to
/// decompress everything.
pub struct GzipZInfoDecompressor<R> {
    reader: R,

    stream: ZStream,
    checkpoints: Vec<GzipCheckpoint>,
    span_size: u64,
    total_in: u64,
    total_out: u64,
    last_checkpoint: u64,

    window: RingBuffer<u8, WINSIZE>,
    input: [u8; CHUNK],
    cancel: CancelToken,
    finished: bool,
}

impl<R> GzipZInfoDecompressor<R>
where
    R: Read,
{
    /// Creates a new Gzip zinfo decompressor. `span_size` is the minimum
    /// uncompressed-byte distance between two captured checkpoints.
    pub fn new(reader: R, span_size: u64) -> Result<Self> {
        Self::with_cancel(reader, span_size, CancelToken::none())
    }

    pub fn with_cancel(reader: R, span_size: u64, cancel: CancelToken) -> Result<Self> {
        let stream = ZStream::new(AUTO_HEADER_WBITS)?;

        Ok(Self {
            reader,
            stream,
            checkpoints: Vec::new(),
            span_size,
            total_in: 0,
            total_out: 0,
            last_checkpoint: 0,
            window: RingBuffer::new(),
            input: [0u8; CHUNK],
            cancel,
            finished: false,
        })
    }

    /// Consumes the decompressor and returns the zinfo compression metadata.
    /// Only complete once EOF has been reached by reading to completion.
    pub fn into_zinfo(self) -> GzipZinfo {
        GzipZinfo {
            checkpoints: self.checkpoints,
            span_size: self.span_size,
            total_in: self.total_in,
            total_out: self.total_out,
        }
    }

    fn push_checkpoint(&mut self, bits: u8, fresh_header: bool) {
        let (left, right) = self.window.read();
        let mut window = [0u8; WINSIZE];
        window[..left.len()].copy_from_slice(left);
        window[left.len()..].copy_from_slice(right);
        self.checkpoints.push(GzipCheckpoint {
            out: self.total_out,
            r#in: self.total_in,
            bits,
            fresh_header,
            window,
        });
        self.last_checkpoint = self.total_out;
    }

    /// After a member ends with no input buffered, peek whether the
    /// underlying reader has trailing bytes (the start of another member).
    /// A truly-EOF reader returns 0 and is left untouched.
    fn refill_has_more(&mut self) -> io::Result<bool> {
        if self.stream.available_in() > 0 {
            return Ok(true);
        }
        let count = self.reader.read(&mut self.input)?;
        if count == 0 {
            return Ok(false);
        }
        unsafe {
            self.stream.next_in(&mut self.input[..count]);
        }
        Ok(true)
    }
}

impl<R> Read for GzipZInfoDecompressor<R>
where
    R: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cancel.check().map_err(to_io)?;
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        unsafe {
            self.stream.next_out(buf);
        }

        while self.stream.available_out() > 0 {
            if self.stream.available_in() == 0 {
                let count = self.reader.read(&mut self.input)?;
                if count == 0 {
                    return Err(to_io(Error::Truncated(
                        "gzip stream ended before a complete member was read".into(),
                    )));
                }
                unsafe {
                    self.stream.next_in(&mut self.input[..count]);
                }
            }

            let last_read = buf.len() - self.stream.available_out() as usize;
            self.total_in += self.stream.available_in() as u64;
            self.total_out += self.stream.available_out() as u64;
            let status = self.stream.inflate(Z_BLOCK).map_err(to_io)?;
            self.total_in -= self.stream.available_in() as u64;
            self.total_out -= self.stream.available_out() as u64;

            if status == Z_NEED_DICT {
                return Err(to_io(Error::UnsupportedFormat(
                    "unexpected preset dictionary request".into(),
                )));
            }

            self.window
                .write(&buf[last_read..buf.len() - self.stream.available_out() as usize]);

            if status == Z_STREAM_END {
                if self.refill_has_more()? {
                    // Another gzip member follows immediately; each member
                    // boundary is a natural, byte-aligned checkpoint.
                    self.push_checkpoint(0, true);
                    self.stream.reset2(AUTO_HEADER_WBITS).map_err(to_io)?;
                    continue;
                }
                self.finished = true;
                return Ok(buf.len() - self.stream.available_out() as usize);
            }

            if (self.stream.data_type() & 128) != 0
                && (self.stream.data_type() & 64) == 0
                && (self.total_out == 0 || self.total_out - self.last_checkpoint >= self.span_size)
            {
                // This fires right after the gzip/zlib header is consumed and
                // before any deflate block, so `in` points into the raw
                // deflate bitstream, not at a member header: always a raw
                // restart point, never `fresh_header`.
                let bits = (self.stream.data_type() as u8) & 7;
                self.push_checkpoint(bits, false);
            }
        }

        Ok(buf.len() - self.stream.available_out() as usize)
    }
}

fn to_io(err: Error) -> io::Error {
    match err {
        Error::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

/// Restarts decompression from the latest checkpoint at or before `lo` and
/// returns the uncompressed bytes of `[lo, hi)`.
pub fn extract(
    source: &dyn ByteSource,
    zinfo: &GzipZinfo,
    lo: u64,
    hi: u64,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    if hi < lo {
        return Err(Error::OutOfBounds {
            requested_lo: lo,
            requested_hi: hi,
            entry_len: 0,
        });
    }
    if lo == hi {
        return Ok(Vec::new());
    }
    let checkpoint = find_checkpoint(&zinfo.checkpoints, lo)?.clone();

    let (window_bits, seek_to) = if checkpoint.fresh_header {
        (AUTO_HEADER_WBITS, checkpoint.r#in)
    } else {
        (
            RAW_WBITS,
            checkpoint.r#in - if checkpoint.bits != 0 { 1 } else { 0 },
        )
    };

    let mut stream = ZStream::new(window_bits)?;
    let mut cursor = SourceCursor::new(source, seek_to, CHUNK);

    if !checkpoint.fresh_header {
        if checkpoint.bits != 0 {
            let mut byte = [0u8; 1];
            cursor
                .read_exact(&mut byte)
                .map_err(|_| Error::Truncated("missing carry byte for checkpoint".into()))?;
            let bits = checkpoint.bits as i32;
            stream.prime(bits, (byte[0] as i32) >> (8 - bits))?;
        }
        stream.set_dictionary(&checkpoint.window)?;
    }

    let mut to_skip = lo - checkpoint.out;
    let mut out = Vec::with_capacity((hi - lo) as usize);
    let mut input = [0u8; CHUNK];
    let mut discard = [0u8; WINSIZE];

    loop {
        cancel.check()?;

        if to_skip > 0 {
            let want = to_skip.min(WINSIZE as u64) as usize;
            let produced = inflate_into(&mut stream, &mut cursor, &mut input, &mut discard[..want])?;
            to_skip -= produced as u64;
            if produced < want && to_skip > 0 {
                return Err(Error::Truncated(
                    "gzip stream ended before reaching the requested offset".into(),
                ));
            }
            continue;
        }

        let remaining = (hi - lo) as usize - out.len();
        if remaining == 0 {
            break;
        }
        let want = remaining.min(WINSIZE);
        let mut buf = vec![0u8; want];
        let produced = inflate_into(&mut stream, &mut cursor, &mut input, &mut buf)?;
        out.extend_from_slice(&buf[..produced]);
        if produced < want {
            return Err(Error::Truncated(
                "gzip stream ended before the requested range was fully produced".into(),
            ));
        }
    }

    Ok(out)
}

/// Runs bounded inflate steps until `out` is completely filled or the
/// stream ends. Returns the number of bytes actually written (less than
/// `out.len()` only when the stream ended early).
fn inflate_into<R: Read>(
    stream: &mut ZStream,
    reader: &mut R,
    input: &mut [u8; CHUNK],
    out: &mut [u8],
) -> Result<usize> {
    if out.is_empty() {
        return Ok(0);
    }
    unsafe {
        stream.next_out(out);
    }
    loop {
        if stream.available_in() == 0 {
            let count = reader.read(input)?;
            if count == 0 {
                return Err(Error::Truncated(
                    "compressed source ended before decompression finished".into(),
                ));
            }
            unsafe {
                stream.next_in(&mut input[..count]);
            }
        }
        let status = stream.inflate(Z_NO_FLUSH)?;
        if status == Z_NEED_DICT {
            return Err(Error::UnsupportedFormat(
                "unexpected preset dictionary request".into(),
            ));
        }
        if stream.available_out() == 0 {
            return Ok(out.len());
        }
        if status == Z_STREAM_END {
            return Ok(out.len() - stream.available_out() as usize);
        }
    }
}

fn find_checkpoint(checkpoints: &[GzipCheckpoint], lo: u64) -> Result<&GzipCheckpoint> {
    if checkpoints.is_empty() {
        return Err(Error::Corrupt("compression index has no checkpoints".into()));
    }
    // Latest checkpoint with `out <= lo`.
    let idx = match checkpoints.binary_search_by(|c| c.out.cmp(&lo)) {
        Ok(exact) => exact,
        Err(0) => 0,
        Err(insert_at) => insert_at - 1,
    };
    Ok(&checkpoints[idx])
}

/// Serializes a [`GzipZinfo`]'s checkpoints into the opaque byte blob stored
/// in a ztoc's `CompressionInfo::checkpoints` field. This layout is private
/// to this module: nothing outside gzip extraction ever interprets it.
pub fn encode_checkpoints(checkpoints: &[GzipCheckpoint]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(checkpoints.len() * checkpoint_record_len());
    for cp in checkpoints {
        buf.push(cp.fresh_header as u8);
        buf.push(cp.bits);
        buf.extend_from_slice(&cp.r#in.to_le_bytes());
        buf.extend_from_slice(&cp.out.to_le_bytes());
        buf.extend_from_slice(&cp.window);
    }
    buf
}

pub fn decode_checkpoints(buf: &[u8]) -> Result<Vec<GzipCheckpoint>> {
    let record_len = checkpoint_record_len();
    if buf.len() % record_len != 0 {
        return Err(Error::Corrupt(format!(
            "checkpoint blob length {} is not a multiple of the record size {}",
            buf.len(),
            record_len
        )));
    }
    let mut out = Vec::with_capacity(buf.len() / record_len);
    for chunk in buf.chunks_exact(record_len) {
        let fresh_header = chunk[0] != 0;
        let bits = chunk[1];
        let r#in = u64::from_le_bytes(chunk[2..10].try_into().unwrap());
        let span_out = u64::from_le_bytes(chunk[10..18].try_into().unwrap());
        let mut window = [0u8; WINSIZE];
        window.copy_from_slice(&chunk[18..18 + WINSIZE]);
        out.push(GzipCheckpoint {
            out: span_out,
            r#in,
            bits,
            fresh_header,
            window,
        });
    }
    Ok(out)
}

fn checkpoint_record_len() -> usize {
    1 + 1 + 8 + 8 + WINSIZE
}

/// A fixed-size ring buffer. Writes are pushed onto the back of the buffer.
struct RingBuffer<T, const N: usize> {
    buffer: [T; N],
    index: usize,
}

impl<T, const N: usize> RingBuffer<T, N>
where
    T: Copy + Default,
{
    fn new() -> Self {
        Self {
            buffer: [T::default(); N],
            index: 0,
        }
    }

    /// Writes the buffer to the back of the ring buffer.
    fn write(&mut self, mut buf: &[T]) {
        if buf.is_empty() {
            return;
        }

        if buf.len() > self.buffer.len() {
            buf = &buf[buf.len() - self.buffer.len()..];
        }

        while !buf.is_empty() {
            let size = cmp::min(buf.len(), self.buffer.len() - self.index);
            self.buffer[self.index..self.index + size].copy_from_slice(&buf[..size]);
            buf = &buf[size..];
            self.index = (self.index + size) % self.buffer.len();
        }
    }

    /// Gets the contents of the ring buffer, front then back (non-contiguous
    /// storage means two slices are returned instead of one).
    fn read(&self) -> (&[T], &[T]) {
        (&self.buffer[self.index..], &self.buffer[..self.index])
    }
}

const ALIGN: usize = std::mem::align_of::<usize>();
type AllocSize = uInt;

fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

extern "C" fn zalloc(_ptr: *mut c_void, items: AllocSize, item_size: AllocSize) -> *mut c_void {
    // `items * item_size` is the allocation zlib wants; we additionally stash
    // a `usize` header before it since `zfree` isn't given a size back.
    let size = match items
        .checked_mul(item_size)
        .and_then(|i| usize::try_from(i).ok())
        .map(|size| align_up(size, ALIGN))
        .and_then(|i| i.checked_add(std::mem::size_of::<usize>()))
    {
        Some(i) => i,
        None => return ptr::null_mut(),
    };

    let layout = match Layout::from_size_align(size, ALIGN) {
        Ok(layout) => layout,
        Err(_) => return ptr::null_mut(),
    };

    unsafe {
        let ptr = alloc::alloc(layout) as *mut usize;
        if ptr.is_null() {
            return ptr as *mut c_void;
        }
        *ptr = size;
        ptr.add(1) as *mut c_void
    }
}

extern "C" fn zfree(_ptr: *mut c_void, address: *mut c_void) {
    unsafe {
        let ptr = (address as *mut usize).offset(-1);
        let size = *ptr;
        let layout = Layout::from_size_align_unchecked(size, ALIGN);
        alloc::dealloc(ptr as *mut u8, layout)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::MemorySource;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_ring_buffer() {
        let mut buffer = RingBuffer::<u8, 100>::new();

        assert_eq!(buffer.read(), ([0u8; 100].as_slice(), [0u8; 0].as_slice()));

        buffer.write(&[1u8; 50]);
        assert_eq!(buffer.read(), ([0u8; 50].as_slice(), [1u8; 50].as_slice()));

        buffer.write(&[2u8; 50]);
        let mut expected = Vec::new();
        expected.extend_from_slice(&[1u8; 50]);
        expected.extend_from_slice(&[2u8; 50]);
        assert_eq!(buffer.read(), (expected.as_slice(), [0u8; 0].as_slice()));

        buffer.write(&[3u8; 150]);
        assert_eq!(buffer.read(), ([3u8; 100].as_slice(), [0u8; 0].as_slice()));

        buffer.write(&[4u8; 75]);
        assert_eq!(buffer.read(), ([3u8; 25].as_slice(), [4u8; 75].as_slice()));
    }

    #[test]
    fn test_build_roundtrip_small() {
        let data = b"hello world, this is a small test payload".repeat(10);
        let compressed = gzip(&data);

        let mut decoder = GzipZInfoDecompressor::new(Cursor::new(&compressed), 64).unwrap();
        let mut out = Vec::new();
        std::io::copy(&mut decoder, &mut out).unwrap();
        assert_eq!(out, data);

        let zinfo = decoder.into_zinfo();
        assert_eq!(zinfo.total_out, data.len() as u64);
        assert!(!zinfo.checkpoints.is_empty());
        assert_eq!(zinfo.checkpoints[0].out, 0);
    }

    #[test]
    fn test_checkpoint_roundtrip_encoding() {
        let data = vec![b'x'; 500_000];
        let compressed = gzip(&data);
        let mut decoder = GzipZInfoDecompressor::new(Cursor::new(&compressed), 4096).unwrap();
        let mut out = Vec::new();
        std::io::copy(&mut decoder, &mut out).unwrap();
        let zinfo = decoder.into_zinfo();

        let encoded = encode_checkpoints(&zinfo.checkpoints);
        let decoded = decode_checkpoints(&encoded).unwrap();
        assert_eq!(decoded.len(), zinfo.checkpoints.len());
        for (a, b) in decoded.iter().zip(zinfo.checkpoints.iter()) {
            assert_eq!(a.out, b.out);
            assert_eq!(a.r#in, b.r#in);
            assert_eq!(a.bits, b.bits);
            assert_eq!(a.fresh_header, b.fresh_header);
            assert!(a.window.iter().eq(b.window.iter()));
        }
    }

    #[test]
    fn test_extract_matches_full_decode() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let compressed = gzip(&data);
        let mut decoder = GzipZInfoDecompressor::new(Cursor::new(&compressed), 8192).unwrap();
        let mut full = Vec::new();
        std::io::copy(&mut decoder, &mut full).unwrap();
        let zinfo = decoder.into_zinfo();
        assert_eq!(full, data);

        let source = MemorySource::new(compressed);
        let cancel = CancelToken::none();

        for &(lo, hi) in &[
            (0u64, 10u64),
            (0, 200_000),
            (15_000, 15_010),
            (199_990, 200_000),
            (8192, 16384),
        ] {
            let got = extract(&source, &zinfo, lo, hi, &cancel).unwrap();
            assert_eq!(got, data[lo as usize..hi as usize], "range [{lo},{hi})");
        }
    }

    #[test]
    fn test_extract_empty_range() {
        let data = vec![1u8, 2, 3, 4, 5];
        let compressed = gzip(&data);
        let mut decoder = GzipZInfoDecompressor::new(Cursor::new(&compressed), 4096).unwrap();
        let mut full = Vec::new();
        std::io::copy(&mut decoder, &mut full).unwrap();
        let zinfo = decoder.into_zinfo();

        let source = MemorySource::new(compressed);
        let got = extract(&source, &zinfo, 2, 2, &CancelToken::none()).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn test_not_gzip_is_unsupported_format() {
        let garbage = vec![0u8; 64];
        let result = GzipZInfoDecompressor::new(Cursor::new(&garbage), 4096);
        // Header parse failures only surface on the first `read`, since
        // `inflateInit2_` itself succeeds before any input is consumed.
        let mut decoder = result.unwrap();
        let mut buf = [0u8; 16];
        match decoder.read(&mut buf) {
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::Other),
            Ok(_) => panic!("expected an error reading garbage as gzip"),
        }
    }

    #[test]
    fn test_truncated_stream() {
        let data = vec![b'a'; 50_000];
        let mut compressed = gzip(&data);
        compressed.truncate(compressed.len() / 2);
        let mut decoder = GzipZInfoDecompressor::new(Cursor::new(&compressed), 4096).unwrap();
        let mut out = Vec::new();
        let result = std::io::copy(&mut decoder, &mut out);
        assert!(result.is_err());
    }
}
