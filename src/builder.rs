//! Drives the Compression Index and the TAR Walker together over one pass
//! of a gzipped tar, assembling the final [`Ztoc`].

use std::io::Read;

use tracing::info;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::model::{CompressionAlgorithm, CompressionInfo, Ztoc, ZTOC_SCHEMA_VERSION};
use crate::walker;
use crate::zinfo::{encode_checkpoints, GzipZInfoDecompressor};

/// Default uncompressed bytes per checkpoint.
pub const DEFAULT_SPAN_SIZE: u64 = 1 << 20;

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub span_size: u64,
    pub compression_algorithm: CompressionAlgorithm,
    pub build_tool_id: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            span_size: DEFAULT_SPAN_SIZE,
            compression_algorithm: CompressionAlgorithm::Gzip,
            build_tool_id: String::from("ztoc"),
        }
    }
}

/// Builds a [`Ztoc`] from a gzipped tar stream in a single pass. Failure is
/// fatal: a partial ztoc is never returned.
pub fn build<R: Read>(reader: R, config: &BuildConfig, cancel: &CancelToken) -> Result<Ztoc> {
    let CompressionAlgorithm::Gzip = config.compression_algorithm;

    let mut decompressor =
        GzipZInfoDecompressor::with_cancel(reader, config.span_size, cancel.clone())?;
    let toc = walker::walk(&mut decompressor)?;
    let zinfo = decompressor.into_zinfo();

    let max_span_id = zinfo.checkpoints.len().saturating_sub(1) as u32;
    let compression_info = CompressionInfo {
        span_size: zinfo.span_size,
        max_span_id,
        compression_algorithm: config.compression_algorithm,
        checkpoints: encode_checkpoints(&zinfo.checkpoints),
    };

    let ztoc = Ztoc {
        version: ZTOC_SCHEMA_VERSION.to_string(),
        build_tool_id: config.build_tool_id.clone(),
        compressed_archive_size: zinfo.total_in,
        uncompressed_archive_size: zinfo.total_out,
        toc,
        compression_info,
    };
    ztoc.validate()?;

    info!(
        entries = ztoc.toc.len(),
        spans = ztoc.compression_info.max_span_id + 1,
        compressed_archive_size = ztoc.compressed_archive_size,
        uncompressed_archive_size = ztoc.uncompressed_archive_size,
        "built ztoc"
    );

    Ok(ztoc)
}
