use thiserror::Error;

/// The error taxonomy shared by every ztoc operation.
///
/// Each variant corresponds to one of the failure kinds a caller needs to
/// branch on; anything that doesn't fit a specific kind is carried as `Io`.
#[derive(Debug, Error)]
pub enum Error {
    /// The compressed input is not a recognized stream for the selected
    /// compression algorithm (e.g. missing/garbled gzip magic).
    #[error("unsupported compression format: {0}")]
    UnsupportedFormat(String),

    /// The stream ended before the bytes required by the operation were
    /// delivered.
    #[error("truncated stream: {0}")]
    Truncated(String),

    /// A tar header failed validation while walking the uncompressed stream.
    #[error("malformed tar: {0}")]
    MalformedTar(String),

    /// The ztoc's `version` tag is not known to this build.
    #[error("unsupported ztoc schema version: {0}")]
    SchemaVersion(String),

    /// The serialized ztoc is structurally inconsistent.
    #[error("corrupt ztoc: {0}")]
    Corrupt(String),

    /// The requested entry is not present in the table of contents.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested entry exists but is not a regular file.
    #[error("wrong type for entry {name}: {actual:?}")]
    WrongType { name: String, actual: tar::EntryType },

    /// The requested sub-range falls outside the entry's bytes.
    #[error("out of bounds: requested [{requested_lo}, {requested_hi}) but entry is [0, {entry_len})")]
    OutOfBounds {
        requested_lo: u64,
        requested_hi: u64,
        entry_len: u64,
    },

    /// The caller's cancellation signal fired before the call completed.
    #[error("cancelled")]
    Cancelled,

    /// Any I/O failure not otherwise classified.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
