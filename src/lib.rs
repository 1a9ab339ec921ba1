//! Builds, serializes, and randomly extracts from ztocs: the zipped
//! table-of-contents side-car that lets a lazy container-image filesystem
//! translate reads into (compressed-range fetch + partial decompression)
//! operations without ever materializing the whole layer.

pub mod builder;
pub mod cancel;
pub mod codec;
pub mod error;
pub mod extract;
pub mod model;
pub mod source;
pub mod walker;
pub mod zinfo;

pub use builder::{build, BuildConfig};
pub use cancel::CancelToken;
pub use codec::{marshal, unmarshal};
pub use error::{Error, Result};
pub use extract::Extractor;
pub use model::{
    CompressionAlgorithm, CompressionInfo, Descriptor, EntryKind, FileMetadata, Ztoc,
    ZTOC_INDEX_MEDIA_TYPE, ZTOC_MEDIA_TYPE,
};
pub use source::{ByteSource, FileSource, MemorySource};
