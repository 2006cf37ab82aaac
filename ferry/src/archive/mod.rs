//! Portable project archives.
//!
//! An [`Archive`] is the transferable state of one project: its metadata,
//! dataset and model blobs, and test suites, plus the roster of user ids
//! they reference. The codec turns it into a single deterministic binary
//! (tar + zstd) and back.

mod codec;
mod types;

pub use codec::{
    decode, decode_dir, decode_with_limits, encode, encode_to_vec, unpack, UnpackLimits,
    UnpackStats,
};
pub use types::{
    is_valid_entity_id, Archive, Blob, BlobDigest, DatasetEntry, DatasetRecord, Manifest,
    ModelEntry, ModelRecord, ProjectRecord, SuiteRecord, SuiteTestRecord, ARCHIVE_FORMAT,
    ARCHIVE_VERSION,
};
