#![forbid(unsafe_code)]
//! Error types for ext2scope.
//!
//! # Error Taxonomy
//!
//! ext2scope uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `e2s-types` | Byte-level format violations found while decoding a record |
//! | Runtime | `E2sError` | `e2s-error` (this crate) | Errors returned by the volume API and the CLI |
//!
//! `e2s-error` does not depend on `e2s-types`. The `ParseError → E2sError`
//! conversion lives in `e2s-core` and depends only on the parse error's
//! kind: bad magic or field values become `InvalidFilesystem`, short
//! buffers become `Parse`. `CorruptDirectory` and `CorruptBlockPointer` are
//! raised directly by the directory and block-map walkers.
//!
//! ## errno Mapping
//!
//! Every variant maps to exactly one POSIX errno via [`E2sError::to_errno`].
//! The match is exhaustive so a new variant cannot ship without one.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error, else `EIO` |
//! | `InvalidFilesystem` | `EINVAL` |
//! | `CorruptDirectory` | `EIO` |
//! | `CorruptBlockPointer` | `EIO` |
//! | `OutOfRange` | `ERANGE` |
//! | `NotFound` | `ENOENT` |
//! | `InvalidArgument` | `EINVAL` |
//! | `NotDirectory` | `ENOTDIR` |
//! | `Cancelled` | `EINTR` |
//! | `Parse` | `EINVAL` |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum E2sError {
    /// Source unreadable, or a read ran past the end of the image.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic, unsupported block-size shift, or inconsistent geometry.
    #[error("not a valid ext2 filesystem: {0}")]
    InvalidFilesystem(String),

    /// A directory record violated the `rec_len` / `name_len` rules.
    #[error("corrupt directory inode {inode} block {block}: {detail}")]
    CorruptDirectory {
        inode: u64,
        block: u64,
        detail: String,
    },

    /// A data or indirect block pointer lies outside the filesystem.
    #[error("corrupt block pointer {pointer} in inode {inode}: {detail}")]
    CorruptBlockPointer {
        inode: u64,
        pointer: u64,
        detail: String,
    },

    /// Inode number beyond `inodes_count` or beyond the loaded group table.
    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not a directory")]
    NotDirectory,

    /// Operation cancelled through its `Cx`.
    #[error("operation cancelled")]
    Cancelled,

    /// Parse-layer error with no better classification.
    #[error("parse error: {0}")]
    Parse(String),
}

impl E2sError {
    /// POSIX errno for this error; the CLI uses it as its exit status.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::CorruptDirectory { .. } | Self::CorruptBlockPointer { .. } => libc::EIO,
            Self::InvalidFilesystem(_) | Self::InvalidArgument(_) | Self::Parse(_) => {
                libc::EINVAL
            }
            Self::OutOfRange(_) => libc::ERANGE,
            Self::NotFound(_) => libc::ENOENT,
            Self::NotDirectory => libc::ENOTDIR,
            Self::Cancelled => libc::EINTR,
        }
    }

    /// Whether this error describes damaged on-disk metadata, as opposed to a
    /// bad request or an environmental failure.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptDirectory { .. } | Self::CorruptBlockPointer { .. }
        )
    }
}

/// Result alias using `E2sError`.
pub type Result<T> = std::result::Result<T, E2sError>;
