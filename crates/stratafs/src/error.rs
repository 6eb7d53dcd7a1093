//! Error types for stratafs
//!
//! Every error names the operation and the path it concerns, plus an
//! [`ErrorKind`] that callers match on. Composition layers never swallow a
//! child's error; they either pass it through or re-attribute it to the path
//! the caller actually used (see [`Error::with_path`]).

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::fs::MemLimitExceeded;

/// Result type alias using stratafs's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a filesystem failure.
#[derive(Error, Debug)]
pub enum ErrorKind {
    /// Path does not exist (also returned for paths outside a confinement).
    #[error("file does not exist")]
    NotFound,

    /// Path already exists.
    #[error("file already exists")]
    AlreadyExists,

    /// Operation refused: read-only backend or an overlay base entry.
    #[error("permission denied")]
    PermissionDenied,

    /// A directory was expected.
    #[error("not a directory")]
    NotADirectory,

    /// A non-directory was expected.
    #[error("is a directory")]
    IsADirectory,

    /// Directory still has entries.
    #[error("directory not empty")]
    DirectoryNotEmpty,

    /// Malformed path, bad root, or symlink resolution bound exceeded.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Rename across two independent backends.
    #[error("rename across mounted filesystems is not supported")]
    CrossBackend,

    /// Mount point already carries a filesystem.
    #[error("a filesystem is already mounted here")]
    AlreadyMounted,

    /// No filesystem mounted at the path.
    #[error("no filesystem is mounted here")]
    NotMounted,

    /// Filesystem would be mounted inside itself.
    #[error("filesystem cannot be mounted inside itself")]
    RecursiveMount,

    /// Operation on a closed root handle or closed file.
    #[error("handle is closed")]
    Closed,

    /// Backend lacks the requested optional capability.
    #[error("operation not supported by this filesystem")]
    Unsupported,

    /// In-memory store limit reached.
    #[error(transparent)]
    LimitExceeded(#[from] MemLimitExceeded),

    /// Error reported by a host-backed collaborator.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A filesystem error attributed to one operation on one path.
#[derive(Error, Debug)]
#[error("{op} {}: {kind}", path.display())]
pub struct Error {
    op: &'static str,
    path: PathBuf,
    kind: ErrorKind,
}

impl Error {
    /// Create an error for `op` on `path`.
    pub fn new(op: &'static str, path: impl Into<PathBuf>, kind: ErrorKind) -> Self {
        Self {
            op,
            path: path.into(),
            kind,
        }
    }

    pub fn not_found(op: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::new(op, path, ErrorKind::NotFound)
    }

    pub fn already_exists(op: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::new(op, path, ErrorKind::AlreadyExists)
    }

    pub fn permission_denied(op: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::new(op, path, ErrorKind::PermissionDenied)
    }

    pub fn not_a_directory(op: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::new(op, path, ErrorKind::NotADirectory)
    }

    pub fn is_a_directory(op: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::new(op, path, ErrorKind::IsADirectory)
    }

    pub fn invalid(op: &'static str, path: impl Into<PathBuf>, reason: &'static str) -> Self {
        Self::new(op, path, ErrorKind::InvalidArgument(reason))
    }

    pub fn unsupported(op: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::new(op, path, ErrorKind::Unsupported)
    }

    /// The operation that failed (`"open"`, `"rename"`, `"mount"`, ...).
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// The caller-visible path the failure is attributed to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    /// Re-attribute the error to another path.
    ///
    /// Wrappers that translate paths use this so a child's error reports the
    /// name the caller passed in, not the backend-internal one.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self.kind, ErrorKind::AlreadyExists)
    }

    /// True for "does not exist" and "a path component is not a directory",
    /// the two outcomes a lookup treats as absence.
    pub fn is_absent(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound | ErrorKind::NotADirectory)
    }
}

/// Convert Error to std::io::Error so file handles can serve `std::io` traits.
impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match &e.kind {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::NotADirectory => io::ErrorKind::NotADirectory,
            ErrorKind::IsADirectory => io::ErrorKind::IsADirectory,
            ErrorKind::DirectoryNotEmpty => io::ErrorKind::DirectoryNotEmpty,
            ErrorKind::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            ErrorKind::CrossBackend => io::ErrorKind::CrossesDevices,
            ErrorKind::Unsupported => io::ErrorKind::Unsupported,
            ErrorKind::LimitExceeded(_) => io::ErrorKind::StorageFull,
            ErrorKind::Io(inner) => inner.kind(),
            ErrorKind::AlreadyMounted
            | ErrorKind::NotMounted
            | ErrorKind::RecursiveMount
            | ErrorKind::Closed => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}
