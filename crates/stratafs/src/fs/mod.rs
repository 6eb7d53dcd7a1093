//! Virtual filesystems
//!
//! Every backend implements the [`Fs`] contract and hands out [`File`]
//! handles. Backends compose by wrapping each other:
//! - `MemFs`: concurrent in-memory store with optional limits
//! - `BasePathFs` / `Root`: confine another filesystem to a subtree
//! - `CopyOnWriteFs`: writable layer over a read-only base
//! - `MountableFs`: namespace of filesystems at mount points
//! - `ReadOnlyFs`: refuses all changes
//!
//! Symlink support is optional and discovered through [`Lstater`], [`Linker`]
//! and [`LinkReader`].

mod basepath;
mod limits;
mod memory;
mod mountable;
mod named;
mod overlay;
mod readonly;
mod root;
mod symlink;
mod traits;
pub mod util;

pub use basepath::BasePathFs;
pub use limits::{
    DEFAULT_MAX_FILE_COUNT, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_FILENAME_LENGTH,
    DEFAULT_MAX_PATH_DEPTH, DEFAULT_MAX_PATH_LENGTH, DEFAULT_MAX_TOTAL_BYTES, MemLimitExceeded,
    MemLimits, MemUsage,
};
pub use memory::{MemFile, MemFs};
pub use mountable::{MountOptions, MountableFs};
pub use overlay::{CopyOnWriteFs, UnionFile};
pub use readonly::ReadOnlyFs;
pub use root::Root;
pub use symlink::{MAX_SYMLINK_STEPS, resolve_symlinks};
pub use traits::{
    File, FileInfo, FileType, Fs, LinkReader, Linker, Lstater, OpenFlags, lstat_if_possible,
    read_link_if_possible, symlink_if_possible,
};
pub use util::WalkControl;
