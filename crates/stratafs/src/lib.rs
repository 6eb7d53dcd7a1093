//! Stratafs - composable virtual filesystems
//!
//! One synchronous filesystem contract ([`Fs`]) with backends that stack:
//! an in-memory store, path confinement, a copy-on-write overlay and a
//! mount namespace. Any composition of them is itself an [`Fs`].
//!
//! # Example
//!
//! ```rust
//! use std::path::Path;
//! use std::sync::Arc;
//! use stratafs::{BasePathFs, CopyOnWriteFs, Fs, MemFs, MountableFs, fs::util};
//!
//! # fn main() -> stratafs::Result<()> {
//! // A pristine image, never written.
//! let image = Arc::new(MemFs::new());
//! util::write_file(image.as_ref(), Path::new("/srv/app/config.toml"), b"debug = false", 0o644)?;
//!
//! // Writes land in a scratch layer instead.
//! let app = Arc::new(BasePathFs::new(image.clone(), "/srv/app"));
//! let overlay = Arc::new(CopyOnWriteFs::new(app, Arc::new(MemFs::new())));
//!
//! let mut ns = MountableFs::new(Arc::new(MemFs::new()));
//! ns.mount("/app", overlay)?;
//!
//! util::write_file(&ns, Path::new("/app/config.toml"), b"debug = true", 0o644)?;
//! assert_eq!(util::read_file(&ns, Path::new("/app/config.toml"))?, b"debug = true");
//! assert_eq!(
//!     util::read_file(image.as_ref(), Path::new("/srv/app/config.toml"))?,
//!     b"debug = false"
//! );
//! # Ok(())
//! # }
//! ```

mod error;
pub mod fs;
pub mod path;

pub use error::{Error, ErrorKind, Result};
pub use fs::{
    BasePathFs, CopyOnWriteFs, File, FileInfo, FileType, Fs, LinkReader, Linker, Lstater,
    MAX_SYMLINK_STEPS, MemFile, MemFs, MemLimitExceeded, MemLimits, MemUsage, MountOptions,
    MountableFs, OpenFlags, ReadOnlyFs, Root, UnionFile, resolve_symlinks,
};
