//! Capability contract shared by every backend and wrapper.

use std::fmt::Debug;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Synchronous filesystem capability contract.
///
/// Backends implement this directly; composition layers implement it by
/// forwarding to their children after applying their own policy. Every method
/// takes `&self`, so implementations use interior mutability and must be safe
/// to call from many threads at once.
///
/// Paths handed to an `Fs` by the composition layers are absolute and
/// normalized (see [`crate::path::normalize`]). Implementations normalize
/// again on entry, so callers may pass relative or unclean paths too.
pub trait Fs: Send + Sync {
    /// Short tag for diagnostics.
    fn name(&self) -> &str;

    /// Create (or truncate) a file opened read/write.
    fn create(&self, path: &Path) -> Result<Box<dyn File>> {
        self.open_file(path, OpenFlags::create_truncate(), 0o666)
    }

    /// Open an existing file or directory read-only.
    fn open(&self, path: &Path) -> Result<Box<dyn File>> {
        self.open_file(path, OpenFlags::read_only(), 0)
    }

    /// Open with explicit flags. `mode` applies only when a file is created.
    fn open_file(&self, path: &Path, flags: OpenFlags, mode: u32) -> Result<Box<dyn File>>;

    /// Create a single directory.
    fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;

    /// Create a directory and any missing parents. Existing directories along
    /// the way are left untouched.
    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()>;

    /// Remove a file or an empty directory.
    fn remove(&self, path: &Path) -> Result<()>;

    /// Remove a path and everything beneath it. Absent paths are not an error.
    fn remove_all(&self, path: &Path) -> Result<()>;

    /// Move `from` to `to`.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Metadata snapshot, following a final symlink where the backend has them.
    fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Replace permission bits.
    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;

    /// Set access and modification times.
    fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()>;

    /// Stat without following a final symlink, if supported.
    fn as_lstater(&self) -> Option<&dyn Lstater> {
        None
    }

    /// Symlink creation, if supported.
    fn as_linker(&self) -> Option<&dyn Linker> {
        None
    }

    /// Symlink reading, if supported.
    fn as_link_reader(&self) -> Option<&dyn LinkReader> {
        None
    }

    /// True for a backend that passes straight through to the host OS with no
    /// subtree boundary of its own. Such a backend must be wrapped in a
    /// confinement layer before it can be mounted.
    fn is_host_passthrough(&self) -> bool {
        false
    }
}

/// Optional capability: stat without following a final symlink.
pub trait Lstater {
    fn lstat(&self, path: &Path) -> Result<FileInfo>;
}

/// Optional capability: create a symbolic link at `link` pointing to `target`.
pub trait Linker {
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;
}

/// Optional capability: read a symbolic link's target.
pub trait LinkReader {
    fn read_link(&self, path: &Path) -> Result<PathBuf>;
}

/// Open file or directory handle.
///
/// A handle owns its cursor. Two handles on the same path share content but
/// never each other's position.
pub trait File: Send + Sync + Debug {
    /// Path this handle was opened with.
    fn name(&self) -> &str;

    /// Read at the cursor, advancing it. Returns 0 at end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Read at an absolute offset without moving the cursor.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Write at the cursor (or at the end in append mode), advancing it.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Write at an absolute offset without moving the cursor.
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize>;

    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Resize to `size`, zero-filling on growth.
    fn truncate(&mut self, size: u64) -> Result<()>;

    fn sync(&mut self) -> Result<()>;

    /// Release the handle. Further calls fail with `Closed`.
    fn close(&mut self) -> Result<()>;

    fn stat(&self) -> Result<FileInfo>;

    /// Read directory entries in name order.
    ///
    /// With `n > 0`, returns at most `n` entries per call and `Ok(None)` once
    /// the listing is exhausted. With `n == 0`, returns every remaining entry
    /// (possibly none) and never the exhausted marker.
    fn read_dir(&mut self, n: usize) -> Result<Option<Vec<FileInfo>>>;

    /// Like [`File::read_dir`] but returns names only.
    fn read_dir_names(&mut self, n: usize) -> Result<Option<Vec<String>>> {
        Ok(self
            .read_dir(n)?
            .map(|infos| infos.into_iter().map(|info| info.name).collect()))
    }
}

impl io::Read for Box<dyn File> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        File::read(self.as_mut(), buf).map_err(io::Error::from)
    }
}

impl io::Write for Box<dyn File> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        File::write(self.as_mut(), buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        File::sync(self.as_mut()).map_err(io::Error::from)
    }
}

impl io::Seek for Box<dyn File> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        File::seek(self.as_mut(), pos).map_err(io::Error::from)
    }
}

/// Immutable metadata snapshot captured at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Final path component (`/` for a root).
    pub name: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Permission bits (e.g. `0o644`).
    pub mode: u32,
    /// Last modification time.
    pub modified: SystemTime,
    pub file_type: FileType,
}

impl FileInfo {
    /// Snapshot for a directory.
    pub fn directory(name: impl Into<String>, mode: u32, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mode,
            modified,
            file_type: FileType::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.file_type.is_file()
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type.is_symlink()
    }
}

/// File type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// Open flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Every write goes to the end of the file.
    pub append: bool,
    /// Truncate to zero length on open (requires write).
    pub truncate: bool,
    /// Create if not exists.
    pub create: bool,
    /// With `create`, fail if the path already exists.
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self::read_only()
    }
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            truncate: false,
            create: false,
            exclusive: false,
        }
    }

    pub fn write_only() -> Self {
        Self {
            read: false,
            write: true,
            ..Self::read_only()
        }
    }

    pub fn read_write() -> Self {
        Self {
            write: true,
            ..Self::read_only()
        }
    }

    /// Read/write, created if missing.
    pub fn create() -> Self {
        Self {
            create: true,
            ..Self::read_write()
        }
    }

    /// Read/write, created if missing, emptied if present.
    pub fn create_truncate() -> Self {
        Self {
            truncate: true,
            ..Self::create()
        }
    }

    /// Read/write, must not exist yet.
    pub fn create_new() -> Self {
        Self {
            exclusive: true,
            ..Self::create()
        }
    }

    /// Write-only append, created if missing.
    pub fn append() -> Self {
        Self {
            append: true,
            create: true,
            ..Self::write_only()
        }
    }

    /// True if this open can change the file or create it.
    pub fn is_write(&self) -> bool {
        self.write || self.append || self.truncate || self.create
    }
}

/// Next batch of a name-sorted directory listing for a handle at `offset`.
///
/// Shared by every handle type so they agree on the `read_dir` contract:
/// `n == 0` drains the rest, `n > 0` yields `None` once nothing is left.
pub(crate) fn next_batch(
    entries: &[FileInfo],
    offset: &mut usize,
    n: usize,
) -> Option<Vec<FileInfo>> {
    let start = (*offset).min(entries.len());
    let remaining = entries.len() - start;
    if n > 0 && remaining == 0 {
        return None;
    }
    let take = if n == 0 { remaining } else { n.min(remaining) };
    *offset = start + take;
    Some(entries[start..start + take].to_vec())
}

/// Lstat when the backend supports it, otherwise stat.
///
/// The flag reports whether a real lstat was performed.
pub fn lstat_if_possible(fs: &dyn Fs, path: &Path) -> Result<(FileInfo, bool)> {
    match fs.as_lstater() {
        Some(lstater) => Ok((lstater.lstat(path)?, true)),
        None => Ok((fs.stat(path)?, false)),
    }
}

/// Create a symlink when the backend supports it.
pub fn symlink_if_possible(fs: &dyn Fs, target: &Path, link: &Path) -> Result<()> {
    match fs.as_linker() {
        Some(linker) => linker.symlink(target, link),
        None => Err(Error::unsupported("symlink", link)),
    }
}

/// Read a symlink when the backend supports it.
pub fn read_link_if_possible(fs: &dyn Fs, path: &Path) -> Result<PathBuf> {
    match fs.as_link_reader() {
        Some(reader) => reader.read_link(path),
        None => Err(Error::unsupported("readlink", path)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
        assert!(FileType::Symlink.is_symlink());
    }

    #[test]
    fn test_open_flags() {
        assert!(!OpenFlags::read_only().is_write());
        assert!(OpenFlags::write_only().is_write());
        assert!(!OpenFlags::write_only().read);

        let create = OpenFlags::create_new();
        assert!(create.create && create.exclusive && create.write);

        let append = OpenFlags::append();
        assert!(append.append && append.is_write());
    }

    #[test]
    fn test_next_batch() {
        let entries: Vec<FileInfo> = ["a", "b", "c"]
            .into_iter()
            .map(|name| FileInfo::directory(name, 0o755, SystemTime::UNIX_EPOCH))
            .collect();
        let mut offset = 0;
        assert_eq!(next_batch(&entries, &mut offset, 2).unwrap().len(), 2);
        assert_eq!(next_batch(&entries, &mut offset, 2).unwrap().len(), 1);
        assert!(next_batch(&entries, &mut offset, 2).is_none());
        assert_eq!(next_batch(&entries, &mut offset, 0), Some(vec![]));
    }

    #[test]
    fn test_file_info_json() {
        let info = FileInfo::directory("etc", 0o755, SystemTime::UNIX_EPOCH);
        let json = serde_json::to_string(&info).unwrap();
        let back: FileInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
        assert!(back.is_dir());
    }
}
