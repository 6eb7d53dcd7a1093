//! Copy-on-write overlay filesystem.
//!
//! [`CopyOnWriteFs`] composes a base filesystem, which it never modifies,
//! with a writable layer that absorbs every change.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::traits::{
    File, FileInfo, Fs, LinkReader, Linker, Lstater, OpenFlags, lstat_if_possible, next_batch,
    read_link_if_possible,
};
use super::util;
use crate::error::{Error, ErrorKind, Result};
use crate::path;

/// Mode for layer directories that have no base counterpart to copy from.
const DEFAULT_DIR_MODE: u32 = 0o755;

const COPY_BUF_SIZE: usize = 32 * 1024;

/// Copy-on-write overlay of a writable layer over an immutable base.
///
/// # Behavior
///
/// - **Reads**: the layer wins when it has the path, otherwise the base
///   answers.
/// - **Writes**: a write-mode open, `chmod` or `chtimes` on a path only the
///   base has first *copies it up*: content, mode and modification time are
///   copied into the layer, then the change is applied there.
/// - **Deletes**: entries that exist only in the base cannot be removed
///   (PermissionDenied). Removing a layer entry removes only the layer copy.
/// - **Directories** present in both are listed as the union of their
///   entries, with layer entries replacing same-named base entries.
///
/// # No whiteouts
///
/// Shadowing is decided purely by presence in the layer. Removing a file
/// that was copied up therefore does not delete it: the base version becomes
/// visible again, exactly as it was before the copy-up.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use std::sync::Arc;
/// use stratafs::{CopyOnWriteFs, Fs, MemFs, fs::util};
///
/// # fn main() -> stratafs::Result<()> {
/// let base = Arc::new(MemFs::new());
/// util::write_file(base.as_ref(), Path::new("/config/app.conf"), b"debug=false", 0o644)?;
///
/// let layer = Arc::new(MemFs::new());
/// let overlay = CopyOnWriteFs::new(base.clone(), layer.clone());
///
/// util::write_file(&overlay, Path::new("/config/app.conf"), b"debug=true", 0o644)?;
/// assert_eq!(util::read_file(&overlay, Path::new("/config/app.conf"))?, b"debug=true");
///
/// // The base is untouched.
/// assert_eq!(util::read_file(base.as_ref(), Path::new("/config/app.conf"))?, b"debug=false");
///
/// // Removing the copy re-exposes the base version.
/// overlay.remove(Path::new("/config/app.conf"))?;
/// assert_eq!(util::read_file(&overlay, Path::new("/config/app.conf"))?, b"debug=false");
/// # Ok(())
/// # }
/// ```
pub struct CopyOnWriteFs {
    base: Arc<dyn Fs>,
    layer: Arc<dyn Fs>,
}

impl CopyOnWriteFs {
    pub fn new(base: Arc<dyn Fs>, layer: Arc<dyn Fs>) -> Self {
        Self { base, layer }
    }

    pub fn base(&self) -> &Arc<dyn Fs> {
        &self.base
    }

    pub fn layer(&self) -> &Arc<dyn Fs> {
        &self.layer
    }

    /// True when `name` exists in the base and not in the layer.
    fn is_base_file(&self, name: &Path) -> Result<bool> {
        if util::exists(self.layer.as_ref(), name)? {
            return Ok(false);
        }
        util::exists(self.base.as_ref(), name)
    }

    /// Make sure `dir` is a directory in the layer, creating missing
    /// ancestors with the base's modes where the base has them.
    fn ensure_layer_dir(&self, dir: &Path, fallback_mode: u32) -> Result<()> {
        match self.layer.stat(dir) {
            Ok(info) if info.is_dir() => return Ok(()),
            Ok(_) => return Err(Error::not_a_directory("mkdir", dir)),
            Err(e) if e.is_absent() => {}
            Err(e) => return Err(e),
        }
        if path::is_root(dir) {
            return self.layer.mkdir_all(dir, fallback_mode);
        }
        self.ensure_layer_dir(&path::parent(dir), fallback_mode)?;

        match self.base.stat(dir) {
            Ok(info) if info.is_dir() => {
                self.layer.mkdir(dir, info.mode)?;
                self.layer.chtimes(dir, info.modified, info.modified)
            }
            Ok(_) => Err(Error::not_a_directory("mkdir", dir)),
            Err(e) if e.is_absent() => self.layer.mkdir(dir, fallback_mode),
            Err(e) => Err(e),
        }
    }

    /// Copy a base entry into the layer.
    fn copy_to_layer(&self, name: &Path) -> Result<()> {
        let info = self.base.stat(name)?;
        self.ensure_layer_dir(&path::parent(name), DEFAULT_DIR_MODE)?;

        if info.is_dir() {
            self.layer.mkdir(name, info.mode)?;
        } else if let Err(e) = self.copy_contents(name, info.mode) {
            // Leave no truncated copy shadowing the base.
            let _ = self.layer.remove(name);
            return Err(e);
        }
        self.layer.chmod(name, info.mode)?;
        self.layer.chtimes(name, info.modified, info.modified)?;

        tracing::debug!(path = %name.display(), size = info.size, "copied up to layer");
        Ok(())
    }

    fn copy_contents(&self, name: &Path, mode: u32) -> Result<()> {
        let mut src = self.base.open(name)?;
        let mut dst = self
            .layer
            .open_file(name, OpenFlags::create_truncate(), mode)?;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let mut written = 0;
            while written < n {
                written += dst.write(&buf[written..n])?;
            }
        }
        dst.close()?;
        src.close()
    }

    fn open_for_write(&self, name: &Path, flags: OpenFlags, mode: u32) -> Result<Box<dyn File>> {
        if self.is_base_file(name)? {
            if flags.create && flags.exclusive {
                return Err(Error::already_exists("open", name));
            }
            self.copy_to_layer(name)?;
        } else if flags.create && !util::exists(self.layer.as_ref(), name)? {
            // Only an open that may create the file materializes its parents.
            self.ensure_layer_dir(&path::parent(name), DEFAULT_DIR_MODE)?;
        }
        self.layer.open_file(name, flags, mode)
    }

    fn open_for_read(&self, name: &Path, flags: OpenFlags, mode: u32) -> Result<Box<dyn File>> {
        let layer_info = match self.layer.stat(name) {
            Ok(info) => info,
            Err(e) if e.is_absent() => return self.base.open_file(name, flags, mode),
            Err(e) => return Err(e),
        };
        if !layer_info.is_dir() {
            return self.layer.open_file(name, flags, mode);
        }

        match self.base.stat(name) {
            Ok(info) if info.is_dir() => {
                let layer = self.layer.open_file(name, flags, mode)?;
                let base = self.base.open_file(name, flags, mode)?;
                tracing::trace!(path = %name.display(), "merging directory from both layers");
                Ok(Box::new(UnionFile::new(name, base, layer)))
            }
            Ok(_) => self.layer.open_file(name, flags, mode),
            Err(e) if e.is_absent() => self.layer.open_file(name, flags, mode),
            Err(e) => Err(e),
        }
    }
}

impl Fs for CopyOnWriteFs {
    fn name(&self) -> &str {
        "CopyOnWriteFs"
    }

    fn open_file(&self, name: &Path, flags: OpenFlags, mode: u32) -> Result<Box<dyn File>> {
        let name = path::normalize(name);
        if flags.is_write() {
            self.open_for_write(&name, flags, mode)
        } else {
            self.open_for_read(&name, flags, mode)
        }
    }

    fn mkdir(&self, name: &Path, mode: u32) -> Result<()> {
        let name = path::normalize(name);
        if util::dir_exists(self.base.as_ref(), &name)? {
            return Err(Error::already_exists("mkdir", &name));
        }
        self.ensure_layer_dir(&path::parent(&name), DEFAULT_DIR_MODE)?;
        self.layer.mkdir_all(&name, mode)
    }

    fn mkdir_all(&self, name: &Path, mode: u32) -> Result<()> {
        let name = path::normalize(name);
        if util::dir_exists(self.base.as_ref(), &name)? {
            return Ok(());
        }
        self.ensure_layer_dir(&name, mode)
    }

    fn remove(&self, name: &Path) -> Result<()> {
        let name = path::normalize(name);
        if self.is_base_file(&name)? {
            return Err(Error::permission_denied("remove", &name));
        }
        self.layer.remove(&name)
    }

    fn remove_all(&self, name: &Path) -> Result<()> {
        let name = path::normalize(name);
        if self.is_base_file(&name)? {
            return Err(Error::permission_denied("remove", &name));
        }
        self.layer.remove_all(&name)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = path::normalize(from);
        let to = path::normalize(to);
        if self.is_base_file(&from)? {
            return Err(Error::permission_denied("rename", &from));
        }
        self.layer.rename(&from, &to)
    }

    fn stat(&self, name: &Path) -> Result<FileInfo> {
        let name = path::normalize(name);
        match self.layer.stat(&name) {
            Err(e) if e.is_absent() => self.base.stat(&name),
            result => result,
        }
    }

    fn chmod(&self, name: &Path, mode: u32) -> Result<()> {
        let name = path::normalize(name);
        if self.is_base_file(&name)? {
            self.copy_to_layer(&name)?;
        }
        self.layer.chmod(&name, mode)
    }

    fn chtimes(&self, name: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let name = path::normalize(name);
        if self.is_base_file(&name)? {
            self.copy_to_layer(&name)?;
        }
        self.layer.chtimes(&name, atime, mtime)
    }

    fn as_lstater(&self) -> Option<&dyn Lstater> {
        (self.layer.as_lstater().is_some() || self.base.as_lstater().is_some())
            .then_some(self as &dyn Lstater)
    }

    fn as_linker(&self) -> Option<&dyn Linker> {
        self.layer.as_linker().map(|_| self as &dyn Linker)
    }

    fn as_link_reader(&self) -> Option<&dyn LinkReader> {
        (self.layer.as_link_reader().is_some() || self.base.as_link_reader().is_some())
            .then_some(self as &dyn LinkReader)
    }
}

impl Lstater for CopyOnWriteFs {
    fn lstat(&self, name: &Path) -> Result<FileInfo> {
        let name = path::normalize(name);
        match lstat_if_possible(self.layer.as_ref(), &name) {
            Ok((info, _)) => Ok(info),
            Err(e) if e.is_absent() => lstat_if_possible(self.base.as_ref(), &name).map(|(i, _)| i),
            Err(e) => Err(e),
        }
    }
}

impl Linker for CopyOnWriteFs {
    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let link = path::normalize(link);
        if self.is_base_file(&link)? {
            return Err(Error::already_exists("symlink", &link));
        }
        let linker = self
            .layer
            .as_linker()
            .ok_or_else(|| Error::unsupported("symlink", &link))?;
        self.ensure_layer_dir(&path::parent(&link), DEFAULT_DIR_MODE)?;
        linker.symlink(target, &link)
    }
}

impl LinkReader for CopyOnWriteFs {
    fn read_link(&self, name: &Path) -> Result<PathBuf> {
        let name = path::normalize(name);
        match read_link_if_possible(self.layer.as_ref(), &name) {
            Err(e) if e.is_absent() || matches!(e.kind(), ErrorKind::Unsupported) => {
                read_link_if_possible(self.base.as_ref(), &name)
            }
            result => result,
        }
    }
}

/// Directory handle over the same directory in both layers.
///
/// Listings merge both sides by name with the layer winning; everything else
/// goes to the layer's handle.
#[derive(Debug)]
pub struct UnionFile {
    name: String,
    base: Box<dyn File>,
    layer: Box<dyn File>,
    merged: Option<Vec<FileInfo>>,
    dir_offset: usize,
}

impl UnionFile {
    fn new(name: &Path, base: Box<dyn File>, layer: Box<dyn File>) -> Self {
        Self {
            name: name.to_string_lossy().into_owned(),
            base,
            layer,
            merged: None,
            dir_offset: 0,
        }
    }

    fn merge(&mut self) -> Result<Vec<FileInfo>> {
        let mut by_name = BTreeMap::new();
        for info in self.base.read_dir(0)?.unwrap_or_default() {
            by_name.insert(info.name.clone(), info);
        }
        for info in self.layer.read_dir(0)?.unwrap_or_default() {
            by_name.insert(info.name.clone(), info);
        }
        Ok(by_name.into_values().collect())
    }
}

impl File for UnionFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.layer.read(buf)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.layer.read_at(buf, offset)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.layer.write(buf)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.layer.write_at(buf, offset)
    }

    /// Seeking to the start also restarts the merged listing.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let offset = self.layer.seek(pos)?;
        self.base.seek(pos)?;
        if offset == 0 {
            self.merged = None;
            self.dir_offset = 0;
        }
        Ok(offset)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.layer.truncate(size)
    }

    fn sync(&mut self) -> Result<()> {
        self.layer.sync()
    }

    fn close(&mut self) -> Result<()> {
        let layer = self.layer.close();
        let base = self.base.close();
        layer.and(base)
    }

    fn stat(&self) -> Result<FileInfo> {
        self.layer.stat()
    }

    fn read_dir(&mut self, n: usize) -> Result<Option<Vec<FileInfo>>> {
        if self.merged.is_none() {
            self.merged = Some(self.merge()?);
        }
        let entries = self.merged.as_deref().unwrap_or_default();
        Ok(next_batch(entries, &mut self.dir_offset, n))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::MemFs;
    use crate::fs::util::{read_file, write_file};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Fixture {
        base: Arc<MemFs>,
        layer: Arc<MemFs>,
        fs: CopyOnWriteFs,
    }

    fn fixture() -> Fixture {
        let base = Arc::new(MemFs::new());
        let layer = Arc::new(MemFs::new());
        let fs = CopyOnWriteFs::new(base.clone(), layer.clone());
        Fixture { base, layer, fs }
    }

    #[test]
    fn reads_fall_through_to_base() {
        let t = fixture();
        write_file(t.base.as_ref(), Path::new("/etc/motd"), b"welcome", 0o644).unwrap();
        assert_eq!(read_file(&t.fs, Path::new("/etc/motd")).unwrap(), b"welcome");
        assert!(t.layer.stat(Path::new("/etc/motd")).unwrap_err().is_not_found());
    }

    #[test]
    fn chmod_copies_up() {
        let t = fixture();
        write_file(t.base.as_ref(), Path::new("/f"), b"AAAA", 0o644).unwrap();

        t.fs.chmod(Path::new("/f"), 0o600).unwrap();

        let layer_info = t.layer.stat(Path::new("/f")).unwrap();
        assert_eq!(layer_info.mode, 0o600);
        assert_eq!(read_file(t.layer.as_ref(), Path::new("/f")).unwrap(), b"AAAA");
        assert_eq!(t.base.stat(Path::new("/f")).unwrap().mode, 0o644);
    }

    #[test]
    fn write_copies_up_then_appends() {
        let t = fixture();
        write_file(t.base.as_ref(), Path::new("/log"), b"one\n", 0o640).unwrap();

        let mut f = t
            .fs
            .open_file(Path::new("/log"), OpenFlags::append(), 0o644)
            .unwrap();
        f.write(b"two\n").unwrap();
        f.close().unwrap();

        assert_eq!(read_file(t.layer.as_ref(), Path::new("/log")).unwrap(), b"one\ntwo\n");
        assert_eq!(t.layer.stat(Path::new("/log")).unwrap().mode, 0o640);
        assert_eq!(read_file(t.base.as_ref(), Path::new("/log")).unwrap(), b"one\n");
    }

    #[test]
    fn copy_up_keeps_mtime_and_parent_modes() {
        let t = fixture();
        t.base.mkdir_all(Path::new("/srv/data"), 0o700).unwrap();
        write_file(t.base.as_ref(), Path::new("/srv/data/x"), b"x", 0o644).unwrap();
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        t.base.chtimes(Path::new("/srv/data/x"), old, old).unwrap();

        t.fs.chmod(Path::new("/srv/data/x"), 0o600).unwrap();

        assert_eq!(t.layer.stat(Path::new("/srv/data/x")).unwrap().modified, old);
        assert_eq!(t.layer.stat(Path::new("/srv")).unwrap().mode, 0o700);
        assert_eq!(t.layer.stat(Path::new("/srv/data")).unwrap().mode, 0o700);
    }

    #[test]
    fn new_file_in_base_directory() {
        let t = fixture();
        t.base.mkdir(Path::new("/home"), 0o750).unwrap();
        write_file(&t.fs, Path::new("/home/new.txt"), b"n", 0o644).unwrap();
        assert_eq!(t.layer.stat(Path::new("/home")).unwrap().mode, 0o750);
        assert!(t.base.stat(Path::new("/home/new.txt")).is_err());
    }

    #[test]
    fn base_only_entries_cannot_be_removed() {
        let t = fixture();
        write_file(t.base.as_ref(), Path::new("/keep"), b"k", 0o644).unwrap();
        for result in [
            t.fs.remove(Path::new("/keep")),
            t.fs.remove_all(Path::new("/keep")),
            t.fs.rename(Path::new("/keep"), Path::new("/moved")),
        ] {
            assert!(matches!(result.unwrap_err().kind(), ErrorKind::PermissionDenied));
        }
        assert!(t.fs.remove(Path::new("/missing")).unwrap_err().is_not_found());
        t.fs.remove_all(Path::new("/missing")).unwrap();
    }

    #[test]
    fn removing_a_copy_re_exposes_base() {
        let t = fixture();
        write_file(t.base.as_ref(), Path::new("/f"), b"original", 0o644).unwrap();
        write_file(&t.fs, Path::new("/f"), b"changed", 0o644).unwrap();
        assert_eq!(read_file(&t.fs, Path::new("/f")).unwrap(), b"changed");

        t.fs.remove(Path::new("/f")).unwrap();
        assert_eq!(read_file(&t.fs, Path::new("/f")).unwrap(), b"original");
    }

    #[test]
    fn directories_merge_with_layer_precedence() {
        let t = fixture();
        write_file(t.base.as_ref(), Path::new("/d/a"), b"a", 0o644).unwrap();
        write_file(t.base.as_ref(), Path::new("/d/b"), b"base-b", 0o644).unwrap();
        write_file(t.layer.as_ref(), Path::new("/d/b"), b"b", 0o644).unwrap();
        write_file(t.layer.as_ref(), Path::new("/d/c"), b"c", 0o644).unwrap();

        let mut dir = t.fs.open(Path::new("/d")).unwrap();
        let first = dir.read_dir(2).unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].name, "b");
        assert_eq!(first[1].size, 1);
        assert_eq!(dir.read_dir_names(2).unwrap(), Some(vec!["c".to_string()]));
        assert_eq!(dir.read_dir(2).unwrap(), None);

        dir.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(dir.read_dir(0).unwrap().unwrap().len(), 3);
        dir.close().unwrap();
    }

    #[test]
    fn mkdir_respects_base_directories() {
        let t = fixture();
        t.base.mkdir(Path::new("/etc"), 0o755).unwrap();
        assert!(t.fs.mkdir(Path::new("/etc"), 0o755).unwrap_err().is_already_exists());
        t.fs.mkdir_all(Path::new("/etc"), 0o755).unwrap();
        assert!(t.layer.stat(Path::new("/etc")).is_err());

        t.fs.mkdir(Path::new("/etc/conf.d"), 0o700).unwrap();
        assert_eq!(t.layer.stat(Path::new("/etc/conf.d")).unwrap().mode, 0o700);
        assert!(t.base.stat(Path::new("/etc/conf.d")).is_err());
    }

    #[test]
    fn exclusive_create_sees_base() {
        let t = fixture();
        write_file(t.base.as_ref(), Path::new("/lock"), b"", 0o644).unwrap();
        let err = t
            .fs
            .open_file(Path::new("/lock"), OpenFlags::create_new(), 0o644)
            .unwrap_err();
        assert!(err.is_already_exists());
        assert!(t.layer.stat(Path::new("/lock")).is_err());
    }

    #[test]
    fn failed_open_leaves_layer_untouched() {
        let t = fixture();
        t.base.mkdir_all(Path::new("/etc"), 0o750).unwrap();

        for name in ["/no/such/dir/file", "/etc/missing"] {
            let err = t
                .fs
                .open_file(Path::new(name), OpenFlags::read_write(), 0)
                .unwrap_err();
            assert!(err.is_not_found(), "{name}");
        }
        assert!(t.layer.stat(Path::new("/no")).unwrap_err().is_not_found());
        assert!(t.layer.stat(Path::new("/etc")).unwrap_err().is_not_found());

        // Creating does bring the parent up with the base's mode.
        t.fs.create(Path::new("/etc/new")).unwrap();
        assert_eq!(t.layer.stat(Path::new("/etc")).unwrap().mode, 0o750);
    }

    #[test]
    fn rename_inside_layer() {
        let t = fixture();
        write_file(&t.fs, Path::new("/a"), b"a", 0o644).unwrap();
        t.fs.rename(Path::new("/a"), Path::new("/b")).unwrap();
        assert_eq!(read_file(&t.fs, Path::new("/b")).unwrap(), b"a");
    }

    #[test]
    fn symlinks_go_to_layer() {
        let t = fixture();
        write_file(t.base.as_ref(), Path::new("/target"), b"t", 0o644).unwrap();
        t.base.symlink(Path::new("/target"), Path::new("/base-link")).unwrap();

        t.fs.symlink(Path::new("/target"), Path::new("/layer-link")).unwrap();
        assert!(t.layer.lstat(Path::new("/layer-link")).unwrap().is_symlink());
        assert_eq!(
            t.fs.read_link(Path::new("/base-link")).unwrap(),
            PathBuf::from("/target")
        );
        assert!(t.fs.lstat(Path::new("/base-link")).unwrap().is_symlink());
        assert!(t.fs.symlink(Path::new("/x"), Path::new("/target")).is_err());
    }
}
