//! Closeable confinement handle with strict path checking.
//!
//! A [`Root`] is a [`BasePathFs`] that only accepts syntactically local
//! names: relative, non-empty, and never climbing above the root after
//! cleaning. Absolute names and leading `..` are rejected before any prefix
//! check runs. A root is opened on an existing directory, can derive nested
//! roots, and stops working once closed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use super::basepath::BasePathFs;
use super::traits::{
    File, FileInfo, Fs, OpenFlags, lstat_if_possible, read_link_if_possible, symlink_if_possible,
};
use crate::error::{Error, ErrorKind, Result};
use crate::path;

/// Directory handle that confines every operation beneath it.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use std::sync::Arc;
/// use stratafs::{Fs, MemFs, Root};
///
/// # fn main() -> stratafs::Result<()> {
/// let fs = Arc::new(MemFs::new());
/// fs.mkdir_all(Path::new("/home/user"), 0o755)?;
///
/// let root = Root::open(fs, "/home/user")?;
/// root.mkdir("docs", 0o755)?;
/// assert!(root.stat("docs")?.is_dir());
///
/// // Absolute and escaping names are refused outright.
/// assert!(root.stat("/etc").is_err());
/// assert!(root.stat("../other").is_err());
///
/// root.close()?;
/// assert!(root.stat("docs").is_err());
/// # Ok(())
/// # }
/// ```
pub struct Root {
    fs: BasePathFs,
    closed: AtomicBool,
}

impl Root {
    /// Open a root on the existing directory `dir` of `source`.
    pub fn open(source: Arc<dyn Fs>, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = path::normalize(dir.as_ref());
        let info = source.stat(&dir)?;
        if !info.is_dir() {
            return Err(Error::not_a_directory("openroot", &dir));
        }
        tracing::debug!(dir = %dir.display(), "root opened");
        Ok(Self {
            fs: BasePathFs::new(source, dir),
            closed: AtomicBool::new(false),
        })
    }

    /// Directory this root is confined to, in the source filesystem.
    pub fn dir(&self) -> &Path {
        self.fs.base()
    }

    /// Open a root on a subdirectory. The new root closes independently.
    pub fn open_root(&self, name: impl AsRef<Path>) -> Result<Root> {
        let name = name.as_ref();
        let virtual_path = self.check("openroot", name)?;
        let real = self.fs.real_path("openroot", &virtual_path)?;
        Root::open(Arc::clone(self.fs.source()), real).map_err(|e| e.with_path(name))
    }

    /// Close the root. Only the first close succeeds.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::new("close", self.dir(), ErrorKind::Closed));
        }
        tracing::debug!(dir = %self.dir().display(), "root closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Validate `name` and return it rooted for the inner [`BasePathFs`].
    fn check(&self, op: &'static str, name: &Path) -> Result<PathBuf> {
        if self.is_closed() {
            return Err(Error::new(op, name, ErrorKind::Closed));
        }
        if !path::is_local(name) {
            tracing::trace!(op, path = %name.display(), "non-local name rejected");
            return Err(Error::invalid(op, name, "path escapes from parent"));
        }
        Ok(path::normalize(name))
    }

    /// Like [`Root::check`] but also refuses the root itself.
    fn check_entry(&self, op: &'static str, name: &Path) -> Result<PathBuf> {
        let virtual_path = self.check(op, name)?;
        if path::is_root(&virtual_path) {
            return Err(Error::invalid(op, name, "operation not permitted on the root"));
        }
        Ok(virtual_path)
    }

    /// Run `f` on the inner filesystem, attributing errors to `name`.
    fn with<T>(
        &self,
        op: &'static str,
        name: &Path,
        f: impl FnOnce(&BasePathFs, &Path) -> Result<T>,
    ) -> Result<T> {
        let virtual_path = self.check(op, name)?;
        f(&self.fs, &virtual_path).map_err(|e| e.with_path(name))
    }

    pub fn create(&self, name: impl AsRef<Path>) -> Result<Box<dyn File>> {
        self.with("open", name.as_ref(), |fs, p| fs.create(p))
    }

    pub fn open_file(
        &self,
        name: impl AsRef<Path>,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Box<dyn File>> {
        self.with("open", name.as_ref(), |fs, p| fs.open_file(p, flags, mode))
    }

    /// Open read-only. Named `open_path` because [`Root::open`] opens roots.
    pub fn open_path(&self, name: impl AsRef<Path>) -> Result<Box<dyn File>> {
        self.with("open", name.as_ref(), |fs, p| fs.open(p))
    }

    pub fn mkdir(&self, name: impl AsRef<Path>, mode: u32) -> Result<()> {
        self.with("mkdir", name.as_ref(), |fs, p| fs.mkdir(p, mode))
    }

    pub fn mkdir_all(&self, name: impl AsRef<Path>, mode: u32) -> Result<()> {
        self.with("mkdir", name.as_ref(), |fs, p| fs.mkdir_all(p, mode))
    }

    pub fn remove(&self, name: impl AsRef<Path>) -> Result<()> {
        let name = name.as_ref();
        let virtual_path = self.check_entry("remove", name)?;
        self.fs.remove(&virtual_path).map_err(|e| e.with_path(name))
    }

    pub fn remove_all(&self, name: impl AsRef<Path>) -> Result<()> {
        let name = name.as_ref();
        let virtual_path = self.check_entry("remove", name)?;
        self.fs.remove_all(&virtual_path).map_err(|e| e.with_path(name))
    }

    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        let (from, to) = (from.as_ref(), to.as_ref());
        let virtual_from = self.check_entry("rename", from)?;
        let virtual_to = self.check_entry("rename", to)?;
        self.fs.rename(&virtual_from, &virtual_to).map_err(|e| {
            if e.path() == virtual_to {
                e.with_path(to)
            } else {
                e.with_path(from)
            }
        })
    }

    pub fn stat(&self, name: impl AsRef<Path>) -> Result<FileInfo> {
        self.with("stat", name.as_ref(), |fs, p| fs.stat(p))
    }

    /// Stat without following a final symlink, or plain stat when the
    /// source cannot lstat.
    pub fn lstat(&self, name: impl AsRef<Path>) -> Result<FileInfo> {
        self.with("lstat", name.as_ref(), |fs, p| {
            lstat_if_possible(fs, p).map(|(info, _)| info)
        })
    }

    pub fn chmod(&self, name: impl AsRef<Path>, mode: u32) -> Result<()> {
        self.with("chmod", name.as_ref(), |fs, p| fs.chmod(p, mode))
    }

    pub fn chtimes(
        &self,
        name: impl AsRef<Path>,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> Result<()> {
        self.with("chtimes", name.as_ref(), |fs, p| fs.chtimes(p, atime, mtime))
    }

    /// Create a symlink at `link`. Absolute targets are interpreted inside
    /// the root; relative targets must not climb above it.
    ///
    /// Links that already exist in the source are followed by the source
    /// itself and are not re-checked.
    pub fn symlink(&self, target: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
        let (target, link) = (target.as_ref(), link.as_ref());
        let virtual_link = self.check_entry("symlink", link)?;
        if !target.has_root() {
            let link_dir = path::parent(&virtual_link);
            let relative_dir = link_dir.strip_prefix("/").unwrap_or(&link_dir);
            if !path::is_local(&Path::new(".").join(relative_dir).join(target)) {
                return Err(Error::invalid("symlink", link, "link target escapes from root"));
            }
        }
        symlink_if_possible(&self.fs, target, &virtual_link).map_err(|e| e.with_path(link))
    }

    pub fn read_link(&self, name: impl AsRef<Path>) -> Result<PathBuf> {
        self.with("readlink", name.as_ref(), |fs, p| {
            read_link_if_possible(fs, p)
        })
    }
}

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("dir", &self.dir())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::traits::LinkReader;
    use crate::fs::MemFs;
    use crate::fs::util::write_file;
    use pretty_assertions::assert_eq;

    fn setup() -> (Arc<MemFs>, Root) {
        let fs = Arc::new(MemFs::new());
        write_file(fs.as_ref(), Path::new("/home/user/notes.txt"), b"n", 0o644).unwrap();
        write_file(fs.as_ref(), Path::new("/etc/shadow"), b"s", 0o600).unwrap();
        let root = Root::open(fs.clone(), "/home/user").unwrap();
        (fs, root)
    }

    #[test]
    fn open_requires_directory() {
        let (fs, _) = setup();
        assert!(Root::open(fs.clone(), "/missing").unwrap_err().is_not_found());
        let err = Root::open(fs, "/etc/shadow").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotADirectory));
    }

    #[test]
    fn rejects_non_local_names() {
        let (_, root) = setup();
        for bad in ["/etc/shadow", "../../etc/shadow", "a/../../x", ""] {
            let err = root.stat(bad).unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::InvalidArgument(_)), "{bad}");
        }
        assert_eq!(root.stat("notes.txt").unwrap().size, 1);
        assert!(root.stat(".").unwrap().is_dir());
        assert!(root.stat("sub/../notes.txt").is_ok());
    }

    #[test]
    fn root_itself_cannot_be_removed() {
        let (fs, root) = setup();
        assert!(root.remove_all(".").is_err());
        assert!(fs.stat(Path::new("/home/user/notes.txt")).is_ok());
    }

    #[test]
    fn close_is_final() {
        let (_, root) = setup();
        root.close().unwrap();
        assert!(matches!(root.close().unwrap_err().kind(), ErrorKind::Closed));
        assert!(matches!(
            root.open_path("notes.txt").unwrap_err().kind(),
            ErrorKind::Closed
        ));
        assert!(root.is_closed());
    }

    #[test]
    fn nested_roots_close_independently() {
        let (fs, root) = setup();
        root.mkdir_all("projects/alpha", 0o755).unwrap();
        let nested = root.open_root("projects").unwrap();
        assert_eq!(nested.dir(), Path::new("/home/user/projects"));

        write_file(fs.as_ref(), Path::new("/home/user/projects/alpha/a"), b"", 0o644).unwrap();
        assert!(nested.stat("alpha/a").is_ok());
        assert!(nested.stat("../notes.txt").is_err());

        nested.close().unwrap();
        assert!(root.stat("projects").is_ok());
        assert!(root.open_root("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn rename_within_root() {
        let (fs, root) = setup();
        root.rename("notes.txt", "archive/notes.txt").unwrap();
        assert!(fs.stat(Path::new("/home/user/archive/notes.txt")).is_ok());
        assert!(root.rename("archive/notes.txt", "../escaped").is_err());
    }

    #[test]
    fn absolute_symlink_targets_stay_inside() {
        let (fs, root) = setup();
        root.symlink("/notes.txt", "link").unwrap();
        assert_eq!(
            fs.read_link(Path::new("/home/user/link")).unwrap(),
            PathBuf::from("/home/user/notes.txt")
        );
        assert!(root.lstat("link").unwrap().is_symlink());
        assert!(root.stat("link").unwrap().is_file());
    }

    #[test]
    fn relative_symlink_targets_cannot_climb_out() {
        let (_, root) = setup();
        root.symlink("notes.txt", "ok").unwrap();
        root.symlink("../notes.txt", "dir/ok").unwrap();
        let err = root.symlink("../../../etc/shadow", "dir/bad").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument(_)));
        assert!(root.symlink("../x", "bad").is_err());
    }
}
