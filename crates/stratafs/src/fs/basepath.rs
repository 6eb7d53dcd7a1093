//! Path confinement.
//!
//! [`BasePathFs`] restricts a backend to one subtree. Every incoming path is
//! appended to the base, cleaned, and must still lie under the base. Paths
//! that escape are reported as missing without the child ever being asked,
//! so the caller learns nothing about what exists outside the jail.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::named::NamedFile;
use super::traits::{File, FileInfo, Fs, LinkReader, Linker, Lstater, OpenFlags};
use crate::error::{Error, Result};
use crate::path;

/// Filesystem confined to a subtree of another filesystem.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use std::sync::Arc;
/// use stratafs::{BasePathFs, Fs, MemFs, fs::util};
///
/// # fn main() -> stratafs::Result<()> {
/// let host = Arc::new(MemFs::new());
/// util::write_file(host.as_ref(), Path::new("/srv/www/index.html"), b"hi", 0o644)?;
/// util::write_file(host.as_ref(), Path::new("/etc/passwd"), b"root", 0o600)?;
///
/// let jail = BasePathFs::new(host, "/srv/www");
/// assert_eq!(util::read_file(&jail, Path::new("/index.html"))?, b"hi");
///
/// // Climbing out looks exactly like a missing file.
/// let err = jail.stat(Path::new("/../../etc/passwd")).unwrap_err();
/// assert!(err.is_not_found());
/// # Ok(())
/// # }
/// ```
pub struct BasePathFs {
    source: Arc<dyn Fs>,
    base: PathBuf,
}

impl BasePathFs {
    /// Confine `source` to `base`. The base is normalized but not required
    /// to exist yet.
    pub fn new(source: Arc<dyn Fs>, base: impl AsRef<Path>) -> Self {
        Self {
            source,
            base: path::normalize(base.as_ref()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn source(&self) -> &Arc<dyn Fs> {
        &self.source
    }

    /// Translate a caller path into the backend path, or fail with NotFound
    /// if it escapes the base.
    pub fn real_path(&self, op: &'static str, name: &Path) -> Result<PathBuf> {
        let real = path::join(&self.base, name);
        if !real.starts_with(&self.base) {
            tracing::trace!(
                op,
                path = %name.display(),
                base = %self.base.display(),
                "path escapes confinement"
            );
            return Err(Error::not_found(op, name));
        }
        Ok(real)
    }

    /// Map a symlink target written by a caller into backend space.
    ///
    /// Relative targets are resolved against the link's directory and stored
    /// as absolute backend paths, so the link cannot point out of the base
    /// now or after it is renamed.
    fn real_target(&self, op: &'static str, target: &Path, real_link: &Path) -> Result<PathBuf> {
        if target.has_root() {
            return self.real_path(op, target);
        }
        let resolved = path::join(&path::parent(real_link), target);
        if !resolved.starts_with(&self.base) {
            tracing::trace!(
                op,
                target = %target.display(),
                base = %self.base.display(),
                "link target escapes confinement"
            );
            return Err(Error::not_found(op, target));
        }
        Ok(resolved)
    }
}

impl Fs for BasePathFs {
    fn name(&self) -> &str {
        "BasePathFs"
    }

    fn open_file(&self, name: &Path, flags: OpenFlags, mode: u32) -> Result<Box<dyn File>> {
        let real = self.real_path("open", name)?;
        let inner = self
            .source
            .open_file(&real, flags, mode)
            .map_err(|e| e.with_path(name))?;
        Ok(NamedFile::wrap(inner, name))
    }

    fn mkdir(&self, name: &Path, mode: u32) -> Result<()> {
        let real = self.real_path("mkdir", name)?;
        self.source.mkdir(&real, mode).map_err(|e| e.with_path(name))
    }

    fn mkdir_all(&self, name: &Path, mode: u32) -> Result<()> {
        let real = self.real_path("mkdir", name)?;
        self.source
            .mkdir_all(&real, mode)
            .map_err(|e| e.with_path(name))
    }

    fn remove(&self, name: &Path) -> Result<()> {
        let real = self.real_path("remove", name)?;
        self.source.remove(&real).map_err(|e| e.with_path(name))
    }

    fn remove_all(&self, name: &Path) -> Result<()> {
        let real = self.real_path("remove", name)?;
        self.source.remove_all(&real).map_err(|e| e.with_path(name))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let real_from = self.real_path("rename", from)?;
        let real_to = self.real_path("rename", to)?;
        self.source.rename(&real_from, &real_to).map_err(|e| {
            if e.path() == real_to {
                e.with_path(to)
            } else {
                e.with_path(from)
            }
        })
    }

    fn stat(&self, name: &Path) -> Result<FileInfo> {
        let real = self.real_path("stat", name)?;
        let mut info = self.source.stat(&real).map_err(|e| e.with_path(name))?;
        info.name = path::file_name(&path::normalize(name));
        Ok(info)
    }

    fn chmod(&self, name: &Path, mode: u32) -> Result<()> {
        let real = self.real_path("chmod", name)?;
        self.source.chmod(&real, mode).map_err(|e| e.with_path(name))
    }

    fn chtimes(&self, name: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let real = self.real_path("chtimes", name)?;
        self.source
            .chtimes(&real, atime, mtime)
            .map_err(|e| e.with_path(name))
    }

    fn as_lstater(&self) -> Option<&dyn Lstater> {
        self.source.as_lstater().map(|_| self as &dyn Lstater)
    }

    fn as_linker(&self) -> Option<&dyn Linker> {
        self.source.as_linker().map(|_| self as &dyn Linker)
    }

    fn as_link_reader(&self) -> Option<&dyn LinkReader> {
        self.source.as_link_reader().map(|_| self as &dyn LinkReader)
    }
}

impl Lstater for BasePathFs {
    fn lstat(&self, name: &Path) -> Result<FileInfo> {
        let real = self.real_path("lstat", name)?;
        let lstater = self
            .source
            .as_lstater()
            .ok_or_else(|| Error::unsupported("lstat", name))?;
        let mut info = lstater.lstat(&real).map_err(|e| e.with_path(name))?;
        info.name = path::file_name(&path::normalize(name));
        Ok(info)
    }
}

impl Linker for BasePathFs {
    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let real_link = self.real_path("symlink", link)?;
        let real_target = self.real_target("symlink", target, &real_link)?;
        let linker = self
            .source
            .as_linker()
            .ok_or_else(|| Error::unsupported("symlink", link))?;
        linker
            .symlink(&real_target, &real_link)
            .map_err(|e| e.with_path(link))
    }
}

impl LinkReader for BasePathFs {
    /// Targets inside the base come back re-rooted at `/`.
    fn read_link(&self, name: &Path) -> Result<PathBuf> {
        let real = self.real_path("readlink", name)?;
        let reader = self
            .source
            .as_link_reader()
            .ok_or_else(|| Error::unsupported("readlink", name))?;
        let target = reader.read_link(&real).map_err(|e| e.with_path(name))?;
        if target.has_root() {
            if let Some(inside) = path::strip_base(&path::clean(&target), &self.base) {
                return Ok(inside);
            }
        }
        Ok(target)
    }
}
