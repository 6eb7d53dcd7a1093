//! Symlink resolution over any backend that can lstat and read links.
//!
//! The resolver works on `/`-separated strings and collapses `.`, `..` and
//! repeated separators itself, so it never depends on host path rules the
//! backend may not share.

use std::path::{Path, PathBuf};

use super::traits::Fs;
use crate::error::{Error, Result};

/// Maximum number of link substitutions before giving up.
///
/// This is a plain bound, not cycle detection: a genuine cycle and a very
/// long acyclic chain fail the same way.
pub const MAX_SYMLINK_STEPS: usize = 255;

/// Resolve every symlink in `path`, returning the final link-free path.
///
/// The path is scanned from its end toward the root. Whenever the current
/// prefix is a symlink, its target is spliced in: an absolute target
/// replaces the prefix, a relative one is resolved against the link's
/// directory. Scanning then restarts from the end of the new path. Prefixes
/// that do not exist are treated as ordinary components.
///
/// Fails with Unsupported if the backend cannot both lstat and read links,
/// and with InvalidArgument after [`MAX_SYMLINK_STEPS`] substitutions.
///
/// # Example
///
/// ```rust
/// use std::path::{Path, PathBuf};
/// use stratafs::{Fs, Linker, MemFs, resolve_symlinks};
///
/// # fn main() -> stratafs::Result<()> {
/// let fs = MemFs::new();
/// fs.mkdir_all(Path::new("/b/c"), 0o755)?;
/// fs.symlink(Path::new("../b/c"), Path::new("/a/link"))?;
///
/// assert_eq!(resolve_symlinks(&fs, Path::new("/a/link"))?, PathBuf::from("/b/c"));
/// # Ok(())
/// # }
/// ```
pub fn resolve_symlinks(fs: &dyn Fs, path: &Path) -> Result<PathBuf> {
    let (Some(lstater), Some(reader)) = (fs.as_lstater(), fs.as_link_reader()) else {
        return Err(Error::unsupported("evalsymlinks", path));
    };

    let mut current = collapse(&path.to_string_lossy());
    let mut prefix_len = current.len();
    let mut steps = 0;

    loop {
        let prefix = &current[..prefix_len];
        let is_link = match lstater.lstat(Path::new(prefix)) {
            Ok(info) => info.is_symlink(),
            Err(e) if e.is_absent() => false,
            Err(e) => return Err(e.with_path(path)),
        };

        if is_link {
            steps += 1;
            if steps > MAX_SYMLINK_STEPS {
                return Err(Error::invalid(
                    "evalsymlinks",
                    path,
                    "too many levels of symbolic links",
                ));
            }
            let target = reader
                .read_link(Path::new(prefix))
                .map_err(|e| e.with_path(path))?;
            let target = target.to_string_lossy();
            let rest = &current[prefix_len..];
            let spliced = if target.starts_with('/') {
                format!("{target}{rest}")
            } else {
                format!("{}/{target}{rest}", parent(prefix))
            };
            tracing::trace!(link = prefix, target = %target, "splicing symlink");
            current = collapse(&spliced);
            prefix_len = current.len();
            continue;
        }

        match prefix.rfind('/') {
            Some(0) if prefix_len > 1 => prefix_len = 1,
            Some(idx) if idx > 0 => prefix_len = idx,
            _ => return Ok(PathBuf::from(current)),
        }
    }
}

/// Directory part of a collapsed absolute path.
fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Collapse `.`, `..` and repeated `/` in a path, rooting it at `/`.
fn collapse(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fs::{Linker, MemFs, ReadOnlyFs};
    use std::sync::Arc;

    fn linked() -> MemFs {
        let fs = MemFs::new();
        fs.mkdir_all(Path::new("/b/c"), 0o755).unwrap();
        fs.mkdir_all(Path::new("/a"), 0o755).unwrap();
        fs
    }

    #[test]
    fn collapse_handles_dots_and_separators() {
        assert_eq!(collapse("/a/./b//c/../d/"), "/a/b/d");
        assert_eq!(collapse("/../.."), "/");
        assert_eq!(collapse("a/b"), "/a/b");
        assert_eq!(parent("/a/b"), "/a");
        assert_eq!(parent("/a"), "/");
    }

    #[test]
    fn relative_link_resolves_against_its_directory() {
        let fs = linked();
        fs.symlink(Path::new("../b/c"), Path::new("/a/link")).unwrap();
        assert_eq!(
            resolve_symlinks(&fs, Path::new("/a/link")).unwrap(),
            PathBuf::from("/b/c")
        );
    }

    #[test]
    fn absolute_link_replaces_prefix() {
        let fs = linked();
        fs.symlink(Path::new("/b"), Path::new("/a/to-b")).unwrap();
        assert_eq!(
            resolve_symlinks(&fs, Path::new("/a/to-b/c/file.txt")).unwrap(),
            PathBuf::from("/b/c/file.txt")
        );
    }

    #[test]
    fn chained_links() {
        let fs = linked();
        fs.symlink(Path::new("/b/c"), Path::new("/first")).unwrap();
        fs.symlink(Path::new("first"), Path::new("/second")).unwrap();
        fs.symlink(Path::new("/second/x"), Path::new("/a/third")).unwrap();
        assert_eq!(
            resolve_symlinks(&fs, Path::new("/a/third")).unwrap(),
            PathBuf::from("/b/c/x")
        );
    }

    #[test]
    fn plain_paths_are_cleaned_only() {
        let fs = linked();
        assert_eq!(
            resolve_symlinks(&fs, Path::new("/a/../b/./c/")).unwrap(),
            PathBuf::from("/b/c")
        );
        assert_eq!(resolve_symlinks(&fs, Path::new("/")).unwrap(), PathBuf::from("/"));
    }

    #[test]
    fn cycles_hit_the_bound() {
        let fs = MemFs::new();
        fs.symlink(Path::new("/loop-b"), Path::new("/loop-a")).unwrap();
        fs.symlink(Path::new("/loop-a"), Path::new("/loop-b")).unwrap();
        let err = resolve_symlinks(&fs, Path::new("/loop-a/x")).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument(_)));
        assert!(err.to_string().contains("too many levels"));
    }

    #[test]
    fn requires_both_capabilities() {
        struct NoLinks(MemFs);
        impl Fs for NoLinks {
            fn name(&self) -> &str {
                "NoLinks"
            }
            fn open_file(
                &self,
                path: &Path,
                flags: crate::fs::OpenFlags,
                mode: u32,
            ) -> Result<Box<dyn crate::fs::File>> {
                self.0.open_file(path, flags, mode)
            }
            fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
                self.0.mkdir(path, mode)
            }
            fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
                self.0.mkdir_all(path, mode)
            }
            fn remove(&self, path: &Path) -> Result<()> {
                self.0.remove(path)
            }
            fn remove_all(&self, path: &Path) -> Result<()> {
                self.0.remove_all(path)
            }
            fn rename(&self, from: &Path, to: &Path) -> Result<()> {
                self.0.rename(from, to)
            }
            fn stat(&self, path: &Path) -> Result<crate::fs::FileInfo> {
                self.0.stat(path)
            }
            fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
                self.0.chmod(path, mode)
            }
            fn chtimes(
                &self,
                path: &Path,
                atime: std::time::SystemTime,
                mtime: std::time::SystemTime,
            ) -> Result<()> {
                self.0.chtimes(path, atime, mtime)
            }
        }

        let err = resolve_symlinks(&NoLinks(MemFs::new()), Path::new("/a")).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Unsupported));

        // Read-only views keep both read capabilities.
        let ro = ReadOnlyFs::new(Arc::new(linked()));
        assert!(resolve_symlinks(&ro, Path::new("/b/c")).is_ok());
    }
}
