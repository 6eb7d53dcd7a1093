//! Convenience helpers over any [`Fs`].
//!
//! These work through the capability contract only, so they behave the same
//! on a bare store and on any stack of composition layers.

use std::path::{Path, PathBuf};

use super::traits::{FileInfo, Fs, OpenFlags, lstat_if_possible};
use crate::error::Result;

const COPY_BUF_SIZE: usize = 32 * 1024;

/// Read a whole file.
pub fn read_file(fs: &dyn Fs, path: &Path) -> Result<Vec<u8>> {
    let mut file = fs.open(path)?;
    let mut out = Vec::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    file.close()?;
    Ok(out)
}

/// Create or replace a file with `data`. `mode` applies if the file is new.
pub fn write_file(fs: &dyn Fs, path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let mut file = fs.open_file(path, OpenFlags::create_truncate(), mode)?;
    let mut written = 0;
    while written < data.len() {
        written += file.write(&data[written..])?;
    }
    file.close()
}

/// Entries of a directory, sorted by name.
pub fn read_dir(fs: &dyn Fs, path: &Path) -> Result<Vec<FileInfo>> {
    let mut dir = fs.open(path)?;
    let mut entries = dir.read_dir(0)?.unwrap_or_default();
    dir.close()?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// True if `path` exists. Absence is not an error.
pub fn exists(fs: &dyn Fs, path: &Path) -> Result<bool> {
    match fs.stat(path) {
        Ok(_) => Ok(true),
        Err(e) if e.is_absent() => Ok(false),
        Err(e) => Err(e),
    }
}

/// True if `path` exists and is a directory. Absence is not an error.
pub fn dir_exists(fs: &dyn Fs, path: &Path) -> Result<bool> {
    match fs.stat(path) {
        Ok(info) => Ok(info.is_dir()),
        Err(e) if e.is_absent() => Ok(false),
        Err(e) => Err(e),
    }
}

/// True if `path` is a directory; fails if it does not exist.
pub fn is_dir(fs: &dyn Fs, path: &Path) -> Result<bool> {
    Ok(fs.stat(path)?.is_dir())
}

/// True for an empty file or a directory with no entries.
pub fn is_empty(fs: &dyn Fs, path: &Path) -> Result<bool> {
    let info = fs.stat(path)?;
    if !info.is_dir() {
        return Ok(info.size == 0);
    }
    let mut dir = fs.open(path)?;
    let first = dir.read_dir(1)?;
    dir.close()?;
    Ok(first.is_none_or(|entries| entries.is_empty()))
}

/// What [`walk`] does after visiting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    /// Do not descend into this directory.
    SkipDir,
}

/// Visit `root` and everything beneath it, pre-order, children in name order.
///
/// Symlinks are reported but never followed when the backend can lstat.
pub fn walk<F>(fs: &dyn Fs, root: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&Path, &FileInfo) -> Result<WalkControl>,
{
    let (info, _) = lstat_if_possible(fs, root)?;
    walk_inner(fs, root.to_path_buf(), &info, &mut visit)
}

fn walk_inner<F>(fs: &dyn Fs, path: PathBuf, info: &FileInfo, visit: &mut F) -> Result<()>
where
    F: FnMut(&Path, &FileInfo) -> Result<WalkControl>,
{
    if visit(&path, info)? == WalkControl::SkipDir || !info.is_dir() {
        return Ok(());
    }
    for child in read_dir(fs, &path)? {
        let child_path = path.join(&child.name);
        walk_inner(fs, child_path, &child, visit)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::MemFs;
    use pretty_assertions::assert_eq;

    fn sample() -> MemFs {
        let fs = MemFs::new();
        write_file(&fs, Path::new("/etc/hosts"), b"127.0.0.1", 0o644).unwrap();
        write_file(&fs, Path::new("/etc/empty"), b"", 0o644).unwrap();
        write_file(&fs, Path::new("/var/log/app.log"), b"started", 0o600).unwrap();
        fs.mkdir(Path::new("/tmp"), 0o777).unwrap();
        fs
    }

    #[test]
    fn read_and_write_round_trip() {
        let fs = sample();
        assert_eq!(read_file(&fs, Path::new("/etc/hosts")).unwrap(), b"127.0.0.1");
        write_file(&fs, Path::new("/etc/hosts"), b"::1", 0o600).unwrap();
        assert_eq!(read_file(&fs, Path::new("/etc/hosts")).unwrap(), b"::1");
        assert_eq!(fs.stat(Path::new("/etc/hosts")).unwrap().mode, 0o644);
    }

    #[test]
    fn existence_checks() {
        let fs = sample();
        assert!(exists(&fs, Path::new("/etc/hosts")).unwrap());
        assert!(!exists(&fs, Path::new("/nope")).unwrap());
        assert!(dir_exists(&fs, Path::new("/etc")).unwrap());
        assert!(!dir_exists(&fs, Path::new("/etc/hosts")).unwrap());
        assert!(is_dir(&fs, Path::new("/nope")).is_err());
    }

    #[test]
    fn emptiness() {
        let fs = sample();
        assert!(is_empty(&fs, Path::new("/tmp")).unwrap());
        assert!(is_empty(&fs, Path::new("/etc/empty")).unwrap());
        assert!(!is_empty(&fs, Path::new("/etc")).unwrap());
        assert!(!is_empty(&fs, Path::new("/etc/hosts")).unwrap());
    }

    #[test]
    fn walk_is_preorder_and_sorted() {
        let fs = sample();
        let mut seen = Vec::new();
        walk(&fs, Path::new("/"), |path, _| {
            seen.push(path.to_string_lossy().into_owned());
            Ok(WalkControl::Continue)
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![
                "/",
                "/etc",
                "/etc/empty",
                "/etc/hosts",
                "/tmp",
                "/var",
                "/var/log",
                "/var/log/app.log",
            ]
        );
    }

    #[test]
    fn walk_skip_dir() {
        let fs = sample();
        let mut seen = Vec::new();
        walk(&fs, Path::new("/"), |path, _| {
            seen.push(path.to_path_buf());
            if path == Path::new("/var") {
                return Ok(WalkControl::SkipDir);
            }
            Ok(WalkControl::Continue)
        })
        .unwrap();
        assert!(seen.contains(&PathBuf::from("/var")));
        assert!(!seen.contains(&PathBuf::from("/var/log")));
    }
}
