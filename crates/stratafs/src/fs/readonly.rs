//! Read-only view of another filesystem.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use super::traits::{File, FileInfo, Fs, LinkReader, Lstater, OpenFlags};
use crate::error::{Error, Result};

/// Refuses every change with PermissionDenied and forwards reads.
///
/// Useful as the base of a [`CopyOnWriteFs`](super::CopyOnWriteFs) to make
/// the "base is never written" rule hold even if the overlay is bypassed.
pub struct ReadOnlyFs {
    source: Arc<dyn Fs>,
}

impl ReadOnlyFs {
    pub fn new(source: Arc<dyn Fs>) -> Self {
        Self { source }
    }
}

impl Fs for ReadOnlyFs {
    fn name(&self) -> &str {
        "ReadOnlyFs"
    }

    fn open_file(&self, path: &Path, flags: OpenFlags, mode: u32) -> Result<Box<dyn File>> {
        if flags.is_write() {
            return Err(Error::permission_denied("open", path));
        }
        self.source.open_file(path, flags, mode)
    }

    fn mkdir(&self, path: &Path, _mode: u32) -> Result<()> {
        Err(Error::permission_denied("mkdir", path))
    }

    fn mkdir_all(&self, path: &Path, _mode: u32) -> Result<()> {
        Err(Error::permission_denied("mkdir", path))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        Err(Error::permission_denied("remove", path))
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        Err(Error::permission_denied("remove", path))
    }

    fn rename(&self, from: &Path, _to: &Path) -> Result<()> {
        Err(Error::permission_denied("rename", from))
    }

    fn stat(&self, path: &Path) -> Result<FileInfo> {
        self.source.stat(path)
    }

    fn chmod(&self, path: &Path, _mode: u32) -> Result<()> {
        Err(Error::permission_denied("chmod", path))
    }

    fn chtimes(&self, path: &Path, _atime: SystemTime, _mtime: SystemTime) -> Result<()> {
        Err(Error::permission_denied("chtimes", path))
    }

    fn as_lstater(&self) -> Option<&dyn Lstater> {
        self.source.as_lstater()
    }

    fn as_link_reader(&self) -> Option<&dyn LinkReader> {
        self.source.as_link_reader()
    }

    fn is_host_passthrough(&self) -> bool {
        self.source.is_host_passthrough()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fs::MemFs;
    use crate::fs::util::{read_file, write_file};

    #[test]
    fn reads_pass_writes_fail() {
        let inner = Arc::new(MemFs::new());
        write_file(inner.as_ref(), Path::new("/f"), b"data", 0o644).unwrap();
        let fs = ReadOnlyFs::new(inner.clone());

        assert_eq!(read_file(&fs, Path::new("/f")).unwrap(), b"data");
        for err in [
            fs.create(Path::new("/g")).unwrap_err(),
            fs.open_file(Path::new("/f"), OpenFlags::append(), 0).unwrap_err(),
            fs.mkdir(Path::new("/d"), 0o755).unwrap_err(),
            fs.remove(Path::new("/f")).unwrap_err(),
            fs.rename(Path::new("/f"), Path::new("/h")).unwrap_err(),
            fs.chmod(Path::new("/f"), 0o600).unwrap_err(),
        ] {
            assert!(matches!(err.kind(), ErrorKind::PermissionDenied));
        }
        assert!(inner.stat(Path::new("/g")).is_err());
        assert!(fs.as_linker().is_none());
        assert!(fs.as_lstater().is_some());
    }
}
