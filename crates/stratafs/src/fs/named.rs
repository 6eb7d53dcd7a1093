//! Handle wrapper for layers that translate paths.

use std::io::SeekFrom;
use std::path::Path;

use super::traits::{File, FileInfo};
use crate::error::Result;
use crate::path;

/// Forwards to a child's handle while reporting the caller-visible name.
///
/// Errors from the child are re-attributed to that name, and `stat` reports
/// the caller's final path component, so a translated backend path never
/// leaks through a handle.
#[derive(Debug)]
pub(crate) struct NamedFile {
    name: String,
    inner: Box<dyn File>,
}

impl NamedFile {
    pub(crate) fn wrap(inner: Box<dyn File>, name: &Path) -> Box<dyn File> {
        Box::new(Self {
            name: name.to_string_lossy().into_owned(),
            inner,
        })
    }
}

impl File for NamedFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf).map_err(|e| e.with_path(&self.name))
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.inner
            .read_at(buf, offset)
            .map_err(|e| e.with_path(&self.name))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.inner.write(buf).map_err(|e| e.with_path(&self.name))
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.inner
            .write_at(buf, offset)
            .map_err(|e| e.with_path(&self.name))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.inner.seek(pos).map_err(|e| e.with_path(&self.name))
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.inner.truncate(size).map_err(|e| e.with_path(&self.name))
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.sync().map_err(|e| e.with_path(&self.name))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close().map_err(|e| e.with_path(&self.name))
    }

    fn stat(&self) -> Result<FileInfo> {
        let mut info = self.inner.stat().map_err(|e| e.with_path(&self.name))?;
        info.name = path::file_name(Path::new(&self.name));
        Ok(info)
    }

    fn read_dir(&mut self, n: usize) -> Result<Option<Vec<FileInfo>>> {
        self.inner.read_dir(n).map_err(|e| e.with_path(&self.name))
    }
}
