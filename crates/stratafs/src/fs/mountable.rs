//! Mount namespace.
//!
//! [`MountableFs`] routes every path to the innermost filesystem mounted
//! above it, similar to Unix bind mounts.

use std::collections::BTreeMap;
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::named::NamedFile;
use super::traits::{
    File, FileInfo, Fs, LinkReader, Linker, Lstater, OpenFlags, lstat_if_possible, next_batch,
    read_link_if_possible, symlink_if_possible,
};
use super::util;
use crate::error::{Error, ErrorKind, Result};
use crate::path;

/// Mode reported for namespace directories that exist only in the mount tree.
const NAMESPACE_DIR_MODE: u32 = 0o755;

const ROOT: usize = 0;

/// Read view of a freed or out-of-range arena slot.
static VACANT: MountNode = MountNode {
    name: String::new(),
    parent: None,
    children: BTreeMap::new(),
    fs: None,
    mounted_descendants: 0,
};

/// Options for [`MountableFs::mount_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Allow mounting over a path the enclosing filesystem already has,
    /// hiding its content while mounted.
    pub allow_mask: bool,
    /// Allow mounting a filesystem beneath one of its own mount points.
    pub allow_recursive: bool,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_mask(mut self, allow: bool) -> Self {
        self.allow_mask = allow;
        self
    }

    pub fn allow_recursive(mut self, allow: bool) -> Self {
        self.allow_recursive = allow;
        self
    }
}

/// One path segment in the mount tree.
///
/// Nodes live in an arena and refer to each other by index. A node with a
/// filesystem attached is a mount point; one without is scaffolding that
/// only exists because a mount sits somewhere beneath it.
struct MountNode {
    name: String,
    parent: Option<usize>,
    children: BTreeMap<String, usize>,
    fs: Option<Arc<dyn Fs>>,
    mounted_descendants: usize,
}

impl MountNode {
    fn new(name: String, parent: Option<usize>, fs: Option<Arc<dyn Fs>>) -> Self {
        Self {
            name,
            parent,
            children: BTreeMap::new(),
            fs,
            mounted_descendants: 0,
        }
    }
}

/// Filesystem namespace assembled from mounted filesystems.
///
/// A root filesystem answers for every path no mount covers. Each path is
/// routed to the deepest mount point above it, and the mounted filesystem
/// sees the remainder as an absolute path from its own root.
///
/// Mounting and unmounting take `&mut self`: the mount tree itself is not
/// synchronized, so it must be set up before the namespace is shared. Once
/// shared (for example in an `Arc`), all file operations are safe to call
/// concurrently; they take no locks of their own.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use std::sync::Arc;
/// use stratafs::{Fs, MemFs, MountableFs, fs::util};
///
/// # fn main() -> stratafs::Result<()> {
/// let data = Arc::new(MemFs::new());
/// util::write_file(data.as_ref(), Path::new("/users.json"), b"[]", 0o644)?;
///
/// let mut ns = MountableFs::new(Arc::new(MemFs::new()));
/// ns.mount("/mnt/data", data)?;
///
/// assert_eq!(util::read_file(&ns, Path::new("/mnt/data/users.json"))?, b"[]");
/// assert!(ns.stat(Path::new("/mnt"))?.is_dir());
///
/// // Renames cannot cross into another filesystem.
/// assert!(ns.rename(Path::new("/mnt/data/users.json"), Path::new("/users.json")).is_err());
/// # Ok(())
/// # }
/// ```
pub struct MountableFs {
    root: Arc<dyn Fs>,
    nodes: Vec<Option<MountNode>>,
    free: Vec<usize>,
}

impl MountableFs {
    /// Namespace whose root is served by `root`.
    pub fn new(root: Arc<dyn Fs>) -> Self {
        Self {
            nodes: vec![Some(MountNode::new("/".to_string(), None, Some(Arc::clone(&root))))],
            root,
            free: Vec::new(),
        }
    }

    /// Mount `fs` at `path` with default options.
    pub fn mount(&mut self, path: impl AsRef<Path>, fs: Arc<dyn Fs>) -> Result<()> {
        self.mount_with(path, fs, MountOptions::default())
    }

    /// Mount `fs` at `path`.
    ///
    /// Fails if `fs` is a host passthrough backend, if the enclosing
    /// filesystem already has an entry at `path` (unless `allow_mask`), if a
    /// filesystem is already mounted there, or if `fs` is already mounted
    /// above `path` (unless `allow_recursive`).
    pub fn mount_with(
        &mut self,
        path: impl AsRef<Path>,
        fs: Arc<dyn Fs>,
        options: MountOptions,
    ) -> Result<()> {
        let path = path::normalize(path.as_ref());

        if fs.is_host_passthrough() {
            tracing::warn!(path = %path.display(), fs = fs.name(), "refusing to mount unconfined host filesystem");
            return Err(Error::invalid(
                "mount",
                &path,
                "host filesystem must be confined before mounting",
            ));
        }

        // Walk as far as the tree goes, remembering every enclosing mount.
        let mut current = ROOT;
        let mut enclosing: Vec<&Arc<dyn Fs>> = self.node(ROOT).fs.iter().collect();
        let mut matched = 0;
        let segments: Vec<String> = path::segments(&path)
            .map(|s| s.to_string_lossy().into_owned())
            .collect();
        for segment in &segments {
            match self.node(current).children.get(segment) {
                Some(&child) => {
                    current = child;
                    matched += 1;
                    enclosing.extend(self.node(child).fs.iter());
                }
                None => break,
            }
        }
        let exact = matched == segments.len();

        if exact && self.node(current).fs.is_some() {
            return Err(Error::new("mount", &path, ErrorKind::AlreadyMounted));
        }

        if !options.allow_recursive
            && enclosing
                .iter()
                .any(|&mounted| std::ptr::addr_eq(Arc::as_ptr(mounted), Arc::as_ptr(&fs)))
        {
            tracing::warn!(path = %path.display(), fs = fs.name(), "refusing recursive mount");
            return Err(Error::new("mount", &path, ErrorKind::RecursiveMount));
        }

        // An existing tree node is a placeholder and may be mounted over.
        if !exact && !options.allow_mask {
            let (outer, relative) = self.find_path(&path);
            if util::exists(outer.as_ref(), &relative)? {
                return Err(Error::already_exists("mount", &path));
            }
        }

        for segment in &segments[matched..] {
            current = self.insert(current, segment.clone())?;
        }
        self.node_mut(current)
            .ok_or_else(|| Error::invalid("mount", &path, "mount tree is inconsistent"))?
            .fs = Some(fs);
        let mut ancestor = self.node(current).parent;
        while let Some(idx) = ancestor {
            let Some(node) = self.node_mut(idx) else { break };
            node.mounted_descendants += 1;
            ancestor = node.parent;
        }

        tracing::debug!(path = %path.display(), "mounted filesystem");
        Ok(())
    }

    /// Detach the filesystem mounted at `path` and return it.
    pub fn umount(&mut self, path: impl AsRef<Path>) -> Result<Arc<dyn Fs>> {
        let path = path::normalize(path.as_ref());
        if path::is_root(&path) {
            return Err(Error::invalid("umount", &path, "cannot unmount the root filesystem"));
        }
        let idx = self
            .lookup(&path)
            .filter(|&idx| self.node(idx).fs.is_some())
            .ok_or_else(|| Error::new("umount", &path, ErrorKind::NotMounted))?;

        let detached = self
            .node_mut(idx)
            .and_then(|node| node.fs.take())
            .ok_or_else(|| Error::new("umount", &path, ErrorKind::NotMounted))?;

        let mut ancestor = self.node(idx).parent;
        while let Some(parent) = ancestor {
            let Some(node) = self.node_mut(parent) else { break };
            node.mounted_descendants = node.mounted_descendants.saturating_sub(1);
            ancestor = node.parent;
        }

        // Prune scaffolding that no longer leads to a mount.
        let mut current = idx;
        while current != ROOT {
            let node = self.node(current);
            if node.fs.is_some() || node.mounted_descendants > 0 {
                break;
            }
            let parent = node.parent.unwrap_or(ROOT);
            let name = node.name.clone();
            if let Some(node) = self.node_mut(parent) {
                node.children.remove(&name);
            }
            if let Some(slot) = self.nodes.get_mut(current) {
                *slot = None;
                self.free.push(current);
            }
            current = parent;
        }

        tracing::debug!(path = %path.display(), "unmounted filesystem");
        Ok(detached)
    }

    /// Current mount points in path order, the root first.
    pub fn mounts(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        self.collect_mounts(ROOT, PathBuf::from("/"), &mut out);
        out
    }

    fn collect_mounts(&self, idx: usize, path: PathBuf, out: &mut Vec<PathBuf>) {
        let node = self.node(idx);
        if node.fs.is_some() {
            out.push(path.clone());
        }
        for (name, &child) in &node.children {
            self.collect_mounts(child, path.join(name), out);
        }
    }

    /// Route `path` to the innermost enclosing mount.
    ///
    /// Returns the mounted filesystem and the path relative to its root.
    pub fn find_path(&self, path: &Path) -> (Arc<dyn Fs>, PathBuf) {
        let path = path::normalize(path);
        let segments: Vec<_> = path::segments(&path).collect();

        let mut current = ROOT;
        let mut deepest = (ROOT, 0);
        for (depth, segment) in segments.iter().enumerate() {
            let Some(&child) = self.node(current).children.get(&*segment.to_string_lossy()) else {
                break;
            };
            current = child;
            if self.node(child).fs.is_some() {
                deepest = (child, depth + 1);
            }
        }

        let (idx, depth) = deepest;
        let mut relative = PathBuf::from("/");
        relative.extend(&segments[depth..]);
        tracing::trace!(
            path = %path.display(),
            relative = %relative.display(),
            depth,
            "resolved mount"
        );
        (self.mounted(idx), relative)
    }

    /// Node at `idx`. A stale index reads as an empty, unmounted node.
    fn node(&self, idx: usize) -> &MountNode {
        self.nodes.get(idx).and_then(Option::as_ref).unwrap_or(&VACANT)
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut MountNode> {
        self.nodes.get_mut(idx).and_then(Option::as_mut)
    }

    /// Filesystem mounted at `idx`, or the root filesystem if none is.
    fn mounted(&self, idx: usize) -> Arc<dyn Fs> {
        Arc::clone(self.node(idx).fs.as_ref().unwrap_or(&self.root))
    }

    fn insert(&mut self, parent: usize, name: String) -> Result<usize> {
        if self.node_mut(parent).is_none() {
            return Err(Error::invalid("mount", Path::new(&name), "mount tree is inconsistent"));
        }
        let node = MountNode::new(name.clone(), Some(parent), None);
        let idx = match self.free.pop() {
            Some(idx) if idx < self.nodes.len() => {
                self.nodes[idx] = Some(node);
                idx
            }
            _ => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        if let Some(node) = self.node_mut(parent) {
            node.children.insert(name, idx);
        }
        Ok(idx)
    }

    /// Exact tree node for `path`, if the mount tree has one.
    fn lookup(&self, path: &Path) -> Option<usize> {
        let mut current = ROOT;
        for segment in path::segments(path) {
            current = *self
                .node(current)
                .children
                .get(&*segment.to_string_lossy())?;
        }
        Some(current)
    }

    /// Synthetic entries for the tree children of a node, in name order.
    fn namespace_entries(&self, idx: usize) -> Vec<FileInfo> {
        self.node(idx)
            .children
            .iter()
            .map(|(name, &child)| self.namespace_info(child, name))
            .collect()
    }

    /// Metadata for a tree node: the mounted root if there is one,
    /// otherwise a synthetic directory.
    fn namespace_info(&self, idx: usize, name: &str) -> FileInfo {
        let synthetic = || FileInfo::directory(name, NAMESPACE_DIR_MODE, SystemTime::UNIX_EPOCH);
        match &self.node(idx).fs {
            Some(fs) => match fs.stat(Path::new("/")) {
                Ok(mut info) => {
                    info.name = name.to_string();
                    info
                }
                Err(_) => synthetic(),
            },
            None => synthetic(),
        }
    }

    /// Remove everything under the tree node `idx`, children first, leaving
    /// mount points and the scaffolding leading to them in place.
    fn remove_all_node(&self, idx: usize, path: &Path) -> Result<()> {
        let node = self.node(idx);
        for (name, &child) in &node.children {
            self.remove_all_node(child, &path.join(name))?;
        }

        let (fs, dir) = self.find_path(path);
        let entries = match util::read_dir(fs.as_ref(), &dir) {
            Ok(entries) => entries,
            Err(e) if e.is_absent() => return Ok(()),
            Err(e) => return Err(e.with_path(path)),
        };
        for entry in entries {
            if node.children.contains_key(&entry.name) {
                continue;
            }
            fs.remove_all(&dir.join(&entry.name))
                .map_err(|e| e.with_path(path.join(&entry.name)))?;
        }
        Ok(())
    }
}

impl fmt::Debug for MountableFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountableFs")
            .field("mounts", &self.mounts())
            .finish()
    }
}

impl Fs for MountableFs {
    fn name(&self) -> &str {
        "MountableFs"
    }

    fn open_file(&self, path: &Path, flags: OpenFlags, mode: u32) -> Result<Box<dyn File>> {
        let path = path::normalize(path);
        let node = self
            .lookup(&path)
            .filter(|&idx| !flags.is_write() && !self.node(idx).children.is_empty());
        let (fs, relative) = self.find_path(&path);

        let opened = fs.open_file(&relative, flags, mode);
        let Some(idx) = node else {
            return opened
                .map(|file| NamedFile::wrap(file, &path))
                .map_err(|e| e.with_path(&path));
        };

        // A directory with mounts beneath it. Scaffolding may have no
        // counterpart in the enclosing filesystem.
        let is_mount = self.node(idx).fs.is_some();
        let inner = match opened {
            Ok(file) if is_mount || file.stat().is_ok_and(|info| info.is_dir()) => Some(file),
            Ok(_) => None,
            Err(e) if e.is_absent() && !is_mount => None,
            Err(e) => return Err(e.with_path(&path)),
        };
        Ok(Box::new(NamespaceDir {
            name: path.to_string_lossy().into_owned(),
            info: self.namespace_info(idx, &path::file_name(&path)),
            inner,
            mounts: self.namespace_entries(idx),
            merged: None,
            dir_offset: 0,
            closed: false,
        }))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        let path = path::normalize(path);
        let (fs, relative) = self.find_path(&path);
        fs.mkdir(&relative, mode).map_err(|e| e.with_path(&path))
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        let path = path::normalize(path);
        let (fs, relative) = self.find_path(&path);
        fs.mkdir_all(&relative, mode).map_err(|e| e.with_path(&path))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let path = path::normalize(path);
        if let Some(idx) = self.lookup(&path) {
            let node = self.node(idx);
            if node.fs.is_some() {
                return Err(Error::permission_denied("remove", &path));
            }
            if node.mounted_descendants > 0 {
                return Err(Error::new("remove", &path, ErrorKind::DirectoryNotEmpty));
            }
        }
        let (fs, relative) = self.find_path(&path);
        fs.remove(&relative).map_err(|e| e.with_path(&path))
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        let path = path::normalize(path);
        match self.lookup(&path) {
            Some(idx) => {
                tracing::debug!(path = %path.display(), "remove_all across mount points");
                self.remove_all_node(idx, &path)
            }
            None => {
                let (fs, relative) = self.find_path(&path);
                fs.remove_all(&relative).map_err(|e| e.with_path(&path))
            }
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = path::normalize(from);
        let to = path::normalize(to);
        if self.lookup(&from).is_some() {
            return Err(Error::permission_denied("rename", &from));
        }
        if self.lookup(&to).is_some() {
            return Err(Error::already_exists("rename", &to));
        }

        let (from_fs, from_relative) = self.find_path(&from);
        let (to_fs, to_relative) = self.find_path(&to);
        if !std::ptr::addr_eq(Arc::as_ptr(&from_fs), Arc::as_ptr(&to_fs)) {
            return Err(Error::new("rename", &from, ErrorKind::CrossBackend));
        }
        from_fs.rename(&from_relative, &to_relative).map_err(|e| {
            if e.path() == to_relative {
                e.with_path(&to)
            } else {
                e.with_path(&from)
            }
        })
    }

    fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = path::normalize(path);
        let (fs, relative) = self.find_path(&path);
        let result = fs.stat(&relative);

        if let Some(idx) = self.lookup(&path) {
            if self.node(idx).fs.is_none() {
                // Scaffolding is always a directory.
                return Ok(match result {
                    Ok(info) if info.is_dir() => FileInfo {
                        name: path::file_name(&path),
                        ..info
                    },
                    _ => self.namespace_info(idx, &path::file_name(&path)),
                });
            }
        }

        let mut info = result.map_err(|e| e.with_path(&path))?;
        info.name = path::file_name(&path);
        Ok(info)
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        let path = path::normalize(path);
        let (fs, relative) = self.find_path(&path);
        fs.chmod(&relative, mode).map_err(|e| e.with_path(&path))
    }

    fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let path = path::normalize(path);
        let (fs, relative) = self.find_path(&path);
        fs.chtimes(&relative, atime, mtime)
            .map_err(|e| e.with_path(&path))
    }

    /// Always advertised: routed backends without lstat fall back to stat.
    fn as_lstater(&self) -> Option<&dyn Lstater> {
        Some(self)
    }

    /// Always advertised: routed backends without links report Unsupported.
    fn as_linker(&self) -> Option<&dyn Linker> {
        Some(self)
    }

    fn as_link_reader(&self) -> Option<&dyn LinkReader> {
        Some(self)
    }
}

impl Lstater for MountableFs {
    fn lstat(&self, path: &Path) -> Result<FileInfo> {
        let path = path::normalize(path);
        if self.lookup(&path).is_some() {
            return self.stat(&path);
        }
        let (fs, relative) = self.find_path(&path);
        let (mut info, _) = lstat_if_possible(fs.as_ref(), &relative).map_err(|e| e.with_path(&path))?;
        info.name = path::file_name(&path);
        Ok(info)
    }
}

impl Linker for MountableFs {
    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let link = path::normalize(link);
        if self.lookup(&link).is_some() {
            return Err(Error::already_exists("symlink", &link));
        }
        let (fs, relative) = self.find_path(&link);
        symlink_if_possible(fs.as_ref(), target, &relative).map_err(|e| e.with_path(&link))
    }
}

impl LinkReader for MountableFs {
    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        let path = path::normalize(path);
        let (fs, relative) = self.find_path(&path);
        read_link_if_possible(fs.as_ref(), &relative).map_err(|e| e.with_path(&path))
    }
}

/// Directory handle for a namespace node.
///
/// Lists the enclosing filesystem's entries (if it has the directory)
/// merged with the mount points and scaffolding beneath it, which win on
/// name clashes.
#[derive(Debug)]
struct NamespaceDir {
    name: String,
    info: FileInfo,
    inner: Option<Box<dyn File>>,
    mounts: Vec<FileInfo>,
    merged: Option<Vec<FileInfo>>,
    dir_offset: usize,
    closed: bool,
}

impl NamespaceDir {
    fn check_open(&self, op: &'static str) -> Result<()> {
        if self.closed {
            return Err(Error::new(op, &self.name, ErrorKind::Closed));
        }
        Ok(())
    }

    fn merge(&mut self) -> Result<Vec<FileInfo>> {
        let mut by_name = BTreeMap::new();
        if let Some(inner) = self.inner.as_mut() {
            for info in inner.read_dir(0)?.unwrap_or_default() {
                by_name.insert(info.name.clone(), info);
            }
        }
        for info in &self.mounts {
            by_name.insert(info.name.clone(), info.clone());
        }
        Ok(by_name.into_values().collect())
    }
}

impl File for NamespaceDir {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        self.check_open("read")?;
        Err(Error::is_a_directory("read", &self.name))
    }

    fn read_at(&mut self, _buf: &mut [u8], _offset: u64) -> Result<usize> {
        self.check_open("read")?;
        Err(Error::is_a_directory("read", &self.name))
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        self.check_open("write")?;
        Err(Error::is_a_directory("write", &self.name))
    }

    fn write_at(&mut self, _buf: &[u8], _offset: u64) -> Result<usize> {
        self.check_open("write")?;
        Err(Error::is_a_directory("write", &self.name))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open("seek")?;
        if let Some(inner) = self.inner.as_mut() {
            inner.seek(pos).map_err(|e| e.with_path(&self.name))?;
        }
        if pos == SeekFrom::Start(0) {
            self.merged = None;
            self.dir_offset = 0;
        }
        Ok(0)
    }

    fn truncate(&mut self, _size: u64) -> Result<()> {
        self.check_open("truncate")?;
        Err(Error::is_a_directory("truncate", &self.name))
    }

    fn sync(&mut self) -> Result<()> {
        self.check_open("sync")
    }

    fn close(&mut self) -> Result<()> {
        self.check_open("close")?;
        self.closed = true;
        match self.inner.as_mut() {
            Some(inner) => inner.close().map_err(|e| e.with_path(&self.name)),
            None => Ok(()),
        }
    }

    fn stat(&self) -> Result<FileInfo> {
        self.check_open("stat")?;
        Ok(self.info.clone())
    }

    fn read_dir(&mut self, n: usize) -> Result<Option<Vec<FileInfo>>> {
        self.check_open("readdir")?;
        if self.merged.is_none() {
            let merged = self.merge().map_err(|e| e.with_path(&self.name))?;
            self.merged = Some(merged);
        }
        let entries = self.merged.as_deref().unwrap_or_default();
        Ok(next_batch(entries, &mut self.dir_offset, n))
    }
}
