//! In-memory filesystem implementation

use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::RwLock;

use super::limits::{MemLimitExceeded, MemLimits, MemUsage};
use super::traits::{
    File, FileInfo, FileType, Fs, LinkReader, Linker, Lstater, OpenFlags, next_batch,
};
use crate::error::{Error, ErrorKind, Result};
use crate::path;

/// Mode for directories created implicitly as parents.
const DEFAULT_DIR_MODE: u32 = 0o755;

/// Symlink hops followed by `stat`/`open` before giving up.
const MAX_SYMLINK_HOPS: usize = 40;

type Nodes = HashMap<PathBuf, Arc<Node>>;

/// Concurrent in-memory filesystem.
///
/// All nodes live in one flat map from normalized path to node, guarded by a
/// single store lock: lookups take it shared, structural changes take it
/// exclusively. Each directory also keeps a name-sorted index of its children
/// as weak references; the flat map is the only owner.
///
/// File content sits behind a per-node lock, so handles read and write
/// without touching the store lock. Every handle keeps a private cursor;
/// handles on the same path share bytes and race at byte-range granularity
/// (last write wins).
///
/// Lock order is store lock, then node lock. Compound operations
/// (`remove_all`, `rename`) hold the store lock exclusively for their whole
/// duration.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use stratafs::{Fs, MemFs};
///
/// # fn main() -> stratafs::Result<()> {
/// let fs = MemFs::new();
/// fs.mkdir_all(Path::new("/x/y"), 0o755)?;
/// let mut f = fs.create(Path::new("/x/y/z.txt"))?;
/// f.write(b"hello")?;
/// f.close()?;
///
/// assert_eq!(fs.stat(Path::new("/x/y/z.txt"))?.size, 5);
/// assert!(fs.stat(Path::new("/x/y"))?.is_dir());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemFs {
    nodes: RwLock<Nodes>,
    shared: Arc<Shared>,
}

/// State handles need after the store lock is released.
#[derive(Debug)]
struct Shared {
    limits: MemLimits,
    total_bytes: AtomicU64,
    file_count: AtomicU64,
    dir_count: AtomicU64,
}

impl Shared {
    fn reserve_bytes(&self, additional: u64) -> std::result::Result<(), MemLimitExceeded> {
        if additional == 0 {
            return Ok(());
        }
        let mut refused = None;
        self.total_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                match self.limits.check_total_bytes(current, additional) {
                    Ok(()) => current.checked_add(additional),
                    Err(e) => {
                        refused = Some(e);
                        None
                    }
                }
            })
            .map(|_| ())
            .map_err(|current| {
                refused.unwrap_or(MemLimitExceeded::TotalBytes {
                    current,
                    additional,
                    limit: self.limits.max_total_bytes,
                })
            })
    }

    fn release_bytes(&self, amount: u64) {
        self.total_bytes.fetch_sub(amount, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct Node {
    data: RwLock<NodeData>,
}

#[derive(Debug)]
struct NodeData {
    name: String,
    mode: u32,
    modified: SystemTime,
    kind: NodeKind,
    /// Removed from the store while handles may still hold it. Growth
    /// through such handles no longer counts against the store.
    detached: bool,
}

#[derive(Debug)]
enum NodeKind {
    File(Vec<u8>),
    Dir(BTreeMap<String, Weak<Node>>),
    Symlink(PathBuf),
}

impl Node {
    fn new(name: String, mode: u32, kind: NodeKind) -> Arc<Self> {
        Arc::new(Self {
            data: RwLock::new(NodeData {
                name,
                mode,
                modified: SystemTime::now(),
                kind,
                detached: false,
            }),
        })
    }

    fn is_dir(&self) -> bool {
        matches!(self.data.read().kind, NodeKind::Dir(_))
    }

    fn info(&self) -> FileInfo {
        let data = self.data.read();
        data.info(data.name.clone())
    }

    /// Snapshot of directory children in name order.
    fn children(&self) -> Vec<(String, Arc<Node>)> {
        match &self.data.read().kind {
            NodeKind::Dir(children) => children
                .iter()
                .filter_map(|(name, weak)| weak.upgrade().map(|node| (name.clone(), node)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl NodeData {
    fn info(&self, name: String) -> FileInfo {
        let (size, file_type) = match &self.kind {
            NodeKind::File(content) => (content.len() as u64, FileType::File),
            NodeKind::Dir(_) => (0, FileType::Directory),
            NodeKind::Symlink(target) => (target.as_os_str().len() as u64, FileType::Symlink),
        };
        FileInfo {
            name,
            size,
            mode: self.mode,
            modified: self.modified,
            file_type,
        }
    }

    fn byte_len(&self) -> u64 {
        match &self.kind {
            NodeKind::File(content) => content.len() as u64,
            _ => 0,
        }
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    /// Create an empty store with no resource limits.
    pub fn new() -> Self {
        Self::with_limits(MemLimits::unlimited())
    }

    /// Create an empty store enforcing `limits`.
    pub fn with_limits(limits: MemLimits) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            PathBuf::from("/"),
            Node::new("/".to_string(), DEFAULT_DIR_MODE, NodeKind::Dir(BTreeMap::new())),
        );
        Self {
            nodes: RwLock::new(nodes),
            shared: Arc::new(Shared {
                limits,
                total_bytes: AtomicU64::new(0),
                file_count: AtomicU64::new(0),
                dir_count: AtomicU64::new(1),
            }),
        }
    }

    pub fn limits(&self) -> &MemLimits {
        &self.shared.limits
    }

    /// Current byte, file and directory counts.
    pub fn usage(&self) -> MemUsage {
        MemUsage {
            total_bytes: self.shared.total_bytes.load(Ordering::SeqCst),
            file_count: self.shared.file_count.load(Ordering::SeqCst),
            dir_count: self.shared.dir_count.load(Ordering::SeqCst),
        }
    }

    /// Look up `path`, following symlinks in the final component.
    fn resolve(nodes: &Nodes, path: &Path, op: &'static str) -> Result<(PathBuf, Arc<Node>)> {
        let mut current = path.to_path_buf();
        for _ in 0..=MAX_SYMLINK_HOPS {
            let node = nodes
                .get(&current)
                .cloned()
                .ok_or_else(|| Error::not_found(op, path))?;
            let target = match &node.data.read().kind {
                NodeKind::Symlink(target) => Some(target.clone()),
                _ => None,
            };
            match target {
                Some(target) if target.has_root() => current = path::normalize(&target),
                Some(target) => current = path::normalize(&path::parent(&current).join(target)),
                None => return Ok((current, node)),
            }
        }
        Err(Error::invalid(op, path, "too many levels of symbolic links"))
    }

    /// Return the directory at `dir`, creating it and any missing ancestors.
    fn ensure_dir(&self, nodes: &mut Nodes, dir: &Path, op: &'static str) -> Result<Arc<Node>> {
        if let Some(node) = nodes.get(dir) {
            return if node.is_dir() {
                Ok(Arc::clone(node))
            } else {
                Err(Error::not_a_directory(op, dir))
            };
        }
        let parent = self.ensure_dir(nodes, &path::parent(dir), op)?;
        tracing::trace!(path = %dir.display(), "creating implicit parent directory");
        self.insert_child(
            nodes,
            &parent,
            dir,
            NodeKind::Dir(BTreeMap::new()),
            DEFAULT_DIR_MODE,
            op,
        )
    }

    /// Insert a new node and register it with its parent's index.
    fn insert_child(
        &self,
        nodes: &mut Nodes,
        parent: &Arc<Node>,
        path: &Path,
        kind: NodeKind,
        mode: u32,
        op: &'static str,
    ) -> Result<Arc<Node>> {
        let limits = &self.shared.limits;
        limits
            .validate_path(path)
            .map_err(|e| Error::new(op, path, e.into()))?;

        let is_dir = matches!(kind, NodeKind::Dir(_));
        if !is_dir {
            limits
                .check_file_count(self.shared.file_count.load(Ordering::SeqCst))
                .map_err(|e| Error::new(op, path, e.into()))?;
        }

        let name = path::file_name(path);
        let node = Node::new(name.clone(), mode & 0o7777, kind);
        nodes.insert(path.to_path_buf(), Arc::clone(&node));
        {
            let mut parent_data = parent.data.write();
            if let NodeKind::Dir(children) = &mut parent_data.kind {
                children.insert(name, Arc::downgrade(&node));
            }
            parent_data.modified = SystemTime::now();
        }

        let counter = if is_dir {
            &self.shared.dir_count
        } else {
            &self.shared.file_count
        };
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(node)
    }

    /// Drop `path` from its parent's index.
    fn unregister(nodes: &Nodes, path: &Path) {
        if let Some(parent) = nodes.get(&path::parent(path)) {
            let mut parent_data = parent.data.write();
            if let NodeKind::Dir(children) = &mut parent_data.kind {
                children.remove(&path::file_name(path));
            }
            parent_data.modified = SystemTime::now();
        }
    }

    /// Release the accounting held by a node leaving the map.
    fn forget(&self, node: &Node) {
        let mut data = node.data.write();
        data.detached = true;
        match data.kind {
            NodeKind::Dir(_) => {
                self.shared.dir_count.fetch_sub(1, Ordering::SeqCst);
            }
            _ => {
                self.shared.file_count.fetch_sub(1, Ordering::SeqCst);
                self.shared.release_bytes(data.byte_len());
            }
        }
    }

    fn open_handle(&self, path: &Path, node: Arc<Node>, flags: OpenFlags) -> Result<Box<dyn File>> {
        if node.is_dir() && flags.is_write() {
            return Err(Error::is_a_directory("open", path));
        }
        let mut handle = MemFile {
            name: path.to_string_lossy().into_owned(),
            node,
            shared: Arc::clone(&self.shared),
            offset: 0,
            readable: flags.read,
            writable: flags.write || flags.append,
            append: flags.append,
            closed: false,
            dir_offset: 0,
        };
        if flags.truncate && handle.writable {
            handle.resize(0, "open")?;
        }
        Ok(Box::new(handle))
    }
}

impl Fs for MemFs {
    fn name(&self) -> &str {
        "MemFs"
    }

    fn open_file(&self, path: &Path, flags: OpenFlags, mode: u32) -> Result<Box<dyn File>> {
        let path = path::normalize(path);
        if !flags.create {
            let node = {
                let nodes = self.nodes.read();
                Self::resolve(&nodes, &path, "open")?.1
            };
            return self.open_handle(&path, node, flags);
        }

        let node = {
            let mut nodes = self.nodes.write();
            match Self::resolve(&nodes, &path, "open") {
                Ok(_) if flags.exclusive => return Err(Error::already_exists("open", &path)),
                Ok((_, node)) => node,
                Err(e) if e.is_not_found() && !nodes.contains_key(&path) => {
                    let parent = self.ensure_dir(&mut nodes, &path::parent(&path), "open")?;
                    self.insert_child(
                        &mut nodes,
                        &parent,
                        &path,
                        NodeKind::File(Vec::new()),
                        mode,
                        "open",
                    )?
                }
                Err(e) => return Err(e),
            }
        };
        self.open_handle(&path, node, flags)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        let path = path::normalize(path);
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get(&path) {
            return if node.is_dir() {
                Ok(())
            } else {
                Err(Error::already_exists("mkdir", &path))
            };
        }
        let parent = self.ensure_dir(&mut nodes, &path::parent(&path), "mkdir")?;
        self.insert_child(
            &mut nodes,
            &parent,
            &path,
            NodeKind::Dir(BTreeMap::new()),
            mode,
            "mkdir",
        )?;
        Ok(())
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        let path = path::normalize(path);
        let mut nodes = self.nodes.write();
        let mut current = PathBuf::from("/");
        let mut parent = nodes
            .get(&current)
            .cloned()
            .ok_or_else(|| Error::not_found("mkdir", "/"))?;

        for segment in path::segments(&path) {
            current.push(segment);
            parent = match nodes.get(&current) {
                Some(node) if node.is_dir() => Arc::clone(node),
                Some(_) => return Err(Error::not_a_directory("mkdir", &current)),
                None => self.insert_child(
                    &mut nodes,
                    &parent,
                    &current,
                    NodeKind::Dir(BTreeMap::new()),
                    mode,
                    "mkdir",
                )?,
            };
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let path = path::normalize(path);
        if path::is_root(&path) {
            return Err(Error::permission_denied("remove", &path));
        }
        let mut nodes = self.nodes.write();
        let node = nodes
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::not_found("remove", &path))?;
        if !node.children().is_empty() {
            return Err(Error::new("remove", &path, ErrorKind::DirectoryNotEmpty));
        }
        nodes.remove(&path);
        Self::unregister(&nodes, &path);
        self.forget(&node);
        Ok(())
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        let path = path::normalize(path);
        let root = path::is_root(&path);
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&path) {
            return Ok(());
        }

        let doomed: Vec<PathBuf> = nodes
            .keys()
            .filter(|key| key.starts_with(&path) && !(root && path::is_root(key)))
            .cloned()
            .collect();
        tracing::debug!(path = %path.display(), entries = doomed.len(), "remove_all");

        for key in &doomed {
            if let Some(node) = nodes.remove(key) {
                self.forget(&node);
            }
        }

        if root {
            if let Some(root_node) = nodes.get(&path) {
                let mut data = root_node.data.write();
                if let NodeKind::Dir(children) = &mut data.kind {
                    children.clear();
                }
                data.modified = SystemTime::now();
            }
        } else {
            Self::unregister(&nodes, &path);
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = path::normalize(from);
        let to = path::normalize(to);
        if from == to {
            return Ok(());
        }
        if path::is_root(&from) || path::is_root(&to) {
            return Err(Error::permission_denied("rename", &from));
        }
        if to.starts_with(&from) {
            return Err(Error::invalid(
                "rename",
                &to,
                "cannot move a directory into itself",
            ));
        }
        self.shared
            .limits
            .validate_path(&to)
            .map_err(|e| Error::new("rename", &to, e.into()))?;

        let mut nodes = self.nodes.write();
        let node = nodes
            .get(&from)
            .cloned()
            .ok_or_else(|| Error::not_found("rename", &from))?;
        if nodes.contains_key(&to) {
            return Err(Error::already_exists("rename", &to));
        }
        let new_parent = self.ensure_dir(&mut nodes, &path::parent(&to), "rename")?;

        let moved: Vec<PathBuf> = nodes
            .keys()
            .filter(|key| key.starts_with(&from))
            .cloned()
            .collect();
        tracing::debug!(
            from = %from.display(),
            to = %to.display(),
            entries = moved.len(),
            "rename"
        );
        for old in moved {
            if let Some(entry) = nodes.remove(&old) {
                let new = match old.strip_prefix(&from) {
                    Ok(rest) if !rest.as_os_str().is_empty() => to.join(rest),
                    _ => to.clone(),
                };
                nodes.insert(new, entry);
            }
        }

        Self::unregister(&nodes, &from);
        let name = path::file_name(&to);
        node.data.write().name = name.clone();
        let mut parent_data = new_parent.data.write();
        if let NodeKind::Dir(children) = &mut parent_data.kind {
            children.insert(name, Arc::downgrade(&node));
        }
        parent_data.modified = SystemTime::now();
        Ok(())
    }

    fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = path::normalize(path);
        let nodes = self.nodes.read();
        let (_, node) = Self::resolve(&nodes, &path, "stat")?;
        let data = node.data.read();
        Ok(data.info(path::file_name(&path)))
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        let path = path::normalize(path);
        let nodes = self.nodes.read();
        let (_, node) = Self::resolve(&nodes, &path, "chmod")?;
        node.data.write().mode = mode & 0o7777;
        Ok(())
    }

    fn chtimes(&self, path: &Path, _atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let path = path::normalize(path);
        let nodes = self.nodes.read();
        let (_, node) = Self::resolve(&nodes, &path, "chtimes")?;
        node.data.write().modified = mtime;
        Ok(())
    }

    fn as_lstater(&self) -> Option<&dyn Lstater> {
        Some(self)
    }

    fn as_linker(&self) -> Option<&dyn Linker> {
        Some(self)
    }

    fn as_link_reader(&self) -> Option<&dyn LinkReader> {
        Some(self)
    }
}

impl Lstater for MemFs {
    fn lstat(&self, path: &Path) -> Result<FileInfo> {
        let path = path::normalize(path);
        let nodes = self.nodes.read();
        let node = nodes
            .get(&path)
            .ok_or_else(|| Error::not_found("lstat", &path))?;
        let data = node.data.read();
        Ok(data.info(path::file_name(&path)))
    }
}

impl Linker for MemFs {
    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let link = path::normalize(link);
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&link) {
            return Err(Error::already_exists("symlink", &link));
        }
        let parent = self.ensure_dir(&mut nodes, &path::parent(&link), "symlink")?;
        self.insert_child(
            &mut nodes,
            &parent,
            &link,
            NodeKind::Symlink(target.to_path_buf()),
            0o777,
            "symlink",
        )?;
        Ok(())
    }
}

impl LinkReader for MemFs {
    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        let path = path::normalize(path);
        let nodes = self.nodes.read();
        let node = nodes
            .get(&path)
            .ok_or_else(|| Error::not_found("readlink", &path))?;
        match &node.data.read().kind {
            NodeKind::Symlink(target) => Ok(target.clone()),
            _ => Err(Error::invalid("readlink", &path, "not a symbolic link")),
        }
    }
}

/// Handle onto a [`MemFs`] node with a private cursor.
#[derive(Debug)]
pub struct MemFile {
    name: String,
    node: Arc<Node>,
    shared: Arc<Shared>,
    offset: u64,
    readable: bool,
    writable: bool,
    append: bool,
    closed: bool,
    dir_offset: usize,
}

impl MemFile {
    fn check_open(&self, op: &'static str) -> Result<()> {
        if self.closed {
            return Err(Error::new(op, &self.name, ErrorKind::Closed));
        }
        Ok(())
    }

    fn check_readable(&self, op: &'static str) -> Result<()> {
        self.check_open(op)?;
        if !self.readable {
            return Err(Error::permission_denied(op, &self.name));
        }
        Ok(())
    }

    fn check_writable(&self, op: &'static str) -> Result<()> {
        self.check_open(op)?;
        if !self.writable {
            return Err(Error::permission_denied(op, &self.name));
        }
        Ok(())
    }

    fn read_from(&self, buf: &mut [u8], offset: u64, op: &'static str) -> Result<usize> {
        let data = self.node.data.read();
        let content = match &data.kind {
            NodeKind::File(content) => content,
            NodeKind::Dir(_) => return Err(Error::is_a_directory(op, &self.name)),
            NodeKind::Symlink(_) => return Err(Error::invalid(op, &self.name, "symbolic link")),
        };
        let len = content.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(content.len() - start);
        buf[..n].copy_from_slice(&content[start..start + n]);
        Ok(n)
    }

    /// Write `buf` at `offset`, or at the end when `offset` is `None`.
    /// Returns the position just past the written bytes.
    fn write_to(&self, buf: &[u8], offset: Option<u64>, op: &'static str) -> Result<u64> {
        let mut data = self.node.data.write();
        let detached = data.detached;
        let content = match &mut data.kind {
            NodeKind::File(content) => content,
            _ => return Err(Error::is_a_directory(op, &self.name)),
        };
        let start = offset.unwrap_or(content.len() as u64);
        let end = start
            .checked_add(buf.len() as u64)
            .ok_or_else(|| Error::invalid(op, &self.name, "write past the maximum file size"))?;
        let old_len = content.len() as u64;
        if end > old_len {
            self.shared
                .limits
                .check_file_size(end)
                .map_err(|e| Error::new(op, &self.name, e.into()))?;
            let new_len = usize::try_from(end)
                .map_err(|_| Error::invalid(op, &self.name, "write past the maximum file size"))?;
            if !detached {
                self.shared
                    .reserve_bytes(end - old_len)
                    .map_err(|e| Error::new(op, &self.name, e.into()))?;
            }
            content.resize(new_len, 0);
        }
        // Both bounds fit in usize: end <= content.len().
        let range = start as usize..end as usize;
        content[range].copy_from_slice(buf);
        data.modified = SystemTime::now();
        Ok(end)
    }

    fn resize(&mut self, size: u64, op: &'static str) -> Result<()> {
        let mut data = self.node.data.write();
        let detached = data.detached;
        let content = match &mut data.kind {
            NodeKind::File(content) => content,
            _ => return Err(Error::is_a_directory(op, &self.name)),
        };
        let old_len = content.len() as u64;
        if size > old_len {
            self.shared
                .limits
                .check_file_size(size)
                .map_err(|e| Error::new(op, &self.name, e.into()))?;
        }
        let new_len = usize::try_from(size)
            .map_err(|_| Error::invalid(op, &self.name, "size past the maximum file size"))?;
        if !detached {
            if size > old_len {
                self.shared
                    .reserve_bytes(size - old_len)
                    .map_err(|e| Error::new(op, &self.name, e.into()))?;
            } else {
                self.shared.release_bytes(old_len - size);
            }
        }
        content.resize(new_len, 0);
        data.modified = SystemTime::now();
        Ok(())
    }
}

impl File for MemFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_readable("read")?;
        let n = self.read_from(buf, self.offset, "read")?;
        self.offset += n as u64;
        Ok(n)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.check_readable("read")?;
        self.read_from(buf, offset, "read")
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_writable("write")?;
        let at = if self.append { None } else { Some(self.offset) };
        self.offset = self.write_to(buf, at, "write")?;
        Ok(buf.len())
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.check_writable("write")?;
        if self.append {
            return Err(Error::invalid(
                "write",
                &self.name,
                "positional write on a handle opened for append",
            ));
        }
        self.write_to(buf, Some(offset), "write")?;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open("seek")?;
        let len = self.node.data.read().byte_len();
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
        };
        self.offset = target.ok_or_else(|| Error::invalid("seek", &self.name, "negative offset"))?;
        if self.offset == 0 {
            // Rewinds a directory listing too.
            self.dir_offset = 0;
        }
        Ok(self.offset)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.check_writable("truncate")?;
        self.resize(size, "truncate")
    }

    fn sync(&mut self) -> Result<()> {
        self.check_open("sync")
    }

    fn close(&mut self) -> Result<()> {
        self.check_open("close")?;
        self.closed = true;
        Ok(())
    }

    fn stat(&self) -> Result<FileInfo> {
        self.check_open("stat")?;
        Ok(self.node.info())
    }

    fn read_dir(&mut self, n: usize) -> Result<Option<Vec<FileInfo>>> {
        self.check_open("readdir")?;
        if !self.node.is_dir() {
            return Err(Error::not_a_directory("readdir", &self.name));
        }
        let entries: Vec<FileInfo> = self
            .node
            .children()
            .into_iter()
            .map(|(name, child)| child.data.read().info(name))
            .collect();

        Ok(next_batch(&entries, &mut self.dir_offset, n))
    }
}
