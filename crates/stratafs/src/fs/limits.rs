//! Resource limits for the in-memory store.
//!
//! A [`MemFs`](super::MemFs) built with [`MemFs::with_limits`](super::MemFs::with_limits)
//! checks every structural change and every write against these limits, so a
//! caller cannot exhaust process memory through the filesystem.

use std::path::{Component, Path};

use thiserror::Error;

/// Default maximum total store size: 100MB
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 100_000_000;

/// Default maximum single file size: 10MB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10_000_000;

/// Default maximum file count: 10,000
pub const DEFAULT_MAX_FILE_COUNT: u64 = 10_000;

/// Default maximum directory nesting: 100
pub const DEFAULT_MAX_PATH_DEPTH: usize = 100;

/// Default maximum length of one path component: 255 bytes
pub const DEFAULT_MAX_FILENAME_LENGTH: usize = 255;

/// Default maximum total path length: 4096 bytes
pub const DEFAULT_MAX_PATH_LENGTH: usize = 4096;

/// In-memory store limits.
///
/// # Example
///
/// ```rust
/// use stratafs::{MemFs, MemLimits};
///
/// let limits = MemLimits::new()
///     .max_total_bytes(50_000_000)
///     .max_file_size(5_000_000)
///     .max_file_count(1000);
///
/// let fs = MemFs::with_limits(limits);
/// assert_eq!(fs.limits().max_file_count, 1000);
/// ```
///
/// | Limit | Default |
/// |-------|---------|
/// | `max_total_bytes` | 100MB |
/// | `max_file_size` | 10MB |
/// | `max_file_count` | 10,000 |
/// | `max_path_depth` | 100 |
/// | `max_filename_length` | 255 |
/// | `max_path_length` | 4096 |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemLimits {
    /// Bytes across all file contents.
    pub max_total_bytes: u64,
    /// Bytes in one file.
    pub max_file_size: u64,
    /// Regular files and symlinks; directories are not counted.
    pub max_file_count: u64,
    /// Named components in a path.
    pub max_path_depth: usize,
    /// Bytes in one component.
    pub max_filename_length: usize,
    /// Bytes in a whole path.
    pub max_path_length: usize,
}

impl Default for MemLimits {
    fn default() -> Self {
        Self {
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_file_count: DEFAULT_MAX_FILE_COUNT,
            max_path_depth: DEFAULT_MAX_PATH_DEPTH,
            max_filename_length: DEFAULT_MAX_FILENAME_LENGTH,
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
        }
    }
}

impl MemLimits {
    /// Limits with the documented defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// No restrictions. This is what [`MemFs::new`](super::MemFs::new) uses.
    pub fn unlimited() -> Self {
        Self {
            max_total_bytes: u64::MAX,
            max_file_size: u64::MAX,
            max_file_count: u64::MAX,
            max_path_depth: usize::MAX,
            max_filename_length: usize::MAX,
            max_path_length: usize::MAX,
        }
    }

    pub fn max_total_bytes(mut self, bytes: u64) -> Self {
        self.max_total_bytes = bytes;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn max_file_count(mut self, count: u64) -> Self {
        self.max_file_count = count;
        self
    }

    pub fn max_path_depth(mut self, depth: usize) -> Self {
        self.max_path_depth = depth;
        self
    }

    pub fn max_filename_length(mut self, len: usize) -> Self {
        self.max_filename_length = len;
        self
    }

    pub fn max_path_length(mut self, len: usize) -> Self {
        self.max_path_length = len;
        self
    }

    /// Check a path's length, depth, component lengths and characters.
    ///
    /// Control characters and bidi overrides are rejected because they make
    /// two visually identical names refer to different entries.
    pub fn validate_path(&self, path: &Path) -> Result<(), MemLimitExceeded> {
        let length = path.as_os_str().len();
        if length > self.max_path_length {
            return Err(MemLimitExceeded::PathTooLong {
                length,
                limit: self.max_path_length,
            });
        }

        let mut depth = 0usize;
        for component in path.components() {
            match component {
                Component::Normal(name) => {
                    let name = name.to_string_lossy();
                    if name.len() > self.max_filename_length {
                        return Err(MemLimitExceeded::FilenameTooLong {
                            length: name.len(),
                            limit: self.max_filename_length,
                        });
                    }
                    if let Some(character) = find_unsafe_char(&name) {
                        return Err(MemLimitExceeded::UnsafePathChar {
                            character,
                            component: name.into_owned(),
                        });
                    }
                    depth += 1;
                }
                Component::ParentDir => depth = depth.saturating_sub(1),
                _ => {}
            }
        }

        if depth > self.max_path_depth {
            return Err(MemLimitExceeded::PathTooDeep {
                depth,
                limit: self.max_path_depth,
            });
        }
        Ok(())
    }

    /// Check that growing the store by `additional` bytes stays in bounds.
    pub fn check_total_bytes(&self, current: u64, additional: u64) -> Result<(), MemLimitExceeded> {
        if current.saturating_add(additional) > self.max_total_bytes {
            return Err(MemLimitExceeded::TotalBytes {
                current,
                additional,
                limit: self.max_total_bytes,
            });
        }
        Ok(())
    }

    pub fn check_file_size(&self, size: u64) -> Result<(), MemLimitExceeded> {
        if size > self.max_file_size {
            return Err(MemLimitExceeded::FileSize {
                size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Check that one more file fits when `current` already exist.
    pub fn check_file_count(&self, current: u64) -> Result<(), MemLimitExceeded> {
        if current >= self.max_file_count {
            return Err(MemLimitExceeded::FileCount {
                current,
                limit: self.max_file_count,
            });
        }
        Ok(())
    }
}

fn find_unsafe_char(name: &str) -> Option<String> {
    name.chars().find_map(|ch| {
        if ch.is_ascii_control() || ('\u{0080}'..='\u{009F}').contains(&ch) {
            Some(format!("U+{:04X}", ch as u32))
        } else if ('\u{202A}'..='\u{202E}').contains(&ch) || ('\u{2066}'..='\u{2069}').contains(&ch)
        {
            Some(format!("U+{:04X} (bidi override)", ch as u32))
        } else {
            None
        }
    })
}

/// A store limit that an operation would have exceeded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemLimitExceeded {
    #[error("store full: {current} + {additional} bytes exceeds {limit} byte limit")]
    TotalBytes {
        current: u64,
        additional: u64,
        limit: u64,
    },

    #[error("file too large: {size} bytes exceeds {limit} byte limit")]
    FileSize { size: u64, limit: u64 },

    #[error("too many files: {current} files at {limit} file limit")]
    FileCount { current: u64, limit: u64 },

    #[error("path too deep: {depth} levels exceeds {limit} level limit")]
    PathTooDeep { depth: usize, limit: usize },

    #[error("filename too long: {length} bytes exceeds {limit} byte limit")]
    FilenameTooLong { length: usize, limit: usize },

    #[error("path too long: {length} bytes exceeds {limit} byte limit")]
    PathTooLong { length: usize, limit: usize },

    #[error("unsafe character {character} in path component '{component}'")]
    UnsafePathChar { character: String, component: String },
}

/// Current store usage, from [`MemFs::usage`](super::MemFs::usage).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemUsage {
    /// Bytes held by file contents.
    pub total_bytes: u64,
    /// Regular files and symlinks.
    pub file_count: u64,
    /// Directories, root included.
    pub dir_count: u64,
}
