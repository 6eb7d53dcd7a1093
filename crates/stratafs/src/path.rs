//! Lexical path handling shared by every filesystem layer.
//!
//! Nothing here touches a backend: `..` is collapsed textually, and a `..` at
//! the root stays at the root. All composition layers exchange paths in the
//! normalized form produced by [`normalize`]: absolute, no `.`/`..`, no
//! trailing separator, `/` for the root.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Lexically clean a path.
///
/// Rooted paths stay rooted and drop `..` above the root. Relative paths keep
/// leading `..` components. An empty result becomes `.`.
pub fn clean(path: &Path) -> PathBuf {
    let mut rooted = false;
    let mut parts: Vec<&OsStr> = Vec::new();
    let mut leading_parents = 0usize;

    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => {
                rooted = true;
                parts.clear();
                leading_parents = 0;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() && !rooted {
                    leading_parents += 1;
                }
            }
            Component::Normal(name) => parts.push(name),
        }
    }

    let mut result = PathBuf::new();
    if rooted {
        result.push("/");
    }
    for _ in 0..leading_parents {
        result.push("..");
    }
    for part in parts {
        result.push(part);
    }
    if result.as_os_str().is_empty() {
        result.push(".");
    }
    result
}

/// Normalize to the absolute form all layers use for lookups.
///
/// Relative input is treated as relative to the root, so `a/../..` is `/`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(name) => result.push(name),
            Component::ParentDir => {
                result.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    result
}

/// Join `name` under `base` textually, then clean.
///
/// Unlike [`Path::join`], an absolute `name` does not replace `base`; it is
/// appended. `..` in `name` may still climb out of `base`, which is what the
/// confinement layers check for afterwards.
pub fn join(base: &Path, name: &Path) -> PathBuf {
    let mut joined = base.as_os_str().to_os_string();
    joined.push("/");
    joined.push(name.as_os_str());
    clean(Path::new(&joined))
}

/// Report whether `path` is syntactically local: relative, non-empty, and
/// never climbing above its starting directory after cleaning.
pub fn is_local(path: &Path) -> bool {
    if path.as_os_str().is_empty() || path.has_root() {
        return false;
    }
    let cleaned = clean(path);
    !matches!(cleaned.components().next(), Some(Component::ParentDir))
}

/// Parent directory of a normalized path; the root is its own parent.
pub fn parent(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Final component as a string; the root is named `/`.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}

/// Named segments of a normalized path, root excluded.
pub fn segments(path: &Path) -> impl Iterator<Item = &OsStr> {
    path.components().filter_map(|c| match c {
        Component::Normal(name) => Some(name),
        _ => None,
    })
}

/// True when `path` is the root.
pub fn is_root(path: &Path) -> bool {
    segments(path).next().is_none()
}

/// Re-root `path` beneath `base`, returning it as an absolute path inside
/// `base`'s namespace, or `None` if `path` is not within `base`.
pub fn strip_base(path: &Path, base: &Path) -> Option<PathBuf> {
    let rest = path.strip_prefix(base).ok()?;
    Some(Path::new("/").join(rest))
}
