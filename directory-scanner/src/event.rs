//! Events and attributes delivered to scan visitors and watch handlers.

use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file system event produced by an [`FsWatcher`](crate::FsWatcher).
///
/// Two events are equal when they resolve to the same `full_path`,
/// whatever their kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    /// The kind of event.
    pub kind: WatchEventKind,

    /// Watched directory the event was reported for.
    pub directory: PathBuf,

    /// Entry name relative to `directory`.
    pub child: PathBuf,

    /// Normalized `directory/child`.
    pub full_path: PathBuf,

    /// When the event was dispatched.
    pub timestamp: DateTime<Utc>,
}

impl WatchEvent {
    /// Create an event for `child` inside `directory`.
    pub fn new(kind: WatchEventKind, directory: impl Into<PathBuf>, child: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        let child = child.into();
        let full_path = normalize_path(&directory.join(&child));
        Self {
            kind,
            directory,
            child,
            full_path,
            timestamp: Utc::now(),
        }
    }

    /// Create an event from a full path, splitting off its last component.
    pub fn for_path(kind: WatchEventKind, full_path: &Path) -> Self {
        let directory = full_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let child = full_path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default();
        Self::new(kind, directory, child)
    }

    /// `full_path` relative to `base`, or unchanged when outside it.
    pub fn relative_to(&self, base: &Path) -> PathBuf {
        self.full_path
            .strip_prefix(base)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.full_path.clone())
    }
}

impl PartialEq for WatchEvent {
    fn eq(&self, other: &Self) -> bool {
        self.full_path == other.full_path
    }
}

impl Eq for WatchEvent {}

impl Hash for WatchEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full_path.hash(state);
    }
}

/// Kind of watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    /// Entry was registered or discovered while registering.
    Register,

    /// Entry was created.
    Create,

    /// Entry was modified.
    Modify,

    /// Entry was deleted.
    Delete,
}

/// Attributes of a visited entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    /// Whether the entry is a regular file.
    pub is_file: bool,

    /// Whether the entry is a directory.
    pub is_directory: bool,

    /// Whether the entry is a symbolic link.
    pub is_symlink: bool,

    /// Size in bytes.
    pub size: u64,

    /// Last modification time, when the platform reports one.
    pub modified: Option<DateTime<Utc>>,
}

impl From<&std::fs::Metadata> for FileAttributes {
    fn from(metadata: &std::fs::Metadata) -> Self {
        let file_type = metadata.file_type();
        Self {
            is_file: file_type.is_file(),
            is_directory: file_type.is_dir(),
            is_symlink: file_type.is_symlink(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        }
    }
}

/// Lexically normalize a path, resolving `.` and `..` without touching the
/// file system.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn test_event_resolves_full_path() {
        let event = WatchEvent::new(WatchEventKind::Create, "/base/a/./b", "../c.txt");
        assert_eq!(event.full_path, Path::new("/base/a/c.txt"));
        assert_eq!(event.directory, Path::new("/base/a/./b"));
        assert_eq!(event.child, Path::new("../c.txt"));
    }

    #[test]
    fn test_event_equality_uses_full_path_only() {
        let create = WatchEvent::new(WatchEventKind::Create, "/base/a", "x.txt");
        let modify = WatchEvent::for_path(WatchEventKind::Modify, Path::new("/base/a/x.txt"));
        let other = WatchEvent::new(WatchEventKind::Create, "/base/a", "y.txt");

        assert_eq!(create, modify);
        assert_ne!(create, other);

        let set: HashSet<_> = [create, modify, other].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_relative_to() {
        let event = WatchEvent::new(WatchEventKind::Delete, "/base/a", "x.txt");
        assert_eq!(event.relative_to(Path::new("/base")), Path::new("a/x.txt"));
        assert_eq!(event.relative_to(Path::new("/elsewhere")), Path::new("/base/a/x.txt"));
    }

    #[test]
    fn test_attributes_from_metadata() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file = temp_dir.path().join("f.txt");
        std::fs::write(&file, b"hello").unwrap();

        let attrs = FileAttributes::from(&std::fs::metadata(&file).unwrap());
        assert!(attrs.is_file);
        assert!(!attrs.is_directory);
        assert_eq!(attrs.size, 5);
        assert!(attrs.modified.is_some());
    }
}
