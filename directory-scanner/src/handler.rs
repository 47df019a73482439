//! Callback contracts for scans and watches.

use std::io;
use std::path::Path;

use crate::event::{FileAttributes, WatchEvent};
use crate::watcher::FsWatcher;

/// Receives entries accepted by [`DirectoryScanner::scan`](crate::DirectoryScanner::scan).
///
/// Paths are relative to the scanner's base directory. A failing callback
/// only abandons the current entry; the walk goes on.
pub trait ScanVisitor {
    /// Called for every accepted file.
    fn visit(&mut self, path: &Path, attributes: &FileAttributes) -> anyhow::Result<()>;

    /// Called when an entry could not be read.
    fn error(&mut self, path: &Path, error: &io::Error) -> anyhow::Result<()>;
}

/// Receives events from an [`FsWatcher`].
///
/// Callbacks run on the watcher's dispatch thread, except register events
/// from [`FsWatcher::register`], which run on the calling thread. Errors
/// are logged and otherwise ignored.
pub trait WatchEventHandler: Send + Sync {
    /// Called once when the watcher is constructed.
    fn init(&self, _watcher: &FsWatcher) {}

    /// Called when the event queue stays idle for the configured poll timeout.
    fn handle_poll_timeout(&self, _watcher: &FsWatcher) -> anyhow::Result<()> {
        Ok(())
    }

    /// A directory was registered, or an entry was found by a recursive
    /// registration walk.
    fn handle_register_event(&self, _event: &WatchEvent) -> anyhow::Result<()> {
        Ok(())
    }

    fn handle_create_event(&self, event: &WatchEvent) -> anyhow::Result<()>;

    fn handle_modify_event(&self, event: &WatchEvent) -> anyhow::Result<()>;

    fn handle_delete_event(&self, event: &WatchEvent) -> anyhow::Result<()>;
}
