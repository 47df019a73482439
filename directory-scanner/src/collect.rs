//! Ready-made visitors and handlers that accumulate or republish results.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::event::{FileAttributes, WatchEvent, WatchEventKind};
use crate::handler::{ScanVisitor, WatchEventHandler};

/// Scan visitor that keeps every match and error in order.
#[derive(Debug, Default)]
pub struct CollectVisitor {
    /// Accepted entries with their attributes.
    pub matches: Vec<(PathBuf, FileAttributes)>,

    /// Entries that could not be read.
    pub errors: Vec<(PathBuf, io::Error)>,
}

impl CollectVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths of the accepted entries, in visit order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.matches.iter().map(|(path, _)| path.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.matches.clear();
        self.errors.clear();
    }
}

impl ScanVisitor for CollectVisitor {
    fn visit(&mut self, path: &Path, attributes: &FileAttributes) -> anyhow::Result<()> {
        self.matches.push((path.to_path_buf(), attributes.clone()));
        Ok(())
    }

    fn error(&mut self, path: &Path, error: &io::Error) -> anyhow::Result<()> {
        self.errors
            .push((path.to_path_buf(), io::Error::new(error.kind(), error.to_string())));
        Ok(())
    }
}

/// Events gathered by an [`EventCollector`], bucketed by kind.
#[derive(Debug, Clone, Default)]
pub struct CollectedEvents {
    base_dir: Option<PathBuf>,

    pub registered: Vec<WatchEvent>,

    pub created: Vec<WatchEvent>,

    pub modified: Vec<WatchEvent>,

    pub deleted: Vec<WatchEvent>,
}

impl CollectedEvents {
    pub fn registered_paths(&self) -> Vec<PathBuf> {
        self.paths(&self.registered)
    }

    pub fn created_paths(&self) -> Vec<PathBuf> {
        self.paths(&self.created)
    }

    pub fn modified_paths(&self) -> Vec<PathBuf> {
        self.paths(&self.modified)
    }

    pub fn deleted_paths(&self) -> Vec<PathBuf> {
        self.paths(&self.deleted)
    }

    /// Whether no events were collected.
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
            && self.created.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
    }

    /// Event paths, relative to the collector's base directory when it has one.
    fn paths(&self, events: &[WatchEvent]) -> Vec<PathBuf> {
        events
            .iter()
            .map(|event| match &self.base_dir {
                Some(base) => event.relative_to(base),
                None => event.full_path.clone(),
            })
            .collect()
    }
}

/// Thread-safe [`WatchEventHandler`] that accumulates events in order.
///
/// Consumers that poll rather than subscribe read a point-in-time copy via
/// [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct EventCollector {
    merge_created_into_modified: bool,
    events: Mutex<CollectedEvents>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report paths relative to `base_dir`.
    pub fn with_base_dir(self, base_dir: impl Into<PathBuf>) -> Self {
        self.lock().base_dir = Some(base_dir.into());
        self
    }

    /// Record Create events in the modified bucket.
    pub fn merge_created_into_modified(mut self) -> Self {
        self.merge_created_into_modified = true;
        self
    }

    /// Copy of everything collected so far.
    pub fn snapshot(&self) -> CollectedEvents {
        self.lock().clone()
    }

    /// Drain everything collected so far.
    pub fn take(&self) -> CollectedEvents {
        let mut events = self.lock();
        let base_dir = events.base_dir.clone();
        std::mem::replace(
            &mut *events,
            CollectedEvents {
                base_dir,
                ..CollectedEvents::default()
            },
        )
    }

    pub fn clear(&self) {
        let mut events = self.lock();
        events.registered.clear();
        events.created.clear();
        events.modified.clear();
        events.deleted.clear();
    }

    fn lock(&self) -> MutexGuard<'_, CollectedEvents> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: &WatchEvent) {
        let mut events = self.lock();
        let bucket = match event.kind {
            WatchEventKind::Register => &mut events.registered,
            WatchEventKind::Create if self.merge_created_into_modified => &mut events.modified,
            WatchEventKind::Create => &mut events.created,
            WatchEventKind::Modify => &mut events.modified,
            WatchEventKind::Delete => &mut events.deleted,
        };
        bucket.push(event.clone());
    }
}

impl WatchEventHandler for EventCollector {
    fn handle_register_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        self.record(event);
        Ok(())
    }

    fn handle_create_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        self.record(event);
        Ok(())
    }

    fn handle_modify_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        self.record(event);
        Ok(())
    }

    fn handle_delete_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        self.record(event);
        Ok(())
    }
}

/// Republishes every event onto an unbounded tokio channel, bridging the
/// watcher's dispatch thread to async consumers.
#[derive(Debug, Clone)]
pub struct ChannelEventHandler {
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl ChannelEventHandler {
    /// Create a handler and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn publish(&self, event: &WatchEvent) -> anyhow::Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}

impl WatchEventHandler for ChannelEventHandler {
    fn handle_register_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        self.publish(event)
    }

    fn handle_create_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        self.publish(event)
    }

    fn handle_modify_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        self.publish(event)
    }

    fn handle_delete_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        self.publish(event)
    }
}
