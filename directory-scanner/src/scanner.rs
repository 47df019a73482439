//! Directory scanner factory and scanner sessions.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use path_absolutize::Absolutize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{DEFAULT_EXCLUDES, ScannerConfig, WatcherOptions};
use crate::error::{Result, ScannerError};
use crate::event::{FileAttributes, WatchEvent};
use crate::handler::{ScanVisitor, WatchEventHandler};
use crate::matcher::PatternMatcher;
use crate::pattern::Pattern;
use crate::watcher::FsWatcher;

#[derive(Debug, Clone)]
struct PatternLists {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
    use_default_excludes: bool,
    follow_links: bool,
}

/// Thread-safe holder of a base directory and include/exclude patterns.
///
/// Each [`DirectoryScanner`] it creates takes a snapshot of the patterns, so
/// later changes never affect scanners already handed out.
#[derive(Debug)]
pub struct ScannerFactory {
    base_dir: PathBuf,
    patterns: Mutex<PatternLists>,
}

impl ScannerFactory {
    /// Create a factory rooted at `base_dir`.
    ///
    /// The directory is made absolute and normalized without resolving
    /// symlinks.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        if !base_dir.is_dir() {
            return Err(ScannerError::NotADirectory(base_dir.display().to_string()));
        }

        Ok(Self {
            base_dir: base_dir.absolutize()?.into_owned(),
            patterns: Mutex::new(PatternLists {
                includes: Vec::new(),
                excludes: Vec::new(),
                use_default_excludes: true,
                follow_links: false,
            }),
        })
    }

    /// Create a factory and apply `config` to it.
    pub fn from_config(base_dir: impl AsRef<Path>, config: &ScannerConfig) -> Result<Self> {
        let factory = Self::new(base_dir)?;
        for glob in &config.includes {
            factory.include(glob)?;
        }
        for glob in &config.excludes {
            factory.exclude(glob)?;
        }
        factory
            .set_use_default_excludes(config.use_default_excludes)
            .set_follow_links(config.follow_links);
        Ok(factory)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Add an include glob. Malformed globs are rejected here.
    pub fn include(&self, glob: &str) -> Result<&Self> {
        let pattern = Pattern::compile(glob)?;
        self.lock().includes.push(pattern);
        Ok(self)
    }

    /// Add an exclude glob. Malformed globs are rejected here.
    pub fn exclude(&self, glob: &str) -> Result<&Self> {
        let pattern = Pattern::compile(glob)?;
        self.lock().excludes.push(pattern);
        Ok(self)
    }

    pub fn reset_includes(&self) -> &Self {
        self.lock().includes.clear();
        self
    }

    pub fn reset_excludes(&self) -> &Self {
        self.lock().excludes.clear();
        self
    }

    /// Toggle the built-in [`DEFAULT_EXCLUDES`].
    pub fn set_use_default_excludes(&self, value: bool) -> &Self {
        self.lock().use_default_excludes = value;
        self
    }

    pub fn use_default_excludes(&self) -> bool {
        self.lock().use_default_excludes
    }

    /// Whether scans follow symbolic links.
    pub fn set_follow_links(&self, value: bool) -> &Self {
        self.lock().follow_links = value;
        self
    }

    pub fn follow_links(&self) -> bool {
        self.lock().follow_links
    }

    /// Include globs as configured.
    pub fn includes(&self) -> Vec<String> {
        self.lock()
            .includes
            .iter()
            .map(|p| p.source().to_string())
            .collect()
    }

    /// Exclude globs as configured, without the defaults.
    pub fn excludes(&self) -> Vec<String> {
        self.lock()
            .excludes
            .iter()
            .map(|p| p.source().to_string())
            .collect()
    }

    /// Create a scanner over a snapshot of the current patterns.
    pub fn create_scanner(&self) -> Result<DirectoryScanner> {
        let lists = self.lock().clone();

        let mut excludes = lists.excludes;
        if lists.use_default_excludes {
            for glob in DEFAULT_EXCLUDES {
                excludes.push(Pattern::compile(glob)?);
            }
        }
        let matcher = PatternMatcher::new(lists.includes, excludes);

        Ok(DirectoryScanner {
            base_dir: self.base_dir.clone(),
            follow_links: lists.follow_links,
            bridge: Arc::new(ScanBridge {
                base_dir: self.base_dir.clone(),
                matcher,
                target: Mutex::new(None),
            }),
            watcher: None,
            closed: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, PatternLists> {
        self.patterns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One scanning session over a pattern snapshot.
///
/// Not thread-safe: one scan or watch activation at a time. Closing the
/// session (or dropping it) cancels its watch.
pub struct DirectoryScanner {
    base_dir: PathBuf,
    follow_links: bool,
    bridge: Arc<ScanBridge>,
    watcher: Option<FsWatcher>,
    closed: bool,
}

impl DirectoryScanner {
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Walk the base directory depth-first, visiting every accepted file.
    ///
    /// Directories failing the prefix vote are skipped with their whole
    /// subtree; the base directory itself is always entered. Unreadable
    /// entries go to [`ScanVisitor::error`] and the walk continues.
    pub fn scan(&mut self, visitor: &mut dyn ScanVisitor) -> Result<()> {
        if self.closed {
            return Err(ScannerError::ScannerClosed);
        }

        let mut walker = WalkDir::new(&self.base_dir)
            .follow_links(self.follow_links)
            .into_iter();

        while let Some(next) = walker.next() {
            let entry = match next {
                Ok(entry) => entry,
                Err(err) => {
                    let relative = err
                        .path()
                        .map(|p| self.bridge.relativize(p))
                        .unwrap_or_default();
                    report_error(visitor, &relative, walk_error_to_io(err));
                    continue;
                }
            };

            let relative = self.bridge.relativize(entry.path());
            if entry.file_type().is_dir() {
                if entry.depth() > 0 && !self.bridge.accepts(&relative, true) {
                    walker.skip_current_dir();
                }
                continue;
            }
            if !self.bridge.accepts(&relative, false) {
                continue;
            }

            match entry.metadata() {
                Ok(metadata) => {
                    if let Err(err) = visitor.visit(&relative, &FileAttributes::from(&metadata)) {
                        warn!("Scan visitor failed on {}: {err:#}", relative.display());
                    }
                }
                Err(err) => report_error(visitor, &relative, walk_error_to_io(err)),
            }
        }
        Ok(())
    }

    /// Watch the base directory recursively, forwarding accepted events to
    /// `handler`.
    pub fn activate_watcher(&mut self, handler: Arc<dyn WatchEventHandler>) -> Result<FsWatcher> {
        self.activate_watcher_with(handler, WatcherOptions::default())
    }

    /// Like [`activate_watcher`](Self::activate_watcher), with watcher
    /// options. Options only apply when the watcher is first created;
    /// calling again swaps the handler and re-registers the base directory.
    pub fn activate_watcher_with(
        &mut self,
        handler: Arc<dyn WatchEventHandler>,
        options: WatcherOptions,
    ) -> Result<FsWatcher> {
        if self.closed {
            return Err(ScannerError::ScannerClosed);
        }
        self.bridge.set_target(Some(handler));

        let watcher = match &self.watcher {
            Some(watcher) => watcher.clone(),
            None => {
                let watcher = FsWatcher::new(
                    self.base_dir.display().to_string(),
                    self.bridge.clone(),
                    options,
                )?;
                self.watcher = Some(watcher.clone());
                watcher
            }
        };
        watcher.register(&self.base_dir, true)?;
        Ok(watcher)
    }

    /// The active watcher, if any.
    pub fn watcher(&self) -> Option<&FsWatcher> {
        self.watcher.as_ref()
    }

    /// Cancel any watch and release the handler. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.close();
        }
        self.bridge.set_target(None);
        if !self.closed {
            debug!("Closed scanner for {}", self.base_dir.display());
        }
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for DirectoryScanner {
    fn drop(&mut self) {
        self.close();
    }
}

fn report_error(visitor: &mut dyn ScanVisitor, relative: &Path, error: io::Error) {
    if let Err(err) = visitor.error(relative, &error) {
        warn!("Scan visitor failed on error for {}: {err:#}", relative.display());
    }
}

fn walk_error_to_io(err: walkdir::Error) -> io::Error {
    let message = err.to_string();
    err.into_io_error().unwrap_or_else(|| io::Error::other(message))
}

/// Applies a session's matcher to walk entries and to live events, and
/// forwards accepted events to the caller's handler.
struct ScanBridge {
    base_dir: PathBuf,
    matcher: PatternMatcher,
    target: Mutex<Option<Arc<dyn WatchEventHandler>>>,
}

impl ScanBridge {
    fn relativize(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.base_dir)
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Prefix vote for directories, full vote for everything else.
    fn accepts(&self, relative: &Path, is_dir: bool) -> bool {
        if is_dir {
            self.matcher.accepts_dir(relative)
        } else {
            self.matcher.accepts_file(relative)
        }
    }

    /// Whether a live event path is a terminal match under the base dir.
    fn accepts_event(&self, full_path: &Path) -> bool {
        match full_path.strip_prefix(&self.base_dir) {
            Ok(relative) if !relative.as_os_str().is_empty() => self.accepts(relative, false),
            _ => false,
        }
    }

    fn set_target(&self, handler: Option<Arc<dyn WatchEventHandler>>) {
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    fn target(&self) -> Option<Arc<dyn WatchEventHandler>> {
        self.target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Target handler for an event on a non-directory entry that passes.
    fn target_for_entry(&self, event: &WatchEvent) -> Option<Arc<dyn WatchEventHandler>> {
        if event.full_path.is_dir() || !self.accepts_event(&event.full_path) {
            return None;
        }
        self.target()
    }
}

impl WatchEventHandler for ScanBridge {
    fn handle_poll_timeout(&self, watcher: &FsWatcher) -> anyhow::Result<()> {
        match self.target() {
            Some(target) => target.handle_poll_timeout(watcher),
            None => Ok(()),
        }
    }

    fn handle_register_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        match self.target_for_entry(event) {
            Some(target) => target.handle_register_event(event),
            None => Ok(()),
        }
    }

    fn handle_create_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        match self.target_for_entry(event) {
            Some(target) => target.handle_create_event(event),
            None => Ok(()),
        }
    }

    fn handle_modify_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        match self.target_for_entry(event) {
            Some(target) => target.handle_modify_event(event),
            None => Ok(()),
        }
    }

    // The entry is gone, so there is no directory check to make.
    fn handle_delete_event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        if !self.accepts_event(&event.full_path) {
            return Ok(());
        }
        match self.target() {
            Some(target) => target.handle_delete_event(event),
            None => Ok(()),
        }
    }
}
