//! Registration-based file system watcher.
//!
//! Every watched directory gets its own non-recursive native watch. The
//! watcher keeps a key/slot map from each directory's resolved identity to
//! the slot describing how it was registered. Recursive registration walks
//! the existing tree up front, and directories created later under a
//! recursive slot are registered by the dispatch thread before their Create
//! event is delivered.
//!
//! Native events are republished onto a channel read by one dispatch thread
//! per watcher. Closing the watcher sends a shutdown message and drops the
//! native watch, which disconnects that channel.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use path_absolutize::Absolutize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::WatcherOptions;
use crate::error::{Result, ScannerError};
use crate::event::{WatchEvent, WatchEventKind};
use crate::handler::WatchEventHandler;

/// Resolved identity of a watched directory.
///
/// Two spellings of the same directory (through a symlink, or differing
/// only in case on case-insensitive file systems) share one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WatchKey(PathBuf);

impl WatchKey {
    /// Resolve through the file system. A path that no longer exists is
    /// resolved through its parent so removed directories keep their key.
    fn resolve(path: &Path) -> Self {
        if let Ok(resolved) = dunce::canonicalize(path) {
            return Self(resolved);
        }
        if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
            if let Ok(parent) = dunce::canonicalize(parent) {
                return Self(parent.join(name));
            }
        }
        let resolved = path
            .absolutize()
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| path.to_path_buf());
        Self(resolved)
    }
}

/// How a directory was registered.
#[derive(Debug, Clone)]
struct WatchSlot {
    /// Path handed to the native watcher; event paths are rooted here.
    path: PathBuf,

    /// Whether new subdirectories are registered automatically.
    recursive: bool,
}

/// Why a directory tree is being registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Discovery {
    /// An explicit [`FsWatcher::register`] call.
    Register,

    /// A Create event for a directory under a recursive slot.
    Create,
}

enum Message {
    Native(notify::Result<notify::Event>),
    Shutdown,
}

#[derive(Default)]
struct State {
    closed: bool,
    native: Option<RecommendedWatcher>,
    control: Option<Sender<Message>>,
    dispatcher: Option<JoinHandle<()>>,
    slots: HashMap<WatchKey, WatchSlot>,
    keys: HashMap<PathBuf, WatchKey>,
}

struct Inner {
    name: String,
    handler: Arc<dyn WatchEventHandler>,
    options: WatcherOptions,
    state: Mutex<State>,
}

/// File system watcher delivering typed events to a [`WatchEventHandler`].
///
/// Handles are cheap to clone and share one watcher. The dispatch thread
/// stops on [`close`](Self::close) or once the last handle is dropped.
///
/// Native queue overflows are dropped without a callback. Callers that need
/// a complete picture should reconcile with a periodic
/// [`DirectoryScanner::scan`](crate::DirectoryScanner::scan).
#[derive(Clone)]
pub struct FsWatcher {
    inner: Arc<Inner>,
}

impl FsWatcher {
    /// Create a watcher and start its dispatch thread.
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn WatchEventHandler>,
        options: WatcherOptions,
    ) -> Result<Self> {
        let inner = Arc::new(Inner {
            name: name.into(),
            handler,
            options,
            state: Mutex::new(State::default()),
        });
        {
            let mut state = inner.lock_state();
            inner.start_dispatcher(&mut state)?;
        }

        let watcher = Self { inner };
        watcher.inner.handler.init(&watcher);
        Ok(watcher)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register a directory.
    ///
    /// With `recursive`, every existing subdirectory is registered before
    /// this returns and files met on the way are reported as register
    /// events. Subdirectories that fail to register are logged and skipped.
    pub fn register(&self, path: impl AsRef<Path>, recursive: bool) -> Result<()> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(ScannerError::NotADirectory(path.display().to_string()));
        }
        if recursive {
            self.inner.register_tree(path, Discovery::Register)
        } else {
            self.inner.register_flat(path, false)?;
            self.inner
                .fire(&WatchEvent::for_path(WatchEventKind::Register, path));
            Ok(())
        }
    }

    /// Cancel the registration for `path`.
    ///
    /// When the slot was recursive, every registered directory beneath it is
    /// cancelled too. Returns whether `path` was registered.
    pub fn unregister(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let Some(slot) = self.inner.unregister_flat(path) else {
            return false;
        };

        if slot.recursive {
            for entry in WalkDir::new(path)
                .min_depth(1)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_dir())
            {
                self.inner.unregister_flat(entry.path());
            }
            // Directories that vanished since they were registered.
            self.inner.unregister_beneath(&slot.path);
        }
        true
    }

    /// Cancel every registration and keep the watcher usable.
    pub fn reset(&self) {
        let mut guard = self.inner.lock_state();
        let state = &mut *guard;
        if let Some(native) = state.native.as_mut() {
            for slot in state.slots.values() {
                let _ = native.unwatch(&slot.path);
            }
        }
        state.slots.clear();
        state.keys.clear();
        debug!("Reset watcher {}", self.inner.name);
    }

    /// Stop the dispatch thread and release all native watches.
    ///
    /// Idempotent. Events already queued but not yet dispatched are dropped.
    pub fn close(&self) {
        let (native, control, dispatcher) = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.slots.clear();
            state.keys.clear();
            (
                state.native.take(),
                state.control.take(),
                state.dispatcher.take(),
            )
        };

        drop(native);
        if let Some(control) = control {
            let _ = control.send(Message::Shutdown);
        }
        if let Some(handle) = dispatcher {
            // A handler may close the watcher from the dispatch thread.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Watcher {} dispatch thread panicked", self.inner.name);
            }
        }
        info!("Closed watcher {}", self.inner.name);
    }

    /// Whether the watcher has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    /// Whether the dispatch thread is alive.
    pub fn is_running(&self) -> bool {
        self.inner
            .lock_state()
            .dispatcher
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Whether the directory at `path` currently holds a registration.
    pub fn is_registered(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let key = WatchKey::resolve(path);
        let state = self.inner.lock_state();
        state.keys.contains_key(path) || state.slots.contains_key(&key)
    }

    /// Number of registered directories.
    pub fn registered_count(&self) -> usize {
        self.inner.lock_state().slots.len()
    }

    /// Registered directory paths, sorted.
    pub fn registered_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.inner.lock_state().keys.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsWatcher")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a dispatch thread with a fresh native watcher, re-watching any
    /// directories still held in the slot map.
    fn start_dispatcher(self: &Arc<Self>, state: &mut State) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let native_tx = tx.clone();
        let mut native = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = native_tx.send(Message::Native(res));
        })?;

        for slot in state.slots.values() {
            if let Err(err) = native.watch(&slot.path, RecursiveMode::NonRecursive) {
                warn!("Failed to re-watch {}: {err}", slot.path.display());
            }
        }

        let weak = Arc::downgrade(self);
        let name = self.name.clone();
        let poll_timeout = self.options.effective_poll_timeout();
        let handle = thread::Builder::new()
            .name(format!("fs-watcher[{name}]"))
            .spawn(move || dispatch_loop(&name, &weak, &rx, poll_timeout))?;

        state.native = Some(native);
        state.control = Some(tx);
        state.dispatcher = Some(handle);
        Ok(())
    }

    fn ensure_dispatcher(self: &Arc<Self>, state: &mut State) -> Result<()> {
        if state.closed {
            return Err(ScannerError::WatcherClosed);
        }
        let alive = state
            .dispatcher
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if !alive {
            warn!("Watcher {} dispatch thread is gone, restarting", self.name);
            self.start_dispatcher(state)?;
        }
        Ok(())
    }

    /// Register `root` and every directory beneath it.
    ///
    /// For [`Discovery::Create`] only directories that were not yet held are
    /// walked, and entries found in them are reported as creates: they
    /// appeared before their directory's native watch existed, so no native
    /// event will follow for them.
    fn register_tree(self: &Arc<Self>, root: &Path, discovery: Discovery) -> Result<()> {
        let inserted = self.register_flat(root, true)?;
        if discovery == Discovery::Create && !inserted {
            return Ok(());
        }
        self.fire(&WatchEvent::for_path(WatchEventKind::Register, root));

        // Directories created while this walk runs may be missed; their own
        // Create events cover most of that window.
        let mut fresh: HashSet<PathBuf> = HashSet::from([root.to_path_buf()]);
        let mut walker = WalkDir::new(root).min_depth(1).into_iter();
        while let Some(next) = walker.next() {
            let entry = match next {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry under {}: {err}", root.display());
                    continue;
                }
            };
            let path = entry.path();
            let in_fresh_dir = path.parent().is_some_and(|parent| fresh.contains(parent));

            if !entry.file_type().is_dir() {
                match discovery {
                    Discovery::Register => {
                        self.fire(&WatchEvent::for_path(WatchEventKind::Register, path));
                    }
                    Discovery::Create if in_fresh_dir => {
                        self.fire(&WatchEvent::for_path(WatchEventKind::Create, path));
                    }
                    Discovery::Create => {}
                }
                continue;
            }

            match self.register_flat(path, true) {
                Ok(true) => {
                    fresh.insert(path.to_path_buf());
                    self.fire(&WatchEvent::for_path(WatchEventKind::Register, path));
                    if discovery == Discovery::Create && in_fresh_dir {
                        self.fire(&WatchEvent::for_path(WatchEventKind::Create, path));
                    }
                }
                Ok(false) if discovery == Discovery::Create => {
                    // Already held; its own watch reports what is inside.
                    walker.skip_current_dir();
                }
                Ok(false) => {
                    self.fire(&WatchEvent::for_path(WatchEventKind::Register, path));
                }
                Err(err) => {
                    warn!("Failed to register {}: {err}", path.display());
                    walker.skip_current_dir();
                }
            }
        }
        Ok(())
    }

    /// Add a native watch for `path`. Returns whether a new slot was
    /// inserted; an existing slot is upgraded to recursive when asked.
    fn register_flat(self: &Arc<Self>, path: &Path, recursive: bool) -> Result<bool> {
        let key = WatchKey::resolve(path);
        let mut guard = self.lock_state();
        let state = &mut *guard;
        self.ensure_dispatcher(state)?;

        if let Some(slot) = state.slots.get_mut(&key) {
            slot.recursive |= recursive;
            return Ok(false);
        }

        let native = state.native.as_mut().ok_or(ScannerError::WatcherClosed)?;
        native.watch(path, RecursiveMode::NonRecursive)?;
        state.keys.insert(path.to_path_buf(), key.clone());
        state.slots.insert(
            key,
            WatchSlot {
                path: path.to_path_buf(),
                recursive,
            },
        );
        debug!("Registered {} (recursive: {recursive})", path.display());
        Ok(true)
    }

    fn unregister_flat(&self, path: &Path) -> Option<WatchSlot> {
        let resolved = WatchKey::resolve(path);
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let key = state.keys.get(path).cloned().unwrap_or(resolved);
        let slot = state.slots.remove(&key)?;
        state.keys.remove(&slot.path);
        if let Some(native) = state.native.as_mut() {
            if let Err(err) = native.unwatch(&slot.path) {
                debug!("Native unwatch of {} failed: {err}", slot.path.display());
            }
        }
        Some(slot)
    }

    fn unregister_beneath(&self, root: &Path) {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let stale: Vec<PathBuf> = state
            .keys
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect();
        for path in stale {
            if let Some(key) = state.keys.remove(&path) {
                state.slots.remove(&key);
            }
            if let Some(native) = state.native.as_mut() {
                let _ = native.unwatch(&path);
            }
        }
    }

    /// Drop the registrations of a removed directory and everything below it.
    fn forget_removed(&self, path: &Path) {
        let known = self.lock_state().keys.contains_key(path);
        let registered = if known {
            Some(path.to_path_buf())
        } else {
            let key = WatchKey::resolve(path);
            self.lock_state().slots.get(&key).map(|slot| slot.path.clone())
        };
        if let Some(registered) = registered {
            self.unregister_beneath(&registered);
            debug!("Watched directory {} was removed", registered.display());
        }
    }

    /// Slot watching `directory`, matched by path first and then by
    /// resolved identity for backends that report canonical paths.
    fn slot_for(&self, directory: &Path) -> Option<WatchSlot> {
        {
            let state = self.lock_state();
            if let Some(slot) = state.keys.get(directory).and_then(|key| state.slots.get(key)) {
                return Some(slot.clone());
            }
        }
        let key = WatchKey::resolve(directory);
        self.lock_state().slots.get(&key).cloned()
    }

    fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Dispatch one native event. Returns `false` once the watcher is closed.
    fn dispatch(self: &Arc<Self>, event: notify::Event) -> bool {
        if event.need_rescan() {
            debug!("Watcher {} dropped an overflow event", self.name);
            return true;
        }

        for (kind, path) in translate(event) {
            if self.is_closed() {
                return false;
            }
            self.dispatch_one(kind, &path);
        }
        true
    }

    fn dispatch_one(self: &Arc<Self>, kind: WatchEventKind, path: &Path) {
        if kind == WatchEventKind::Delete {
            self.forget_removed(path);
        }

        let (Some(directory), Some(child)) = (path.parent(), path.file_name()) else {
            return;
        };
        let Some(slot) = self.slot_for(directory) else {
            debug!("No watch slot for {}, skipping event", directory.display());
            return;
        };

        // Report against the directory as it was registered.
        let event = WatchEvent::new(kind, &slot.path, child);
        if kind == WatchEventKind::Create && slot.recursive && event.full_path.is_dir() {
            if let Err(err) = self.register_tree(&event.full_path, Discovery::Create) {
                error!("Failed to register new directory {}: {err}", event.full_path.display());
            }
        }
        self.fire(&event);
    }

    fn fire(&self, event: &WatchEvent) {
        let handler = &self.handler;
        let result = match event.kind {
            WatchEventKind::Register => handler.handle_register_event(event),
            WatchEventKind::Create => handler.handle_create_event(event),
            WatchEventKind::Modify => handler.handle_modify_event(event),
            WatchEventKind::Delete => handler.handle_delete_event(event),
        };
        if let Err(err) = result {
            error!(
                "Watch handler failed on {:?} {}: {err:#}",
                event.kind,
                event.full_path.display()
            );
        }
    }

    fn poll_timeout(self: &Arc<Self>) {
        let watcher = FsWatcher {
            inner: Arc::clone(self),
        };
        if let Err(err) = self.handler.handle_poll_timeout(&watcher) {
            error!("Watch handler failed on poll timeout: {err:#}");
        }
    }
}

fn dispatch_loop(
    name: &str,
    inner: &Weak<Inner>,
    rx: &Receiver<Message>,
    poll_timeout: Option<Duration>,
) {
    info!("Starting watcher thread: {name}");
    loop {
        let message = match poll_timeout {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    inner.poll_timeout();
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        let event = match message {
            Message::Shutdown => break,
            Message::Native(Ok(event)) => event,
            Message::Native(Err(err)) => {
                warn!("Watcher {name} native error: {err}");
                continue;
            }
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.dispatch(event) {
            break;
        }
    }
    info!("Watcher thread finished: {name}");
}

/// Map a native event onto typed event kinds, one entry per affected path.
fn translate(event: notify::Event) -> Vec<(WatchEventKind, PathBuf)> {
    let each = |kind: WatchEventKind, paths: Vec<PathBuf>| {
        paths.into_iter().map(|p| (kind, p)).collect::<Vec<_>>()
    };

    match event.kind {
        EventKind::Create(_) => each(WatchEventKind::Create, event.paths),
        EventKind::Remove(_) => each(WatchEventKind::Delete, event.paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            each(WatchEventKind::Delete, event.paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            each(WatchEventKind::Create, event.paths)
        }
        // Both halves were already reported as From and To.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .into_iter()
            .map(|p| {
                let kind = if p.exists() {
                    WatchEventKind::Create
                } else {
                    WatchEventKind::Delete
                };
                (kind, p)
            })
            .collect(),
        EventKind::Modify(_) | EventKind::Any => each(WatchEventKind::Modify, event.paths),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}
