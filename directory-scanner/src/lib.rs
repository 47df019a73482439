//! # Directory Scanner
//!
//! Ant-style directory scanning and live file system watching for Codex.
//! A base directory plus include/exclude globs drive both a one-shot walk
//! and a recursive watch, and both apply the same matching rules.
//!
//! ## Features
//!
//! - **Ant-style globs**: `*`, `?`, `[a-z]`, `{a,b}` within a segment and
//!   `**` across segments
//! - **Prefix pruning**: directories that cannot lead to a match are never
//!   entered
//! - **Default excludes**: VCS metadata and editor droppings are skipped
//!   unless disabled
//! - **Recursive watching**: new subdirectories are registered as they
//!   appear
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Scanner                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ScannerFactory ──► DirectoryScanner ──► ScanVisitor            │
//! │       │                   │                                     │
//! │       ▼                   ▼                                     │
//! │  PatternMatcher       FsWatcher ──► WatchEventHandler           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod collect;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod matcher;
pub mod pattern;
pub mod scanner;
pub mod watcher;

pub use collect::{ChannelEventHandler, CollectVisitor, CollectedEvents, EventCollector};
pub use config::{DEFAULT_EXCLUDES, ScannerConfig, WatcherOptions};
pub use error::{Result, ScannerError};
pub use event::{FileAttributes, WatchEvent, WatchEventKind};
pub use handler::{ScanVisitor, WatchEventHandler};
pub use matcher::PatternMatcher;
pub use pattern::Pattern;
pub use scanner::{DirectoryScanner, ScannerFactory};
pub use watcher::FsWatcher;
