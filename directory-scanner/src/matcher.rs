//! Include/exclude matching over path segments.

use std::path::{Component, Path};

use crate::pattern::{Pattern, Segment};

/// Matches relative paths against include and exclude [`Pattern`] sets.
///
/// Two modes are supported:
///
/// - **prefix** votes decide whether a directory may lead to an accepted
///   entry. Only includes take part, and a pattern does not have to be
///   consumed entirely.
/// - **full** votes decide whether a terminal entry is accepted. Any
///   matching exclude rejects it, then an include must match completely.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl PatternMatcher {
    /// Create a matcher from compiled patterns.
    ///
    /// An empty include set behaves as `**/*`.
    pub fn new(includes: Vec<Pattern>, excludes: Vec<Pattern>) -> Self {
        let includes = if includes.is_empty() {
            vec![match_everything()]
        } else {
            includes
        };
        Self { includes, excludes }
    }

    pub fn includes(&self) -> &[Pattern] {
        &self.includes
    }

    pub fn excludes(&self) -> &[Pattern] {
        &self.excludes
    }

    /// Vote over every pattern.
    pub fn vote_all<S: AsRef<str>>(&self, segments: &[S], prefix_only: bool) -> bool {
        // Excludes may name only terminal entries beneath a directory, so
        // they must not prune descent.
        if !prefix_only && self.excludes.iter().any(|p| vote(segments, p, false)) {
            return false;
        }
        self.includes.iter().any(|p| vote(segments, p, prefix_only))
    }

    /// Whether a scan should descend into the directory at `relative`.
    pub fn accepts_dir(&self, relative: &Path) -> bool {
        self.vote_all(&path_segments(relative), true)
    }

    /// Whether the terminal entry at `relative` is accepted.
    pub fn accepts_file(&self, relative: &Path) -> bool {
        self.vote_all(&path_segments(relative), false)
    }
}

fn match_everything() -> Pattern {
    Pattern::from_segments("**/*", vec![Segment::AnyPath])
}

/// Split a relative path into its normal segments.
pub fn path_segments(relative: &Path) -> Vec<String> {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Greedy left-to-right vote of `segments` against one pattern.
///
/// On a `**` marker the cursor stays put and the next concrete entry is
/// remembered as the expected matcher. Every segment is absorbed by the
/// marker until one matches the expected entry, at which point the cursor
/// jumps past both.
pub fn vote<S: AsRef<str>>(segments: &[S], pattern: &Pattern, prefix_only: bool) -> bool {
    let entries = pattern.segments();
    if segments.is_empty() || entries.is_empty() {
        return false;
    }

    let mut cursor = 0usize;
    let mut expected: Option<&Segment> = None;

    for segment in segments {
        let segment = segment.as_ref();
        let Some(current) = entries.get(cursor) else {
            return false;
        };
        if current.is_any_path() && expected.is_none() {
            expected = entries.get(cursor + 1);
        }
        if !current.matches(segment) {
            return false;
        }
        match expected {
            Some(next) => {
                if next.matches(segment) {
                    expected = None;
                    cursor += 2;
                }
            }
            None if !current.is_any_path() => cursor += 1,
            None => {}
        }
    }

    prefix_only || entries[cursor.min(entries.len())..].iter().all(Segment::is_any_path)
}
