//! Ant-style glob compilation.
//!
//! A glob such as `src/**/test_*.{rs,toml}` is split on `/` into segment
//! tokens. Each token becomes an anchored regular expression, except `**`,
//! which becomes [`Segment::AnyPath`] and stands for zero or more whole
//! segments.
//!
//! | Token syntax | Meaning |
//! |--------------|---------|
//! | `*` | Any run of characters within one segment |
//! | `?` | Exactly one character |
//! | `[abc]`, `[a-z]`, `[!a]` | Character class (negated with `!`) |
//! | `{a,b}` | Alternation |
//! | `**` | Zero or more segments |
//!
//! Backslashes are treated as path separators, never as escapes.

use std::fmt;

use regex::Regex;

use crate::error::{Result, ScannerError};

/// Token that stands for zero or more whole path segments.
const ANY_PATH_TOKEN: &str = "**";

/// One compiled segment of a [`Pattern`].
#[derive(Clone)]
pub enum Segment {
    /// `**`: matches any single segment and may absorb any number of them.
    AnyPath,

    /// A single-segment glob compiled to an anchored regex.
    Glob(Regex),
}

impl Segment {
    /// Check whether a single path segment matches.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::AnyPath => true,
            Self::Glob(regex) => regex.is_match(value),
        }
    }

    /// Whether this is the `**` marker.
    pub fn is_any_path(&self) -> bool {
        matches!(self, Self::AnyPath)
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyPath => f.write_str(ANY_PATH_TOKEN),
            Self::Glob(regex) => write!(f, "Glob({})", regex.as_str()),
        }
    }
}

/// A compiled glob: an ordered list of segment matchers.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compile a glob string.
    ///
    /// Runs of `**` collapse into one marker, and a `*` token directly after
    /// a `**` marker is absorbed by it. A blank glob compiles as `**`.
    pub fn compile(glob: &str) -> Result<Self> {
        let normalized = normalize(glob);
        let text = if normalized.is_empty() {
            ANY_PATH_TOKEN
        } else {
            normalized.as_str()
        };

        let mut segments = Vec::new();
        let mut in_any_path = false;

        for token in text.split('/').map(str::trim).filter(|t| !t.is_empty()) {
            if token == ANY_PATH_TOKEN {
                if !in_any_path {
                    in_any_path = true;
                    segments.push(Segment::AnyPath);
                }
            } else if token == "*" && in_any_path {
                // `**/*` adds nothing over `**`.
            } else {
                in_any_path = false;
                segments.push(Segment::Glob(compile_segment(glob, token)?));
            }
        }

        Ok(Self {
            source: glob.to_string(),
            segments,
        })
    }

    pub(crate) fn from_segments(source: &str, segments: Vec<Segment>) -> Self {
        Self {
            source: source.to_string(),
            segments,
        }
    }

    /// The glob text this pattern was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Compiled segments in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Normalize separators to `/` and strip surrounding slashes and spaces.
fn normalize(glob: &str) -> String {
    let mut text = glob.replace('\\', "/");
    if std::path::MAIN_SEPARATOR != '/' {
        text = text.replace(std::path::MAIN_SEPARATOR, "/");
    }
    text.trim_matches(|c| c == '/' || c == ' ').to_string()
}

fn compile_segment(glob: &str, token: &str) -> Result<Regex> {
    let expr = glob_to_regex(glob, token)?;
    Regex::new(&expr).map_err(|err| ScannerError::invalid_pattern(glob, err.to_string()))
}

/// Translate one segment token into an anchored regular expression.
fn glob_to_regex(glob: &str, token: &str) -> Result<String> {
    let mut out = String::with_capacity(token.len() * 2 + 8);
    out.push_str("^(?:");

    let mut chars = token.chars().peekable();
    let mut open_braces = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' => {
                open_braces += 1;
                out.push_str("(?:");
            }
            '}' if open_braces > 0 => {
                open_braces -= 1;
                out.push(')');
            }
            ',' if open_braces > 0 => out.push('|'),
            '[' => {
                out.push('[');
                if chars.next_if(|&n| n == '!' || n == '^').is_some() {
                    out.push('^');
                }
                // A leading `]` is a literal member of the class.
                if chars.next_if_eq(&']').is_some() {
                    out.push_str("\\]");
                }
                let mut closed = false;
                for member in chars.by_ref() {
                    match member {
                        ']' => {
                            closed = true;
                            break;
                        }
                        m @ ('[' | '&' | '~' | '^') => {
                            out.push('\\');
                            out.push(m);
                        }
                        m => out.push(m),
                    }
                }
                if !closed {
                    return Err(ScannerError::invalid_pattern(
                        glob,
                        format!("unterminated character class in `{token}`"),
                    ));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }

    if open_braces > 0 {
        return Err(ScannerError::invalid_pattern(
            glob,
            format!("unterminated alternation in `{token}`"),
        ));
    }

    out.push_str(")$");
    Ok(out)
}
