//! Dotted fact paths.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Printable ASCII without space or '.', one or more segments joined by '.'.
const PATH_PATTERN: &str = r"^[\x21-\x2D\x2F-\x7E]+(\.[\x21-\x2D\x2F-\x7E]+)*$";

/// Maximum accepted path length in bytes.
pub const MAX_PATH_LEN: usize = 1024;

fn path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // constant pattern; `path_pattern_compiles` covers it
    RE.get_or_init(|| Regex::new(PATH_PATTERN).unwrap_or_else(|e| panic!("invalid path pattern: {e}")))
}

/// True when `raw` is usable as one segment of a [`FactPath`].
pub(crate) fn is_segment(raw: &str) -> bool {
    !raw.contains('.') && FactPath::parse(raw).is_ok()
}

/// A validated, dot-delimited path into a fact tree.
///
/// Segments are case-sensitive and literal dots cannot be escaped.
///
/// # Examples
///
/// ```
/// use xal::FactPath;
///
/// let path = FactPath::parse("xi.event.input.text").unwrap();
/// assert_eq!(path.segments().count(), 4);
/// assert!(FactPath::parse("xi..event").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FactPath(String);

impl FactPath {
    /// Parses and validates a path.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidPath` for empty paths, empty segments,
    /// whitespace, non-ASCII characters, or paths longer than [`MAX_PATH_LEN`].
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(invalid(raw, "path is empty"));
        }
        if raw.len() > MAX_PATH_LEN {
            return Err(invalid(raw, "path is too long"));
        }
        if !raw.is_ascii() {
            return Err(invalid(raw, "path must be ASCII"));
        }
        if !path_regex().is_match(raw) {
            return Err(invalid(raw, "segments must be non-empty and contain no whitespace"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// The final segment.
    #[must_use]
    pub fn leaf_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// The enclosing path, or `None` for a single-segment path.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.rsplit_once('.').map(|(head, _)| Self(head.to_string()))
    }

    /// True if `self` equals `other` or lies beneath it.
    #[must_use]
    pub fn starts_with(&self, other: &Self) -> bool {
        self.0 == other.0
            || (self.0.starts_with(other.0.as_str()) && self.0.as_bytes().get(other.0.len()) == Some(&b'.'))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn invalid(raw: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for FactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FactPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FactPath {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for FactPath {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<FactPath> for String {
    fn from(p: FactPath) -> Self {
        p.0
    }
}
