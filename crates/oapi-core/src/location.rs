//! # Instance Locations
//!
//! A [`Location`] addresses one node inside a concrete payload. It renders
//! as an RFC 6901 JSON pointer (`/history/0/modificationDate`), which is also
//! the form the structural validator uses for its instance paths.

use std::fmt;

/// One step of a concrete instance path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Object member.
    Key(String),
    /// Array element.
    Index(usize),
}

/// A concrete path from a payload root to one of its nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    segments: Vec<Segment>,
}

impl Location {
    /// The root location.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a location from segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Parse a JSON pointer. Numeric tokens become [`Segment::Index`].
    ///
    /// Returns `None` if the pointer is non-empty and does not start with `/`.
    pub fn parse_pointer(pointer: &str) -> Option<Self> {
        if pointer.is_empty() {
            return Some(Self::root());
        }
        let rest = pointer.strip_prefix('/')?;
        let segments = rest
            .split('/')
            .map(|token| {
                let token = token.replace("~1", "/").replace("~0", "~");
                match token.parse::<usize>() {
                    Ok(index) if !token.starts_with('+') => Segment::Index(index),
                    _ => Segment::Key(token),
                }
            })
            .collect();
        Some(Self { segments })
    }

    /// The path segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns true for the root location.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append an object key.
    pub fn push_key(&mut self, key: impl Into<String>) {
        self.segments.push(Segment::Key(key.into()));
    }

    /// Append an array index.
    pub fn push_index(&mut self, index: usize) {
        self.segments.push(Segment::Index(index));
    }

    /// Remove the last segment.
    pub fn pop(&mut self) -> Option<Segment> {
        self.segments.pop()
    }

    /// Return a new location with `other` appended.
    pub fn join(&self, other: &Location) -> Location {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => {
                    write!(f, "/{}", key.replace('~', "~0").replace('/', "~1"))?;
                }
                Segment::Index(index) => write!(f, "/{index}")?,
            }
        }
        Ok(())
    }
}
