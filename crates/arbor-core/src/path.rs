//! Hierarchical item paths.
//!
//! A [`Path`] is a sequence of [`Segment`]s, each a name plus a 1-based
//! same-name-sibling index. Absolute paths are normalized on parse (`.` and
//! `..` are resolved); relative paths keep them so they can be resolved
//! against a base later.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::name::Name;

/// One step of a path: a name and its same-name-sibling index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Segment {
    name: Name,
    index: u32,
}

impl Segment {
    pub fn new(name: Name, index: u32) -> Self {
        Segment {
            name,
            index: index.max(1),
        }
    }

    /// Segment with the default index of 1.
    pub fn named(name: Name) -> Self {
        Segment { name, index: 1 }
    }

    /// Parses `name` or `name[index]`.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw == "." || raw == ".." {
            return Ok(Segment::named(Name::from(raw)));
        }
        let (name, index) = match raw.strip_suffix(']') {
            Some(head) => {
                let (name, index) = head.rsplit_once('[').ok_or_else(|| CoreError::InvalidPath {
                    path: raw.to_string(),
                    reason: "unbalanced index brackets".to_string(),
                })?;
                let index: u32 = index.parse().map_err(|_| CoreError::InvalidPath {
                    path: raw.to_string(),
                    reason: format!("bad index '{}'", index),
                })?;
                if index == 0 {
                    return Err(CoreError::InvalidPath {
                        path: raw.to_string(),
                        reason: "indexes are 1-based".to_string(),
                    });
                }
                (name, index)
            }
            None => (raw, 1),
        };
        Ok(Segment {
            name: Name::parse(name)?,
            index,
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_self_ref(&self) -> bool {
        self.name == "."
    }

    pub fn is_parent_ref(&self) -> bool {
        self.name == ".."
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index > 1 {
            write!(f, "{}[{}]", self.name, self.index)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

impl FromStr for Segment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Segment::parse(s)
    }
}

/// An absolute or relative item path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    absolute: bool,
    segments: SmallVec<[Segment; 8]>,
}

impl Path {
    /// The root path `/`.
    pub fn root() -> Self {
        Path {
            absolute: true,
            segments: SmallVec::new(),
        }
    }

    /// Builds a relative path from segments.
    pub fn relative(segments: impl IntoIterator<Item = Segment>) -> Self {
        Path {
            absolute: false,
            segments: segments.into_iter().collect(),
        }
    }

    /// Parses a path string. Absolute paths are normalized.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let invalid = |reason: String| CoreError::InvalidPath {
            path: s.to_string(),
            reason,
        };
        if s.is_empty() {
            return Err(invalid("empty".to_string()));
        }
        let (absolute, body) = match s.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let mut path = Path {
            absolute,
            segments: SmallVec::new(),
        };
        if body.is_empty() {
            return if absolute {
                Ok(path)
            } else {
                Err(invalid("empty".to_string()))
            };
        }
        let body = body.strip_suffix('/').unwrap_or(body);
        for raw in body.split('/') {
            if raw.is_empty() {
                return Err(invalid("empty segment".to_string()));
            }
            let segment = Segment::parse(raw).map_err(|e| invalid(e.to_string()))?;
            if absolute && segment.is_self_ref() {
                continue;
            }
            if absolute && segment.is_parent_ref() {
                if path.segments.pop().is_none() {
                    return Err(invalid("climbs above the root".to_string()));
                }
                continue;
            }
            path.segments.push(segment);
        }
        Ok(path)
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments; the root has depth 0.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn last_segment(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn name(&self) -> Option<&Name> {
        self.segments.last().map(Segment::name)
    }

    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }

    /// Ancestor at the given depth (0 is the root).
    pub fn ancestor(&self, depth: usize) -> Option<Path> {
        if depth > self.segments.len() {
            return None;
        }
        Some(Path {
            absolute: self.absolute,
            segments: self.segments[..depth].iter().cloned().collect(),
        })
    }

    pub fn child(&self, segment: Segment) -> Path {
        let mut child = self.clone();
        child.segments.push(segment);
        child
    }

    pub fn child_named(&self, name: Name) -> Path {
        self.child(Segment::named(name))
    }

    /// True if `self` equals `other` or lies beneath it.
    pub fn is_at_or_below(&self, other: &Path) -> bool {
        self.absolute == other.absolute
            && self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// True if `self` lies strictly beneath `other`.
    pub fn is_descendant_of(&self, other: &Path) -> bool {
        self.segments.len() > other.segments.len() && self.is_at_or_below(other)
    }

    /// Relative path from `ancestor` to `self`, if `self` is at or below it.
    pub fn relative_to(&self, ancestor: &Path) -> Option<Path> {
        if !self.is_at_or_below(ancestor) {
            return None;
        }
        Some(Path::relative(
            self.segments[ancestor.segments.len()..].iter().cloned(),
        ))
    }

    /// Resolves a relative path against `self`; absolute inputs are returned as is.
    pub fn resolve(&self, relative: &Path) -> Result<Path, CoreError> {
        if relative.absolute {
            return Ok(relative.clone());
        }
        let mut resolved = self.clone();
        for segment in &relative.segments {
            if segment.is_self_ref() {
                continue;
            }
            if segment.is_parent_ref() {
                if resolved.segments.pop().is_none() {
                    return Err(CoreError::InvalidPath {
                        path: format!("{}/{}", self, relative),
                        reason: "climbs above the root".to_string(),
                    });
                }
                continue;
            }
            resolved.segments.push(segment.clone());
        }
        Ok(resolved)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            if self.segments.is_empty() {
                return f.write_str("/");
            }
            for segment in &self.segments {
                write!(f, "/{}", segment)?;
            }
            Ok(())
        } else if self.segments.is_empty() {
            f.write_str(".")
        } else {
            for (i, segment) in self.segments.iter().enumerate() {
                if i > 0 {
                    f.write_str("/")?;
                }
                write!(f, "{}", segment)?;
            }
            Ok(())
        }
    }
}

impl FromStr for Path {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Path::parse(&s)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}
