//! Path descriptors addressing nodes in a form tree.
//!
//! Paths are plain values built by the schema author and resolved against
//! the tree when a validator or behavior is bound. The textual syntax is:
//!
//! | Text | Meaning |
//! |------|---------|
//! | `""` | the scope node itself |
//! | `email` | child `email` of the scope |
//! | `address.city` | nested child |
//! | `items[2].qty` | array item by position |
//! | `items[*].qty` | every item (schema registration only) |
//! | `$.total` | anchored at the form root instead of the scope |
//!
//! Parsing is lenient: a bracket that holds neither a number nor `*` is
//! read as a key, so `From<&str>` never fails.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// A named child of a group.
    Key(String),
    /// An array item by position.
    Index(usize),
    /// Every item of an array.
    Each,
}

/// Where resolution of a [`Path`] starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Anchor {
    /// The node the path is resolved against (default).
    #[default]
    Scope,
    /// The root group of the form.
    Root,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Path {
    anchor: Anchor,
    segments: Vec<Segment>,
}

impl Path {
    /// The empty, scope-anchored path.
    #[must_use]
    pub fn scope() -> Self {
        Self::default()
    }

    /// The empty, root-anchored path.
    #[must_use]
    pub fn root() -> Self {
        Self {
            anchor: Anchor::Root,
            segments: Vec::new(),
        }
    }

    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (anchor, rest) = if text == "$" {
            (Anchor::Root, "")
        } else if let Some(rest) = text.strip_prefix("$.") {
            (Anchor::Root, rest)
        } else {
            (Anchor::Scope, text)
        };

        let mut segments = Vec::new();
        for part in rest.split('.').filter(|p| !p.is_empty()) {
            let (name, mut brackets) = match part.find('[') {
                Some(at) => (&part[..at], &part[at..]),
                None => (part, ""),
            };
            if !name.is_empty() {
                segments.push(Segment::Key(name.to_string()));
            }
            while let Some(open) = brackets.strip_prefix('[') {
                let Some(close) = open.find(']') else {
                    segments.push(Segment::Key(open.to_string()));
                    break;
                };
                let inner = open[..close].trim();
                segments.push(match inner {
                    "*" => Segment::Each,
                    _ => inner
                        .parse::<usize>()
                        .map_or_else(|_| Segment::Key(inner.to_string()), Segment::Index),
                });
                brackets = &open[close + 1..];
            }
        }
        Self { anchor, segments }
    }

    #[must_use]
    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn is_root_anchored(&self) -> bool {
        self.anchor == Anchor::Root
    }

    /// Same segments, anchored at the root.
    #[must_use]
    pub fn anchored_at_root(mut self) -> Self {
        self.anchor = Anchor::Root;
        self
    }

    /// Same segments, anchored at the scope.
    #[must_use]
    pub fn anchored_at_scope(mut self) -> Self {
        self.anchor = Anchor::Scope;
        self
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(Segment::Key(key.into()));
        self
    }

    #[must_use]
    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(Segment::Index(index));
        self
    }

    #[must_use]
    pub fn each(mut self) -> Self {
        self.segments.push(Segment::Each);
        self
    }

    /// Append all segments of `other`, keeping this path's anchor.
    #[must_use]
    pub fn join(mut self, other: &Path) -> Self {
        self.segments.extend(other.segments.iter().cloned());
        self
    }

    /// Whether `self` is `other` or one of its ancestors (same anchor).
    #[must_use]
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.anchor == other.anchor
            && self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Whether a change at one path can change the value at the other.
    #[must_use]
    pub fn overlaps(&self, other: &Path) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    /// Split at the first [`Segment::Each`]: `items[*].qty` becomes
    /// (`items`, `qty`).
    #[must_use]
    pub fn split_each(&self) -> Option<(Path, Path)> {
        let at = self.segments.iter().position(|s| *s == Segment::Each)?;
        Some((
            Path {
                anchor: self.anchor,
                segments: self.segments[..at].to_vec(),
            },
            Path {
                anchor: Anchor::Scope,
                segments: self.segments[at + 1..].to_vec(),
            },
        ))
    }

    /// Replace the leading `prefix` with `replacement`. `None` when `prefix`
    /// does not lead this path.
    #[must_use]
    pub fn rebase(&self, prefix: &Path, replacement: &Path) -> Option<Path> {
        if !prefix.is_prefix_of(self) {
            return None;
        }
        let mut segments = replacement.segments.clone();
        segments.extend(self.segments[prefix.segments.len()..].iter().cloned());
        Some(Path {
            anchor: replacement.anchor,
            segments,
        })
    }
}

impl From<&str> for Path {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl From<String> for Path {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

impl From<&Path> for Path {
    fn from(path: &Path) -> Self {
        path.clone()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if self.anchor == Anchor::Root {
            f.write_str("$")?;
            first = false;
        }
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                Segment::Index(i) => write!(f, "[{i}]")?,
                Segment::Each => f.write_str("[*]")?,
            }
            first = false;
        }
        Ok(())
    }
}
