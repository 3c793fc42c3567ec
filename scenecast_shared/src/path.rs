//! Scene-graph paths.
//!
//! A path is an ordered list of string segments naming a node in the
//! receiver's scene tree. The empty path is the root. Segments are carried
//! verbatim: nothing here validates, reorders or normalizes them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Path to a scene-graph node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenePath(Vec<String>);

impl ScenePath {
    /// The root node.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Splits `s` on `/`. Empty segments are kept as-is.
    pub fn parse(s: &str) -> Self {
        Self::new(s.split('/'))
    }

    /// Returns a new path with `other`'s segments appended.
    pub fn join(&self, other: &ScenePath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for ScenePath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl From<Vec<String>> for ScenePath {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl<const N: usize> From<[&str; N]> for ScenePath {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

impl fmt::Display for ScenePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_segments_verbatim() {
        let p = ScenePath::parse("robots//head");
        assert_eq!(p.segments(), ["robots", "", "head"]);
    }

    #[test]
    fn join_appends_in_order() {
        let base = ScenePath::from(["scenecast"]);
        let p = base.join(&ScenePath::parse("b/a"));
        assert_eq!(p.segments(), ["scenecast", "b", "a"]);
        assert_eq!(p.to_string(), "/scenecast/b/a");
    }

    #[test]
    fn root_is_empty() {
        assert!(ScenePath::root().is_root());
        assert!(ScenePath::default().segments().is_empty());
    }
}
