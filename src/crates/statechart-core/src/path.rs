//! Dotted state paths and the LCCA computation.
//!
//! Every state in a chart is identified by its **fully-qualified dotted
//! path**: the ids of its ancestors joined with `.`, e.g.
//! `playing.healthSystem.healthy`. The empty path is the document root.
//! Paths are the identity used by the active configuration, the id index,
//! the history store, and the exit/entry set algorithms — all of which
//! reduce to prefix checks and segment arithmetic on this type.
//!
//! # Examples
//!
//! ```rust
//! use statechart_core::StatePath;
//!
//! let healthy = StatePath::from("playing.healthSystem.healthy");
//! let scoring = StatePath::from("playing.scoreSystem.scoring");
//!
//! assert_eq!(healthy.depth(), 3);
//! assert_eq!(healthy.lcca(&scoring), StatePath::from("playing"));
//! assert!(StatePath::from("playing").is_ancestor_of(&healthy));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// A fully-qualified dotted state path.
///
/// The empty path (`StatePath::root()`) denotes the document root. All
/// other paths are non-empty `.`-joined id segments. Ordering is plain
/// string ordering and is only used for deterministic map iteration; depth
/// ordering is always requested explicitly via [`StatePath::depth`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatePath(String);

impl StatePath {
    /// The document root (empty path).
    pub fn root() -> Self {
        StatePath(String::new())
    }

    /// Whether this is the document root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The path of `id` appended below `self`.
    pub fn join(&self, id: &str) -> Self {
        if self.0.is_empty() {
            StatePath(id.to_string())
        } else {
            StatePath(format!("{}.{}", self.0, id))
        }
    }

    /// Iterator over the id segments, shallowest first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|s| !s.is_empty())
    }

    /// Number of segments. The root has depth 0.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The final id segment, if any.
    pub fn leaf_id(&self) -> Option<&str> {
        self.segments().last()
    }

    /// The parent path. The root has no parent.
    pub fn parent(&self) -> Option<StatePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('.') {
            Some(idx) => Some(StatePath(self.0[..idx].to_string())),
            None => Some(StatePath::root()),
        }
    }

    /// Whether `self` is a strict ancestor of `other`.
    ///
    /// The root is an ancestor of every non-root path. A path is never an
    /// ancestor of itself.
    pub fn is_ancestor_of(&self, other: &StatePath) -> bool {
        if self == other {
            return false;
        }
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'.'
    }

    /// Whether `self` is `other` or a strict ancestor of it.
    pub fn contains(&self, other: &StatePath) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Whether `self` is a strict descendant of `other`.
    pub fn is_descendant_of(&self, other: &StatePath) -> bool {
        other.is_ancestor_of(self)
    }

    /// The least common compound ancestor of two paths: the longest shared
    /// prefix expressed as whole segments.
    ///
    /// Two paths sharing no segment have the root as their LCCA. The LCCA
    /// of a path with itself is that path, and the LCCA of an ancestor and
    /// its descendant is the ancestor.
    pub fn lcca(&self, other: &StatePath) -> StatePath {
        let mut shared = StatePath::root();
        let mut a = self.segments();
        let mut b = other.segments();
        loop {
            match (a.next(), b.next()) {
                (Some(x), Some(y)) if x == y => shared = shared.join(x),
                _ => break,
            }
        }
        shared
    }

    /// The segments of `self` below `ancestor`, shallowest first.
    ///
    /// Returns `None` when `ancestor` does not contain `self`.
    pub fn relative_to(&self, ancestor: &StatePath) -> Option<Vec<&str>> {
        if !ancestor.contains(self) {
            return None;
        }
        Some(self.segments().skip(ancestor.depth()).collect())
    }

    /// Every path from the first segment after `ancestor` down to `self`,
    /// shallowest first, including `self` and excluding `ancestor`.
    pub fn chain_from(&self, ancestor: &StatePath) -> Vec<StatePath> {
        let mut chain = Vec::new();
        let Some(rel) = self.relative_to(ancestor) else {
            return chain;
        };
        let mut cur = ancestor.clone();
        for seg in rel {
            cur = cur.join(seg);
            chain.push(cur.clone());
        }
        chain
    }

    /// String view of the path.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StatePath {
    fn from(s: &str) -> Self {
        StatePath(s.trim_matches('.').to_string())
    }
}

impl From<String> for StatePath {
    fn from(s: String) -> Self {
        StatePath::from(s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn join_and_segments() {
        let p = StatePath::root().join("playing").join("healthSystem");
        assert_eq!(p.as_str(), "playing.healthSystem");
        assert_eq!(p.segments().collect::<Vec<_>>(), vec!["playing", "healthSystem"]);
        assert_eq!(p.depth(), 2);
        assert_eq!(p.leaf_id(), Some("healthSystem"));
    }

    #[test]
    fn parent_walks_up_to_root() {
        let p = StatePath::from("a.b.c");
        assert_eq!(p.parent(), Some(StatePath::from("a.b")));
        assert_eq!(StatePath::from("a").parent(), Some(StatePath::root()));
        assert_eq!(StatePath::root().parent(), None);
    }

    #[test]
    fn ancestor_checks_respect_segment_boundaries() {
        let a = StatePath::from("play");
        let b = StatePath::from("playing.healthSystem");
        assert!(!a.is_ancestor_of(&b));
        assert!(StatePath::from("playing").is_ancestor_of(&b));
        assert!(StatePath::root().is_ancestor_of(&b));
        assert!(!b.is_ancestor_of(&b));
    }

    #[test]
    fn lcca_of_siblings_is_shared_parent() {
        let healthy = StatePath::from("playing.healthSystem.healthy");
        let scoring = StatePath::from("playing.scoreSystem.scoring");
        assert_eq!(healthy.lcca(&scoring), StatePath::from("playing"));
    }

    #[test]
    fn lcca_of_unrelated_states_is_root() {
        let a = StatePath::from("gameStart");
        let b = StatePath::from("gameOver");
        assert_eq!(a.lcca(&b), StatePath::root());
    }

    #[test]
    fn lcca_degenerate_cases() {
        let p = StatePath::from("a.b");
        assert_eq!(p.lcca(&p), p);
        let anc = StatePath::from("a");
        let desc = StatePath::from("a.b.c");
        assert_eq!(anc.lcca(&desc), anc);
        assert_eq!(desc.lcca(&anc), anc);
    }

    #[test]
    fn chain_from_builds_every_intermediate() {
        let target = StatePath::from("playing.healthSystem.processingDamage.subState");
        let chain = target.chain_from(&StatePath::root());
        assert_eq!(
            chain,
            vec![
                StatePath::from("playing"),
                StatePath::from("playing.healthSystem"),
                StatePath::from("playing.healthSystem.processingDamage"),
                StatePath::from("playing.healthSystem.processingDamage.subState"),
            ]
        );

        let partial = target.chain_from(&StatePath::from("playing.healthSystem"));
        assert_eq!(
            partial,
            vec![
                StatePath::from("playing.healthSystem.processingDamage"),
                StatePath::from("playing.healthSystem.processingDamage.subState"),
            ]
        );
    }

    fn path_strategy() -> impl Strategy<Value = StatePath> {
        proptest::collection::vec("[a-z][a-z0-9]{0,5}", 0..5)
            .prop_map(|segs| StatePath::from(segs.join(".")))
    }

    proptest! {
        #[test]
        fn lcca_is_symmetric_and_a_prefix_of_both(a in path_strategy(), b in path_strategy()) {
            let l = a.lcca(&b);
            prop_assert_eq!(l.clone(), b.lcca(&a));
            prop_assert!(l.contains(&a));
            prop_assert!(l.contains(&b));
        }

        #[test]
        fn join_then_parent_roundtrips(base in path_strategy(), id in "[a-z][a-z0-9]{0,5}") {
            let joined = base.join(&id);
            prop_assert_eq!(joined.parent(), Some(base));
        }
    }
}
