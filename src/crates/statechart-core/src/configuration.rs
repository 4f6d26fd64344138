//! Active-configuration bookkeeping.
//!
//! The [`ActiveConfiguration`] is the ordered list of currently entered
//! states, maintained **shallowest-first**: if state A contains state B,
//! A's entry precedes B's. It is mutated only by the interpreter loop —
//! entry appends, exit removes — and between microsteps it satisfies the
//! at-rest invariants checked by [`ActiveConfiguration::check_invariants`]:
//!
//! - every active compound state has exactly one active child;
//! - every active parallel state has all of its regions active;
//! - ancestors precede descendants;
//! - no two entries share a path.

use crate::error::{ChartError, Result};
use crate::node::StateNode;
use crate::path::StatePath;
use std::sync::Arc;

/// The ordered set of active states, shallowest-first.
#[derive(Debug, Clone, Default)]
pub struct ActiveConfiguration {
    entries: Vec<(StatePath, Arc<StateNode>)>,
}

impl ActiveConfiguration {
    /// An empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active states.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no state is active.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `path` is active.
    pub fn contains(&self, path: &StatePath) -> bool {
        self.entries.iter().any(|(p, _)| p == path)
    }

    /// The node active at `path`, if any.
    pub fn node(&self, path: &StatePath) -> Option<&Arc<StateNode>> {
        self.entries.iter().find(|(p, _)| p == path).map(|(_, n)| n)
    }

    /// Append a newly entered state. The caller enters ancestors first.
    pub fn enter(&mut self, path: StatePath, node: Arc<StateNode>) {
        debug_assert!(!self.contains(&path), "double entry of {path}");
        self.entries.push((path, node));
    }

    /// Remove an exited state, returning its node.
    pub fn exit(&mut self, path: &StatePath) -> Option<Arc<StateNode>> {
        let idx = self.entries.iter().position(|(p, _)| p == path)?;
        Some(self.entries.remove(idx).1)
    }

    /// Entries in configuration (shallowest-first) order.
    pub fn iter(&self) -> impl Iterator<Item = (&StatePath, &Arc<StateNode>)> {
        self.entries.iter().map(|(p, n)| (p, n))
    }

    /// Active paths in configuration order.
    pub fn paths(&self) -> Vec<StatePath> {
        self.entries.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Serializable snapshot of the active paths.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().map(|(p, _)| p.to_string()).collect()
    }

    /// Entries ordered deepest-first: largest segment count first, ties by
    /// reverse document (entry) order. This is the ordering used for exit
    /// sets and leaves-first transition selection.
    pub fn deepest_first(&self) -> Vec<(StatePath, Arc<StateNode>)> {
        let mut indexed: Vec<(usize, &(StatePath, Arc<StateNode>))> =
            self.entries.iter().enumerate().collect();
        indexed.sort_by(|(ia, (pa, _)), (ib, (pb, _))| {
            pb.depth().cmp(&pa.depth()).then(ib.cmp(ia))
        });
        indexed.into_iter().map(|(_, e)| e.clone()).collect()
    }

    /// Active immediate children of `parent`, in configuration order.
    pub fn children_of(&self, parent: &StatePath) -> Vec<StatePath> {
        self.entries
            .iter()
            .filter(|(p, _)| p.parent().as_ref() == Some(parent))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Active atomic/final leaves under `ancestor` (or the whole
    /// configuration when `ancestor` is the root), configuration order.
    pub fn leaves_under(&self, ancestor: &StatePath) -> Vec<StatePath> {
        self.entries
            .iter()
            .filter(|(p, n)| ancestor.contains(p) && n.children().is_empty())
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Verify the at-rest invariants, returning a fatal error on the first
    /// violation.
    pub fn check_invariants(&self) -> Result<()> {
        for (i, (path, _)) in self.entries.iter().enumerate() {
            // Uniqueness.
            if self.entries[i + 1..].iter().any(|(p, _)| p == path) {
                return Err(ChartError::invariant(format!("duplicate active path '{path}'")));
            }
            // Ancestors precede descendants.
            if let Some(parent) = path.parent() {
                if !parent.is_root() {
                    let before = self.entries[..i].iter().any(|(p, _)| *p == parent);
                    if !before {
                        return Err(ChartError::invariant(format!(
                            "active state '{path}' is not preceded by its parent '{parent}'"
                        )));
                    }
                }
            }
        }
        for (path, node) in &self.entries {
            match node.as_ref() {
                StateNode::Compound(_) => {
                    let active_children = self.children_of(path);
                    if active_children.len() != 1 {
                        return Err(ChartError::invariant(format!(
                            "compound state '{path}' has {} active children, expected exactly 1",
                            active_children.len()
                        )));
                    }
                }
                StateNode::Parallel(parallel) => {
                    for region in &parallel.regions {
                        let region_path = path.join(region.id());
                        if !self.contains(&region_path) {
                            return Err(ChartError::invariant(format!(
                                "parallel state '{path}' has inactive region '{region_path}'"
                            )));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{AtomicState, CompoundState, ParallelState, StateCommon};

    fn atomic(id: &str) -> Arc<StateNode> {
        Arc::new(StateNode::Atomic(AtomicState {
            common: StateCommon {
                id: id.to_string(),
                ..StateCommon::default()
            },
        }))
    }

    fn compound(id: &str, children: Vec<Arc<StateNode>>) -> Arc<StateNode> {
        Arc::new(StateNode::Compound(CompoundState {
            common: StateCommon {
                id: id.to_string(),
                ..StateCommon::default()
            },
            initial: None,
            children,
        }))
    }

    fn parallel(id: &str, regions: Vec<Arc<StateNode>>) -> Arc<StateNode> {
        Arc::new(StateNode::Parallel(ParallelState {
            common: StateCommon {
                id: id.to_string(),
                ..StateCommon::default()
            },
            regions,
        }))
    }

    fn game_config() -> ActiveConfiguration {
        // playing (parallel) with healthSystem.healthy and
        // scoreSystem.scoring active.
        let healthy = atomic("healthy");
        let scoring = atomic("scoring");
        let health = compound("healthSystem", vec![healthy.clone()]);
        let score = compound("scoreSystem", vec![scoring.clone()]);
        let playing = parallel("playing", vec![health.clone(), score.clone()]);

        let mut config = ActiveConfiguration::new();
        config.enter(StatePath::from("playing"), playing);
        config.enter(StatePath::from("playing.healthSystem"), health);
        config.enter(StatePath::from("playing.healthSystem.healthy"), healthy);
        config.enter(StatePath::from("playing.scoreSystem"), score);
        config.enter(StatePath::from("playing.scoreSystem.scoring"), scoring);
        config
    }

    #[test]
    fn deepest_first_orders_by_depth_then_reverse_entry() {
        let config = game_config();
        let order: Vec<String> = config
            .deepest_first()
            .into_iter()
            .map(|(p, _)| p.to_string())
            .collect();
        assert_eq!(
            order,
            vec![
                "playing.scoreSystem.scoring",
                "playing.healthSystem.healthy",
                "playing.scoreSystem",
                "playing.healthSystem",
                "playing",
            ]
        );
    }

    #[test]
    fn invariants_hold_for_well_formed_configuration() {
        game_config().check_invariants().unwrap();
    }

    #[test]
    fn invariant_catches_inactive_parallel_region() {
        let mut config = game_config();
        config.exit(&StatePath::from("playing.scoreSystem"));
        config.exit(&StatePath::from("playing.scoreSystem.scoring"));
        let err = config.check_invariants().unwrap_err();
        assert!(err.to_string().contains("scoreSystem"));
    }

    #[test]
    fn invariant_catches_compound_without_active_child() {
        let mut config = game_config();
        config.exit(&StatePath::from("playing.healthSystem.healthy"));
        let err = config.check_invariants().unwrap_err();
        assert!(err.to_string().contains("healthSystem"));
    }

    #[test]
    fn exit_removes_only_the_named_path() {
        let mut config = game_config();
        assert!(config.exit(&StatePath::from("playing.healthSystem.healthy")).is_some());
        assert!(!config.contains(&StatePath::from("playing.healthSystem.healthy")));
        assert!(config.contains(&StatePath::from("playing.healthSystem")));
        assert!(config.exit(&StatePath::from("playing.healthSystem.healthy")).is_none());
    }
}
