//! The typed node tree forming a chart.
//!
//! States are a sum type per kind — atomic, compound, parallel, final, and
//! history pseudo-states — with the shared fields (id, transitions,
//! entry/exit blocks, data declarations) composed in as [`StateCommon`].
//! The tree owns its children through `Arc`s; the chart's id index holds
//! `Arc` clones of the same nodes, so a node's identity and lifetime are
//! tied to the chart that built it.
//!
//! Transitions are inert: they hold their parsed metadata (descriptor,
//! guard, resolved target paths, type, actions) and are only inspected by
//! the selector and, when selected, have their action lists executed.
//! Mounting and unmounting of states is driven by the interpreter loop,
//! which dispatches over [`StateNode`] for the per-kind behavior.

use crate::action::{Action, Param};
use crate::path::StatePath;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether a transition exits its source when targeting a descendant or
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// Source is exited and re-entered on a self-target.
    External,
    /// Source stays active when the target is inside it.
    Internal,
}

/// A labelled edge out of a state.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Event descriptor; `None` marks an eventless transition.
    pub event: Option<String>,
    /// Guard expression, evaluated against the data store.
    pub cond: Option<String>,
    /// Resolved target paths; empty for a targetless transition.
    pub targets: Vec<StatePath>,
    /// Transition type.
    pub kind: TransitionKind,
    /// Executable children, run between exit and entry.
    pub actions: Vec<Action>,
    /// Path of the owning state.
    pub source: StatePath,
    /// Global document ordinal, used for deterministic firing order.
    pub document_order: usize,
}

impl Transition {
    /// Whether this transition fires without an event.
    pub fn is_eventless(&self) -> bool {
        self.event.is_none()
    }
}

/// A `<data>` declaration inside a `<datamodel>` block.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDecl {
    /// Root name seeded into the data store.
    pub id: String,
    /// Initializing expression.
    pub expr: Option<String>,
    /// Inline content, the fallback value source.
    pub content: Option<String>,
    /// External source reference (reported as unsupported at seed time).
    pub src: Option<String>,
}

/// Fields shared by every state kind.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateCommon {
    /// The state's id (one path segment).
    pub id: String,
    /// Outgoing transitions in document order.
    pub transitions: Vec<Arc<Transition>>,
    /// `<onentry>` actions, concatenated in document order.
    pub on_entry: Vec<Action>,
    /// `<onexit>` actions, concatenated in document order.
    pub on_exit: Vec<Action>,
    /// `<datamodel>` declarations owned by this state.
    pub data: Vec<DataDecl>,
}

/// A state with no child states.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicState {
    /// Shared fields.
    pub common: StateCommon,
}

/// A state with child states, exactly one active at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundState {
    /// Shared fields.
    pub common: StateCommon,
    /// Declared initial child id (from the `initial` attribute or the
    /// inner `<initial>` pseudo-state), if any.
    pub initial: Option<String>,
    /// Child states in document order.
    pub children: Vec<Arc<StateNode>>,
}

impl CompoundState {
    /// The initial child id: the declared initial, or the first child
    /// state in document order (history pseudo-states are not states and
    /// never serve as defaults).
    pub fn resolved_initial(&self) -> Option<&str> {
        if let Some(initial) = &self.initial {
            return Some(initial);
        }
        self.children
            .iter()
            .find(|c| !c.is_history())
            .map(|c| c.id())
    }
}

/// A state whose regions are all simultaneously active.
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelState {
    /// Shared fields.
    pub common: StateCommon,
    /// Regions in document order; never empty.
    pub regions: Vec<Arc<StateNode>>,
}

/// Payload producer of a final state's completion event.
#[derive(Debug, Clone, PartialEq)]
pub struct DoneData {
    /// `<content>` literal payload text.
    pub content: Option<String>,
    /// `<content expr=…>` payload expression, wins over literal content.
    pub content_expr: Option<String>,
    /// `<param>` children merged into the payload object.
    pub params: Vec<Param>,
}

/// A terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalState {
    /// Shared fields.
    pub common: StateCommon,
    /// Completion payload producer, if declared.
    pub done_data: Option<DoneData>,
}

/// Shallow history records the parent's active children; deep history
/// records its active atomic descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryDepth {
    /// Immediate children of the parent.
    Shallow,
    /// Atomic descendants of the parent.
    Deep,
}

/// A history pseudo-state: restores the parent's last exited
/// configuration, falling back to a default target.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryState {
    /// Shared fields (history carries no entry/exit blocks of its own).
    pub common: StateCommon,
    /// Recording depth.
    pub depth: HistoryDepth,
    /// Default transition targets used before any snapshot exists.
    pub default_targets: Vec<StatePath>,
}

/// A chart node, tagged by state kind.
#[derive(Debug, Clone, PartialEq)]
pub enum StateNode {
    /// Leaf state.
    Atomic(AtomicState),
    /// Nested state with one active child.
    Compound(CompoundState),
    /// Orthogonal regions, all active together.
    Parallel(ParallelState),
    /// Terminal state.
    Final(FinalState),
    /// History pseudo-state.
    History(HistoryState),
}

impl StateNode {
    /// Shared fields of any kind.
    pub fn common(&self) -> &StateCommon {
        match self {
            StateNode::Atomic(s) => &s.common,
            StateNode::Compound(s) => &s.common,
            StateNode::Parallel(s) => &s.common,
            StateNode::Final(s) => &s.common,
            StateNode::History(s) => &s.common,
        }
    }

    /// The state's id.
    pub fn id(&self) -> &str {
        &self.common().id
    }

    /// Outgoing transitions in document order.
    pub fn transitions(&self) -> &[Arc<Transition>] {
        &self.common().transitions
    }

    /// Child states: compound children, parallel regions, else empty.
    pub fn children(&self) -> &[Arc<StateNode>] {
        match self {
            StateNode::Compound(s) => &s.children,
            StateNode::Parallel(s) => &s.regions,
            _ => &[],
        }
    }

    /// Kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            StateNode::Atomic(_) => "atomic",
            StateNode::Compound(_) => "compound",
            StateNode::Parallel(_) => "parallel",
            StateNode::Final(_) => "final",
            StateNode::History(_) => "history",
        }
    }

    /// Whether this node is an atomic leaf.
    pub fn is_atomic(&self) -> bool {
        matches!(self, StateNode::Atomic(_))
    }

    /// Whether this node is a compound state.
    pub fn is_compound(&self) -> bool {
        matches!(self, StateNode::Compound(_))
    }

    /// Whether this node is a parallel state.
    pub fn is_parallel(&self) -> bool {
        matches!(self, StateNode::Parallel(_))
    }

    /// Whether this node is a final state.
    pub fn is_final(&self) -> bool {
        matches!(self, StateNode::Final(_))
    }

    /// Whether this node is a history pseudo-state.
    pub fn is_history(&self) -> bool {
        matches!(self, StateNode::History(_))
    }

    /// Whether this node can appear in the active configuration. History
    /// pseudo-states are resolved during entry and never become active.
    pub fn is_configurable(&self) -> bool {
        !self.is_history()
    }
}
