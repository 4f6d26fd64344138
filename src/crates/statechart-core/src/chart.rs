//! The compiled chart: immutable tree, id index, and run entry points.
//!
//! A [`StateChart`] is built once — by [`StateChart::from_source`] — and
//! shared read-only across any number of runs. The tree owns its nodes
//! through `Arc`s and the index maps every fully-qualified dotted path to
//! its node, so path lookups during interpretation are a single hash
//! probe. Runtime state lives entirely in the [`Interpreter`] a
//! [`StateChart::runner`] call produces.
//!
//! # Examples
//!
//! ```rust,no_run
//! use statechart_core::{StateChart, RunOptions};
//! use serde_json::json;
//!
//! # async fn example() -> statechart_core::Result<()> {
//! let chart = StateChart::from_source(r#"
//!     <scxml initial="idle">
//!       <state id="idle">
//!         <transition event="start" target="busy"/>
//!       </state>
//!       <final id="busy"/>
//!     </scxml>
//! "#)?;
//!
//! let runner = chart.runner(RunOptions::new());
//! let handle = runner.handle();
//! handle.post_event(statechart_core::Event::external("start"))?;
//! let outcome = runner.run(json!({})).await?;
//! assert_eq!(outcome.configuration, vec!["busy"]);
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::eval::basic::BasicEvaluator;
use crate::eval::{ExpressionEvaluator, NullEvaluator};
use crate::interp::{Interpreter, RunOptions};
use crate::node::{DataDecl, StateNode};
use crate::parser;
use crate::path::StatePath;
use std::collections::HashMap;
use std::sync::Arc;

/// The expression language a chart declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatamodelKind {
    /// Expressions are opaque strings handed to an ecmascript-like
    /// evaluator. The default.
    Ecmascript,
    /// Expression evaluation is disabled; absent guards are the only
    /// truthy conditions.
    Null,
}

#[derive(Debug)]
pub(crate) struct ChartInner {
    pub(crate) root: Arc<StateNode>,
    pub(crate) nodes: HashMap<StatePath, Arc<StateNode>>,
    pub(crate) initial: StatePath,
    pub(crate) datamodel: DatamodelKind,
    /// Every `<data>` declaration in document order, with its owner path.
    pub(crate) data_decls: Vec<(StatePath, DataDecl)>,
}

/// An immutable, shareable compiled chart.
#[derive(Debug, Clone)]
pub struct StateChart {
    inner: Arc<ChartInner>,
}

impl StateChart {
    /// Parse and validate chart source, producing a compiled chart.
    pub fn from_source(source: &str) -> Result<Self> {
        parser::parse(source)
    }

    pub(crate) fn from_inner(inner: ChartInner) -> Self {
        StateChart {
            inner: Arc::new(inner),
        }
    }

    /// The document root node.
    pub fn root(&self) -> &Arc<StateNode> {
        &self.inner.root
    }

    /// Look up a node by its fully-qualified dotted path. The empty path
    /// resolves to the document root.
    pub fn node(&self, path: &StatePath) -> Option<&Arc<StateNode>> {
        if path.is_root() {
            return Some(&self.inner.root);
        }
        self.inner.nodes.get(path)
    }

    /// The resolved path of the chart's declared initial state.
    pub fn initial_target(&self) -> &StatePath {
        &self.inner.initial
    }

    /// The declared expression language.
    pub fn datamodel_kind(&self) -> DatamodelKind {
        self.inner.datamodel
    }

    /// Every indexed path, in arbitrary order.
    pub fn paths(&self) -> impl Iterator<Item = &StatePath> {
        self.inner.nodes.keys()
    }

    /// Number of indexed states.
    pub fn state_count(&self) -> usize {
        self.inner.nodes.len()
    }

    /// `<data>` declarations in document order, with their owner paths.
    pub fn data_decls(&self) -> &[(StatePath, DataDecl)] {
        &self.inner.data_decls
    }

    /// The evaluator implied by the chart's datamodel kind, used when the
    /// run options carry no override.
    pub fn default_evaluator(&self) -> Arc<dyn ExpressionEvaluator> {
        match self.inner.datamodel {
            DatamodelKind::Ecmascript => Arc::new(BasicEvaluator),
            DatamodelKind::Null => Arc::new(NullEvaluator),
        }
    }

    /// Build an interpreter for one run of this chart.
    pub fn runner(&self, options: RunOptions) -> Interpreter {
        Interpreter::new(self.clone(), options)
    }
}
