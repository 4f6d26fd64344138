//! # statechart-core — an SCXML statechart interpreter engine
//!
//! A hierarchical state machine interpreter conforming to SCXML (W3C State
//! Chart XML) semantics: nested states, parallel regions, transitions
//! guarded by events and conditions, entry/exit actions, history
//! pseudo-states, and a side-effecting data model, driven through a
//! deterministic event-processing loop until the chart reaches a stable
//! configuration or terminates.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  StateChart (immutable, Arc-shared)                        │
//! │    node tree · path index · datamodel kind                 │
//! └───────────────┬────────────────────────────────────────────┘
//!                 │ runner(options)
//!                 ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │  Interpreter (single-owner loop)                           │
//! │                                                            │
//! │  external ─▶ select ─▶ microstep:                          │
//! │   queue       │          exit set   (deepest-first)        │
//! │     ▲         │          actions    (document order)       │
//! │     │         │          entry set  (shallowest-first)     │
//! │  ChartHandle  └── internal queue drained until stable ──┐  │
//! │                                                         ▼  │
//! │            await event / delayed send / cancel / deadline  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Chart construction** ([`StateChart::from_source`]) parses the SCXML
//!   dialect, validates it, and builds an immutable tree plus an index
//!   from fully-qualified dotted paths (`playing.healthSystem.healthy`)
//!   to nodes. Construction errors are typed [`ChartError`]s.
//! - **Interpretation** ([`Interpreter::run`]) owns all runtime state:
//!   the [`datamodel::DataStore`], the active configuration, both event
//!   queues, history snapshots, and the delayed-send scheduler. Internal
//!   events are strictly FIFO and fully drained before any external
//!   event is considered.
//! - **Expressions** are opaque to the core: guards and value expressions
//!   go through the [`ExpressionEvaluator`] capability. The crate ships
//!   [`BasicEvaluator`] (an ecmascript-like subset) and [`NullEvaluator`]
//!   (for the `null` datamodel); hosts may plug in their own.
//! - **Delivery** of externally targeted `<send>`s goes through the
//!   [`EventIoProcessor`] capability; failures are trapped into
//!   `error.send.delivery-failed` platform events, never panics.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use statechart_core::{Event, RunOptions, StateChart};
//! use serde_json::json;
//!
//! # async fn example() -> statechart_core::Result<()> {
//! let chart = StateChart::from_source(r#"
//!     <scxml initial="healthy">
//!       <state id="healthy">
//!         <transition event="damage" cond="health &lt;= 0" target="dead"/>
//!         <transition event="damage" target="healthy" type="internal">
//!           <assign location="health" expr="health - _event.data.amount"/>
//!         </transition>
//!       </state>
//!       <final id="dead"/>
//!     </scxml>
//! "#)?;
//!
//! let runner = chart.runner(RunOptions::new());
//! let handle = runner.handle();
//! handle.post_event(Event::external("damage").with_data(json!({"amount": 150})))?;
//! handle.post_event(Event::external("damage").with_data(json!({"amount": 150})))?;
//!
//! let outcome = runner.run(json!({"health": 100})).await?;
//! assert_eq!(outcome.configuration, vec!["dead"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error handling
//!
//! Three classes, kept strictly apart:
//!
//! 1. **Construction errors** — malformed XML, schema violations,
//!    unresolvable targets — abort [`StateChart::from_source`].
//! 2. **Evaluation errors** during a run — bad expressions, invalid
//!    assignment locations, failed deliveries — are trapped into platform
//!    error events (`error.execution`, `error.assign.invalid-location`,
//!    `error.send.*`, …) on the internal queue; the run continues.
//! 3. **Fatal errors** — configuration invariant violations, runaway
//!    charts — end the run with an `Err` after a best-effort orderly
//!    unmount.

pub mod action;
pub mod chart;
pub mod configuration;
pub mod datamodel;
pub mod error;
pub mod eval;
pub mod event;
pub mod exec;
pub mod interp;
pub mod io;
pub mod node;
mod parser;
pub mod path;

pub use chart::{DatamodelKind, StateChart};
pub use error::{ChartError, Result};
pub use eval::basic::BasicEvaluator;
pub use eval::{EvalError, ExpressionEvaluator, NullEvaluator};
pub use event::{Event, EventOrigin};
pub use interp::{
    CancelHandle, ChartHandle, CompletionReason, HistoryEntry, HistoryKind, Interpreter,
    RunOptions, RunOutcome,
};
pub use io::{DeliveryError, EventIoProcessor};
pub use path::StatePath;
