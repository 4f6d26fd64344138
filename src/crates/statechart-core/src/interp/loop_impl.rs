//! The interpreter loop.
//!
//! [`Interpreter`] is the single logical owner of one run: the data store,
//! the active configuration, both event queues, the history store, and the
//! delayed-send scheduler all live inside it, and nothing outside the loop
//! mutates them. The loop composes the pure algorithms of
//! [`algo`](super::algo) into the event-processing cycle:
//!
//! ```text
//! startup ──> macrostep ──> stable? ──> await external ──┐
//!                ▲                                       │
//!                └── microstep(event) <──────────────────┘
//! ```
//!
//! - A **microstep** runs one selected transition set: combined exit set
//!   (history snapshotted, states unmounted deepest-first), transition
//!   actions in document order, combined entry set (states mounted
//!   shallowest-first, default completion cascading through mounts).
//! - A **macrostep** drains the internal queue, then fires eventless
//!   transitions, repeating until neither yields a microstep.
//! - The **external wait** is the loop's suspension point: it wakes on a
//!   posted event, a delayed send coming due, host cancellation, or the
//!   run deadline.
//!
//! Internal events are strictly FIFO and fully drained before any external
//! event is considered. Termination — a top-level final state, the
//! deadline, or cancellation — unmounts the remaining active states
//! deepest-first before the loop returns.

use super::algo::{
    combined_entry_set, combined_exit_set, expand_target, select_transitions, startup_entry_set,
    SelectedTransition,
};
use super::sched::SendScheduler;
use super::types::{
    CancelHandle, CompletionReason, HistoryEntry, HistoryKind, RunOptions, RunOutcome, RunState,
    DEFAULT_STEP_LIMIT,
};
use crate::chart::StateChart;
use crate::error::{ChartError, Result};
use crate::eval::ExpressionEvaluator;
use crate::event::Event;
use crate::exec::{literal_value, ActionExecutor, Effects, ExecCtx, OutboundSend};
use crate::io::{EventIoProcessor, TARGET_INTERNAL};
use crate::node::{FinalState, StateNode};
use crate::path::StatePath;
use chrono::Utc;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

/// Thread-safe ingress for posting external events into a running loop.
///
/// Clonable; producers never block the loop.
#[derive(Debug, Clone)]
pub struct ChartHandle {
    tx: UnboundedSender<Event>,
}

impl ChartHandle {
    /// Enqueue an external event.
    pub fn post_event(&self, event: Event) -> Result<()> {
        self.tx.send(event).map_err(|_| ChartError::QueueClosed)
    }
}

/// What the external wait woke up for.
enum Wake {
    /// An external event is ready.
    Event(Event),
    /// Internal events appeared (delivery failures, due internal sends);
    /// run a macrostep.
    Drain,
    /// The host signalled cancellation.
    Cancelled,
    /// The run deadline passed.
    TimedOut,
}

/// Drives one run of a [`StateChart`] to termination.
pub struct Interpreter {
    chart: StateChart,
    evaluator: Arc<dyn ExpressionEvaluator>,
    executor: ActionExecutor,
    io: Option<Arc<dyn EventIoProcessor>>,
    sink: Option<UnboundedSender<HistoryEntry>>,
    cancel: Option<CancelHandle>,
    timeout: Option<Duration>,
    step_limit: usize,
    external_tx: UnboundedSender<Event>,
    external_rx: UnboundedReceiver<Event>,
    /// Self-addressed sends waiting to be consumed as external events.
    pending_external: VecDeque<Event>,
    scheduler: SendScheduler,
    st: RunState,
    trace: Vec<HistoryEntry>,
    next_entry_id: u64,
    steps: usize,
    terminated: bool,
}

impl Interpreter {
    /// Build an interpreter for one run.
    pub(crate) fn new(chart: StateChart, options: RunOptions) -> Self {
        let evaluator = options
            .evaluator
            .unwrap_or_else(|| chart.default_evaluator());
        let (external_tx, external_rx) = mpsc::unbounded_channel();
        Interpreter {
            executor: ActionExecutor::new(evaluator.clone()),
            evaluator,
            chart,
            io: options.io_processor,
            sink: options.event_sink,
            cancel: options.cancel,
            timeout: options.timeout,
            step_limit: options.step_limit.unwrap_or(DEFAULT_STEP_LIMIT),
            external_tx,
            external_rx,
            pending_external: VecDeque::new(),
            scheduler: SendScheduler::new(),
            st: RunState::default(),
            trace: Vec::new(),
            next_entry_id: 0,
            steps: 0,
            terminated: false,
        }
    }

    /// A clonable ingress for posting external events.
    pub fn handle(&self) -> ChartHandle {
        ChartHandle {
            tx: self.external_tx.clone(),
        }
    }

    /// The microstep log recorded so far.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.trace
    }

    /// Drive the chart to termination.
    ///
    /// `input` seeds the data store after the chart's own `<data>`
    /// declarations; an object contributes each of its keys as a store
    /// root.
    pub async fn run(mut self, input: Value) -> Result<RunOutcome> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        tracing::info!(
            states = self.chart.state_count(),
            initial = %self.chart.initial_target(),
            "starting chart run"
        );

        let reason = match self.drive(input, deadline).await {
            Ok(reason) => reason,
            Err(err) => {
                // Fatal: best-effort orderly unmount, then surface.
                tracing::error!(error = %err, "chart run failed");
                self.shutdown().await;
                return Err(err);
            }
        };

        tracing::info!(?reason, steps = self.steps, "chart run finished");
        let configuration = self.st.configuration.snapshot();
        self.shutdown().await;
        let data = std::mem::take(&mut self.st.store).into_data();
        Ok(RunOutcome {
            reason,
            configuration,
            data,
            history: self.trace,
        })
    }

    /// Startup plus the external loop, up to (but not including) the
    /// orderly unmount.
    async fn drive(&mut self, input: Value, deadline: Option<Instant>) -> Result<CompletionReason> {
        self.startup(input).await?;
        loop {
            self.macrostep().await?;
            if self.terminated || self.st.configuration.is_empty() {
                return Ok(CompletionReason::Final);
            }
            self.st.configuration.check_invariants()?;

            match self.await_external(deadline).await {
                Wake::Event(event) => self.process_external(event).await?,
                Wake::Drain => {}
                Wake::Cancelled => return Ok(CompletionReason::Cancelled),
                Wake::TimedOut => return Ok(CompletionReason::TimedOut),
            }
        }
    }

    /// Seed the data store and mount the startup entry set.
    async fn startup(&mut self, input: Value) -> Result<()> {
        let decls = self.chart.data_decls().to_vec();
        for (_owner, decl) in decls {
            if let Some(src) = &decl.src {
                self.st.internal.push_back(Event::error(
                    "error.data.src-not-implemented",
                    "the src attribute on <data> is not implemented",
                    src,
                    "data",
                ));
                self.st.store.seed(&decl.id, Value::Null);
                continue;
            }
            let value = if let Some(expr) = &decl.expr {
                match self.evaluator.evaluate(expr, &self.st.store).await {
                    Ok(v) => v,
                    Err(err) => {
                        self.st
                            .internal
                            .push_back(Event::error_execution(err, expr, "data"));
                        Value::Null
                    }
                }
            } else if let Some(content) = &decl.content {
                literal_value(content)
            } else {
                Value::Null
            };
            self.st.store.seed(&decl.id, value);
        }

        if let Value::Object(map) = input {
            for (key, value) in map {
                self.st.store.seed(&key, value);
            }
        }

        let entry = startup_entry_set(&self.chart, &self.st.configuration, &self.st.history_values);
        let mut effects = Effects::default();
        self.enter_states(entry, &mut effects).await?;
        self.drain_effects(effects).await;
        self.record(HistoryKind::Startup, None);
        Ok(())
    }

    /// Run microsteps until the internal queue is drained and no eventless
    /// transition is enabled.
    async fn macrostep(&mut self) -> Result<()> {
        loop {
            while let Some(event) = self.st.internal.pop_front() {
                if self.terminated {
                    return Ok(());
                }
                self.bump_step()?;
                self.st.store.set_event(Some(&event));
                let mut errors = Vec::new();
                let selected = select_transitions(
                    &self.st.configuration,
                    Some(&event),
                    self.evaluator.as_ref(),
                    &self.st.store,
                    &mut errors,
                )
                .await;
                self.st.internal.extend(errors);
                if selected.is_empty() {
                    tracing::trace!(event = %event.name, "internal event matched no transition");
                } else {
                    self.microstep(selected, Some(&event)).await?;
                }
            }
            self.st.store.set_event(None);
            if self.terminated {
                return Ok(());
            }

            self.bump_step()?;
            let mut errors = Vec::new();
            let selected = select_transitions(
                &self.st.configuration,
                None,
                self.evaluator.as_ref(),
                &self.st.store,
                &mut errors,
            )
            .await;
            if !errors.is_empty() {
                self.st.internal.extend(errors);
                continue;
            }
            if selected.is_empty() {
                return Ok(());
            }
            self.microstep(selected, None).await?;
            if self.terminated {
                return Ok(());
            }
        }
    }

    /// Consume one external event: select with it as the current event and
    /// run a microstep, or discard it when nothing is enabled.
    async fn process_external(&mut self, event: Event) -> Result<()> {
        self.bump_step()?;
        self.st.store.set_event(Some(&event));
        let mut errors = Vec::new();
        let selected = select_transitions(
            &self.st.configuration,
            Some(&event),
            self.evaluator.as_ref(),
            &self.st.store,
            &mut errors,
        )
        .await;
        self.st.internal.extend(errors);
        if selected.is_empty() {
            tracing::debug!(event = %event.name, "external event matched no transition, discarded");
        } else {
            self.microstep(selected, Some(&event)).await?;
        }
        Ok(())
    }

    /// One atomic cycle: exit set → transition actions → entry set.
    async fn microstep(
        &mut self,
        selected: Vec<SelectedTransition>,
        event: Option<&Event>,
    ) -> Result<()> {
        tracing::debug!(
            transitions = selected.len(),
            event = event.map(|e| e.name.as_str()).unwrap_or("<none>"),
            "microstep"
        );
        let mut effects = Effects::default();

        // Exit phase: snapshot history, then unmount deepest-first.
        let exit_paths = combined_exit_set(&self.st.configuration, &selected);
        self.snapshot_history(&exit_paths);
        for path in &exit_paths {
            let node = self
                .st
                .configuration
                .exit(path)
                .ok_or_else(|| ChartError::invariant(format!("exit path '{path}' is not active")))?;
            tracing::trace!(state = %path, "exiting");
            let executor = &self.executor;
            let mut ctx = ExecCtx {
                store: &mut self.st.store,
                internal: &mut self.st.internal,
                effects: &mut effects,
            };
            executor.run_block(&node.common().on_exit, &mut ctx).await;
        }

        // Transition actions, in document order of the transitions.
        for sel in &selected {
            let executor = &self.executor;
            let mut ctx = ExecCtx {
                store: &mut self.st.store,
                internal: &mut self.st.internal,
                effects: &mut effects,
            };
            executor.run_block(&sel.transition.actions, &mut ctx).await;
        }

        // Entry phase: mount shallowest-first, cascading completion.
        let entry = combined_entry_set(
            &self.chart,
            &self.st.configuration,
            &selected,
            &self.st.history_values,
        );
        self.enter_states(entry, &mut effects).await?;

        self.drain_effects(effects).await;
        self.record(HistoryKind::Microstep, event.cloned());
        Ok(())
    }

    /// Mount `entry` in order, appending to the configuration. Compound
    /// and parallel mounts feed their default-completion children back
    /// into the work queue; history pseudo-states resolve to their stored
    /// or default targets.
    async fn enter_states(&mut self, entry: Vec<StatePath>, effects: &mut Effects) -> Result<()> {
        let mut queue: VecDeque<StatePath> = entry.into();
        while let Some(path) = queue.pop_front() {
            if self.st.configuration.contains(&path) {
                continue;
            }
            let node = self
                .chart
                .node(&path)
                .ok_or_else(|| {
                    ChartError::invariant(format!("entry path '{path}' is missing from the chart"))
                })?
                .clone();

            if node.is_history() {
                let parent = path.parent().unwrap_or_default();
                for actual in expand_target(&self.chart, &self.st.history_values, &path) {
                    for step in actual.chain_from(&parent) {
                        queue.push_back(step);
                    }
                }
                continue;
            }

            self.st.configuration.enter(path.clone(), node.clone());
            tracing::trace!(state = %path, kind = node.kind_name(), "entering");

            let executor = &self.executor;
            let mut ctx = ExecCtx {
                store: &mut self.st.store,
                internal: &mut self.st.internal,
                effects: &mut *effects,
            };
            executor.run_block(&node.common().on_entry, &mut ctx).await;

            match node.as_ref() {
                StateNode::Final(final_state) => {
                    let parent = path.parent().unwrap_or_default();
                    if parent.is_root() {
                        self.terminated = true;
                        tracing::info!(state = %path, "top-level final state entered");
                    } else {
                        let data = self.done_data_value(final_state, effects).await;
                        self.st
                            .internal
                            .push_back(Event::done_state(parent.as_str(), data));
                    }
                }
                StateNode::Compound(compound) => {
                    let has_active_child = !self.st.configuration.children_of(&path).is_empty();
                    let has_queued_descendant = queue.iter().any(|q| path.is_ancestor_of(q));
                    if !has_active_child && !has_queued_descendant {
                        if let Some(initial) = compound.resolved_initial() {
                            queue.push_back(path.join(initial));
                        }
                    }
                }
                StateNode::Parallel(parallel) => {
                    for region in &parallel.regions {
                        let region_path = path.join(region.id());
                        if !self.st.configuration.contains(&region_path)
                            && !queue.contains(&region_path)
                        {
                            queue.push_back(region_path);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Evaluate a final state's `<donedata>` payload.
    async fn done_data_value(&mut self, final_state: &FinalState, effects: &mut Effects) -> Value {
        let Some(done_data) = &final_state.done_data else {
            return Value::Null;
        };
        if let Some(expr) = &done_data.content_expr {
            return match self.evaluator.evaluate(expr, &self.st.store).await {
                Ok(v) => v,
                Err(err) => {
                    self.st
                        .internal
                        .push_back(Event::error_execution(err, expr, "donedata"));
                    Value::Null
                }
            };
        }
        if let Some(content) = &done_data.content {
            return literal_value(content);
        }
        if !done_data.params.is_empty() {
            let executor = &self.executor;
            let mut ctx = ExecCtx {
                store: &mut self.st.store,
                internal: &mut self.st.internal,
                effects,
            };
            return executor.eval_params(&done_data.params, "donedata", &mut ctx).await;
        }
        Value::Null
    }

    /// Record the configuration under exiting states into their history
    /// pseudo-states, before any unmount runs.
    fn snapshot_history(&mut self, exit_paths: &[StatePath]) {
        for path in exit_paths {
            let Some(node) = self.st.configuration.node(path).cloned() else {
                continue;
            };
            for child in node.children() {
                let StateNode::History(history) = child.as_ref() else {
                    continue;
                };
                let history_path = path.join(child.id());
                let snapshot = match history.depth {
                    crate::node::HistoryDepth::Shallow => self.st.configuration.children_of(path),
                    crate::node::HistoryDepth::Deep => self.st.configuration.leaves_under(path),
                };
                tracing::trace!(history = %history_path, saved = snapshot.len(), "history snapshot");
                self.st.history_values.insert(history_path, snapshot);
            }
        }
    }

    /// Apply loop-bound effects: park delayed sends, queue self-addressed
    /// sends, hand externally targeted sends to the I/O processor, apply
    /// cancellations.
    async fn drain_effects(&mut self, effects: Effects) {
        for send in effects.sends {
            let OutboundSend {
                sendid,
                target,
                delay,
                event,
            } = send;
            match delay {
                Some(d) => {
                    tracing::debug!(%sendid, delay_ms = d.as_millis() as u64, "scheduling delayed send");
                    self.scheduler
                        .schedule(sendid, target, event, Instant::now() + d);
                }
                None => match target.as_deref() {
                    None => self.pending_external.push_back(event),
                    Some(TARGET_INTERNAL) => self.st.internal.push_back(event),
                    Some(t) => self.deliver(t, event).await,
                },
            }
        }
        for sendid in effects.cancels {
            if self.scheduler.cancel(&sendid) {
                tracing::debug!(%sendid, "cancelled scheduled send");
            }
        }
    }

    /// Hand one event to the I/O processor, trapping failures.
    async fn deliver(&mut self, target: &str, event: Event) {
        match self.io.clone() {
            Some(io) => {
                if let Err(err) = io.deliver(target, event).await {
                    self.st.internal.push_back(Event::error(
                        "error.send.delivery-failed",
                        err,
                        target,
                        "send",
                    ));
                }
            }
            None => {
                self.st.internal.push_back(Event::error(
                    "error.send.delivery-failed",
                    format!("no I/O processor configured for target '{target}'"),
                    target,
                    "send",
                ));
            }
        }
    }

    /// Suspend until an external event, a due delayed send, cancellation,
    /// or the deadline.
    async fn await_external(&mut self, deadline: Option<Instant>) -> Wake {
        loop {
            if let Some(event) = self.pending_external.pop_front() {
                return Wake::Event(event);
            }

            let due = self.scheduler.take_due(Instant::now());
            if !due.is_empty() {
                let mut gained_internal = false;
                for send in due {
                    match send.target.as_deref() {
                        None => self.pending_external.push_back(send.event),
                        Some(TARGET_INTERNAL) => {
                            self.st.internal.push_back(send.event);
                            gained_internal = true;
                        }
                        Some(t) => {
                            let target = t.to_string();
                            self.deliver(&target, send.event).await;
                            gained_internal = true;
                        }
                    }
                }
                if gained_internal {
                    return Wake::Drain;
                }
                continue;
            }

            let cancel = self.cancel.clone();
            let cancel_wait = async move {
                match cancel {
                    Some(handle) => handle.cancelled().await,
                    None => std::future::pending().await,
                }
            };
            let far = Instant::now() + Duration::from_secs(86_400);
            let next_send = self.scheduler.next_deadline();

            tokio::select! {
                biased;
                _ = cancel_wait => return Wake::Cancelled,
                _ = tokio::time::sleep_until(deadline.unwrap_or(far)), if deadline.is_some() => {
                    return Wake::TimedOut;
                }
                _ = tokio::time::sleep_until(next_send.unwrap_or(far)), if next_send.is_some() => {
                    // Loop back to flush the now-due sends.
                }
                event = self.external_rx.recv() => {
                    match event {
                        Some(event) => return Wake::Event(event),
                        None => return Wake::Cancelled,
                    }
                }
            }
        }
    }

    /// Unmount every remaining active state, deepest-first.
    async fn shutdown(&mut self) {
        let paths: Vec<StatePath> = self
            .st
            .configuration
            .deepest_first()
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        let mut effects = Effects::default();
        for path in paths {
            if let Some(node) = self.st.configuration.exit(&path) {
                tracing::trace!(state = %path, "unmounting");
                let executor = &self.executor;
                let mut ctx = ExecCtx {
                    store: &mut self.st.store,
                    internal: &mut self.st.internal,
                    effects: &mut effects,
                };
                executor.run_block(&node.common().on_exit, &mut ctx).await;
            }
        }
        // Effects raised during teardown are dropped: the run is over.
    }

    fn record(&mut self, kind: HistoryKind, event: Option<Event>) {
        let entry = HistoryEntry {
            id: self.next_entry_id,
            kind,
            configuration: self.st.configuration.snapshot(),
            event,
            at: Utc::now(),
        };
        self.next_entry_id += 1;
        if let Some(sink) = &self.sink {
            let _ = sink.send(entry.clone());
        }
        self.trace.push(entry);
    }

    fn bump_step(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(ChartError::execution(format!(
                "run exceeded {} processing steps without stabilizing",
                self.step_limit
            )));
        }
        Ok(())
    }
}
