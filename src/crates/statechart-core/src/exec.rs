//! Execution of action lists against the run state.
//!
//! The [`ActionExecutor`] runs executable content sequentially, feeding
//! the evolving run state through each action. Failures never abort the
//! surrounding microstep: each failing action is abandoned, a platform
//! error event is pushed onto the internal queue, and the next action
//! proceeds. The error taxonomy follows the platform scheme
//! (`error.execution`, `error.assign.invalid-location`,
//! `error.raise.missing-attribute`, `error.send.*`, …).
//!
//! Side effects that leave the loop — external sends, delayed sends,
//! cancellations — are not performed here. They accumulate in
//! [`Effects`] and are drained by the interpreter after the action list
//! completes, so delivery failures can still be trapped into events in
//! queue order.

use crate::action::{Action, Assign, Cancel, Clear, Foreach, If, Log, Param, Raise, Script, SendParams};
use crate::datamodel::DataStore;
use crate::eval::ExpressionEvaluator;
use crate::event::Event;
use crate::io::TARGET_INTERNAL;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// An outbound `<send>` awaiting delivery by the interpreter loop.
#[derive(Debug, Clone)]
pub struct OutboundSend {
    /// Explicit or generated send id.
    pub sendid: String,
    /// Delivery target; `None` addresses the session's own external queue.
    pub target: Option<String>,
    /// Delivery delay; `None` delivers within the current loop turn.
    pub delay: Option<Duration>,
    /// The event to deliver.
    pub event: Event,
}

/// Loop-bound side effects accumulated while executing an action list.
#[derive(Debug, Default)]
pub struct Effects {
    /// Sends to deliver or schedule, in action order.
    pub sends: Vec<OutboundSend>,
    /// Send ids to cancel, in action order.
    pub cancels: Vec<String>,
}

/// Mutable run-state view handed to the executor.
pub struct ExecCtx<'a> {
    /// The data store.
    pub store: &'a mut DataStore,
    /// The internal event queue.
    pub internal: &'a mut VecDeque<Event>,
    /// Accumulated loop-bound effects.
    pub effects: &'a mut Effects,
}

/// Runs executable content against the run state.
pub struct ActionExecutor {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl ActionExecutor {
    /// Create an executor using the given evaluator capability.
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        ActionExecutor { evaluator }
    }

    /// Execute `actions` in document order.
    ///
    /// Boxed because conditional and iteration bodies recurse back into
    /// block execution.
    pub fn run_block<'a>(
        &'a self,
        actions: &'a [Action],
        ctx: &'a mut ExecCtx<'_>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            for action in actions {
                self.run_action(action, ctx).await;
            }
        })
    }

    async fn run_action(&self, action: &Action, ctx: &mut ExecCtx<'_>) {
        match action {
            Action::Assign(assign) => self.run_assign(assign, ctx).await,
            Action::Raise(raise) => self.run_raise(raise, ctx).await,
            Action::Log(log) => self.run_log(log, ctx).await,
            Action::If(cond) => self.run_if(cond, ctx).await,
            Action::Foreach(each) => self.run_foreach(each, ctx).await,
            Action::Send(send) => self.run_send(send, ctx).await,
            Action::Script(script) => self.run_script(script, ctx).await,
            Action::Cancel(cancel) => self.run_cancel(cancel, ctx).await,
        }
    }

    async fn run_assign(&self, assign: &Assign, ctx: &mut ExecCtx<'_>) {
        match assign.clear {
            Some(Clear::Delete) => {
                if let Err(err) = ctx.store.delete(&assign.location) {
                    ctx.internal.push_back(Event::error(
                        "error.assign.invalid-location",
                        err,
                        &assign.location,
                        "assign",
                    ));
                }
                return;
            }
            Some(Clear::Null) => {
                if let Err(err) = ctx.store.assign(&assign.location, Value::Null) {
                    ctx.internal.push_back(Event::error(
                        "error.assign.invalid-location",
                        err,
                        &assign.location,
                        "assign",
                    ));
                }
                return;
            }
            None => {}
        }

        let value = if let Some(expr) = &assign.expr {
            match self.evaluator.evaluate(expr, ctx.store).await {
                Ok(v) => v,
                Err(err) => {
                    ctx.internal
                        .push_back(Event::error_execution(err, expr, "assign"));
                    return;
                }
            }
        } else if let Some(content) = &assign.content {
            literal_value(content)
        } else {
            // Neither expression, content, nor clear: lenient no-op.
            return;
        };

        if let Err(err) = ctx.store.assign(&assign.location, value) {
            ctx.internal.push_back(Event::error(
                "error.assign.invalid-location",
                err,
                &assign.location,
                "assign",
            ));
        }
    }

    async fn run_raise(&self, raise: &Raise, ctx: &mut ExecCtx<'_>) {
        let name = if let Some(name) = &raise.event {
            name.clone()
        } else if let Some(expr) = &raise.event_expr {
            match self.evaluator.evaluate(expr, ctx.store).await {
                Ok(v) => value_to_event_name(&v),
                Err(err) => {
                    ctx.internal.push_back(Event::error(
                        "error.raise.bad-expression",
                        err,
                        expr,
                        "raise",
                    ));
                    return;
                }
            }
        } else {
            ctx.internal.push_back(Event::error(
                "error.raise.missing-attribute",
                "raise requires an event name",
                "",
                "raise",
            ));
            return;
        };
        ctx.internal.push_back(Event::platform(name));
    }

    async fn run_log(&self, log: &Log, ctx: &mut ExecCtx<'_>) {
        let label = log.label.as_deref().unwrap_or("");
        match &log.expr {
            Some(expr) => match self.evaluator.evaluate(expr, ctx.store).await {
                Ok(value) => tracing::info!(target: "statechart::log", label, %value),
                Err(err) => {
                    tracing::warn!(target: "statechart::log", label, error = %err, "log expression failed")
                }
            },
            None => tracing::info!(target: "statechart::log", label),
        }
    }

    async fn run_if(&self, cond: &If, ctx: &mut ExecCtx<'_>) {
        for branch in &cond.branches {
            let taken = match &branch.cond {
                None => true,
                Some(expr) => match self.evaluator.evaluate_condition(expr, ctx.store).await {
                    Ok(b) => b,
                    Err(err) => {
                        ctx.internal
                            .push_back(Event::error_execution(err, expr, "if"));
                        return;
                    }
                },
            };
            if taken {
                self.run_block(&branch.body, ctx).await;
                return;
            }
        }
    }

    async fn run_foreach(&self, each: &Foreach, ctx: &mut ExecCtx<'_>) {
        let items = match self.evaluator.evaluate(&each.array, ctx.store).await {
            Ok(Value::Array(items)) => items,
            Ok(other) => {
                ctx.internal.push_back(Event::error_execution(
                    format!("foreach array expression produced {other}, expected an array"),
                    &each.array,
                    "foreach",
                ));
                return;
            }
            Err(err) => {
                ctx.internal
                    .push_back(Event::error_execution(err, &each.array, "foreach"));
                return;
            }
        };
        for (i, item) in items.into_iter().enumerate() {
            if let Err(err) = ctx.store.assign(&each.item, item) {
                ctx.internal
                    .push_back(Event::error_execution(err, &each.item, "foreach"));
                return;
            }
            if let Some(index) = &each.index {
                if let Err(err) = ctx.store.assign(index, Value::from(i)) {
                    ctx.internal
                        .push_back(Event::error_execution(err, index, "foreach"));
                    return;
                }
            }
            self.run_block(&each.body, ctx).await;
        }
    }

    async fn run_script(&self, script: &Script, ctx: &mut ExecCtx<'_>) {
        if script.src.is_some() {
            ctx.internal.push_back(Event::error_execution(
                "external script sources are not supported",
                script.src.as_deref().unwrap_or(""),
                "script",
            ));
            return;
        }
        if let Some(content) = &script.content {
            if let Err(err) = self.evaluator.evaluate(content, ctx.store).await {
                ctx.internal
                    .push_back(Event::error_execution(err, content, "script"));
            }
        }
    }

    async fn run_send(&self, send: &SendParams, ctx: &mut ExecCtx<'_>) {
        let name = if let Some(name) = &send.event {
            name.clone()
        } else if let Some(expr) = &send.event_expr {
            match self.evaluator.evaluate(expr, ctx.store).await {
                Ok(v) => value_to_event_name(&v),
                Err(err) => {
                    ctx.internal.push_back(Event::error(
                        "error.send.bad-expression",
                        err,
                        expr,
                        "send",
                    ));
                    return;
                }
            }
        } else {
            ctx.internal.push_back(Event::error(
                "error.send.missing-target",
                "send requires an event name",
                "",
                "send",
            ));
            return;
        };

        let target = if let Some(target) = &send.target {
            Some(target.clone())
        } else if let Some(expr) = &send.target_expr {
            match self.evaluator.evaluate(expr, ctx.store).await {
                Ok(Value::String(s)) => Some(s),
                Ok(other) => Some(other.to_string()),
                Err(err) => {
                    ctx.internal.push_back(Event::error(
                        "error.send.bad-expression",
                        err,
                        expr,
                        "send",
                    ));
                    return;
                }
            }
        } else {
            None
        };

        let delay_text = if let Some(delay) = &send.delay {
            Some(delay.clone())
        } else if let Some(expr) = &send.delay_expr {
            match self.evaluator.evaluate(expr, ctx.store).await {
                Ok(Value::String(s)) => Some(s),
                Ok(Value::Number(n)) => Some(n.to_string()),
                Ok(other) => {
                    ctx.internal.push_back(Event::error(
                        "error.send.bad-expression",
                        format!("delay expression produced {other}"),
                        expr,
                        "send",
                    ));
                    return;
                }
                Err(err) => {
                    ctx.internal.push_back(Event::error(
                        "error.send.bad-expression",
                        err,
                        expr,
                        "send",
                    ));
                    return;
                }
            }
        } else {
            None
        };
        let delay = match delay_text.as_deref() {
            None => None,
            Some(text) => match parse_delay(text) {
                Some(d) => Some(d),
                None => {
                    ctx.internal.push_back(Event::error(
                        "error.send.bad-expression",
                        format!("malformed delay '{text}'"),
                        text,
                        "send",
                    ));
                    return;
                }
            },
        };

        let sendid = match &send.id {
            Some(id) => id.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        if let Some(location) = &send.id_location {
            if let Err(err) = ctx.store.assign(location, Value::String(sendid.clone())) {
                ctx.internal.push_back(Event::error(
                    "error.assign.invalid-location",
                    err,
                    location,
                    "send",
                ));
            }
        }

        let data = self.send_payload(send, ctx).await;

        let mut event = Event::external(name).with_sendid(sendid.clone());
        event.data = data;

        if delay.is_none() && target.as_deref() == Some(TARGET_INTERNAL) {
            event.origin = crate::event::EventOrigin::Internal;
            ctx.internal.push_back(event);
            return;
        }

        ctx.effects.sends.push(OutboundSend {
            sendid,
            target,
            delay,
            event,
        });
    }

    /// Payload precedence: `<content expr>`, then literal `<content>`,
    /// then the `<param>` object, then null.
    async fn send_payload(&self, send: &SendParams, ctx: &mut ExecCtx<'_>) -> Value {
        if let Some(expr) = &send.content_expr {
            match self.evaluator.evaluate(expr, ctx.store).await {
                Ok(v) => return v,
                Err(err) => {
                    ctx.internal.push_back(Event::error(
                        "error.send.bad-expression",
                        err,
                        expr,
                        "send",
                    ));
                    return Value::Null;
                }
            }
        }
        if let Some(content) = &send.content {
            return literal_value(content);
        }
        if !send.params.is_empty() {
            return self.eval_params(&send.params, "send", ctx).await;
        }
        Value::Null
    }

    /// Evaluate `<param>` children into a payload object. Failing params
    /// are skipped after raising `error.execution`.
    pub(crate) async fn eval_params(
        &self,
        params: &[Param],
        node: &str,
        ctx: &mut ExecCtx<'_>,
    ) -> Value {
        let mut map = Map::new();
        for param in params {
            let value = if let Some(expr) = &param.expr {
                match self.evaluator.evaluate(expr, ctx.store).await {
                    Ok(v) => v,
                    Err(err) => {
                        ctx.internal.push_back(Event::error_execution(err, expr, node));
                        continue;
                    }
                }
            } else if let Some(location) = &param.location {
                match ctx.store.read(location) {
                    Some(v) => v,
                    None => {
                        ctx.internal.push_back(Event::error_execution(
                            format!("location '{location}' is not bound"),
                            location,
                            node,
                        ));
                        continue;
                    }
                }
            } else {
                Value::Null
            };
            map.insert(param.name.clone(), value);
        }
        Value::Object(map)
    }

    async fn run_cancel(&self, cancel: &Cancel, ctx: &mut ExecCtx<'_>) {
        let sendid = if let Some(id) = &cancel.sendid {
            id.clone()
        } else if let Some(expr) = &cancel.sendid_expr {
            match self.evaluator.evaluate(expr, ctx.store).await {
                Ok(Value::String(s)) => s,
                Ok(other) => other.to_string(),
                Err(err) => {
                    ctx.internal
                        .push_back(Event::error_execution(err, expr, "cancel"));
                    return;
                }
            }
        } else {
            ctx.internal.push_back(Event::error_execution(
                "cancel requires a sendid",
                "",
                "cancel",
            ));
            return;
        };
        ctx.effects.cancels.push(sendid);
    }
}

/// Interpret inline content as a JSON value, falling back to raw text.
pub(crate) fn literal_value(content: &str) -> Value {
    let trimmed = content.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Event names from expressions: strings pass through, other values use
/// their JSON rendering.
fn value_to_event_name(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a `<send>` delay: `500ms`, `1.5s`, or a bare number of
/// milliseconds.
pub fn parse_delay(text: &str) -> Option<Duration> {
    let text = text.trim();
    if let Some(ms) = text.strip_suffix("ms") {
        let n: f64 = ms.trim().parse().ok()?;
        return duration_ms(n);
    }
    if let Some(s) = text.strip_suffix('s') {
        let n: f64 = s.trim().parse().ok()?;
        return duration_ms(n * 1000.0);
    }
    let n: f64 = text.parse().ok()?;
    duration_ms(n)
}

fn duration_ms(ms: f64) -> Option<Duration> {
    if ms.is_finite() && ms >= 0.0 {
        Some(Duration::from_millis(ms.round() as u64))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::IfBranch;
    use crate::eval::basic::BasicEvaluator;
    use serde_json::json;

    struct Harness {
        store: DataStore,
        internal: VecDeque<Event>,
        effects: Effects,
        executor: ActionExecutor,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                store: DataStore::new(),
                internal: VecDeque::new(),
                effects: Effects::default(),
                executor: ActionExecutor::new(Arc::new(BasicEvaluator)),
            }
        }

        async fn run(&mut self, actions: &[Action]) {
            let mut ctx = ExecCtx {
                store: &mut self.store,
                internal: &mut self.internal,
                effects: &mut self.effects,
            };
            self.executor.run_block(actions, &mut ctx).await;
        }

        fn error_names(&self) -> Vec<&str> {
            self.internal.iter().map(|e| e.name.as_str()).collect()
        }
    }

    fn assign(location: &str, expr: &str) -> Action {
        Action::Assign(Assign {
            location: location.to_string(),
            expr: Some(expr.to_string()),
            content: None,
            clear: None,
        })
    }

    #[tokio::test]
    async fn assign_sequence_builds_nested_values() {
        let mut h = Harness::new();
        h.store.seed("user", json!({"id": 1}));
        h.run(&[
            assign("user.status", "'active'"),
            assign("user.lastLogin", "Date.now()"),
        ])
        .await;
        assert_eq!(h.store.read("user.id"), Some(json!(1)));
        assert_eq!(h.store.read("user.status"), Some(json!("active")));
        assert!(h.store.read("user.lastLogin").unwrap().is_number());
        assert!(h.internal.is_empty());
    }

    #[tokio::test]
    async fn assign_clear_modes() {
        let mut h = Harness::new();
        h.store.seed("user", json!({"name": "John", "id": 1}));
        h.run(&[Action::Assign(Assign {
            location: "user.name".to_string(),
            expr: None,
            content: None,
            clear: Some(Clear::Delete),
        })])
        .await;
        assert_eq!(h.store.data(), &json!({"user": {"id": 1}}));

        let mut h = Harness::new();
        h.store.seed("user", json!({"name": "John", "id": 1}));
        h.run(&[Action::Assign(Assign {
            location: "user.name".to_string(),
            expr: None,
            content: None,
            clear: Some(Clear::Null),
        })])
        .await;
        assert_eq!(h.store.data(), &json!({"user": {"name": null, "id": 1}}));
    }

    #[tokio::test]
    async fn assign_without_value_sources_is_a_noop() {
        let mut h = Harness::new();
        h.store.seed("user", json!({"id": 1}));
        h.run(&[Action::Assign(Assign {
            location: "user.id".to_string(),
            expr: None,
            content: None,
            clear: None,
        })])
        .await;
        assert_eq!(h.store.read("user.id"), Some(json!(1)));
        assert!(h.internal.is_empty());
    }

    #[tokio::test]
    async fn failing_action_traps_and_the_next_action_runs() {
        let mut h = Harness::new();
        h.store.seed("n", json!(5));
        h.run(&[
            assign("n.k", "1"), // n is a scalar: invalid location
            assign("ok", "2"),
        ])
        .await;
        assert_eq!(h.error_names(), vec!["error.assign.invalid-location"]);
        assert_eq!(h.store.read("ok"), Some(json!(2)));
    }

    #[tokio::test]
    async fn raise_enqueues_platform_event_and_validates_attributes() {
        let mut h = Harness::new();
        h.run(&[
            Action::Raise(Raise {
                event: Some("go".to_string()),
                event_expr: None,
            }),
            Action::Raise(Raise {
                event: None,
                event_expr: None,
            }),
        ])
        .await;
        assert_eq!(h.error_names(), vec!["go", "error.raise.missing-attribute"]);
        assert_eq!(h.internal[0].origin, crate::event::EventOrigin::Platform);
    }

    #[tokio::test]
    async fn if_runs_first_matching_branch_only() {
        let mut h = Harness::new();
        h.store.seed("n", json!(7));
        h.run(&[Action::If(If {
            branches: vec![
                IfBranch {
                    cond: Some("n > 10".to_string()),
                    body: vec![assign("branch", "'big'")],
                },
                IfBranch {
                    cond: Some("n > 5".to_string()),
                    body: vec![assign("branch", "'mid'")],
                },
                IfBranch {
                    cond: None,
                    body: vec![assign("branch", "'small'")],
                },
            ],
        })])
        .await;
        assert_eq!(h.store.read("branch"), Some(json!("mid")));
    }

    #[tokio::test]
    async fn foreach_binds_item_and_index() {
        let mut h = Harness::new();
        h.store.seed("xs", json!([10, 20, 30]));
        h.store.seed("sum", json!(0));
        h.run(&[Action::Foreach(Foreach {
            array: "xs".to_string(),
            item: "x".to_string(),
            index: Some("i".to_string()),
            body: vec![assign("sum", "sum + x + i")],
        })])
        .await;
        assert_eq!(h.store.read("sum"), Some(json!(63)));
    }

    #[tokio::test]
    async fn foreach_over_non_array_raises_and_aborts() {
        let mut h = Harness::new();
        h.store.seed("xs", json!(42));
        h.run(&[Action::Foreach(Foreach {
            array: "xs".to_string(),
            item: "x".to_string(),
            index: None,
            body: vec![assign("touched", "true")],
        })])
        .await;
        assert_eq!(h.error_names(), vec!["error.execution"]);
        assert_eq!(h.store.read("touched"), None);
    }

    #[tokio::test]
    async fn send_to_internal_target_preserves_queue_order_with_raise() {
        let mut h = Harness::new();
        h.run(&[
            Action::Raise(Raise {
                event: Some("first".to_string()),
                event_expr: None,
            }),
            Action::Send(SendParams {
                event: Some("second".to_string()),
                event_expr: None,
                target: Some(TARGET_INTERNAL.to_string()),
                target_expr: None,
                delay: None,
                delay_expr: None,
                id: None,
                id_location: None,
                params: vec![],
                content: None,
                content_expr: None,
            }),
            Action::Raise(Raise {
                event: Some("third".to_string()),
                event_expr: None,
            }),
        ])
        .await;
        assert_eq!(h.error_names(), vec!["first", "second", "third"]);
        assert!(h.effects.sends.is_empty());
    }

    #[tokio::test]
    async fn send_with_delay_accumulates_an_outbound_effect() {
        let mut h = Harness::new();
        h.run(&[Action::Send(SendParams {
            event: Some("tick".to_string()),
            event_expr: None,
            target: None,
            target_expr: None,
            delay: Some("250ms".to_string()),
            delay_expr: None,
            id: Some("t1".to_string()),
            id_location: Some("timer".to_string()),
            params: vec![Param {
                name: "n".to_string(),
                expr: Some("1 + 1".to_string()),
                location: None,
            }],
            content: None,
            content_expr: None,
        })])
        .await;
        assert_eq!(h.effects.sends.len(), 1);
        let send = &h.effects.sends[0];
        assert_eq!(send.sendid, "t1");
        assert_eq!(send.delay, Some(Duration::from_millis(250)));
        assert_eq!(send.event.data, json!({"n": 2}));
        assert_eq!(h.store.read("timer"), Some(json!("t1")));
    }

    #[tokio::test]
    async fn send_without_event_name_raises_missing_target() {
        let mut h = Harness::new();
        h.run(&[Action::Send(SendParams {
            event: None,
            event_expr: None,
            target: None,
            target_expr: None,
            delay: None,
            delay_expr: None,
            id: None,
            id_location: None,
            params: vec![],
            content: None,
            content_expr: None,
        })])
        .await;
        assert_eq!(h.error_names(), vec!["error.send.missing-target"]);
    }

    #[tokio::test]
    async fn cancel_accumulates_effect() {
        let mut h = Harness::new();
        h.store.seed("timer", json!("t1"));
        h.run(&[Action::Cancel(Cancel {
            sendid: None,
            sendid_expr: Some("timer".to_string()),
        })])
        .await;
        assert_eq!(h.effects.cancels, vec!["t1"]);
    }

    #[test]
    fn delay_formats() {
        assert_eq!(parse_delay("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_delay("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_delay("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_delay("100"), Some(Duration::from_millis(100)));
        assert_eq!(parse_delay("soon"), None);
        assert_eq!(parse_delay("-5ms"), None);
    }
}
