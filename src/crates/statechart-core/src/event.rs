//! Events and event descriptor matching.
//!
//! Everything that moves through the interpreter's queues is an [`Event`]:
//! external input posted by the host, internal events raised by executable
//! content, platform error events, and `done.state.*` completion events.
//! While an event is being processed it is exposed to expressions as the
//! reserved `_event` root of the data store, with the field layout the
//! SCXML system variable defines (`name`, `type`, `data`, `sendid`,
//! `origin`, `origintype`, `invokeid`).
//!
//! Transition event descriptors match by **dotted-token prefix**: the
//! descriptor `error` matches `error.execution`, `*` matches any event, and
//! a descriptor may list several space-separated patterns. A trailing `.*`
//! on a pattern is tolerated and equivalent to the bare prefix.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Which side of the interpreter produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    /// Raised by executable content during a microstep.
    Internal,
    /// Posted by the host or by a delayed send.
    External,
    /// Generated by the interpreter itself (errors, completion events).
    Platform,
}

impl EventOrigin {
    /// The `_event.type` string for this origin.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOrigin::Internal => "internal",
            EventOrigin::External => "external",
            EventOrigin::Platform => "platform",
        }
    }
}

impl fmt::Display for EventOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued statechart event.
///
/// # Examples
///
/// ```rust
/// use statechart_core::Event;
/// use serde_json::json;
///
/// let ev = Event::external("damage.taken").with_data(json!({"amount": 10}));
/// assert_eq!(ev.name, "damage.taken");
/// assert!(ev.matches_descriptor("damage"));
/// assert!(!ev.matches_descriptor("damageTaken"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dotted event name, e.g. `done.state.playing`.
    pub name: String,
    /// Originating side of the interpreter.
    pub origin: EventOrigin,
    /// Payload, `Value::Null` when absent.
    #[serde(default)]
    pub data: Value,
    /// Id of the `<send>` that produced this event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sendid: Option<String>,
    /// URI of the originating session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// Type of the originating event I/O processor, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_type: Option<String>,
    /// Id of the invocation that produced this event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_id: Option<String>,
}

impl Event {
    fn new(name: impl Into<String>, origin: EventOrigin) -> Self {
        Event {
            name: name.into(),
            origin,
            data: Value::Null,
            sendid: None,
            origin_id: None,
            origin_type: None,
            invoke_id: None,
        }
    }

    /// An external event, as posted by the host.
    pub fn external(name: impl Into<String>) -> Self {
        Event::new(name, EventOrigin::External)
    }

    /// An internal event, as raised by executable content.
    pub fn internal(name: impl Into<String>) -> Self {
        Event::new(name, EventOrigin::Internal)
    }

    /// A platform event (errors, completion events).
    pub fn platform(name: impl Into<String>) -> Self {
        Event::new(name, EventOrigin::Platform)
    }

    /// A `done.state.<parent>` completion event.
    pub fn done_state(parent_path: &str, data: Value) -> Self {
        let mut ev = Event::platform(format!("done.state.{parent_path}"));
        ev.data = data;
        ev
    }

    /// A platform error event with `{error, source, node}` context data.
    ///
    /// `name` is the full dotted error name from the platform taxonomy,
    /// e.g. `error.assign.invalid-location`.
    pub fn error(name: &str, error: impl fmt::Display, source: &str, node: &str) -> Self {
        let mut ev = Event::platform(name);
        ev.data = json!({
            "error": error.to_string(),
            "source": source,
            "node": node,
        });
        ev
    }

    /// The general `error.execution` event.
    pub fn error_execution(error: impl fmt::Display, source: &str, node: &str) -> Self {
        Event::error("error.execution", error, source, node)
    }

    /// Attach payload data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Attach the id of the producing `<send>`.
    pub fn with_sendid(mut self, sendid: impl Into<String>) -> Self {
        self.sendid = Some(sendid.into());
        self
    }

    /// Whether this event matches a transition's event descriptor.
    ///
    /// The descriptor may contain several space-separated patterns; the
    /// event matches when any pattern matches. An empty descriptor never
    /// matches (it denotes an eventless transition, which is handled by
    /// the selector, not here).
    pub fn matches_descriptor(&self, descriptor: &str) -> bool {
        descriptor
            .split_whitespace()
            .any(|pattern| token_prefix_match(pattern, &self.name))
    }

    /// The `_event` value visible to expressions.
    pub fn as_value(&self) -> Value {
        json!({
            "name": self.name,
            "type": self.origin.as_str(),
            "data": self.data,
            "sendid": self.sendid,
            "origin": self.origin_id,
            "origintype": self.origin_type,
            "invokeid": self.invoke_id,
        })
    }
}

/// Dotted-token prefix matching for a single descriptor pattern.
fn token_prefix_match(pattern: &str, event_name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pattern = pattern.strip_suffix(".*").unwrap_or(pattern);
    if pattern.is_empty() {
        return false;
    }
    let mut pat = pattern.split('.');
    let mut name = event_name.split('.');
    loop {
        match (pat.next(), name.next()) {
            (None, _) => return true,
            (Some(_), None) => return false,
            (Some(p), Some(n)) if p == n => continue,
            _ => return false,
        }
    }
}
