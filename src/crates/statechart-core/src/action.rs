//! Executable content: the action nodes inside `<onentry>`, `<onexit>`,
//! and `<transition>` blocks.
//!
//! Actions are inert data — each variant carries the statically parsed
//! attributes of its element and nothing else. Execution lives in the
//! [`exec`](crate::exec) module, which dispatches over [`Action`] and runs
//! the semantics against the run state.
//!
//! The conditional family (`<if>`/`<elseif>`/`<else>`) is flattened at
//! parse time into ordered [`IfBranch`]es so sibling conditional markers
//! can never be executed as ordinary children of the parent block.

use serde::{Deserialize, Serialize};

/// One executable action, tagged by element kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// `<assign>` — write (or clear) a data-store location.
    Assign(Assign),
    /// `<raise>` — enqueue an event on the internal queue.
    Raise(Raise),
    /// `<log>` — emit a labelled value through the logging collaborator.
    Log(Log),
    /// `<if>`/`<elseif>`/`<else>` — first matching branch runs.
    If(If),
    /// `<foreach>` — iterate an array, binding item/index per turn.
    Foreach(Foreach),
    /// `<send>` — deliver an event, possibly delayed or external.
    Send(SendParams),
    /// `<script>` — hand source text to the evaluator.
    Script(Script),
    /// `<cancel>` — cancel a scheduled send by id.
    Cancel(Cancel),
}

impl Action {
    /// The element name of this action, used as error-event context.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::Assign(_) => "assign",
            Action::Raise(_) => "raise",
            Action::Log(_) => "log",
            Action::If(_) => "if",
            Action::Foreach(_) => "foreach",
            Action::Send(_) => "send",
            Action::Script(_) => "script",
            Action::Cancel(_) => "cancel",
        }
    }
}

/// How an `<assign>` clears its location instead of writing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Clear {
    /// `clear="true"` — delete the leaf key.
    Delete,
    /// `clear="null"` — set the leaf to null.
    Null,
}

/// Attributes of `<assign>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assign {
    /// Target location in the data store.
    pub location: String,
    /// Value expression; wins over `content`.
    pub expr: Option<String>,
    /// Concatenated child text content, the fallback value source.
    pub content: Option<String>,
    /// Clear mode; when set, no value is written.
    pub clear: Option<Clear>,
}

/// Attributes of `<raise>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raise {
    /// Literal event name.
    pub event: Option<String>,
    /// Event name expression, used when `event` is absent.
    pub event_expr: Option<String>,
}

/// Attributes of `<log>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    /// Label prefix for the emitted line.
    pub label: Option<String>,
    /// Expression producing the logged value.
    pub expr: Option<String>,
}

/// One branch of a conditional block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBranch {
    /// Guard expression; `None` for the `<else>` branch.
    pub cond: Option<String>,
    /// Direct executable children of this branch.
    pub body: Vec<Action>,
}

/// A flattened `<if>`/`<elseif>`/`<else>` chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct If {
    /// Branches in document order; at most the last may be guardless.
    pub branches: Vec<IfBranch>,
}

/// Attributes of `<foreach>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Foreach {
    /// Expression producing the iterated array.
    pub array: String,
    /// Location bound to the current item on each iteration.
    pub item: String,
    /// Location bound to the current index, if declared.
    pub index: Option<String>,
    /// Body executed once per item.
    pub body: Vec<Action>,
}

/// A `<param>` child of `<send>` or `<donedata>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Key in the produced payload object.
    pub name: String,
    /// Value expression.
    pub expr: Option<String>,
    /// Data-store location read when `expr` is absent.
    pub location: Option<String>,
}

/// Attributes and children of `<send>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendParams {
    /// Literal event name.
    pub event: Option<String>,
    /// Event name expression, used when `event` is absent.
    pub event_expr: Option<String>,
    /// Literal delivery target.
    pub target: Option<String>,
    /// Delivery target expression, used when `target` is absent.
    pub target_expr: Option<String>,
    /// Literal delay, e.g. `500ms` or `1.5s`.
    pub delay: Option<String>,
    /// Delay expression, used when `delay` is absent.
    pub delay_expr: Option<String>,
    /// Explicit send id.
    pub id: Option<String>,
    /// Location that receives the (possibly generated) send id.
    pub id_location: Option<String>,
    /// `<param>` children merged into the payload object.
    pub params: Vec<Param>,
    /// `<content>` child: literal payload text.
    pub content: Option<String>,
    /// `<content expr=…>`: payload expression, wins over literal content.
    pub content_expr: Option<String>,
}

/// Attributes of `<script>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// External source reference (not fetched; reported as unsupported).
    pub src: Option<String>,
    /// Inline script text.
    pub content: Option<String>,
}

/// Attributes of `<cancel>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancel {
    /// Literal send id to cancel.
    pub sendid: Option<String>,
    /// Send id expression, used when `sendid` is absent.
    pub sendid_expr: Option<String>,
}
