//! The SCXML reader: chart source → typed node tree + id index.
//!
//! Parsing is two passes over an intermediate raw tree. The first pass
//! walks the XML, validating the dialect (unknown elements are rejected,
//! required attributes enforced) and collecting per-element attributes.
//! The second pass assigns every state its fully-qualified dotted path,
//! resolves transition targets — a target token is either a full dotted
//! path or a unique state id — and builds the immutable `Arc` tree plus
//! the path index.
//!
//! Construction errors abort parsing; no chart is produced.

use crate::action::{
    Action, Assign, Cancel, Clear, Foreach, If, IfBranch, Log, Param, Raise, Script, SendParams,
};
use crate::chart::{ChartInner, DatamodelKind, StateChart};
use crate::error::{ChartError, Result};
use crate::node::{
    AtomicState, CompoundState, DataDecl, DoneData, FinalState, HistoryDepth, HistoryState,
    ParallelState, StateCommon, StateNode, Transition, TransitionKind,
};
use crate::path::StatePath;
use roxmltree::{Document, Node};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Parse and validate chart source.
pub(crate) fn parse(source: &str) -> Result<StateChart> {
    let doc = Document::parse(source)?;
    let root = doc.root_element();
    if root.tag_name().name() != "scxml" {
        return Err(ChartError::validation(format!(
            "root element must be <scxml>, found <{}>",
            root.tag_name().name()
        )));
    }
    let initial_attr = root
        .attribute("initial")
        .ok_or_else(|| ChartError::missing_attribute("scxml", "initial"))?
        .to_string();
    let datamodel = match root.attribute("datamodel") {
        None => DatamodelKind::Ecmascript,
        Some(s) if s.eq_ignore_ascii_case("null") => DatamodelKind::Null,
        Some(s) if s.to_ascii_lowercase().starts_with("ecmascript") => DatamodelKind::Ecmascript,
        Some(other) => {
            return Err(ChartError::validation(format!(
                "unsupported datamodel '{other}'"
            )))
        }
    };

    let mut children = Vec::new();
    let mut root_data = Vec::new();
    for child in elements(root) {
        match child.tag_name().name() {
            "state" | "parallel" | "final" => children.push(parse_state(child)?),
            "datamodel" => root_data.extend(parse_datamodel(child)?),
            other => {
                return Err(ChartError::UnknownElement {
                    element: other.to_string(),
                    parent: "scxml".to_string(),
                })
            }
        }
    }
    if children.is_empty() {
        return Err(ChartError::validation("chart declares no states"));
    }

    Builder::build(children, root_data, &initial_attr, datamodel)
}

/// Element children, skipping text, comments, and processing instructions.
fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|c| c.is_element())
}

/// Concatenated trimmed text content, `None` when empty.
fn text_content(node: Node) -> Option<String> {
    let mut out = String::new();
    for child in node.children() {
        if child.is_text() {
            out.push_str(child.text().unwrap_or(""));
        }
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn attr(node: Node, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}

fn require_attr(node: Node, name: &str) -> Result<String> {
    attr(node, name)
        .ok_or_else(|| ChartError::missing_attribute(node.tag_name().name(), name))
}

// ---------------------------------------------------------------------
// Pass 1: XML → raw tree
// ---------------------------------------------------------------------

#[derive(Debug)]
enum RawKind {
    Atomic,
    Compound,
    Parallel,
    Final,
    History,
}

#[derive(Debug)]
struct RawState {
    id: String,
    kind: RawKind,
    /// Declared initial child token (attribute wins over `<initial>`).
    initial: Option<String>,
    transitions: Vec<RawTransition>,
    on_entry: Vec<Action>,
    on_exit: Vec<Action>,
    data: Vec<(usize, DataDecl)>,
    children: Vec<RawState>,
    done_data: Option<DoneData>,
    history_depth: HistoryDepth,
    history_default: Vec<String>,
}

#[derive(Debug)]
struct RawTransition {
    doc_pos: usize,
    event: Option<String>,
    cond: Option<String>,
    targets: Vec<String>,
    kind: TransitionKind,
    actions: Vec<Action>,
}

fn parse_state(node: Node) -> Result<RawState> {
    let tag = node.tag_name().name();
    let id = require_attr(node, "id")?;
    if id.contains('.') {
        return Err(ChartError::validation(format!(
            "state id '{id}' must not contain '.'"
        )));
    }

    let mut raw = RawState {
        id,
        kind: match tag {
            "state" => RawKind::Atomic,
            "parallel" => RawKind::Parallel,
            "final" => RawKind::Final,
            "history" => RawKind::History,
            other => {
                return Err(ChartError::validation(format!(
                    "unexpected state element <{other}>"
                )))
            }
        },
        initial: attr(node, "initial"),
        transitions: Vec::new(),
        on_entry: Vec::new(),
        on_exit: Vec::new(),
        data: Vec::new(),
        children: Vec::new(),
        done_data: None,
        history_depth: match attr(node, "type").as_deref() {
            Some("deep") => HistoryDepth::Deep,
            _ => HistoryDepth::Shallow,
        },
        history_default: Vec::new(),
    };
    if tag == "history" {
        if let Some(kind) = attr(node, "type") {
            if kind != "shallow" && kind != "deep" {
                return Err(ChartError::validation(format!(
                    "history type must be 'shallow' or 'deep', found '{kind}'"
                )));
            }
        }
    }

    for child in elements(node) {
        let name = child.tag_name().name();
        match (tag, name) {
            ("state" | "parallel", "state" | "parallel" | "final" | "history") => {
                raw.children.push(parse_state(child)?);
            }
            ("state" | "parallel", "transition") => {
                raw.transitions.push(parse_transition(child)?);
            }
            ("state" | "parallel" | "final", "onentry") => {
                raw.on_entry.extend(parse_actions(child)?);
            }
            ("state" | "parallel" | "final", "onexit") => {
                raw.on_exit.extend(parse_actions(child)?);
            }
            ("state", "initial") => {
                let transition = parse_initial(child)?;
                if raw.initial.is_none() {
                    raw.initial = Some(transition);
                }
            }
            ("state", "datamodel") => raw.data.extend(parse_datamodel(child)?),
            ("final", "donedata") => raw.done_data = Some(parse_donedata(child)?),
            ("history", "transition") => {
                let transition = parse_transition(child)?;
                if transition.targets.is_empty() {
                    return Err(ChartError::validation(
                        "history default transition requires a target",
                    ));
                }
                raw.history_default = transition.targets;
            }
            _ => {
                return Err(ChartError::UnknownElement {
                    element: name.to_string(),
                    parent: tag.to_string(),
                })
            }
        }
    }

    if matches!(raw.kind, RawKind::Atomic) && !raw.children.is_empty() {
        raw.kind = RawKind::Compound;
    }
    if matches!(raw.kind, RawKind::Parallel) {
        if raw.children.iter().any(|c| matches!(c.kind, RawKind::History)) {
            return Err(ChartError::validation(format!(
                "history pseudo-states are not allowed inside parallel state '{}'",
                raw.id
            )));
        }
        if raw.children.is_empty() {
            return Err(ChartError::validation(format!(
                "parallel state '{}' declares no regions",
                raw.id
            )));
        }
    }
    Ok(raw)
}

/// The `<initial>` pseudo-state: a single targeted, eventless transition.
fn parse_initial(node: Node) -> Result<String> {
    let mut target = None;
    for child in elements(node) {
        match child.tag_name().name() {
            "transition" => {
                let transition = parse_transition(child)?;
                if transition.event.is_some() || transition.cond.is_some() {
                    return Err(ChartError::validation(
                        "the initial transition must be eventless and unguarded",
                    ));
                }
                match transition.targets.as_slice() {
                    [single] => target = Some(single.clone()),
                    _ => {
                        return Err(ChartError::validation(
                            "the initial transition requires exactly one target",
                        ))
                    }
                }
            }
            other => {
                return Err(ChartError::UnknownElement {
                    element: other.to_string(),
                    parent: "initial".to_string(),
                })
            }
        }
    }
    target.ok_or_else(|| ChartError::validation("<initial> requires a <transition>"))
}

fn parse_transition(node: Node) -> Result<RawTransition> {
    let kind = match attr(node, "type").as_deref() {
        None | Some("external") => TransitionKind::External,
        Some("internal") => TransitionKind::Internal,
        Some(other) => {
            return Err(ChartError::validation(format!(
                "transition type must be 'internal' or 'external', found '{other}'"
            )))
        }
    };
    Ok(RawTransition {
        doc_pos: node.range().start,
        event: attr(node, "event").filter(|e| !e.trim().is_empty()),
        cond: attr(node, "cond"),
        targets: attr(node, "target")
            .map(|t| t.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        kind,
        actions: parse_actions(node)?,
    })
}

fn parse_datamodel(node: Node) -> Result<Vec<(usize, DataDecl)>> {
    let mut decls = Vec::new();
    for child in elements(node) {
        match child.tag_name().name() {
            "data" => decls.push((
                child.range().start,
                DataDecl {
                    id: require_attr(child, "id")?,
                    expr: attr(child, "expr"),
                    content: text_content(child),
                    src: attr(child, "src"),
                },
            )),
            other => {
                return Err(ChartError::UnknownElement {
                    element: other.to_string(),
                    parent: "datamodel".to_string(),
                })
            }
        }
    }
    Ok(decls)
}

fn parse_donedata(node: Node) -> Result<DoneData> {
    let mut done = DoneData {
        content: None,
        content_expr: None,
        params: Vec::new(),
    };
    for child in elements(node) {
        match child.tag_name().name() {
            "content" => {
                done.content_expr = attr(child, "expr");
                done.content = text_content(child);
            }
            "param" => done.params.push(parse_param(child)?),
            other => {
                return Err(ChartError::UnknownElement {
                    element: other.to_string(),
                    parent: "donedata".to_string(),
                })
            }
        }
    }
    Ok(done)
}

fn parse_param(node: Node) -> Result<Param> {
    Ok(Param {
        name: require_attr(node, "name")?,
        expr: attr(node, "expr"),
        location: attr(node, "location"),
    })
}

/// Executable children of `<onentry>`, `<onexit>`, `<transition>`,
/// `<foreach>`, or a conditional branch container.
fn parse_actions(node: Node) -> Result<Vec<Action>> {
    let mut actions = Vec::new();
    for child in elements(node) {
        actions.push(parse_action(child, node.tag_name().name())?);
    }
    Ok(actions)
}

fn parse_action(node: Node, parent: &str) -> Result<Action> {
    match node.tag_name().name() {
        "assign" => Ok(Action::Assign(Assign {
            location: require_attr(node, "location")?,
            expr: attr(node, "expr"),
            content: text_content(node),
            clear: match attr(node, "clear").as_deref() {
                None => None,
                Some("true") => Some(Clear::Delete),
                Some("null") => Some(Clear::Null),
                Some(other) => {
                    return Err(ChartError::validation(format!(
                        "assign clear must be 'true' or 'null', found '{other}'"
                    )))
                }
            },
        })),
        "raise" => Ok(Action::Raise(Raise {
            event: attr(node, "event"),
            event_expr: attr(node, "eventexpr"),
        })),
        "log" => Ok(Action::Log(Log {
            label: attr(node, "label"),
            expr: attr(node, "expr"),
        })),
        "if" => Ok(Action::If(parse_if(node)?)),
        "foreach" => Ok(Action::Foreach(Foreach {
            array: require_attr(node, "array")?,
            item: require_attr(node, "item")?,
            index: attr(node, "index"),
            body: parse_actions(node)?,
        })),
        "send" => parse_send(node),
        "script" => Ok(Action::Script(Script {
            src: attr(node, "src"),
            content: text_content(node),
        })),
        "cancel" => Ok(Action::Cancel(Cancel {
            sendid: attr(node, "sendid"),
            sendid_expr: attr(node, "sendidexpr"),
        })),
        other => Err(ChartError::UnknownElement {
            element: other.to_string(),
            parent: parent.to_string(),
        }),
    }
}

/// `<if>`: sibling `<elseif>`/`<else>` markers split the children into
/// branches; they are never executed as ordinary children.
fn parse_if(node: Node) -> Result<If> {
    let mut branches = vec![IfBranch {
        cond: Some(require_attr(node, "cond")?),
        body: Vec::new(),
    }];
    let mut seen_else = false;
    for child in elements(node) {
        match child.tag_name().name() {
            "elseif" => {
                if seen_else {
                    return Err(ChartError::validation("<elseif> after <else>"));
                }
                branches.push(IfBranch {
                    cond: Some(require_attr(child, "cond")?),
                    body: Vec::new(),
                });
            }
            "else" => {
                if seen_else {
                    return Err(ChartError::validation("duplicate <else>"));
                }
                seen_else = true;
                branches.push(IfBranch {
                    cond: None,
                    body: Vec::new(),
                });
            }
            _ => {
                let action = parse_action(child, "if")?;
                branches
                    .last_mut()
                    .expect("at least the <if> branch exists")
                    .body
                    .push(action);
            }
        }
    }
    Ok(If { branches })
}

fn parse_send(node: Node) -> Result<Action> {
    let mut send = SendParams {
        event: attr(node, "event"),
        event_expr: attr(node, "eventexpr"),
        target: attr(node, "target"),
        target_expr: attr(node, "targetexpr"),
        delay: attr(node, "delay"),
        delay_expr: attr(node, "delayexpr"),
        id: attr(node, "id"),
        id_location: attr(node, "idlocation"),
        params: Vec::new(),
        content: None,
        content_expr: None,
    };
    for child in elements(node) {
        match child.tag_name().name() {
            "param" => send.params.push(parse_param(child)?),
            "content" => {
                send.content_expr = attr(child, "expr");
                send.content = text_content(child);
            }
            other => {
                return Err(ChartError::UnknownElement {
                    element: other.to_string(),
                    parent: "send".to_string(),
                })
            }
        }
    }
    Ok(Action::Send(send))
}

// ---------------------------------------------------------------------
// Pass 2: raw tree → paths, target resolution, Arc tree
// ---------------------------------------------------------------------

struct Builder {
    all_paths: HashSet<StatePath>,
    id_index: HashMap<String, Vec<StatePath>>,
    nodes: HashMap<StatePath, Arc<StateNode>>,
    data_decls: Vec<(usize, StatePath, DataDecl)>,
}

impl Builder {
    fn build(
        children: Vec<RawState>,
        root_data: Vec<(usize, DataDecl)>,
        initial_attr: &str,
        datamodel: DatamodelKind,
    ) -> Result<StateChart> {
        let mut builder = Builder {
            all_paths: HashSet::new(),
            id_index: HashMap::new(),
            nodes: HashMap::new(),
            data_decls: Vec::new(),
        };
        let root_path = StatePath::root();
        builder.index(&children, &root_path)?;

        for (pos, decl) in root_data {
            builder.data_decls.push((pos, root_path.clone(), decl));
        }
        let built: Vec<Arc<StateNode>> = children
            .into_iter()
            .map(|raw| builder.build_state(raw, &root_path))
            .collect::<Result<_>>()?;

        let initial = builder.resolve_target(initial_attr, &root_path)?;
        if builder
            .nodes
            .get(&initial)
            .is_some_and(|n| n.is_history())
        {
            return Err(ChartError::validation(format!(
                "the chart initial target '{initial}' is a history pseudo-state"
            )));
        }

        let root = Arc::new(StateNode::Compound(CompoundState {
            common: StateCommon::default(),
            initial: initial.segments().next().map(str::to_string),
            children: built,
        }));

        builder.data_decls.sort_by_key(|(pos, _, _)| *pos);
        let data_decls = builder
            .data_decls
            .into_iter()
            .map(|(_, path, decl)| (path, decl))
            .collect();

        Ok(StateChart::from_inner(ChartInner {
            root,
            nodes: builder.nodes,
            initial,
            datamodel,
            data_decls,
        }))
    }

    fn index(&mut self, states: &[RawState], parent: &StatePath) -> Result<()> {
        for state in states {
            let path = parent.join(&state.id);
            if !self.all_paths.insert(path.clone()) {
                return Err(ChartError::validation(format!(
                    "duplicate state path '{path}'"
                )));
            }
            self.id_index
                .entry(state.id.clone())
                .or_default()
                .push(path.clone());
            self.index(&state.children, &path)?;
        }
        Ok(())
    }

    /// A target token resolves as a full dotted path first, then as a
    /// unique state id anywhere in the chart.
    fn resolve_target(&self, token: &str, source: &StatePath) -> Result<StatePath> {
        let as_path = StatePath::from(token);
        if self.all_paths.contains(&as_path) {
            return Ok(as_path);
        }
        match self.id_index.get(token).map(Vec::as_slice) {
            Some([single]) => Ok(single.clone()),
            Some(candidates) if candidates.len() > 1 => Err(ChartError::validation(format!(
                "target '{token}' is ambiguous: {} states carry that id",
                candidates.len()
            ))),
            _ => Err(ChartError::UnknownTarget {
                source_state: source.to_string(),
                target: token.to_string(),
            }),
        }
    }

    fn build_state(&mut self, raw: RawState, parent: &StatePath) -> Result<Arc<StateNode>> {
        let path = parent.join(&raw.id);

        let mut transitions = Vec::new();
        for t in raw.transitions {
            let targets = t
                .targets
                .iter()
                .map(|token| self.resolve_target(token, &path))
                .collect::<Result<Vec<_>>>()?;
            transitions.push(Arc::new(Transition {
                event: t.event,
                cond: t.cond,
                targets,
                kind: t.kind,
                actions: t.actions,
                source: path.clone(),
                document_order: t.doc_pos,
            }));
        }

        for (pos, decl) in raw.data {
            self.data_decls.push((pos, path.clone(), decl));
        }

        let common = StateCommon {
            id: raw.id,
            transitions,
            on_entry: raw.on_entry,
            on_exit: raw.on_exit,
            data: Vec::new(),
        };

        let node = match raw.kind {
            RawKind::Atomic => StateNode::Atomic(AtomicState { common }),
            RawKind::Final => StateNode::Final(FinalState {
                common,
                done_data: raw.done_data,
            }),
            RawKind::History => {
                let default_targets = raw
                    .history_default
                    .iter()
                    .map(|token| self.resolve_target(token, &path))
                    .collect::<Result<Vec<_>>>()?;
                for target in &default_targets {
                    if !parent.is_ancestor_of(target) {
                        return Err(ChartError::validation(format!(
                            "history '{path}' default target '{target}' is not a descendant of '{parent}'"
                        )));
                    }
                }
                StateNode::History(HistoryState {
                    common,
                    depth: raw.history_depth,
                    default_targets,
                })
            }
            RawKind::Compound => {
                let initial = match raw.initial {
                    None => None,
                    Some(token) => Some(self.resolve_initial_child(&token, &path, &raw.children)?),
                };
                let children = raw
                    .children
                    .into_iter()
                    .map(|c| self.build_state(c, &path))
                    .collect::<Result<Vec<_>>>()?;
                StateNode::Compound(CompoundState {
                    common,
                    initial,
                    children,
                })
            }
            RawKind::Parallel => {
                let regions = raw
                    .children
                    .into_iter()
                    .map(|c| self.build_state(c, &path))
                    .collect::<Result<Vec<_>>>()?;
                StateNode::Parallel(ParallelState { common, regions })
            }
        };

        let node = Arc::new(node);
        self.nodes.insert(path, node.clone());
        Ok(node)
    }

    /// The declared initial of a compound must name one of its children.
    fn resolve_initial_child(
        &self,
        token: &str,
        path: &StatePath,
        children: &[RawState],
    ) -> Result<String> {
        if children.iter().any(|c| c.id == token) {
            return Ok(token.to_string());
        }
        let resolved = self.resolve_target(token, path)?;
        if resolved.parent().as_ref() == Some(path) {
            return Ok(resolved
                .leaf_id()
                .expect("non-root path has a leaf id")
                .to_string());
        }
        Err(ChartError::validation(format!(
            "initial '{token}' of state '{path}' does not resolve to a direct child"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_chart() {
        let chart = StateChart::from_source(
            r#"<scxml initial="main">
                 <state id="main">
                   <transition event="*" target="send:channel"/>
                 </state>
                 <final id="send:channel"/>
               </scxml>"#,
        )
        .unwrap();
        assert_eq!(chart.initial_target(), &StatePath::from("main"));
        assert_eq!(chart.state_count(), 2);
        let main = chart.node(&StatePath::from("main")).unwrap();
        assert_eq!(main.transitions().len(), 1);
        assert_eq!(
            main.transitions()[0].targets,
            vec![StatePath::from("send:channel")]
        );
        assert!(chart.node(&StatePath::from("send:channel")).unwrap().is_final());
    }

    #[test]
    fn nested_states_get_dotted_paths() {
        let chart = StateChart::from_source(
            r#"<scxml initial="playing">
                 <state id="playing">
                   <state id="healthSystem">
                     <state id="healthy"/>
                   </state>
                 </state>
               </scxml>"#,
        )
        .unwrap();
        assert!(chart
            .node(&StatePath::from("playing.healthSystem.healthy"))
            .is_some());
        assert!(chart.node(&StatePath::from("healthy")).is_none());
    }

    #[test]
    fn missing_root_initial_is_rejected() {
        let err = StateChart::from_source(r#"<scxml><state id="a"/></scxml>"#).unwrap_err();
        assert!(matches!(
            err,
            ChartError::MissingAttribute { ref element, ref attribute }
                if element == "scxml" && attribute == "initial"
        ));
    }

    #[test]
    fn unknown_elements_are_rejected() {
        let err = StateChart::from_source(
            r#"<scxml initial="a">
                 <state id="a"><invoke src="x"/></state>
               </scxml>"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ChartError::UnknownElement { ref element, .. } if element == "invoke"
        ));
    }

    #[test]
    fn unresolved_targets_are_rejected() {
        let err = StateChart::from_source(
            r#"<scxml initial="a">
                 <state id="a"><transition event="x" target="nowhere"/></state>
               </scxml>"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ChartError::UnknownTarget { ref target, .. } if target == "nowhere"
        ));
    }

    #[test]
    fn initial_attribute_wins_over_initial_element() {
        let chart = StateChart::from_source(
            r#"<scxml initial="p">
                 <state id="p" initial="b">
                   <initial><transition target="a"/></initial>
                   <state id="a"/>
                   <state id="b"/>
                 </state>
               </scxml>"#,
        )
        .unwrap();
        let StateNode::Compound(p) = chart.node(&StatePath::from("p")).unwrap().as_ref() else {
            panic!("expected compound");
        };
        assert_eq!(p.initial.as_deref(), Some("b"));
    }

    #[test]
    fn initial_element_supplies_the_default_child() {
        let chart = StateChart::from_source(
            r#"<scxml initial="p">
                 <state id="p">
                   <initial><transition target="b"/></initial>
                   <state id="a"/>
                   <state id="b"/>
                 </state>
               </scxml>"#,
        )
        .unwrap();
        let StateNode::Compound(p) = chart.node(&StatePath::from("p")).unwrap().as_ref() else {
            panic!("expected compound");
        };
        assert_eq!(p.initial.as_deref(), Some("b"));
    }

    #[test]
    fn guarded_initial_transitions_are_rejected() {
        let err = StateChart::from_source(
            r#"<scxml initial="p">
                 <state id="p">
                   <initial><transition event="x" target="a"/></initial>
                   <state id="a"/>
                 </state>
               </scxml>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("eventless"));
    }

    #[test]
    fn initial_must_name_a_direct_child() {
        let err = StateChart::from_source(
            r#"<scxml initial="p">
                 <state id="p" initial="deep">
                   <state id="a">
                     <state id="deep"/>
                   </state>
                 </state>
               </scxml>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("direct child"));
    }

    #[test]
    fn transitions_in_final_states_are_rejected() {
        let err = StateChart::from_source(
            r#"<scxml initial="f">
                 <final id="f"><transition event="x" target="f"/></final>
               </scxml>"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ChartError::UnknownElement { ref element, ref parent }
                if element == "transition" && parent == "final"
        ));
    }

    #[test]
    fn parallel_requires_regions_and_forbids_history() {
        let err = StateChart::from_source(
            r#"<scxml initial="p"><parallel id="p"/></scxml>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no regions"));

        let err = StateChart::from_source(
            r#"<scxml initial="p">
                 <parallel id="p">
                   <history id="h"><transition target="r"/></history>
                   <state id="r"/>
                 </parallel>
               </scxml>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not allowed inside parallel"));
    }

    #[test]
    fn duplicate_sibling_ids_are_rejected() {
        let err = StateChart::from_source(
            r#"<scxml initial="a">
                 <state id="a"/>
                 <state id="a"/>
               </scxml>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate state path"));
    }

    #[test]
    fn shared_ids_in_different_branches_resolve_by_full_path() {
        let chart = StateChart::from_source(
            r#"<scxml initial="x">
                 <state id="x">
                   <state id="on"/>
                 </state>
                 <state id="y">
                   <state id="on"/>
                   <transition event="go" target="x.on"/>
                 </state>
               </scxml>"#,
        )
        .unwrap();
        let y = chart.node(&StatePath::from("y")).unwrap();
        assert_eq!(y.transitions()[0].targets, vec![StatePath::from("x.on")]);

        // A bare ambiguous id does not resolve.
        let err = StateChart::from_source(
            r#"<scxml initial="x">
                 <state id="x">
                   <state id="on"/>
                 </state>
                 <state id="y">
                   <state id="on"/>
                   <transition event="go" target="on"/>
                 </state>
               </scxml>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn if_chain_groups_branch_bodies() {
        let chart = StateChart::from_source(
            r#"<scxml initial="a">
                 <state id="a">
                   <onentry>
                     <if cond="x == 1">
                       <assign location="r" expr="'one'"/>
                     <elseif cond="x == 2"/>
                       <assign location="r" expr="'two'"/>
                     <else/>
                       <assign location="r" expr="'many'"/>
                     </if>
                   </onentry>
                 </state>
               </scxml>"#,
        )
        .unwrap();
        let a = chart.node(&StatePath::from("a")).unwrap();
        let Action::If(cond) = &a.common().on_entry[0] else {
            panic!("expected <if>");
        };
        assert_eq!(cond.branches.len(), 3);
        assert_eq!(cond.branches[0].cond.as_deref(), Some("x == 1"));
        assert_eq!(cond.branches[0].body.len(), 1);
        assert_eq!(cond.branches[1].cond.as_deref(), Some("x == 2"));
        assert_eq!(cond.branches[2].cond, None);
        assert_eq!(cond.branches[2].body.len(), 1);
    }

    #[test]
    fn data_declarations_keep_document_order() {
        let chart = StateChart::from_source(
            r#"<scxml initial="a">
                 <datamodel>
                   <data id="first" expr="1"/>
                 </datamodel>
                 <state id="a">
                   <datamodel>
                     <data id="second" expr="2"/>
                     <data id="third">42</data>
                   </datamodel>
                 </state>
               </scxml>"#,
        )
        .unwrap();
        let ids: Vec<&str> = chart.data_decls().iter().map(|(_, d)| d.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
        assert_eq!(chart.data_decls()[2].1.content.as_deref(), Some("42"));
    }

    #[test]
    fn transition_document_order_is_monotonic_in_source_order() {
        let chart = StateChart::from_source(
            r#"<scxml initial="a">
                 <state id="a">
                   <transition event="x" target="b"/>
                   <transition event="y" target="b"/>
                 </state>
                 <state id="b"/>
               </scxml>"#,
        )
        .unwrap();
        let a = chart.node(&StatePath::from("a")).unwrap();
        assert!(a.transitions()[0].document_order < a.transitions()[1].document_order);
    }

    #[test]
    fn malformed_xml_is_a_construction_error() {
        let err = StateChart::from_source("<scxml initial='a'><state id='a'>").unwrap_err();
        assert!(matches!(err, ChartError::Xml(_)));
    }
}
