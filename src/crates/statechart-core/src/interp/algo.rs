//! Transition selection and the exit/entry set algorithms.
//!
//! These are pure functions over the chart, the active configuration, and
//! the history store; the loop composes them into microsteps. The
//! contracts are strict about ordering:
//!
//! - **Selection** walks active states leaves-first (deepest configuration
//!   members first). The first enabled transition per state is that
//!   state's candidate; candidates whose exit sets intersect conflict, and
//!   the deeper source wins.
//! - **Exit sets** are deepest-first: largest segment count first, ties by
//!   reverse document order.
//! - **Entry sets** are shallowest-first; within a parallel expansion,
//!   regions enter in document order.
//!
//! The transition **domain** is the LCCA of source and targets, with one
//! carve-out: an `external` self-transition uses the source's parent, so
//! the source exits and re-enters. An `internal` transition to a
//! descendant keeps its source active.

use crate::chart::StateChart;
use crate::configuration::ActiveConfiguration;
use crate::datamodel::DataStore;
use crate::eval::ExpressionEvaluator;
use crate::event::Event;
use crate::node::{StateNode, Transition, TransitionKind};
use crate::path::StatePath;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A transition chosen for the current microstep.
#[derive(Debug, Clone)]
pub struct SelectedTransition {
    /// Path of the state the transition leaves from.
    pub source: StatePath,
    /// The transition node.
    pub transition: Arc<Transition>,
}

/// Select the enabled, optimally prioritised, pairwise non-conflicting
/// transition set for `event` (or for the eventless step when `event` is
/// `None`).
///
/// Guard failures are reported through `errors` as `error.execution`
/// events and treated as a false guard.
pub async fn select_transitions(
    config: &ActiveConfiguration,
    event: Option<&Event>,
    evaluator: &dyn ExpressionEvaluator,
    store: &DataStore,
    errors: &mut Vec<Event>,
) -> Vec<SelectedTransition> {
    let mut candidates: Vec<SelectedTransition> = Vec::new();

    for (path, node) in config.deepest_first() {
        for transition in node.transitions() {
            let descriptor_matches = match (event, &transition.event) {
                (None, None) => true,
                (Some(ev), Some(descriptor)) => ev.matches_descriptor(descriptor),
                _ => false,
            };
            if !descriptor_matches {
                continue;
            }
            let guard_passes = match &transition.cond {
                None => true,
                Some(expr) => match evaluator.evaluate_condition(expr, store).await {
                    Ok(b) => b,
                    Err(err) => {
                        errors.push(Event::error_execution(err, expr, "transition"));
                        false
                    }
                },
            };
            if guard_passes {
                candidates.push(SelectedTransition {
                    source: path.clone(),
                    transition: transition.clone(),
                });
                break;
            }
        }
    }

    // Resolve conflicts: candidates arrive deepest-source-first, so a kept
    // transition beats any later (shallower) one whose exit set overlaps.
    let mut selected: Vec<(SelectedTransition, HashSet<StatePath>)> = Vec::new();
    for candidate in candidates {
        let exit: HashSet<StatePath> =
            compute_exit_set(config, &candidate.transition).into_iter().collect();
        let conflicts = selected
            .iter()
            .any(|(_, kept)| !kept.is_disjoint(&exit));
        if !conflicts {
            selected.push((candidate, exit));
        }
    }

    let mut selected: Vec<SelectedTransition> = selected.into_iter().map(|(s, _)| s).collect();
    selected.sort_by_key(|s| s.transition.document_order);
    selected
}

/// The domain below which a transition exits and enters states.
pub fn transition_domain(transition: &Transition) -> StatePath {
    let source = &transition.source;
    let self_targeting =
        transition.targets.len() == 1 && transition.targets[0] == *source;
    if self_targeting && transition.kind == TransitionKind::External {
        return source.parent().unwrap_or_default();
    }
    let mut domain = source.clone();
    for target in &transition.targets {
        domain = domain.lcca(target);
    }
    domain
}

/// The states a transition exits: every active state strictly below the
/// domain that is not a strict ancestor of a target. Deepest-first.
///
/// A targetless transition exits nothing.
pub fn compute_exit_set(config: &ActiveConfiguration, transition: &Transition) -> Vec<StatePath> {
    if transition.targets.is_empty() {
        return Vec::new();
    }
    let domain = transition_domain(transition);
    config
        .deepest_first()
        .into_iter()
        .map(|(path, _)| path)
        .filter(|path| {
            domain.is_ancestor_of(path)
                && !transition.targets.iter().any(|t| path.is_ancestor_of(t))
        })
        .collect()
}

/// Union of the selected transitions' exit sets, re-sorted deepest-first.
pub fn combined_exit_set(
    config: &ActiveConfiguration,
    selected: &[SelectedTransition],
) -> Vec<StatePath> {
    let union: HashSet<StatePath> = selected
        .iter()
        .flat_map(|s| compute_exit_set(config, &s.transition))
        .collect();
    config
        .deepest_first()
        .into_iter()
        .map(|(path, _)| path)
        .filter(|path| union.contains(path))
        .collect()
}

/// The states a transition enters: every not-yet-active path from the
/// domain down to each target, with default completion applied after the
/// targets. Shallowest-first.
///
/// `config` is the configuration *after* the exit set has been removed.
pub fn compute_entry_set(
    chart: &StateChart,
    config: &ActiveConfiguration,
    transition: &Transition,
    history_values: &HashMap<StatePath, Vec<StatePath>>,
) -> Vec<StatePath> {
    let mut entry = Vec::new();
    if transition.targets.is_empty() {
        return entry;
    }
    let domain = transition_domain(transition);
    for target in &transition.targets {
        enter_target(chart, config, target, &domain, history_values, &mut entry);
    }
    entry.sort_by_key(StatePath::depth);
    entry
}

/// Union of the selected transitions' entry sets, shallowest-first, in
/// document order of the transitions.
pub fn combined_entry_set(
    chart: &StateChart,
    config: &ActiveConfiguration,
    selected: &[SelectedTransition],
    history_values: &HashMap<StatePath, Vec<StatePath>>,
) -> Vec<StatePath> {
    let mut entry = Vec::new();
    for sel in selected {
        if sel.transition.targets.is_empty() {
            continue;
        }
        let domain = transition_domain(&sel.transition);
        for target in &sel.transition.targets {
            enter_target(chart, config, target, &domain, history_values, &mut entry);
        }
    }
    entry.sort_by_key(StatePath::depth);
    entry
}

/// The startup entry set: the synthetic transition from nothing to the
/// chart's declared initial descendant.
pub fn startup_entry_set(
    chart: &StateChart,
    config: &ActiveConfiguration,
    history_values: &HashMap<StatePath, Vec<StatePath>>,
) -> Vec<StatePath> {
    let mut entry = Vec::new();
    enter_target(
        chart,
        config,
        chart.initial_target(),
        &StatePath::root(),
        history_values,
        &mut entry,
    );
    entry.sort_by_key(StatePath::depth);
    entry
}

/// Append the chain from `domain` down to `target` (resolving history
/// pseudo-states), then complete the target.
fn enter_target(
    chart: &StateChart,
    config: &ActiveConfiguration,
    target: &StatePath,
    domain: &StatePath,
    history_values: &HashMap<StatePath, Vec<StatePath>>,
    entry: &mut Vec<StatePath>,
) {
    for actual in expand_target(chart, history_values, target) {
        for path in actual.chain_from(domain) {
            if !config.contains(&path) && !entry.contains(&path) {
                entry.push(path);
            }
        }
        complete_into(chart, config, &actual, history_values, entry);
    }
}

/// Resolve a target that may be a history pseudo-state into the real
/// states to enter: the stored snapshot when one exists, the history's
/// default targets otherwise.
pub(crate) fn expand_target(
    chart: &StateChart,
    history_values: &HashMap<StatePath, Vec<StatePath>>,
    target: &StatePath,
) -> Vec<StatePath> {
    match chart.node(target).map(Arc::as_ref) {
        Some(StateNode::History(history)) => {
            if let Some(saved) = history_values.get(target) {
                if !saved.is_empty() {
                    return saved.clone();
                }
            }
            history.default_targets.clone()
        }
        _ => vec![target.clone()],
    }
}

/// Default completion: continue from a compound's resolved initial (or a
/// parallel's regions) until atomic/final states are reached.
fn complete_into(
    chart: &StateChart,
    config: &ActiveConfiguration,
    path: &StatePath,
    history_values: &HashMap<StatePath, Vec<StatePath>>,
    entry: &mut Vec<StatePath>,
) {
    let Some(node) = chart.node(path) else {
        return;
    };
    match node.as_ref() {
        StateNode::Compound(compound) => {
            let has_active_child = !config.children_of(path).is_empty();
            let has_scheduled_descendant = entry.iter().any(|p| path.is_ancestor_of(p));
            if has_active_child || has_scheduled_descendant {
                return;
            }
            if let Some(initial) = compound.resolved_initial() {
                let child = path.join(initial);
                enter_target(chart, config, &child, path, history_values, entry);
            }
        }
        StateNode::Parallel(parallel) => {
            for region in &parallel.regions {
                let region_path = path.join(region.id());
                if config.contains(&region_path) || entry.contains(&region_path) {
                    continue;
                }
                entry.push(region_path.clone());
                complete_into(chart, config, &region_path, history_values, entry);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::StateChart;
    use crate::eval::basic::BasicEvaluator;

    /// Enter every path (ancestors first) into a fresh configuration.
    fn activate(chart: &StateChart, paths: &[&str]) -> ActiveConfiguration {
        let mut config = ActiveConfiguration::new();
        for p in paths {
            let path = StatePath::from(*p);
            let node = chart.node(&path).unwrap_or_else(|| panic!("no node at '{p}'")).clone();
            config.enter(path, node);
        }
        config
    }

    fn first_transition(chart: &StateChart, path: &str) -> Arc<Transition> {
        chart
            .node(&StatePath::from(path))
            .unwrap()
            .transitions()
            .first()
            .expect("state has a transition")
            .clone()
    }

    fn game_chart() -> StateChart {
        StateChart::from_source(
            r#"
            <scxml initial="gameStart">
              <state id="gameStart">
                <transition event="start" target="playing"/>
              </state>
              <parallel id="playing">
                <state id="healthSystem">
                  <state id="healthy">
                    <transition event="die" target="gameOver"/>
                  </state>
                  <state id="processingDamage">
                    <state id="subState"/>
                  </state>
                </state>
                <state id="scoreSystem">
                  <state id="scoring"/>
                </state>
              </parallel>
              <final id="gameOver"/>
            </scxml>
            "#,
        )
        .unwrap()
    }

    #[test]
    fn entry_set_walks_every_intermediate_to_a_deep_target() {
        let chart = StateChart::from_source(
            r#"
            <scxml initial="gameStart">
              <state id="gameStart">
                <transition event="start"
                            target="playing.healthSystem.processingDamage.subState"/>
              </state>
              <state id="playing">
                <state id="healthSystem">
                  <state id="processingDamage">
                    <state id="subState"/>
                  </state>
                </state>
              </state>
            </scxml>
            "#,
        )
        .unwrap();
        let config = activate(&chart, &["gameStart"]);
        let transition = first_transition(&chart, "gameStart");

        // Exit the source first, as the microstep would.
        let mut post_exit = config.clone();
        post_exit.exit(&StatePath::from("gameStart"));

        let entry = compute_entry_set(&chart, &post_exit, &transition, &HashMap::new());
        let entry: Vec<&str> = entry.iter().map(StatePath::as_str).collect();
        assert_eq!(
            entry,
            vec![
                "playing",
                "playing.healthSystem",
                "playing.healthSystem.processingDamage",
                "playing.healthSystem.processingDamage.subState",
            ]
        );
    }

    #[test]
    fn exit_set_covers_all_active_parallel_branches_deepest_first() {
        let chart = game_chart();
        let config = activate(
            &chart,
            &[
                "playing",
                "playing.healthSystem",
                "playing.healthSystem.healthy",
                "playing.scoreSystem",
                "playing.scoreSystem.scoring",
            ],
        );
        let transition = first_transition(&chart, "playing.healthSystem.healthy");

        let exit = compute_exit_set(&config, &transition);
        let exit_strs: Vec<&str> = exit.iter().map(StatePath::as_str).collect();
        assert_eq!(exit.len(), 5, "all five active paths exit");
        assert_eq!(
            exit_strs,
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
    fn default_completion_expands_parallel_regions_in_document_order() {
        let chart = game_chart();
        let mut post_exit = activate(&chart, &["gameStart"]);
        post_exit.exit(&StatePath::from("gameStart"));
        let transition = first_transition(&chart, "gameStart");

        let entry = compute_entry_set(&chart, &post_exit, &transition, &HashMap::new());
        let entry: Vec<&str> = entry.iter().map(StatePath::as_str).collect();
        assert_eq!(
            entry,
            vec![
                "playing",
                "playing.healthSystem",
                "playing.scoreSystem",
                "playing.healthSystem.healthy",
                "playing.scoreSystem.scoring",
            ]
        );
    }

    fn self_transition_chart(kind: &str) -> (StateChart, ActiveConfiguration) {
        let chart = StateChart::from_source(&format!(
            r#"
            <scxml initial="outer">
              <state id="outer">
                <state id="inner"/>
                <transition event="again" target="outer" type="{kind}"/>
              </state>
            </scxml>
            "#
        ))
        .unwrap();
        let config = activate(&chart, &["outer", "outer.inner"]);
        (chart, config)
    }

    #[test]
    fn external_self_transition_exits_and_reenters_the_source() {
        let (chart, config) = self_transition_chart("external");
        let transition = first_transition(&chart, "outer");

        let exit = compute_exit_set(&config, &transition);
        let exit: Vec<&str> = exit.iter().map(StatePath::as_str).collect();
        assert_eq!(exit, vec!["outer.inner", "outer"]);

        let post_exit = ActiveConfiguration::new();
        let entry = compute_entry_set(&chart, &post_exit, &transition, &HashMap::new());
        let entry: Vec<&str> = entry.iter().map(StatePath::as_str).collect();
        assert_eq!(entry, vec!["outer", "outer.inner"]);
    }

    #[test]
    fn internal_self_transition_keeps_the_source_active() {
        let (chart, config) = self_transition_chart("internal");
        let transition = first_transition(&chart, "outer");

        let exit = compute_exit_set(&config, &transition);
        let exit: Vec<&str> = exit.iter().map(StatePath::as_str).collect();
        assert_eq!(exit, vec!["outer.inner"]);
    }

    #[tokio::test]
    async fn selection_prefers_the_deeper_source_on_conflict() {
        let chart = StateChart::from_source(
            r#"
            <scxml initial="outer">
              <state id="outer">
                <transition event="go" target="other"/>
                <state id="inner">
                  <transition event="go" target="sibling"/>
                </state>
                <state id="sibling"/>
              </state>
              <state id="other"/>
            </scxml>
            "#,
        )
        .unwrap();
        let config = activate(&chart, &["outer", "outer.inner"]);
        let store = DataStore::new();
        let mut errors = Vec::new();

        let selected = select_transitions(
            &config,
            Some(&Event::external("go")),
            &BasicEvaluator,
            &store,
            &mut errors,
        )
        .await;

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].source.as_str(), "outer.inner");
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn guard_failure_raises_error_and_disables_the_transition() {
        let chart = StateChart::from_source(
            r#"
            <scxml initial="a">
              <state id="a">
                <transition event="go" cond="no_such_var" target="b"/>
              </state>
              <state id="b"/>
            </scxml>
            "#,
        )
        .unwrap();
        let config = activate(&chart, &["a"]);
        let store = DataStore::new();
        let mut errors = Vec::new();

        let selected = select_transitions(
            &config,
            Some(&Event::external("go")),
            &BasicEvaluator,
            &store,
            &mut errors,
        )
        .await;

        assert!(selected.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].name, "error.execution");
    }

    #[tokio::test]
    async fn eventless_transitions_require_no_event() {
        let chart = StateChart::from_source(
            r#"
            <scxml initial="a">
              <state id="a">
                <transition target="b"/>
              </state>
              <state id="b"/>
            </scxml>
            "#,
        )
        .unwrap();
        let config = activate(&chart, &["a"]);
        let store = DataStore::new();
        let mut errors = Vec::new();

        let eventless =
            select_transitions(&config, None, &BasicEvaluator, &store, &mut errors).await;
        assert_eq!(eventless.len(), 1);

        let with_event = select_transitions(
            &config,
            Some(&Event::external("x")),
            &BasicEvaluator,
            &store,
            &mut errors,
        )
        .await;
        assert!(with_event.is_empty());
    }

    #[test]
    fn history_target_restores_snapshot_or_falls_back_to_default() {
        let chart = StateChart::from_source(
            r#"
            <scxml initial="off">
              <state id="off">
                <transition event="on" target="machine.memory"/>
              </state>
              <state id="machine">
                <history id="memory">
                  <transition target="machine.one"/>
                </history>
                <state id="one"/>
                <state id="two"/>
                <transition event="off" target="off"/>
              </state>
            </scxml>
            "#,
        )
        .unwrap();
        let transition = first_transition(&chart, "off");
        let empty = ActiveConfiguration::new();

        // No snapshot yet: the default target applies.
        let entry = compute_entry_set(&chart, &empty, &transition, &HashMap::new());
        let entry: Vec<&str> = entry.iter().map(StatePath::as_str).collect();
        assert_eq!(entry, vec!["machine", "machine.one"]);

        // With a snapshot, the saved configuration is restored.
        let mut history_values = HashMap::new();
        history_values.insert(
            StatePath::from("machine.memory"),
            vec![StatePath::from("machine.two")],
        );
        let entry = compute_entry_set(&chart, &empty, &transition, &history_values);
        let entry: Vec<&str> = entry.iter().map(StatePath::as_str).collect();
        assert_eq!(entry, vec!["machine", "machine.two"]);
    }
}
