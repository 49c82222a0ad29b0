//! Rollup engine: propagates completion and satisfaction status from
//! children to ancestors.
//!
//! Runs bottom-up over the ancestor chain of a changed leaf and terminates
//! at the root. Explicit rollup rules on a cluster are scanned in document
//! order, first match wins (same semantics as the sequencing rule
//! evaluator); when none match, the default all-of rollup applies.
//! Recomputation is idempotent: the cluster state is a pure function of the
//! children's states.

use serde::{Deserialize, Serialize};

use crate::core::rules::{self, PreAction};
use crate::core::state::{ActivityState, CompletionStatus, StateSnapshot, SuccessStatus};
use crate::core::tree::{ActivityId, ActivityTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupAspect {
    Completion,
    Satisfaction,
}

/// Predicate tested against each contributing child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChildCondition {
    Completed,
    Attempted,
    Satisfied,
    ObjectiveSatisfied { objective: String },
    ProgressAtLeast { measure: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupMinimum {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupOutcome {
    Completed,
    Incomplete,
    NotAttempted,
    Passed,
    Failed,
    Unknown,
}

/// Explicit rollup rule on a cluster. The outcome must match the aspect;
/// the tree builder rejects incoherent rules at publish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRule {
    pub aspect: RollupAspect,
    #[serde(default)]
    pub minimum: RollupMinimum,
    pub child_condition: ChildCondition,
    #[serde(default)]
    pub negated: bool,
    pub outcome: RollupOutcome,
}

fn child_meets(rule: &RollupRule, state: &ActivityState) -> bool {
    let value = match &rule.child_condition {
        ChildCondition::Completed => state.completion == CompletionStatus::Completed,
        ChildCondition::Attempted => state.attempted(),
        ChildCondition::Satisfied => state.success == SuccessStatus::Passed,
        ChildCondition::ObjectiveSatisfied { objective } => {
            state.objectives.get(objective).copied().unwrap_or(false)
        }
        ChildCondition::ProgressAtLeast { measure } => state.progress_measure >= *measure,
    };
    value != rule.negated
}

fn eval_explicit(
    rules: &[RollupRule],
    aspect: RollupAspect,
    children: &[ActivityState],
) -> Option<RollupOutcome> {
    for rule in rules.iter().filter(|r| r.aspect == aspect) {
        let hits = children.iter().filter(|s| child_meets(rule, s)).count();
        let met = match rule.minimum {
            RollupMinimum::All => !children.is_empty() && hits == children.len(),
            RollupMinimum::Any => hits >= 1,
        };
        if met {
            return Some(rule.outcome);
        }
    }
    None
}

fn default_completion(children: &[ActivityState]) -> CompletionStatus {
    if !children.is_empty()
        && children
            .iter()
            .all(|s| s.completion == CompletionStatus::Completed)
    {
        CompletionStatus::Completed
    } else if children.iter().any(|s| s.attempted()) {
        CompletionStatus::Incomplete
    } else {
        CompletionStatus::NotAttempted
    }
}

fn default_satisfaction(children: &[ActivityState]) -> SuccessStatus {
    if !children.is_empty()
        && children
            .iter()
            .all(|s| s.success == SuccessStatus::Passed)
    {
        SuccessStatus::Passed
    } else if children.iter().any(|s| s.success == SuccessStatus::Failed) {
        SuccessStatus::Failed
    } else {
        SuccessStatus::Unknown
    }
}

/// Recomputes one cluster's derived status from its non-skipped children.
/// Attempt bookkeeping on the cluster row is preserved untouched.
fn compute_cluster_state(
    tree: &ActivityTree,
    working: &StateSnapshot,
    cluster: ActivityId,
) -> ActivityState {
    let node = tree.node(cluster);
    let contributing: Vec<ActivityState> = node
        .children
        .iter()
        .filter(|&&child| {
            let child_node = tree.node(child);
            let child_state = working.get(&child_node.id);
            rules::pre_condition(&child_node.pre_condition_rules, &child_state)
                != Some(PreAction::Skip)
        })
        .map(|&child| working.get(&tree.node(child).id))
        .collect();

    let mut state = working.get(&node.id);

    state.completion = match eval_explicit(&node.rollup_rules, RollupAspect::Completion, &contributing)
    {
        Some(RollupOutcome::Completed) => CompletionStatus::Completed,
        Some(RollupOutcome::Incomplete) => CompletionStatus::Incomplete,
        Some(RollupOutcome::NotAttempted) => CompletionStatus::NotAttempted,
        _ => default_completion(&contributing),
    };
    state.success = match eval_explicit(&node.rollup_rules, RollupAspect::Satisfaction, &contributing)
    {
        Some(RollupOutcome::Passed) => SuccessStatus::Passed,
        Some(RollupOutcome::Failed) => SuccessStatus::Failed,
        Some(RollupOutcome::Unknown) => SuccessStatus::Unknown,
        _ => default_satisfaction(&contributing),
    };
    state.progress_measure = if contributing.is_empty() {
        0.0
    } else {
        contributing.iter().map(|s| s.progress_measure).sum::<f64>() / contributing.len() as f64
    };
    state
}

/// Propagates status changes from `from` up to the root, mutating the
/// working snapshot. Returns the ids of clusters whose state actually
/// changed, bottom-up; rerunning on an unchanged subtree returns nothing.
pub fn propagate(
    tree: &ActivityTree,
    working: &mut StateSnapshot,
    from: ActivityId,
) -> Vec<String> {
    let mut changed = Vec::new();
    let mut cursor = tree.parent(from);
    while let Some(cluster) = cursor {
        let recomputed = compute_cluster_state(tree, working, cluster);
        let id = &tree.node(cluster).id;
        if recomputed != working.get(id) {
            working.put(id, recomputed);
            changed.push(id.clone());
        }
        cursor = tree.parent(cluster);
    }
    changed
}
