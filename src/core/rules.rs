//! Sequencing rule evaluator.
//!
//! Rule sets exist at three evaluation points: pre-condition (is the
//! activity a legal candidate), exit-condition (may the learner leave, or is
//! a retry forced), post-condition (automatic action after an attempt ends).
//! Every set shares one interpreter: rules are scanned in document order and
//! the first rule whose condition set holds decides the action. No match
//! means the evaluation point's default applies (candidate allowed / exit
//! allowed / no automatic action).

use serde::{Deserialize, Serialize};

use crate::core::state::{ActivityState, CompletionStatus, SuccessStatus};

/// One testable predicate over an activity's attempt state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionKind {
    Always,
    AttemptCountAtLeast { count: u32 },
    CompletionIs { status: CompletionStatus },
    SuccessIs { status: SuccessStatus },
    ObjectiveSatisfied { objective: String },
    ProgressAtLeast { measure: f64 },
    AttemptDurationAtLeast { secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(flatten)]
    pub kind: ConditionKind,
    #[serde(default)]
    pub negated: bool,
}

impl Condition {
    pub fn holds(&self, state: &ActivityState) -> bool {
        let value = match &self.kind {
            ConditionKind::Always => true,
            ConditionKind::AttemptCountAtLeast { count } => state.attempt_count >= *count,
            ConditionKind::CompletionIs { status } => state.completion == *status,
            ConditionKind::SuccessIs { status } => state.success == *status,
            ConditionKind::ObjectiveSatisfied { objective } => {
                state.objectives.get(objective).copied().unwrap_or(false)
            }
            ConditionKind::ProgressAtLeast { measure } => state.progress_measure >= *measure,
            ConditionKind::AttemptDurationAtLeast { secs } => {
                state.attempt_duration_secs >= *secs
            }
        };
        value != self.negated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combination {
    #[default]
    And,
    Or,
}

/// One sequencing rule: a condition set, a combination operator, and the
/// action taken when the set holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule<A> {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub combine: Combination,
    pub action: A,
}

fn condition_set_holds(conditions: &[Condition], combine: Combination, state: &ActivityState) -> bool {
    // An empty condition set always matches; authors use it as "always".
    if conditions.is_empty() {
        return true;
    }
    match combine {
        Combination::And => conditions.iter().all(|c| c.holds(state)),
        Combination::Or => conditions.iter().any(|c| c.holds(state)),
    }
}

/// First-match-wins scan: the first rule whose condition set evaluates true
/// determines the action; later rules in the set are never consulted.
pub fn first_match<'a, A>(rules: &'a [Rule<A>], state: &ActivityState) -> Option<&'a A> {
    rules
        .iter()
        .find(|rule| condition_set_holds(&rule.conditions, rule.combine, state))
        .map(|rule| &rule.action)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreAction {
    /// Excluded from flow traversal and from choice.
    Skip,
    /// Present in the tree but not deliverable.
    Disabled,
    /// Legal for flow, invisible to choice.
    HiddenFromChoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitAction {
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostAction {
    ExitParent,
    ExitAll,
    Retry,
    Continue,
    Previous,
}

pub fn pre_condition(rules: &[Rule<PreAction>], state: &ActivityState) -> Option<PreAction> {
    first_match(rules, state).copied()
}

pub fn exit_condition(rules: &[Rule<ExitAction>], state: &ActivityState) -> Option<ExitAction> {
    first_match(rules, state).copied()
}

pub fn post_condition(rules: &[Rule<PostAction>], state: &ActivityState) -> Option<PostAction> {
    first_match(rules, state).copied()
}
