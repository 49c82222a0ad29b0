//! Navigation request processor.
//!
//! One transition per request type, all validate-then-apply: the full set of
//! state changes is computed against a cloned snapshot, and only a
//! successful decision carries deltas out to the commit path. On any
//! `NavigationError` the caller's state is untouched.
//!
//! `decide` is deterministic and free of I/O; the session manager owns the
//! transactional boundary around it.

use serde::{Deserialize, Serialize};

use crate::core::error::NavigationError;
use crate::core::rollup;
use crate::core::rules::{self, ExitAction, PostAction, PreAction};
use crate::core::state::{
    ActivityState, ExitReason, SequencingSession, StateDelta, StateSnapshot,
};
use crate::core::tree::{ActivityId, ActivityTree};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavigationRequest {
    Start,
    Resume,
    Continue,
    Previous,
    Choice { target: String },
    Exit,
    ExitAll,
    Abandon,
    AbandonAll,
    SuspendAll { data: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NavigationResult {
    /// Deliver this activity to the learner.
    Deliver {
        activity_id: String,
        launch_data: Option<String>,
    },
    /// The current attempt chain ended; for `exit_all`-class reasons the
    /// session itself is terminated.
    Terminated { reason: ExitReason },
    /// Acknowledgement of `suspend_all`; the session sleeps, not dies.
    Suspended { activity_id: String },
}

/// A validated navigation decision: the caller-visible result plus every
/// state change it implies, ready for an all-or-nothing commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub result: NavigationResult,
    pub deltas: Vec<StateDelta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

pub fn decide(
    tree: &ActivityTree,
    session: &SequencingSession,
    snapshot: &StateSnapshot,
    request: &NavigationRequest,
) -> Result<Decision, NavigationError> {
    if session.is_terminated {
        return Err(NavigationError::SessionTerminated);
    }
    let mut ctx = Ctx {
        tree,
        session,
        working: snapshot.clone(),
        deltas: Vec::new(),
    };
    let result = match request {
        NavigationRequest::Start => ctx.start()?,
        NavigationRequest::Resume => ctx.resume()?,
        NavigationRequest::Continue => ctx.flow(Direction::Forward)?,
        NavigationRequest::Previous => ctx.flow(Direction::Backward)?,
        NavigationRequest::Choice { target } => ctx.choice(target)?,
        NavigationRequest::Exit => ctx.exit()?,
        NavigationRequest::ExitAll => ctx.exit_all()?,
        NavigationRequest::Abandon => ctx.abandon()?,
        NavigationRequest::AbandonAll => ctx.abandon_all()?,
        NavigationRequest::SuspendAll { data } => ctx.suspend_all(data.clone())?,
    };
    Ok(Decision {
        result,
        deltas: ctx.deltas,
    })
}

/// Request kinds that would be accepted right now. Derived by probing
/// `decide`, so it can never drift from the real legality checks.
pub fn legal_requests(
    tree: &ActivityTree,
    session: &SequencingSession,
    snapshot: &StateSnapshot,
) -> Vec<&'static str> {
    let probes: [(&'static str, NavigationRequest); 9] = [
        ("start", NavigationRequest::Start),
        ("resume", NavigationRequest::Resume),
        ("continue", NavigationRequest::Continue),
        ("previous", NavigationRequest::Previous),
        ("exit", NavigationRequest::Exit),
        ("exit_all", NavigationRequest::ExitAll),
        ("abandon", NavigationRequest::Abandon),
        ("abandon_all", NavigationRequest::AbandonAll),
        ("suspend_all", NavigationRequest::SuspendAll { data: None }),
    ];
    let mut out = Vec::new();
    for (name, request) in probes {
        if decide(tree, session, snapshot, &request).is_ok() {
            out.push(name);
        }
    }
    let any_choosable = tree.pre_order_leaves(tree.root()).any(|leaf| {
        let request = NavigationRequest::Choice {
            target: tree.node(leaf).id.clone(),
        };
        decide(tree, session, snapshot, &request).is_ok()
    });
    if any_choosable {
        out.push("choice");
    }
    out
}

struct Ctx<'a> {
    tree: &'a ActivityTree,
    session: &'a SequencingSession,
    working: StateSnapshot,
    deltas: Vec<StateDelta>,
}

impl<'a> Ctx<'a> {
    fn state(&self, aid: ActivityId) -> ActivityState {
        self.working.get(&self.tree.node(aid).id)
    }

    fn put(&mut self, aid: ActivityId, state: ActivityState) {
        let id = self.tree.node(aid).id.clone();
        self.working.put(&id, state.clone());
        self.deltas.push(StateDelta::PutActivity {
            activity_id: id,
            state,
        });
    }

    fn rollup_from(&mut self, aid: ActivityId) {
        let changed = rollup::propagate(self.tree, &mut self.working, aid);
        for id in changed {
            let state = self.working.get(&id);
            self.deltas.push(StateDelta::PutActivity {
                activity_id: id,
                state,
            });
        }
    }

    fn current(&self) -> Result<ActivityId, NavigationError> {
        let id = self
            .session
            .current_activity_id
            .as_deref()
            .ok_or(NavigationError::NoCurrentActivity)?;
        self.tree
            .get(id)
            .ok_or_else(|| NavigationError::UnknownActivity(id.to_string()))
    }

    /// Pre-condition verdict for flow traversal: skipped or disabled nodes
    /// (and their subtrees) are not deliverable.
    fn flow_blocked(&self, aid: ActivityId) -> bool {
        let node = self.tree.node(aid);
        matches!(
            rules::pre_condition(&node.pre_condition_rules, &self.state(aid)),
            Some(PreAction::Skip) | Some(PreAction::Disabled)
        )
    }

    /// Pre-condition verdict for choice: anything flagged at all is not a
    /// legal choice target.
    fn choice_hidden(&self, aid: ActivityId) -> bool {
        let node = self.tree.node(aid);
        rules::pre_condition(&node.pre_condition_rules, &self.state(aid)).is_some()
    }

    fn leaf_available(&self, leaf: ActivityId) -> bool {
        if self.flow_blocked(leaf) {
            return false;
        }
        self.tree
            .ancestors(leaf)
            .iter()
            .all(|&a| !self.flow_blocked(a))
    }

    fn first_deliverable(&self, from: ActivityId) -> Option<ActivityId> {
        if self.flow_blocked(from) {
            return None;
        }
        let node = self.tree.node(from);
        if node.leaf {
            return Some(from);
        }
        node.children
            .iter()
            .find_map(|&child| self.first_deliverable(child))
    }

    /// Nearest available leaf before/after `from` in document order.
    fn neighbor_leaf(&self, from: ActivityId, dir: Direction) -> Option<ActivityId> {
        let all: Vec<ActivityId> = self.tree.pre_order_leaves(self.tree.root()).collect();
        let idx = all.iter().position(|&a| a == from)?;
        match dir {
            Direction::Forward => all[idx + 1..]
                .iter()
                .copied()
                .find(|&a| self.leaf_available(a)),
            Direction::Backward => all[..idx]
                .iter()
                .rev()
                .copied()
                .find(|&a| self.leaf_available(a)),
        }
    }

    fn limit_exceeded(&self, aid: ActivityId) -> Option<ExitReason> {
        let limits = &self.tree.node(aid).limit_conditions;
        let st = self.state(aid);
        if let Some(max) = limits.attempt_limit {
            if st.attempt_count >= max {
                return Some(ExitReason::AttemptLimitExceeded);
            }
        }
        if let Some(max) = limits.attempt_absolute_duration_limit_secs {
            if st.attempt_duration_secs >= max {
                return Some(ExitReason::DurationLimitExceeded);
            }
        }
        None
    }

    fn end_attempt(&mut self, aid: ActivityId) {
        let mut st = self.state(aid);
        if st.attempt_active {
            st.close_attempt();
            self.put(aid, st);
        }
    }

    /// Unconditional session termination. Limit breaches route here too:
    /// they are committed transitions, not errors.
    fn force_terminate(&mut self, reason: ExitReason) -> NavigationResult {
        if let Ok(cur) = self.current() {
            self.end_attempt(cur);
        }
        self.deltas.push(StateDelta::SetCurrent { activity_id: None });
        self.deltas.push(StateDelta::SetSuspended {
            activity_id: None,
            data: None,
        });
        self.deltas.push(StateDelta::SetTerminated { reason });
        NavigationResult::Terminated { reason }
    }

    /// Opens a new attempt on `aid` and makes it current. A limit breach on
    /// the target converts the whole request into a forced termination.
    fn deliver(&mut self, aid: ActivityId, launch_override: Option<String>) -> NavigationResult {
        if let Some(reason) = self.limit_exceeded(aid) {
            return self.force_terminate(reason);
        }
        let mut st = self.state(aid);
        st.begin_new_attempt();
        self.put(aid, st);
        self.rollup_from(aid);
        let node = self.tree.node(aid);
        self.deltas.push(StateDelta::SetCurrent {
            activity_id: Some(node.id.clone()),
        });
        NavigationResult::Deliver {
            activity_id: node.id.clone(),
            launch_data: launch_override.or_else(|| node.launch_data.clone()),
        }
    }

    /// Rule-forced retry: fresh attempt on the same activity. Limit checks
    /// take priority over the rule.
    fn retry(&mut self, aid: ActivityId) -> NavigationResult {
        if let Some(reason) = self.limit_exceeded(aid) {
            return self.force_terminate(reason);
        }
        let mut st = self.state(aid);
        st.close_attempt();
        st.reset_for_retry();
        self.put(aid, st);
        self.deliver(aid, None)
    }

    fn start(&mut self) -> Result<NavigationResult, NavigationError> {
        if self.session.current_activity_id.is_some()
            || self.session.suspended_activity_id.is_some()
        {
            return Err(NavigationError::AlreadyStarted);
        }
        let leaf = self
            .first_deliverable(self.tree.root())
            .ok_or(NavigationError::NothingToDeliver)?;
        Ok(self.deliver(leaf, None))
    }

    fn resume(&mut self) -> Result<NavigationResult, NavigationError> {
        if self.session.current_activity_id.is_some() {
            return Err(NavigationError::AlreadyStarted);
        }
        let suspended = self
            .session
            .suspended_activity_id
            .as_deref()
            .ok_or(NavigationError::NoSuspendedActivity)?;
        let aid = self
            .tree
            .get(suspended)
            .ok_or_else(|| NavigationError::UnknownActivity(suspended.to_string()))?;

        // Same attempt picks back up; no count increment.
        let mut st = self.state(aid);
        st.attempt_active = true;
        self.put(aid, st);
        self.deltas.push(StateDelta::SetSuspended {
            activity_id: None,
            data: None,
        });
        let node = self.tree.node(aid);
        self.deltas.push(StateDelta::SetCurrent {
            activity_id: Some(node.id.clone()),
        });
        Ok(NavigationResult::Deliver {
            activity_id: node.id.clone(),
            launch_data: self
                .session
                .suspended_data
                .clone()
                .or_else(|| node.launch_data.clone()),
        })
    }

    fn flow(&mut self, dir: Direction) -> Result<NavigationResult, NavigationError> {
        let cur = self.current()?;
        let cur_id = self.tree.node(cur).id.clone();
        if let Some(parent) = self.tree.parent(cur) {
            if !self.tree.node(parent).control_mode.flow {
                return Err(NavigationError::FlowNotAllowed(cur_id));
            }
        }

        // Exit-condition rules run before any movement; a forced retry
        // re-enters the attempt instead of advancing.
        let node = self.tree.node(cur);
        if rules::exit_condition(&node.exit_condition_rules, &self.state(cur))
            == Some(ExitAction::Retry)
        {
            return Ok(self.retry(cur));
        }

        let target = self.neighbor_leaf(cur, dir);
        if dir == Direction::Backward {
            if let Some(t) = target {
                // Backward movement happens among the descendants of the
                // common ancestor; any forward-only cluster on the way up
                // from the current activity bars it.
                let common = self.tree.common_ancestor(cur, t);
                for a in self.tree.ancestors(cur) {
                    if self.tree.node(a).control_mode.forward_only {
                        return Err(NavigationError::PreviousNotAllowed(cur_id));
                    }
                    if a == common {
                        break;
                    }
                }
            }
        }

        match target {
            Some(t) => {
                self.end_attempt(cur);
                Ok(self.deliver(t, None))
            }
            None => {
                // Bubbled past the root: exit-all semantics.
                Ok(self.force_terminate(ExitReason::CourseExhausted))
            }
        }
    }

    fn choice(&mut self, target_id: &str) -> Result<NavigationResult, NavigationError> {
        let target = self
            .tree
            .get(target_id)
            .ok_or_else(|| NavigationError::UnknownActivity(target_id.to_string()))?;

        for a in self.tree.ancestors(target) {
            if !self.tree.node(a).control_mode.choice {
                return Err(NavigationError::ChoiceNotAllowed(target_id.to_string()));
            }
            if self.choice_hidden(a) {
                return Err(NavigationError::ChoiceNotAllowed(target_id.to_string()));
            }
        }
        if self.choice_hidden(target) {
            return Err(NavigationError::ChoiceNotAllowed(target_id.to_string()));
        }

        // Leaving the current cluster chain must be allowed by choice_exit.
        // Re-choosing the current activity leaves no cluster at all.
        if let Ok(cur) = self.current() {
            let common = self.tree.common_ancestor(cur, target);
            if common != cur {
                for a in self.tree.ancestors(cur) {
                    if a == common {
                        break;
                    }
                    if !self.tree.node(a).control_mode.choice_exit {
                        return Err(NavigationError::ChoiceNotAllowed(target_id.to_string()));
                    }
                }
            }
        }

        let leaf = if self.tree.is_leaf(target) {
            target
        } else {
            self.first_deliverable(target)
                .ok_or(NavigationError::NothingToDeliver)?
        };

        if let Ok(cur) = self.current() {
            let node = self.tree.node(cur);
            if rules::exit_condition(&node.exit_condition_rules, &self.state(cur))
                == Some(ExitAction::Retry)
            {
                return Ok(self.retry(cur));
            }
            self.end_attempt(cur);
            // Post-condition rules run as the attempt ends; an exit-all
            // action overrides the chosen target, other actions are
            // superseded by the explicit choice.
            if rules::post_condition(&node.post_condition_rules, &self.state(cur))
                == Some(PostAction::ExitAll)
            {
                return Ok(self.force_terminate(ExitReason::PostCondition));
            }
        }
        Ok(self.deliver(leaf, None))
    }

    fn exit(&mut self) -> Result<NavigationResult, NavigationError> {
        let cur = self.current()?;
        let node = self.tree.node(cur);
        if rules::exit_condition(&node.exit_condition_rules, &self.state(cur))
            == Some(ExitAction::Retry)
        {
            return Ok(self.retry(cur));
        }
        self.end_attempt(cur);

        // Post-condition walk; ExitParent re-evaluates one level up,
        // bounded by tree depth.
        let mut level = cur;
        loop {
            let level_node = self.tree.node(level);
            match rules::post_condition(&level_node.post_condition_rules, &self.state(level)) {
                Some(PostAction::Retry) => {
                    let target = if self.tree.is_leaf(level) {
                        Some(level)
                    } else {
                        self.first_deliverable(level)
                    };
                    return Ok(match target {
                        Some(t) if t == level => self.retry(level),
                        Some(t) => self.deliver(t, None),
                        None => self.default_exit(),
                    });
                }
                Some(PostAction::ExitAll) => {
                    return Ok(self.force_terminate(ExitReason::PostCondition));
                }
                Some(PostAction::Continue) => {
                    return Ok(match self.neighbor_leaf(cur, Direction::Forward) {
                        Some(t) => self.deliver(t, None),
                        None => self.force_terminate(ExitReason::CourseExhausted),
                    });
                }
                Some(PostAction::Previous) => {
                    let target = self.neighbor_leaf(cur, Direction::Backward).filter(|&t| {
                        let common = self.tree.common_ancestor(cur, t);
                        let mut allowed = true;
                        for a in self.tree.ancestors(cur) {
                            if self.tree.node(a).control_mode.forward_only {
                                allowed = false;
                            }
                            if a == common {
                                break;
                            }
                        }
                        allowed
                    });
                    return Ok(match target {
                        Some(t) => self.deliver(t, None),
                        None => self.default_exit(),
                    });
                }
                Some(PostAction::ExitParent) => match self.tree.parent(level) {
                    Some(parent) => {
                        level = parent;
                    }
                    None => return Ok(self.default_exit()),
                },
                None => return Ok(self.default_exit()),
            }
        }
    }

    /// Control returns to the parent: no current activity, session stays
    /// live so a later choice can re-enter.
    fn default_exit(&mut self) -> NavigationResult {
        self.deltas.push(StateDelta::SetCurrent { activity_id: None });
        NavigationResult::Terminated {
            reason: ExitReason::Exit,
        }
    }

    fn exit_all(&mut self) -> Result<NavigationResult, NavigationError> {
        // Exit-condition rules still apply; only abandon variants skip them.
        if let Ok(cur) = self.current() {
            let node = self.tree.node(cur);
            if rules::exit_condition(&node.exit_condition_rules, &self.state(cur))
                == Some(ExitAction::Retry)
            {
                return Ok(self.retry(cur));
            }
            self.end_attempt(cur);
        }
        Ok(self.force_terminate(ExitReason::ExitAll))
    }

    fn abandon(&mut self) -> Result<NavigationResult, NavigationError> {
        // Raw termination of the attempt: no exit/post rule evaluation.
        let cur = self.current()?;
        self.end_attempt(cur);
        self.deltas.push(StateDelta::SetCurrent { activity_id: None });
        Ok(NavigationResult::Terminated {
            reason: ExitReason::Abandon,
        })
    }

    fn abandon_all(&mut self) -> Result<NavigationResult, NavigationError> {
        if let Ok(cur) = self.current() {
            self.end_attempt(cur);
        }
        Ok(self.force_terminate(ExitReason::AbandonAll))
    }

    fn suspend_all(&mut self, data: Option<String>) -> Result<NavigationResult, NavigationError> {
        let cur = self.current()?;
        let mut st = self.state(cur);
        st.attempt_active = false;
        self.put(cur, st);
        let id = self.tree.node(cur).id.clone();
        self.deltas.push(StateDelta::SetSuspended {
            activity_id: Some(id.clone()),
            data,
        });
        self.deltas.push(StateDelta::SetCurrent { activity_id: None });
        Ok(NavigationResult::Suspended { activity_id: id })
    }
}
