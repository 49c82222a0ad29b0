//! Per-session, per-activity attempt state and the delta vocabulary used by
//! the transactional commit path.
//!
//! Rows are created lazily: reading state for an activity that has never
//! been visited yields `ActivityState::default()`. Mutation happens only
//! through a committed delta list; cluster statuses are always recomputed by
//! rollup, never hand-set.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::error::CoursewalkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    NotAttempted,
    Incomplete,
    Completed,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::NotAttempted => "not_attempted",
            CompletionStatus::Incomplete => "incomplete",
            CompletionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_attempted" => Some(CompletionStatus::NotAttempted),
            "incomplete" => Some(CompletionStatus::Incomplete),
            "completed" => Some(CompletionStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessStatus {
    Unknown,
    Passed,
    Failed,
}

impl SuccessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuccessStatus::Unknown => "unknown",
            SuccessStatus::Passed => "passed",
            SuccessStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(SuccessStatus::Unknown),
            "passed" => Some(SuccessStatus::Passed),
            "failed" => Some(SuccessStatus::Failed),
            _ => None,
        }
    }
}

/// Why a session (or the current attempt chain) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Exit,
    ExitAll,
    Abandon,
    AbandonAll,
    CourseExhausted,
    AttemptLimitExceeded,
    DurationLimitExceeded,
    PostCondition,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Exit => "exit",
            ExitReason::ExitAll => "exit_all",
            ExitReason::Abandon => "abandon",
            ExitReason::AbandonAll => "abandon_all",
            ExitReason::CourseExhausted => "course_exhausted",
            ExitReason::AttemptLimitExceeded => "attempt_limit_exceeded",
            ExitReason::DurationLimitExceeded => "duration_limit_exceeded",
            ExitReason::PostCondition => "post_condition",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exit" => Some(ExitReason::Exit),
            "exit_all" => Some(ExitReason::ExitAll),
            "abandon" => Some(ExitReason::Abandon),
            "abandon_all" => Some(ExitReason::AbandonAll),
            "course_exhausted" => Some(ExitReason::CourseExhausted),
            "attempt_limit_exceeded" => Some(ExitReason::AttemptLimitExceeded),
            "duration_limit_exceeded" => Some(ExitReason::DurationLimitExceeded),
            "post_condition" => Some(ExitReason::PostCondition),
            _ => None,
        }
    }
}

/// One learner's attempt context for one course.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequencingSession {
    pub session_id: String,
    pub course_id: String,
    pub course_version: i64,
    pub learner_id: String,
    pub current_activity_id: Option<String>,
    pub suspended_activity_id: Option<String>,
    pub suspended_data: Option<String>,
    pub is_terminated: bool,
    pub exit_reason: Option<ExitReason>,
}

/// Attempt state for one `(session, activity)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityState {
    pub attempt_count: u32,
    pub attempt_active: bool,
    pub completion: CompletionStatus,
    pub success: SuccessStatus,
    pub progress_measure: f64,
    pub objectives: BTreeMap<String, bool>,
    pub attempt_duration_secs: u64,
}

impl Default for ActivityState {
    fn default() -> Self {
        Self {
            attempt_count: 0,
            attempt_active: false,
            completion: CompletionStatus::NotAttempted,
            success: SuccessStatus::Unknown,
            progress_measure: 0.0,
            objectives: BTreeMap::new(),
            attempt_duration_secs: 0,
        }
    }
}

impl ActivityState {
    pub fn attempted(&self) -> bool {
        self.attempt_count > 0 || self.completion != CompletionStatus::NotAttempted
    }

    /// Opens a fresh attempt. Historic status (success, progress) carries
    /// over; attempt-scoped duration resets.
    pub fn begin_new_attempt(&mut self) {
        self.attempt_count += 1;
        self.attempt_active = true;
        self.attempt_duration_secs = 0;
        if self.completion == CompletionStatus::NotAttempted {
            self.completion = CompletionStatus::Incomplete;
        }
    }

    /// Wipes attempt-scoped status ahead of a rule-forced retry.
    pub fn reset_for_retry(&mut self) {
        self.completion = CompletionStatus::Incomplete;
        self.success = SuccessStatus::Unknown;
        self.progress_measure = 0.0;
        self.attempt_duration_secs = 0;
    }

    pub fn close_attempt(&mut self) {
        self.attempt_active = false;
    }
}

/// A single state change produced by the navigation processor. A navigation
/// request yields a list of these, committed all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum StateDelta {
    PutActivity {
        activity_id: String,
        state: ActivityState,
    },
    SetCurrent {
        activity_id: Option<String>,
    },
    SetSuspended {
        activity_id: Option<String>,
        data: Option<String>,
    },
    SetTerminated {
        reason: ExitReason,
    },
}

/// In-memory view of all activity state rows for one session. The
/// navigation processor works against a cloned snapshot so a rejected
/// request leaves nothing behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    states: BTreeMap<String, ActivityState>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(conn: &Connection, session_id: &str) -> Result<Self, CoursewalkError> {
        let mut stmt = conn.prepare(
            "SELECT activity_id, attempt_count, attempt_active, completion_status,
                    success_status, progress_measure, objectives_json, attempt_duration_secs
             FROM activity_state WHERE session_id = ?1",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let activity_id: String = row.get(0)?;
            let attempt_count: u32 = row.get(1)?;
            let attempt_active: bool = row.get(2)?;
            let completion: String = row.get(3)?;
            let success: String = row.get(4)?;
            let progress_measure: f64 = row.get(5)?;
            let objectives_json: String = row.get(6)?;
            // Stored as i64; SQLite has no unsigned 64-bit column affinity.
            let attempt_duration_secs: i64 = row.get(7)?;
            Ok((
                activity_id,
                attempt_count,
                attempt_active,
                completion,
                success,
                progress_measure,
                objectives_json,
                attempt_duration_secs,
            ))
        })?;

        let mut states = BTreeMap::new();
        for row in rows {
            let (id, count, active, completion, success, progress, objectives_json, duration) =
                row?;
            let state = ActivityState {
                attempt_count: count,
                attempt_active: active,
                completion: CompletionStatus::parse(&completion)
                    .unwrap_or(CompletionStatus::NotAttempted),
                success: SuccessStatus::parse(&success).unwrap_or(SuccessStatus::Unknown),
                progress_measure: progress,
                objectives: serde_json::from_str(&objectives_json).unwrap_or_default(),
                attempt_duration_secs: duration as u64,
            };
            states.insert(id, state);
        }
        Ok(Self { states })
    }

    /// State for an activity; a never-visited activity reads as default.
    pub fn get(&self, activity_id: &str) -> ActivityState {
        self.states.get(activity_id).cloned().unwrap_or_default()
    }

    pub fn put(&mut self, activity_id: &str, state: ActivityState) {
        self.states.insert(activity_id.to_string(), state);
    }

    pub fn visited(&self) -> impl Iterator<Item = (&String, &ActivityState)> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
