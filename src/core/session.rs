//! Session manager: the transactional boundary around the pure navigation
//! processor.
//!
//! Each call loads the session row, the published tree, and the activity
//! state snapshot, runs the decision logic, and commits the resulting delta
//! list through the broker. A rejected request commits nothing; a committed
//! transition is mirrored to the LRS event log best-effort.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::broker::CommitBroker;
use crate::core::config::EngineConfig;
use crate::core::course;
use crate::core::error::CoursewalkError;
use crate::core::lrs::LrsEmitter;
use crate::core::nav::{self, NavigationRequest, NavigationResult};
use crate::core::rollup;
use crate::core::state::{
    ActivityState, CompletionStatus, ExitReason, SequencingSession, StateDelta, StateSnapshot,
    SuccessStatus,
};
use crate::core::store::Store;
use crate::core::time;
use crate::core::tree::ActivityTree;

/// Learner-reported outcome for one leaf activity, as handed over by the
/// runtime-API collaborator at commit points.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultReport {
    pub activity_id: String,
    #[serde(default)]
    pub completion: Option<CompletionStatus>,
    #[serde(default)]
    pub success: Option<SuccessStatus>,
    #[serde(default)]
    pub progress_measure: Option<f64>,
    #[serde(default)]
    pub objectives: BTreeMap<String, bool>,
    #[serde(default)]
    pub duration_delta_secs: u64,
}

/// Read-only view of a session for callers and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session: SequencingSession,
    pub activities: BTreeMap<String, ActivityState>,
    pub legal_requests: Vec<String>,
}

pub struct SessionManager {
    store: Store,
    config: EngineConfig,
    broker: CommitBroker,
    lrs: LrsEmitter,
}

impl SessionManager {
    pub fn open(store: Store, config: EngineConfig) -> Self {
        let broker = CommitBroker::new(&store.root);
        let lrs = LrsEmitter::new(store.lrs_log_path(&config.lrs_log_file));
        Self {
            store,
            config,
            broker,
            lrs,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Creates a session bound to a specific published course version.
    /// `version: None` pins the latest version at creation time.
    pub fn create_session(
        &self,
        course_id: &str,
        version: Option<i64>,
        learner_id: &str,
    ) -> Result<SequencingSession, CoursewalkError> {
        let db_path = self.store.db_path();
        self.broker
            .with_conn(&db_path, None, "create_session", |conn| {
                let version = match version {
                    Some(v) => {
                        // Verify the pinned version exists.
                        course::load_tree(conn, course_id, v)?;
                        v
                    }
                    None => course::latest_version(conn, course_id)?,
                };
                let session = SequencingSession {
                    session_id: time::new_event_id(),
                    course_id: course_id.to_string(),
                    course_version: version,
                    learner_id: learner_id.to_string(),
                    current_activity_id: None,
                    suspended_activity_id: None,
                    suspended_data: None,
                    is_terminated: false,
                    exit_reason: None,
                };
                let now = time::now_epoch_z();
                conn.execute(
                    "INSERT INTO sessions (
                        session_id, course_id, course_version, learner_id,
                        current_activity_id, suspended_activity_id, suspended_data,
                        is_terminated, exit_reason, created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, NULL, NULL, NULL, 0, NULL, ?5, ?5)",
                    params![
                        session.session_id,
                        session.course_id,
                        session.course_version,
                        session.learner_id,
                        now
                    ],
                )?;
                Ok(session)
            })
    }

    pub fn get_session(&self, session_id: &str) -> Result<SequencingSession, CoursewalkError> {
        let db_path = self.store.db_path();
        self.broker
            .with_conn(&db_path, Some(session_id), "get_session", |conn| {
                load_session_row(conn, session_id)
            })
    }

    /// Processes one navigation request. Validation failures surface as
    /// `Navigation` errors with no state written; accepted requests are
    /// committed atomically before the result is returned.
    pub fn navigate(
        &self,
        session_id: &str,
        request: &NavigationRequest,
    ) -> Result<NavigationResult, CoursewalkError> {
        let (session, tree, snapshot) = self.load_context(session_id)?;
        let decision = nav::decide(&tree, &session, &snapshot, request)?;
        self.commit_with_retry(session_id, &decision.deltas)?;

        let (verb, activity_id) = match &decision.result {
            NavigationResult::Deliver { activity_id, .. } => {
                ("delivered", Some(activity_id.as_str()))
            }
            NavigationResult::Terminated { reason } => match reason {
                ExitReason::Abandon | ExitReason::AbandonAll => ("abandoned", None),
                _ => ("terminated", None),
            },
            NavigationResult::Suspended { activity_id } => {
                ("suspended", Some(activity_id.as_str()))
            }
        };
        self.lrs.emit_best_effort(&LrsEmitter::event(
            session_id,
            &session.learner_id,
            activity_id,
            verb,
            None,
        ));
        Ok(decision.result)
    }

    /// Applies a learner-reported result to one leaf and rolls the change up
    /// the ancestor chain in the same commit.
    pub fn record_result(
        &self,
        session_id: &str,
        report: &ResultReport,
    ) -> Result<(), CoursewalkError> {
        let (session, tree, snapshot) = self.load_context(session_id)?;
        if session.is_terminated {
            return Err(CoursewalkError::Navigation(
                crate::core::error::NavigationError::SessionTerminated,
            ));
        }
        let aid = tree.get(&report.activity_id).ok_or_else(|| {
            CoursewalkError::Navigation(crate::core::error::NavigationError::UnknownActivity(
                report.activity_id.clone(),
            ))
        })?;
        if !tree.is_leaf(aid) {
            // Cluster status is derived; only leaves accept reported results.
            return Err(CoursewalkError::Navigation(
                crate::core::error::NavigationError::UnknownActivity(report.activity_id.clone()),
            ));
        }

        let mut working = snapshot;
        let mut state = working.get(&report.activity_id);
        if let Some(completion) = report.completion {
            state.completion = completion;
        }
        if let Some(success) = report.success {
            state.success = success;
        }
        if let Some(measure) = report.progress_measure {
            state.progress_measure = measure.clamp(0.0, 1.0);
        }
        for (objective, satisfied) in &report.objectives {
            state.objectives.insert(objective.clone(), *satisfied);
        }
        state.attempt_duration_secs += report.duration_delta_secs;
        working.put(&report.activity_id, state.clone());

        let mut deltas = vec![StateDelta::PutActivity {
            activity_id: report.activity_id.clone(),
            state: state.clone(),
        }];
        for changed in rollup::propagate(&tree, &mut working, aid) {
            let rolled = working.get(&changed);
            deltas.push(StateDelta::PutActivity {
                activity_id: changed,
                state: rolled,
            });
        }
        self.commit_with_retry(session_id, &deltas)?;

        self.lrs.emit_best_effort(&LrsEmitter::event(
            session_id,
            &session.learner_id,
            Some(&report.activity_id),
            "result_recorded",
            Some(state.progress_measure),
        ));
        Ok(())
    }

    /// Full session view plus the navigation requests that would currently
    /// be accepted.
    pub fn get_state(&self, session_id: &str) -> Result<SessionView, CoursewalkError> {
        let (session, tree, snapshot) = self.load_context(session_id)?;
        let legal_requests = nav::legal_requests(&tree, &session, &snapshot)
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let activities = snapshot
            .visited()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        Ok(SessionView {
            session,
            activities,
            legal_requests,
        })
    }

    fn load_context(
        &self,
        session_id: &str,
    ) -> Result<(SequencingSession, ActivityTree, StateSnapshot), CoursewalkError> {
        let db_path = self.store.db_path();
        self.broker
            .with_conn(&db_path, Some(session_id), "load_context", |conn| {
                let session = load_session_row(conn, session_id)?;
                let tree = course::load_tree(conn, &session.course_id, session.course_version)?;
                let snapshot = StateSnapshot::load(conn, session_id)?;
                Ok((session, tree, snapshot))
            })
    }

    /// Commits the delta list; transient persistence failures are retried
    /// with linear backoff, anything else surfaces immediately.
    fn commit_with_retry(
        &self,
        session_id: &str,
        deltas: &[StateDelta],
    ) -> Result<(), CoursewalkError> {
        let db_path = self.store.db_path();
        let attempts = self.config.commit_retry_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.broker.apply_deltas(&db_path, session_id, deltas) {
                Ok(()) => return Ok(()),
                Err(CoursewalkError::Persistence(e)) => {
                    last_err = Some(CoursewalkError::Persistence(e));
                    if attempt < attempts {
                        std::thread::sleep(std::time::Duration::from_millis(
                            self.config.commit_backoff_ms * attempt as u64,
                        ));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CoursewalkError::Config("commit retry loop exited without an error".to_string())
        }))
    }
}

fn load_session_row(
    conn: &rusqlite::Connection,
    session_id: &str,
) -> Result<SequencingSession, CoursewalkError> {
    let row = conn
        .query_row(
            "SELECT session_id, course_id, course_version, learner_id,
                    current_activity_id, suspended_activity_id, suspended_data,
                    is_terminated, exit_reason
             FROM sessions WHERE session_id = ?1",
            params![session_id],
            |row| {
                let exit_reason: Option<String> = row.get(8)?;
                Ok(SequencingSession {
                    session_id: row.get(0)?,
                    course_id: row.get(1)?,
                    course_version: row.get(2)?,
                    learner_id: row.get(3)?,
                    current_activity_id: row.get(4)?,
                    suspended_activity_id: row.get(5)?,
                    suspended_data: row.get(6)?,
                    is_terminated: row.get(7)?,
                    exit_reason: exit_reason.as_deref().and_then(ExitReason::parse),
                })
            },
        )
        .optional()?;
    row.ok_or_else(|| CoursewalkError::NotFound(format!("session '{}'", session_id)))
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "session",
        "version": "0.1.0",
        "description": "Per-learner sequencing sessions",
        "commands": [
            { "name": "create", "description": "Create a session against a published course" },
            { "name": "nav", "description": "Process a navigation request" },
            { "name": "report", "description": "Record a learner result for a leaf activity" },
            { "name": "state", "description": "Show session state and legal requests" }
        ],
        "storage": ["sequencing.db", "lrs.events.jsonl"]
    })
}
