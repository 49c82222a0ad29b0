//! Commit broker: the single write path into the sequencing database.
//!
//! Every mutation flows through `with_conn`, which serializes writers behind
//! an in-process lock and appends one audit line per operation. Decisions
//! are applied inside one transaction so a session either advances fully or
//! not at all.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::db;
use crate::core::error::CoursewalkError;
use crate::core::state::StateDelta;
use crate::core::time;

pub struct CommitBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub session_ref: Option<String>,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl CommitBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join("broker.events.jsonl"),
        }
    }

    /// Execute a closure with a serialized connection to the sequencing DB.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        session_ref: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, CoursewalkError>
    where
        F: FnOnce(&mut Connection) -> Result<R, CoursewalkError>,
    {
        // One writer at a time; per-session ordering follows from this.
        static DB_LOCK: Mutex<()> = Mutex::new(());
        let _lock = DB_LOCK.lock().unwrap();

        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let mut conn = db::db_connect(&db_path.to_string_lossy())?;

        let result = f(&mut conn);

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(session_ref, op_name, &db_id, status)?;

        result
    }

    /// Applies one navigation decision's deltas atomically.
    pub fn apply_deltas(
        &self,
        db_path: &Path,
        session_id: &str,
        deltas: &[StateDelta],
    ) -> Result<(), CoursewalkError> {
        self.with_conn(db_path, Some(session_id), "apply_deltas", |conn| {
            let tx = conn.transaction()?;
            for delta in deltas {
                apply_one(&tx, session_id, delta)?;
            }
            tx.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE session_id = ?2",
                params![time::now_epoch_z(), session_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn log_event(
        &self,
        session_ref: Option<&str>,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), CoursewalkError> {
        use std::fs::OpenOptions;
        use std::io::Write;

        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            session_ref: session_ref.map(|s| s.to_string()),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }
}

fn apply_one(
    tx: &rusqlite::Transaction<'_>,
    session_id: &str,
    delta: &StateDelta,
) -> Result<(), CoursewalkError> {
    match delta {
        StateDelta::PutActivity { activity_id, state } => {
            let objectives_json = serde_json::to_string(&state.objectives)?;
            tx.execute(
                "INSERT INTO activity_state (
                    session_id, activity_id, attempt_count, attempt_active,
                    completion_status, success_status, progress_measure,
                    objectives_json, attempt_duration_secs, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(session_id, activity_id) DO UPDATE SET
                    attempt_count = excluded.attempt_count,
                    attempt_active = excluded.attempt_active,
                    completion_status = excluded.completion_status,
                    success_status = excluded.success_status,
                    progress_measure = excluded.progress_measure,
                    objectives_json = excluded.objectives_json,
                    attempt_duration_secs = excluded.attempt_duration_secs,
                    updated_at = excluded.updated_at",
                params![
                    session_id,
                    activity_id,
                    state.attempt_count,
                    state.attempt_active,
                    state.completion.as_str(),
                    state.success.as_str(),
                    state.progress_measure,
                    objectives_json,
                    state.attempt_duration_secs as i64,
                    time::now_epoch_z(),
                ],
            )?;
        }
        StateDelta::SetCurrent { activity_id } => {
            tx.execute(
                "UPDATE sessions SET current_activity_id = ?1 WHERE session_id = ?2",
                params![activity_id, session_id],
            )?;
        }
        StateDelta::SetSuspended { activity_id, data } => {
            tx.execute(
                "UPDATE sessions SET suspended_activity_id = ?1, suspended_data = ?2
                 WHERE session_id = ?3",
                params![activity_id, data, session_id],
            )?;
        }
        StateDelta::SetTerminated { reason } => {
            tx.execute(
                "UPDATE sessions SET is_terminated = 1, exit_reason = ?1 WHERE session_id = ?2",
                params![reason.as_str(), session_id],
            )?;
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "broker",
        "version": "0.1.0",
        "description": "Serialized commit path for sequencing state",
        "commands": [
            { "name": "audit", "description": "Show the mutation audit log" }
        ],
        "storage": ["broker.events.jsonl"]
    })
}
