//! Learning-record event emitter.
//!
//! Committed transitions are mirrored to an append-only JSONL file so an
//! external LRS forwarder can tail it. Emission is best-effort: a failed
//! append never rolls back or rejects the transition it describes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::error::CoursewalkError;
use crate::core::time;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LrsEvent {
    pub ts: String,
    pub event_id: String,
    pub session_id: String,
    pub learner_id: String,
    pub activity_id: Option<String>,
    pub verb: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_measure: Option<f64>,
}

pub struct LrsEmitter {
    log_path: PathBuf,
}

impl LrsEmitter {
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    pub fn event(
        session_id: &str,
        learner_id: &str,
        activity_id: Option<&str>,
        verb: &str,
        progress_measure: Option<f64>,
    ) -> LrsEvent {
        LrsEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            session_id: session_id.to_string(),
            learner_id: learner_id.to_string(),
            activity_id: activity_id.map(|s| s.to_string()),
            verb: verb.to_string(),
            progress_measure,
        }
    }

    pub fn emit(&self, event: &LrsEvent) -> Result<(), CoursewalkError> {
        use std::fs::OpenOptions;
        use std::io::Write;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }

    /// Emission never fails the transition it records.
    pub fn emit_best_effort(&self, event: &LrsEvent) {
        if let Err(e) = self.emit(event) {
            eprintln!("lrs: failed to append event {}: {}", event.event_id, e);
        }
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "lrs",
        "version": "0.1.0",
        "description": "Append-only learning-record event stream",
        "storage": ["lrs.events.jsonl"]
    })
}
