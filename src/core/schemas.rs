//! Centralized schema definitions for the sequencing store.
//!
//! Coursewalk keeps one consolidated SQLite database plus one append-only
//! JSONL log:
//! 1. sequencing.db: published course trees, sessions, per-activity state.
//! 2. lrs.events.jsonl: post-commit analytics events for the LRS collaborator.

pub const SEQUENCING_DB_NAME: &str = "sequencing.db";
pub const LRS_EVENTS_NAME: &str = "lrs.events.jsonl";
pub const CONFIG_FILE_NAME: &str = "coursewalk.toml";

pub const COURSES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS courses (
        course_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        fingerprint TEXT NOT NULL,
        tree_json TEXT NOT NULL,
        published_at TEXT NOT NULL,
        PRIMARY KEY (course_id, version)
    )
";

pub const SESSIONS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        course_id TEXT NOT NULL,
        course_version INTEGER NOT NULL,
        learner_id TEXT NOT NULL,
        current_activity_id TEXT,
        suspended_activity_id TEXT,
        suspended_data TEXT,
        is_terminated INTEGER NOT NULL DEFAULT 0,
        exit_reason TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const ACTIVITY_STATE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS activity_state (
        session_id TEXT NOT NULL,
        activity_id TEXT NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        attempt_active INTEGER NOT NULL DEFAULT 0,
        completion_status TEXT NOT NULL DEFAULT 'not_attempted',
        success_status TEXT NOT NULL DEFAULT 'unknown',
        progress_measure REAL NOT NULL DEFAULT 0.0,
        objectives_json TEXT NOT NULL DEFAULT '{}',
        attempt_duration_secs INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (session_id, activity_id),
        FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
    )
";

pub const SESSIONS_COURSE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_sessions_course ON sessions(course_id, learner_id)";
