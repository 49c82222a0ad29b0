use rusqlite::Connection;
use std::fs;

use crate::core::error::CoursewalkError;
use crate::core::schemas;
use crate::core::store::Store;

pub fn db_connect(db_path: &str) -> Result<Connection, CoursewalkError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Create the store directory and the sequencing database tables.
/// Idempotent: existing data is preserved.
pub fn initialize_sequencing_db(store: &Store) -> Result<(), CoursewalkError> {
    fs::create_dir_all(&store.root)?;
    let conn = db_connect(&store.db_path().to_string_lossy())?;
    conn.execute(schemas::COURSES_SCHEMA, [])?;
    conn.execute(schemas::SESSIONS_SCHEMA, [])?;
    conn.execute(schemas::ACTIVITY_STATE_SCHEMA, [])?;
    conn.execute(schemas::SESSIONS_COURSE_INDEX, [])?;
    Ok(())
}
