//! Course publishing and retrieval.
//!
//! A published course version is an immutable snapshot: the validated tree
//! serialized to JSON plus a content fingerprint. Re-publishing the same
//! course id allocates the next version; live sessions keep the version they
//! were created against.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::core::broker::CommitBroker;
use crate::core::error::CoursewalkError;
use crate::core::store::Store;
use crate::core::time;
use crate::core::tree::{ActivityTree, RawTreeDescriptor};

#[derive(Debug, Clone, Serialize)]
pub struct PublishedCourse {
    pub course_id: String,
    pub version: i64,
    pub fingerprint: String,
    pub published_at: String,
}

pub fn publish(
    store: &Store,
    broker: &CommitBroker,
    course_id: &str,
    descriptor: &RawTreeDescriptor,
) -> Result<PublishedCourse, CoursewalkError> {
    let tree = ActivityTree::build(descriptor)?;
    let tree_json = tree.to_json()?;
    let fingerprint = tree.fingerprint();
    let published_at = time::now_epoch_z();

    let db_path = store.db_path();
    broker.with_conn(&db_path, None, "publish_course", |conn| {
        let version: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM courses WHERE course_id = ?1",
            params![course_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO courses (course_id, version, fingerprint, tree_json, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![course_id, version, fingerprint, tree_json, published_at],
        )?;
        Ok(PublishedCourse {
            course_id: course_id.to_string(),
            version,
            fingerprint: fingerprint.clone(),
            published_at: published_at.clone(),
        })
    })
}

/// Latest published version of a course.
pub fn latest_version(conn: &Connection, course_id: &str) -> Result<i64, CoursewalkError> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT MAX(version) FROM courses WHERE course_id = ?1",
            params![course_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    version.ok_or_else(|| CoursewalkError::NotFound(format!("course '{}'", course_id)))
}

pub fn load_tree(
    conn: &Connection,
    course_id: &str,
    version: i64,
) -> Result<ActivityTree, CoursewalkError> {
    let tree_json: Option<String> = conn
        .query_row(
            "SELECT tree_json FROM courses WHERE course_id = ?1 AND version = ?2",
            params![course_id, version],
            |row| row.get(0),
        )
        .optional()?;
    let tree_json = tree_json.ok_or_else(|| {
        CoursewalkError::NotFound(format!("course '{}' version {}", course_id, version))
    })?;
    Ok(ActivityTree::from_json(&tree_json)?)
}

pub fn list(conn: &Connection) -> Result<Vec<PublishedCourse>, CoursewalkError> {
    let mut stmt = conn.prepare(
        "SELECT course_id, version, fingerprint, published_at
         FROM courses ORDER BY course_id, version",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(PublishedCourse {
            course_id: row.get(0)?,
            version: row.get(1)?,
            fingerprint: row.get(2)?,
            published_at: row.get(3)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "course",
        "version": "0.1.0",
        "description": "Immutable published course versions",
        "commands": [
            { "name": "publish", "description": "Validate and publish a course manifest" },
            { "name": "list", "description": "List published course versions" }
        ],
        "storage": ["sequencing.db"]
    })
}
