use std::io;
use thiserror::Error;

/// Build-time manifest/tree validation failures. Fatal for the course
/// version: a descriptor that trips any of these is never activated, so
/// these errors cannot surface at navigation time.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("descriptor has no activities")]
    Empty,
    #[error("duplicate activity identifier: {0}")]
    DuplicateIdentifier(String),
    #[error("invalid activity identifier: {0}")]
    InvalidIdentifier(String),
    #[error("activity '{child}' references unknown parent '{parent}'")]
    UnknownParent { child: String, parent: String },
    #[error("cycle detected through activity '{0}'")]
    Cycle(String),
    #[error("activity '{0}' is declared a leaf but has children")]
    LeafWithChildren(String),
    #[error("descriptor has no root activity")]
    NoRoot,
    #[error("descriptor has multiple root activities: '{0}' and '{1}'")]
    MultipleRoots(String, String),
    #[error("rollup rule on '{0}' has an outcome that does not match its aspect")]
    InvalidRollupRule(String),
    #[error("limit conditions on cluster '{0}'; attempts are tracked on leaves only")]
    ClusterLimitConditions(String),
}

/// Runtime navigation rejections. State is guaranteed unchanged when one of
/// these is returned; callers can consult the legal navigation set from
/// `SessionManager::get_state`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NavigationError {
    #[error("session already started; use resume or continue")]
    AlreadyStarted,
    #[error("session is terminated")]
    SessionTerminated,
    #[error("no current activity")]
    NoCurrentActivity,
    #[error("no suspended activity to resume")]
    NoSuspendedActivity,
    #[error("flow navigation is not allowed from '{0}'")]
    FlowNotAllowed(String),
    #[error("previous navigation is not allowed at '{0}'")]
    PreviousNotAllowed(String),
    #[error("choice navigation to '{0}' is not allowed")]
    ChoiceNotAllowed(String),
    #[error("unknown activity: {0}")]
    UnknownActivity(String),
    #[error("no deliverable activity")]
    NothingToDeliver,
}

#[derive(Error, Debug)]
pub enum CoursewalkError {
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("navigation error: {0}")]
    Navigation(#[from] NavigationError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("not found: {0}")]
    NotFound(String),
}
