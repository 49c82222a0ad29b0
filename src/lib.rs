//! Coursewalk: a sequencing and navigation engine for hosted courses.
//!
//! Coursewalk decides *what a learner sees next*. Courses are published as
//! immutable activity-tree versions; each learner gets a session whose
//! navigation requests (start, continue, choice, suspend, ...) are validated
//! against the tree's control modes and sequencing rules, applied
//! atomically, and rolled up the ancestor chain.
//!
//! # Architecture
//!
//! - **Published courses are immutable.** Re-publishing allocates a new
//!   version; live sessions keep the version they were created against.
//! - **Validate-then-apply.** The navigation processor is pure: tree plus
//!   state snapshot in, decision plus delta list out. Rejected requests
//!   change nothing.
//! - **The commit broker is the single write path.** All mutations are
//!   serialized, transactional, and audited to `broker.events.jsonl`.
//! - **Committed transitions are mirrored** to an append-only LRS event log
//!   for external forwarding.
//!
//! # Example
//!
//! ```bash
//! coursewalk init
//! coursewalk course publish --course algebra-101 --manifest manifest.json
//! coursewalk session create --course algebra-101 --learner learner-7
//! coursewalk session nav --session <ID> start
//! coursewalk session nav --session <ID> continue
//! coursewalk session state --session <ID>
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: tree model, rules, rollup, navigation, sessions, persistence

pub mod core;

use core::{
    broker, config, course, db,
    error::CoursewalkError,
    lrs,
    nav::NavigationRequest,
    session::{ResultReport, SessionManager},
    state::{CompletionStatus, SuccessStatus},
    store::Store,
    time,
    tree::RawTreeDescriptor,
};

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(
    name = "coursewalk",
    version = env!("CARGO_PKG_VERSION"),
    about = "Sequencing and navigation engine for hosted courses"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a Coursewalk store in the current directory
    #[clap(name = "init")]
    Init {
        /// Directory to initialize (defaults to current working directory).
        #[clap(short, long)]
        dir: Option<PathBuf>,
    },

    /// Publish and inspect course versions
    #[clap(name = "course", visible_alias = "c")]
    Course(CourseCli),

    /// Create and drive learner sessions
    #[clap(name = "session", visible_alias = "s")]
    Session(SessionCli),

    /// Subsystem schemas and discovery
    #[clap(name = "schema")]
    Schema {
        /// Optional: filter by subsystem name
        #[clap(long)]
        subsystem: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct CourseCli {
    #[clap(subcommand)]
    command: CourseCommand,
}

#[derive(Subcommand, Debug)]
enum CourseCommand {
    /// Validate a manifest and publish it as the next course version
    Publish {
        #[clap(long)]
        course: String,
        /// Path to the activity-tree manifest (JSON)
        #[clap(long)]
        manifest: PathBuf,
    },
    /// List published course versions
    List,
}

#[derive(clap::Args, Debug)]
struct SessionCli {
    #[clap(subcommand)]
    command: SessionCommand,
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Create a session against a published course
    Create {
        #[clap(long)]
        course: String,
        /// Pin a specific course version (defaults to latest)
        #[clap(long)]
        version: Option<i64>,
        #[clap(long)]
        learner: String,
    },
    /// Process a navigation request
    Nav {
        #[clap(long)]
        session: String,
        #[clap(subcommand)]
        request: NavCommand,
    },
    /// Record a learner result for a leaf activity
    Report {
        #[clap(long)]
        session: String,
        #[clap(long)]
        activity: String,
        /// not_attempted | incomplete | completed
        #[clap(long)]
        completion: Option<String>,
        /// unknown | passed | failed
        #[clap(long)]
        success: Option<String>,
        /// Progress measure in 0..=1
        #[clap(long)]
        progress: Option<f64>,
        /// Objective outcome as `id=true` or `id=false`; repeatable
        #[clap(long = "objective")]
        objectives: Vec<String>,
        /// Seconds to add to the current attempt's duration
        #[clap(long, default_value_t = 0)]
        duration_secs: u64,
    },
    /// Show session state and the currently legal requests
    State {
        #[clap(long)]
        session: String,
    },
}

#[derive(Subcommand, Debug)]
enum NavCommand {
    /// Begin the first attempt at the first deliverable activity
    Start,
    /// Resume a suspended session
    Resume,
    /// Flow forward to the next deliverable activity
    Continue,
    /// Flow backward to the previous deliverable activity
    Previous,
    /// Jump to a specific activity
    Choice {
        #[clap(long)]
        target: String,
    },
    /// End the current attempt; post-condition rules decide what follows
    Exit,
    /// End the current attempt and terminate the session
    ExitAll,
    /// Drop the current attempt without rule evaluation
    Abandon,
    /// Drop the current attempt and terminate the session
    AbandonAll,
    /// Park the session for a later resume
    SuspendAll {
        /// Opaque resume payload handed back on resume
        #[clap(long)]
        data: Option<String>,
    },
}

impl NavCommand {
    fn into_request(self) -> NavigationRequest {
        match self {
            NavCommand::Start => NavigationRequest::Start,
            NavCommand::Resume => NavigationRequest::Resume,
            NavCommand::Continue => NavigationRequest::Continue,
            NavCommand::Previous => NavigationRequest::Previous,
            NavCommand::Choice { target } => NavigationRequest::Choice { target },
            NavCommand::Exit => NavigationRequest::Exit,
            NavCommand::ExitAll => NavigationRequest::ExitAll,
            NavCommand::Abandon => NavigationRequest::Abandon,
            NavCommand::AbandonAll => NavigationRequest::AbandonAll,
            NavCommand::SuspendAll { data } => NavigationRequest::SuspendAll { data },
        }
    }
}

fn find_coursewalk_project_root(start_dir: &Path) -> Result<PathBuf, CoursewalkError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(".coursewalk").exists() {
            return Ok(current_dir);
        }
        if !current_dir.pop() {
            return Err(CoursewalkError::NotFound(
                "'.coursewalk' directory not found in current or parent directories. Run `coursewalk init` first.".to_string(),
            ));
        }
    }
}

pub fn run() -> Result<(), CoursewalkError> {
    let cli = Cli::parse();
    let current_dir = std::env::current_dir()?;

    match cli.command {
        Command::Init { dir } => {
            let target_dir = match dir {
                Some(d) => d,
                None => current_dir,
            };
            let target_dir = fs::canonicalize(&target_dir)?;
            let store_root = target_dir.join(".coursewalk").join("data");
            let store = Store::new(&store_root);

            let created = !store.db_path().exists();
            db::initialize_sequencing_db(&store)?;

            if created {
                println!(
                    "{} Initialized sequencing store at {}",
                    "●".bright_green(),
                    store_root.display()
                );
            } else {
                println!(
                    "{} Store already initialized at {} {}",
                    "✓".bright_green(),
                    store_root.display(),
                    "(existing data kept)".bright_black()
                );
            }
            Ok(())
        }
        command => {
            let project_root = find_coursewalk_project_root(&current_dir)?;
            let store_root = project_root.join(".coursewalk").join("data");
            let store = Store::new(&store_root);
            db::initialize_sequencing_db(&store)?;
            let config = config::load_config(&store)?;
            let manager = SessionManager::open(store.clone(), config);

            match command {
                Command::Init { .. } => unreachable!(),
                Command::Course(course_cli) => run_course_cli(&store, course_cli),
                Command::Session(session_cli) => run_session_cli(&manager, session_cli),
                Command::Schema { subsystem } => {
                    let mut schemas = std::collections::BTreeMap::new();
                    schemas.insert("broker", broker::schema());
                    schemas.insert("course", course::schema());
                    schemas.insert("lrs", lrs::schema());
                    schemas.insert("session", core::session::schema());
                    let output = if let Some(sub) = subsystem {
                        schemas
                            .get(sub.as_str())
                            .cloned()
                            .unwrap_or(serde_json::json!({ "error": "subsystem not found" }))
                    } else {
                        serde_json::json!({
                            "schema_version": "1.0.0",
                            "subsystems": schemas
                        })
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                    Ok(())
                }
            }
        }
    }
}

fn run_course_cli(store: &Store, cli: CourseCli) -> Result<(), CoursewalkError> {
    let broker = broker::CommitBroker::new(&store.root);
    match cli.command {
        CourseCommand::Publish { course, manifest } => {
            let content = fs::read_to_string(&manifest)?;
            let descriptor: RawTreeDescriptor = serde_json::from_str(&content)?;
            let published = course::publish(store, &broker, &course, &descriptor)?;
            let envelope = time::command_envelope(
                "course.publish",
                "ok",
                serde_json::json!({
                    "course_id": published.course_id,
                    "version": published.version,
                    "fingerprint": published.fingerprint,
                }),
            );
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(())
        }
        CourseCommand::List => {
            let courses = broker.with_conn(&store.db_path(), None, "list_courses", |conn| {
                course::list(conn)
            })?;
            println!("{}", serde_json::to_string_pretty(&courses)?);
            Ok(())
        }
    }
}

fn run_session_cli(manager: &SessionManager, cli: SessionCli) -> Result<(), CoursewalkError> {
    match cli.command {
        SessionCommand::Create {
            course,
            version,
            learner,
        } => {
            let session = manager.create_session(&course, version, &learner)?;
            let envelope = time::command_envelope(
                "session.create",
                "ok",
                serde_json::json!({
                    "session_id": session.session_id,
                    "course_id": session.course_id,
                    "course_version": session.course_version,
                }),
            );
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(())
        }
        SessionCommand::Nav { session, request } => {
            let result = manager.navigate(&session, &request.into_request())?;
            let envelope = time::command_envelope(
                "session.nav",
                "ok",
                serde_json::json!({
                    "session_id": session,
                    "result": result,
                }),
            );
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(())
        }
        SessionCommand::Report {
            session,
            activity,
            completion,
            success,
            progress,
            objectives,
            duration_secs,
        } => {
            let completion = completion
                .map(|s| {
                    CompletionStatus::parse(&s).ok_or_else(|| {
                        CoursewalkError::Config(format!("invalid completion status '{}'", s))
                    })
                })
                .transpose()?;
            let success = success
                .map(|s| {
                    SuccessStatus::parse(&s).ok_or_else(|| {
                        CoursewalkError::Config(format!("invalid success status '{}'", s))
                    })
                })
                .transpose()?;
            let mut objective_map = std::collections::BTreeMap::new();
            for pair in objectives {
                let (id, value) = pair.split_once('=').ok_or_else(|| {
                    CoursewalkError::Config(format!(
                        "objective '{}' is not of the form id=true|false",
                        pair
                    ))
                })?;
                let satisfied = value.parse::<bool>().map_err(|_| {
                    CoursewalkError::Config(format!(
                        "objective '{}' is not of the form id=true|false",
                        pair
                    ))
                })?;
                objective_map.insert(id.to_string(), satisfied);
            }
            let report = ResultReport {
                activity_id: activity,
                completion,
                success,
                progress_measure: progress,
                objectives: objective_map,
                duration_delta_secs: duration_secs,
            };
            manager.record_result(&session, &report)?;
            let envelope = time::command_envelope(
                "session.report",
                "ok",
                serde_json::json!({
                    "session_id": session,
                    "activity_id": report.activity_id,
                }),
            );
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(())
        }
        SessionCommand::State { session } => {
            let view = manager.get_state(&session)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
    }
}
