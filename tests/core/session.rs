use coursewalk::core::broker::CommitBroker;
use coursewalk::core::config::EngineConfig;
use coursewalk::core::course;
use coursewalk::core::db;
use coursewalk::core::error::{CoursewalkError, NavigationError};
use coursewalk::core::nav::{NavigationRequest, NavigationResult};
use coursewalk::core::session::{ResultReport, SessionManager};
use coursewalk::core::state::{CompletionStatus, ExitReason, SuccessStatus};
use coursewalk::core::store::Store;
use coursewalk::core::tree::RawTreeDescriptor;
use tempfile::tempdir;

fn setup(activities: serde_json::Value) -> (tempfile::TempDir, Store, SessionManager) {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path());
    db::initialize_sequencing_db(&store).expect("db init");

    let broker = CommitBroker::new(&store.root);
    let desc: RawTreeDescriptor = serde_json::from_value(serde_json::json!({
        "title": "Test Course",
        "activities": activities,
    }))
    .expect("descriptor parses");
    course::publish(&store, &broker, "course-1", &desc).expect("publish");

    let manager = SessionManager::open(store.clone(), EngineConfig::default());
    (tmp, store, manager)
}

fn delivered(result: &NavigationResult) -> &str {
    match result {
        NavigationResult::Deliver { activity_id, .. } => activity_id,
        other => panic!("expected delivery, got {:?}", other),
    }
}

#[test]
fn publish_create_and_walk_a_course() {
    let (_tmp, store, manager) = setup(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "a", "parent": "root", "launch_data": "content/a.html" },
        { "identifier": "b", "parent": "root" },
    ]));

    let session = manager
        .create_session("course-1", None, "learner-1")
        .expect("create");
    assert_eq!(session.course_version, 1);

    let r = manager
        .navigate(&session.session_id, &NavigationRequest::Start)
        .expect("start");
    match &r {
        NavigationResult::Deliver {
            activity_id,
            launch_data,
        } => {
            assert_eq!(activity_id, "a");
            assert_eq!(launch_data.as_deref(), Some("content/a.html"));
        }
        other => panic!("expected delivery, got {:?}", other),
    }

    let reloaded = manager.get_session(&session.session_id).expect("reload");
    assert_eq!(reloaded.current_activity_id.as_deref(), Some("a"));

    let r = manager
        .navigate(&session.session_id, &NavigationRequest::Continue)
        .expect("continue");
    assert_eq!(delivered(&r), "b");

    let view = manager.get_state(&session.session_id).expect("state");
    assert_eq!(view.activities["a"].attempt_count, 1);
    assert!(!view.activities["a"].attempt_active);
    assert!(view.activities["b"].attempt_active);
    assert!(view.legal_requests.contains(&"continue".to_string()));

    // Both append-only logs have entries by now.
    let audit = std::fs::read_to_string(store.root.join("broker.events.jsonl")).expect("audit");
    assert!(audit.lines().count() >= 2);
    let lrs = std::fs::read_to_string(store.root.join("lrs.events.jsonl")).expect("lrs log");
    assert!(lrs.lines().any(|l| l.contains("\"delivered\"")));
}

#[test]
fn republish_increments_version_and_sessions_stay_pinned() {
    let (_tmp, store, manager) = setup(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "a", "parent": "root" },
    ]));
    let pinned = manager
        .create_session("course-1", None, "learner-1")
        .expect("create");

    let broker = CommitBroker::new(&store.root);
    let desc: RawTreeDescriptor = serde_json::from_value(serde_json::json!({
        "title": "Test Course v2",
        "activities": [
            { "identifier": "root" },
            { "identifier": "a", "parent": "root" },
            { "identifier": "b", "parent": "root" },
        ],
    }))
    .unwrap();
    let published = course::publish(&store, &broker, "course-1", &desc).expect("republish");
    assert_eq!(published.version, 2);

    let fresh = manager
        .create_session("course-1", None, "learner-2")
        .expect("create latest");
    assert_eq!(fresh.course_version, 2);
    assert_eq!(
        manager.get_session(&pinned.session_id).unwrap().course_version,
        1
    );

    // The old version still walks as published: one leaf, then exhaustion.
    manager
        .navigate(&pinned.session_id, &NavigationRequest::Start)
        .expect("start");
    let r = manager
        .navigate(&pinned.session_id, &NavigationRequest::Continue)
        .expect("continue");
    assert_eq!(
        r,
        NavigationResult::Terminated {
            reason: ExitReason::CourseExhausted
        }
    );
}

#[test]
fn recorded_results_roll_up_an_any_satisfied_cluster() {
    let (_tmp, _store, manager) = setup(serde_json::json!([
        {
            "identifier": "root",
            "rollup_rules": [
                {
                    "aspect": "satisfaction",
                    "minimum": "any",
                    "child_condition": { "kind": "satisfied" },
                    "outcome": "passed"
                }
            ]
        },
        { "identifier": "a", "parent": "root" },
        { "identifier": "b", "parent": "root" },
        { "identifier": "c", "parent": "root" },
    ]));
    let session = manager
        .create_session("course-1", None, "learner-1")
        .expect("create");
    manager
        .navigate(&session.session_id, &NavigationRequest::Start)
        .expect("start");

    manager
        .record_result(
            &session.session_id,
            &ResultReport {
                activity_id: "a".to_string(),
                completion: Some(CompletionStatus::Completed),
                success: Some(SuccessStatus::Passed),
                progress_measure: Some(1.0),
                duration_delta_secs: 120,
                ..Default::default()
            },
        )
        .expect("report");

    let view = manager.get_state(&session.session_id).expect("state");
    assert_eq!(view.activities["a"].success, SuccessStatus::Passed);
    assert_eq!(view.activities["a"].attempt_duration_secs, 120);
    // One satisfied child passes the cluster; completion still defaults.
    assert_eq!(view.activities["root"].success, SuccessStatus::Passed);
    assert_eq!(view.activities["root"].completion, CompletionStatus::Incomplete);
}

#[test]
fn results_are_rejected_for_clusters_and_unknown_activities() {
    let (_tmp, _store, manager) = setup(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "u1", "parent": "root" },
        { "identifier": "a", "parent": "u1" },
    ]));
    let session = manager
        .create_session("course-1", None, "learner-1")
        .expect("create");

    let err = manager
        .record_result(
            &session.session_id,
            &ResultReport {
                activity_id: "u1".to_string(),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, CoursewalkError::Navigation(_)));

    let err = manager
        .record_result(
            &session.session_id,
            &ResultReport {
                activity_id: "ghost".to_string(),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        CoursewalkError::Navigation(NavigationError::UnknownActivity(_))
    ));
}

#[test]
fn suspend_survives_a_manager_restart() {
    let (_tmp, store, manager) = setup(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "a", "parent": "root" },
        { "identifier": "b", "parent": "root" },
    ]));
    let session = manager
        .create_session("course-1", None, "learner-1")
        .expect("create");
    manager
        .navigate(&session.session_id, &NavigationRequest::Start)
        .expect("start");
    manager
        .navigate(&session.session_id, &NavigationRequest::Continue)
        .expect("continue");
    manager
        .record_result(
            &session.session_id,
            &ResultReport {
                activity_id: "a".to_string(),
                completion: Some(CompletionStatus::Completed),
                ..Default::default()
            },
        )
        .expect("report");

    let r = manager
        .navigate(
            &session.session_id,
            &NavigationRequest::SuspendAll {
                data: Some("bookmark:slide-9".to_string()),
            },
        )
        .expect("suspend");
    assert_eq!(
        r,
        NavigationResult::Suspended {
            activity_id: "b".to_string()
        }
    );

    // Fresh manager over the same store stands in for a process restart.
    let manager = SessionManager::open(Store::new(&store.root), EngineConfig::default());
    let r = manager
        .navigate(&session.session_id, &NavigationRequest::Resume)
        .expect("resume");
    match r {
        NavigationResult::Deliver {
            activity_id,
            launch_data,
        } => {
            assert_eq!(activity_id, "b");
            assert_eq!(launch_data.as_deref(), Some("bookmark:slide-9"));
        }
        other => panic!("expected delivery, got {:?}", other),
    }

    let view = manager.get_state(&session.session_id).expect("state");
    assert_eq!(view.activities["b"].attempt_count, 1);
    assert_eq!(view.activities["a"].completion, CompletionStatus::Completed);
}

#[test]
fn exit_all_terminates_and_blocks_further_navigation() {
    let (_tmp, _store, manager) = setup(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "a", "parent": "root" },
    ]));
    let session = manager
        .create_session("course-1", None, "learner-1")
        .expect("create");
    manager
        .navigate(&session.session_id, &NavigationRequest::Start)
        .expect("start");

    let r = manager
        .navigate(&session.session_id, &NavigationRequest::ExitAll)
        .expect("exit all");
    assert_eq!(
        r,
        NavigationResult::Terminated {
            reason: ExitReason::ExitAll
        }
    );

    let reloaded = manager.get_session(&session.session_id).expect("reload");
    assert!(reloaded.is_terminated);
    assert_eq!(reloaded.exit_reason, Some(ExitReason::ExitAll));

    let err = manager
        .navigate(&session.session_id, &NavigationRequest::Start)
        .unwrap_err();
    assert!(matches!(
        err,
        CoursewalkError::Navigation(NavigationError::SessionTerminated)
    ));
}

#[test]
fn rejected_requests_leave_persisted_state_unchanged() {
    let (_tmp, _store, manager) = setup(serde_json::json!([
        { "identifier": "root", "control_mode": { "choice": false } },
        { "identifier": "a", "parent": "root" },
        { "identifier": "b", "parent": "root" },
    ]));
    let session = manager
        .create_session("course-1", None, "learner-1")
        .expect("create");
    manager
        .navigate(&session.session_id, &NavigationRequest::Start)
        .expect("start");
    let before = manager.get_state(&session.session_id).expect("state");

    let err = manager
        .navigate(
            &session.session_id,
            &NavigationRequest::Choice {
                target: "b".to_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        CoursewalkError::Navigation(NavigationError::ChoiceNotAllowed(_))
    ));

    let after = manager.get_state(&session.session_id).expect("state");
    assert_eq!(before.session, after.session);
    assert_eq!(before.activities, after.activities);
}

#[test]
fn failed_commit_writes_no_partial_rows() {
    let (_tmp, store, _manager) = setup(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "a", "parent": "root" },
    ]));
    let broker = CommitBroker::new(&store.root);

    // activity_state has a foreign key on sessions; writing rows for a
    // session that does not exist must fail the whole transaction.
    let deltas = vec![coursewalk::core::state::StateDelta::PutActivity {
        activity_id: "a".to_string(),
        state: coursewalk::core::state::ActivityState::default(),
    }];
    let err = broker
        .apply_deltas(&store.db_path(), "ghost-session", &deltas)
        .unwrap_err();
    assert!(matches!(err, CoursewalkError::Persistence(_)));

    let conn = db::db_connect(&store.db_path().to_string_lossy()).expect("connect");
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM activity_state", [], |r| r.get(0))
        .expect("count");
    assert_eq!(rows, 0);

    // The failed commit is still audited.
    let audit = std::fs::read_to_string(store.root.join("broker.events.jsonl")).expect("audit");
    assert!(audit.lines().any(|l| l.contains("\"error\"")));
}

#[test]
fn reported_duration_past_the_limit_blocks_redelivery() {
    let (_tmp, _store, manager) = setup(serde_json::json!([
        { "identifier": "root" },
        {
            "identifier": "a", "parent": "root",
            "limit_conditions": { "attempt_absolute_duration_limit_secs": 300 }
        },
        { "identifier": "b", "parent": "root" },
    ]));
    let session = manager
        .create_session("course-1", None, "learner-1")
        .expect("create");
    manager
        .navigate(&session.session_id, &NavigationRequest::Start)
        .expect("start");
    manager
        .record_result(
            &session.session_id,
            &ResultReport {
                activity_id: "a".to_string(),
                duration_delta_secs: 450,
                ..Default::default()
            },
        )
        .expect("report");
    manager
        .navigate(&session.session_id, &NavigationRequest::Continue)
        .expect("continue");

    // Re-entering a leaf with its time limit spent is a committed forced
    // termination.
    let r = manager
        .navigate(
            &session.session_id,
            &NavigationRequest::Choice {
                target: "a".to_string(),
            },
        )
        .expect("choice");
    assert_eq!(
        r,
        NavigationResult::Terminated {
            reason: ExitReason::DurationLimitExceeded
        }
    );
    let reloaded = manager.get_session(&session.session_id).expect("reload");
    assert!(reloaded.is_terminated);
    assert_eq!(reloaded.exit_reason, Some(ExitReason::DurationLimitExceeded));
}

#[test]
fn unknown_course_and_session_are_not_found() {
    let (_tmp, _store, manager) = setup(serde_json::json!([
        { "identifier": "root" },
        { "identifier": "a", "parent": "root" },
    ]));

    let err = manager
        .create_session("ghost-course", None, "learner-1")
        .unwrap_err();
    assert!(matches!(err, CoursewalkError::NotFound(_)));

    let err = manager
        .navigate("no-such-session", &NavigationRequest::Start)
        .unwrap_err();
    assert!(matches!(err, CoursewalkError::NotFound(_)));
}
