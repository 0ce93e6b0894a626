// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flight engine tests against in-memory SQLite.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rbs_flight::persistence::SqliteFlightPersistence;
use rbs_flight::{
    Direction, FlightContext, FlightEngine, FlightError, FlightMap, FlightPersistence,
    FlightResolver, FlightStatus, FlightSubmission, RetryRule, Step, StepEntry, StepResult,
};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::Notify;

const WAIT: Duration = Duration::from_secs(10);

type Journal = Arc<Mutex<Vec<String>>>;

/// Step that replays scripted results and records every call.
struct ScriptedStep {
    name: &'static str,
    journal: Journal,
    do_results: Mutex<VecDeque<StepResult>>,
    undo_result: StepResult,
    gate: Option<Arc<Notify>>,
}

impl ScriptedStep {
    fn ok(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: journal.clone(),
            do_results: Mutex::new(VecDeque::new()),
            undo_result: StepResult::Success,
            gate: None,
        }
    }

    fn with_do(mut self, results: Vec<StepResult>) -> Self {
        self.do_results = Mutex::new(results.into());
        self
    }

    fn with_undo(mut self, result: StepResult) -> Self {
        self.undo_result = result;
        self
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl Step for ScriptedStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.journal.lock().unwrap().push(format!("do:{}", self.name));
        let result = self
            .do_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StepResult::Success);
        if result.is_success() {
            ctx.working_map_mut().put(self.name, &true).unwrap();
        }
        result
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        assert_eq!(ctx.direction(), Direction::Undo);
        self.journal.lock().unwrap().push(format!("undo:{}", self.name));
        self.undo_result.clone()
    }
}

#[derive(Default)]
struct TestResolver {
    flights: Mutex<HashMap<String, Vec<StepEntry>>>,
}

impl TestResolver {
    fn register(&self, kind: &str, steps: Vec<ScriptedStep>, retry: RetryRule) {
        let entries = steps.into_iter().map(|s| StepEntry::new(s, retry)).collect();
        self.flights.lock().unwrap().insert(kind.to_string(), entries);
    }
}

impl FlightResolver for TestResolver {
    fn resolve(&self, kind: &str, _input: &FlightMap) -> rbs_flight::Result<Vec<StepEntry>> {
        self.flights
            .lock()
            .unwrap()
            .get(kind)
            .cloned()
            .ok_or_else(|| FlightError::UnknownFlightKind(kind.to_string()))
    }
}

struct Harness {
    engine: FlightEngine,
    persistence: Arc<SqliteFlightPersistence>,
    resolver: Arc<TestResolver>,
    journal: Journal,
}

async fn harness() -> Harness {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite");
    rbs_flight::migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");

    let persistence = Arc::new(SqliteFlightPersistence::new(pool));
    let resolver = Arc::new(TestResolver::default());
    let engine = FlightEngine::builder()
        .persistence(persistence.clone())
        .resolver(resolver.clone())
        .max_concurrent_flights(4)
        .build()
        .expect("Failed to build engine");

    Harness {
        engine,
        persistence,
        resolver,
        journal: Arc::new(Mutex::new(Vec::new())),
    }
}

fn fast_retry(max_attempts: u32) -> RetryRule {
    RetryRule::fixed(Duration::from_millis(1), max_attempts)
}

fn journal(h: &Harness) -> Vec<String> {
    h.journal.lock().unwrap().clone()
}

#[tokio::test]
async fn test_all_steps_succeed() {
    let h = harness().await;
    h.resolver.register(
        "three",
        vec![
            ScriptedStep::ok("a", &h.journal),
            ScriptedStep::ok("b", &h.journal),
            ScriptedStep::ok("c", &h.journal),
        ],
        RetryRule::none(),
    );

    let input = FlightMap::new().with("ResourceId", "r-1").unwrap();
    let flight_id = h
        .engine
        .submit(FlightSubmission::new("three", input))
        .await
        .unwrap();
    let record = h.engine.await_completion(&flight_id, WAIT).await.unwrap();

    assert_eq!(record.status, FlightStatus::Success);
    assert_eq!(record.cursor, 3);
    assert!(record.error.is_none());
    assert!(record.completed_at.is_some());
    assert_eq!(journal(&h), vec!["do:a", "do:b", "do:c"]);
    assert_eq!(record.working_map.get::<bool>("c").unwrap(), Some(true));
    assert_eq!(
        record.working_map.get::<String>("ResourceId").unwrap().as_deref(),
        Some("r-1")
    );
}

#[tokio::test]
async fn test_fatal_third_step_undoes_first_two_in_reverse() {
    let h = harness().await;
    h.resolver.register(
        "fails-third",
        vec![
            ScriptedStep::ok("a", &h.journal),
            ScriptedStep::ok("b", &h.journal),
            ScriptedStep::ok("c", &h.journal).with_do(vec![StepResult::fatal("quota exceeded")]),
            ScriptedStep::ok("d", &h.journal),
        ],
        RetryRule::none(),
    );

    let flight_id = h
        .engine
        .submit(FlightSubmission::new("fails-third", FlightMap::new()))
        .await
        .unwrap();
    let record = h.engine.await_completion(&flight_id, WAIT).await.unwrap();

    assert_eq!(record.status, FlightStatus::Error);
    assert_eq!(record.cursor, 0);
    assert_eq!(record.direction, Direction::Undo);
    assert_eq!(journal(&h), vec!["do:a", "do:b", "do:c", "undo:b", "undo:a"]);
    let error = record.error.unwrap();
    assert!(error.contains("c: quota exceeded"), "{}", error);
}

#[tokio::test]
async fn test_retryable_failure_recovers_within_budget() {
    let h = harness().await;
    h.resolver.register(
        "flaky",
        vec![
            ScriptedStep::ok("flaky", &h.journal).with_do(vec![
                StepResult::retryable("timeout"),
                StepResult::retryable("timeout"),
            ]),
        ],
        fast_retry(3),
    );

    let flight_id = h
        .engine
        .submit(FlightSubmission::new("flaky", FlightMap::new()))
        .await
        .unwrap();
    let record = h.engine.await_completion(&flight_id, WAIT).await.unwrap();
    assert_eq!(record.status, FlightStatus::Success);

    let log = h.persistence.list_step_attempts(&flight_id).await.unwrap();
    let outcomes: Vec<_> = log.iter().map(|l| (l.attempt, l.outcome.as_str())).collect();
    assert_eq!(outcomes, vec![(1, "RETRY"), (2, "RETRY"), (3, "SUCCESS")]);
}

#[tokio::test]
async fn test_exhausted_retries_switch_to_undo() {
    let h = harness().await;
    h.resolver.register(
        "exhausts",
        vec![
            ScriptedStep::ok("a", &h.journal),
            ScriptedStep::ok("b", &h.journal).with_do(vec![
                StepResult::retryable("503"),
                StepResult::retryable("503"),
                StepResult::retryable("503"),
            ]),
        ],
        fast_retry(2),
    );

    let flight_id = h
        .engine
        .submit(FlightSubmission::new("exhausts", FlightMap::new()))
        .await
        .unwrap();
    let record = h.engine.await_completion(&flight_id, WAIT).await.unwrap();

    assert_eq!(record.status, FlightStatus::Error);
    assert_eq!(journal(&h), vec!["do:a", "do:b", "do:b", "undo:a"]);
    assert!(record.error.unwrap().contains("retries exhausted after 2 attempts"));
}

#[tokio::test]
async fn test_failed_undo_is_fatal() {
    let h = harness().await;
    h.resolver.register(
        "undo-breaks",
        vec![
            ScriptedStep::ok("a", &h.journal),
            ScriptedStep::ok("b", &h.journal).with_undo(StepResult::fatal("cannot delete")),
            ScriptedStep::ok("c", &h.journal).with_do(vec![StepResult::fatal("boom")]),
        ],
        RetryRule::none(),
    );

    let flight_id = h
        .engine
        .submit(FlightSubmission::new("undo-breaks", FlightMap::new()))
        .await
        .unwrap();
    let record = h.engine.await_completion(&flight_id, WAIT).await.unwrap();

    assert_eq!(record.status, FlightStatus::Fatal);
    // "a" is never undone once "b" could not be.
    assert_eq!(journal(&h), vec!["do:a", "do:b", "do:c", "undo:b"]);
    let error = record.error.unwrap();
    assert!(error.contains("c: boom"));
    assert!(error.contains("undo of b failed: cannot delete"));
}

#[tokio::test]
async fn test_resume_continues_from_persisted_cursor() {
    let h = harness().await;
    h.resolver.register(
        "resumable",
        vec![
            ScriptedStep::ok("a", &h.journal),
            ScriptedStep::ok("b", &h.journal),
            ScriptedStep::ok("c", &h.journal),
        ],
        RetryRule::none(),
    );

    // A previous process finished step "a" and died.
    let input = FlightMap::new();
    h.persistence
        .create_flight("flight-1", "resumable", &input)
        .await
        .unwrap();
    let progressed = FlightMap::new().with("a", &true).unwrap();
    h.persistence
        .save_progress("flight-1", 1, Direction::Do, &progressed, None)
        .await
        .unwrap();

    let resumed = h.engine.resume_running_flights().await.unwrap();
    assert_eq!(resumed, 1);

    let record = h.engine.await_completion("flight-1", WAIT).await.unwrap();
    assert_eq!(record.status, FlightStatus::Success);
    assert_eq!(journal(&h), vec!["do:b", "do:c"]);
    assert_eq!(record.working_map.get::<bool>("a").unwrap(), Some(true));
}

#[tokio::test]
async fn test_resume_in_undo_direction() {
    let h = harness().await;
    h.resolver.register(
        "undoing",
        vec![
            ScriptedStep::ok("a", &h.journal),
            ScriptedStep::ok("b", &h.journal),
        ],
        RetryRule::none(),
    );

    h.persistence
        .create_flight("flight-2", "undoing", &FlightMap::new())
        .await
        .unwrap();
    h.persistence
        .save_progress("flight-2", 1, Direction::Undo, &FlightMap::new(), Some("b: boom"))
        .await
        .unwrap();

    assert!(h.engine.resume("flight-2"));
    let record = h.engine.await_completion("flight-2", WAIT).await.unwrap();
    assert_eq!(record.status, FlightStatus::Error);
    assert_eq!(record.error.as_deref(), Some("b: boom"));
    assert_eq!(journal(&h), vec!["undo:a"]);
}

#[tokio::test]
async fn test_unknown_kind_is_fatal() {
    let h = harness().await;

    let flight_id = h
        .engine
        .submit(FlightSubmission::new("nobody-knows", FlightMap::new()))
        .await
        .unwrap();
    let record = h.engine.await_completion(&flight_id, WAIT).await.unwrap();

    assert_eq!(record.status, FlightStatus::Fatal);
    assert!(record.error.unwrap().contains("nobody-knows"));
}

#[tokio::test]
async fn test_discarded_flight_is_gone() {
    let h = harness().await;

    let staged = h
        .engine
        .stage(FlightSubmission::new("three", FlightMap::new()))
        .await
        .unwrap();
    let flight_id = staged.flight_id().to_string();
    assert!(h.engine.get_flight(&flight_id).await.unwrap().is_some());

    h.engine.discard(staged).await.unwrap();
    assert!(h.engine.get_flight(&flight_id).await.unwrap().is_none());
    assert!(journal(&h).is_empty());
}

#[tokio::test]
async fn test_one_executor_per_flight() {
    let h = harness().await;
    let gate = Arc::new(Notify::new());
    h.resolver.register(
        "gated",
        vec![ScriptedStep::ok("slow", &h.journal).gated(gate.clone())],
        RetryRule::none(),
    );

    let flight_id = h
        .engine
        .submit(FlightSubmission::new("gated", FlightMap::new()))
        .await
        .unwrap();

    assert!(!h.engine.resume(&flight_id));
    assert_eq!(h.engine.resume_running_flights().await.unwrap(), 0);
    assert_eq!(h.engine.live_flight_count(), 1);

    // notify_one stores a permit, so the step proceeds even if it has not
    // reached the gate yet.
    gate.notify_one();
    let record = h.engine.await_completion(&flight_id, WAIT).await.unwrap();
    assert_eq!(record.status, FlightStatus::Success);
    assert_eq!(journal(&h), vec!["do:slow"]);
}

#[tokio::test]
async fn test_shutdown_leaves_flight_running() {
    let h = harness().await;
    h.resolver.register(
        "retrying",
        vec![
            ScriptedStep::ok("a", &h.journal),
            ScriptedStep::ok("b", &h.journal).with_do(vec![StepResult::retryable("slow api")]),
        ],
        RetryRule::fixed(Duration::from_secs(60), 5),
    );

    let flight_id = h
        .engine
        .submit(FlightSubmission::new("retrying", FlightMap::new()))
        .await
        .unwrap();

    // Wait until "b" has failed once and the executor sits in its retry wait.
    for _ in 0..500 {
        if journal(&h).len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.engine.shutdown(Duration::from_secs(5)).await;

    let record = h.engine.get_flight(&flight_id).await.unwrap().unwrap();
    assert_eq!(record.status, FlightStatus::Running);
    assert_eq!(record.cursor, 1);
    assert!(matches!(
        h.engine
            .submit(FlightSubmission::new("retrying", FlightMap::new()))
            .await,
        Err(FlightError::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_await_completion_times_out() {
    let h = harness().await;
    let gate = Arc::new(Notify::new());
    h.resolver.register(
        "stuck",
        vec![ScriptedStep::ok("stuck", &h.journal).gated(gate)],
        RetryRule::none(),
    );

    let flight_id = h
        .engine
        .submit(FlightSubmission::new("stuck", FlightMap::new()))
        .await
        .unwrap();
    let err = h
        .engine
        .await_completion(&flight_id, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, FlightError::Timeout(id) if id == flight_id));
}
