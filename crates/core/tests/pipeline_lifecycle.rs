//! Pipeline lifecycle integration tests.
//!
//! These tests drive complete runs through the orchestrator with a mock
//! storefront and a file-backed catalog:
//! - Example scenario and per-order status files
//! - Idempotence across runs
//! - Monotonic states and the attempt limit
//! - Crash safety (resume of an interrupted attempt)
//! - Session failures, scan truncation, re-entrancy and shutdown

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tempfile::TempDir;

use priceguard_core::{
    catalog::{MergeOutcome, Transition},
    pipeline::REASON_MAX_RETRIES,
    scheduler::ModelKind,
    storefront::AdjustmentOutcome,
    testing::{fixtures, FixedClock, MockAttempt, MockResolver, MockStorefront},
    AdjustmentExecutor, AdjustmentState, JsonOrderCatalog, OrderCatalog, OrderReportWriter,
    Orchestrator, Pacer, PacingConfig, PipelineConfig, PipelineError, RunHistory, RunOutcome,
    RunLock, RunPhase, RunTrigger, Scheduler, SchedulerConfig, SessionManager, SessionStore,
    StorefrontError,
};

/// Test helper wiring an orchestrator to mocks inside a temp directory.
struct TestHarness {
    storefront: Arc<MockStorefront>,
    resolver: Arc<MockResolver>,
    catalog: Arc<JsonOrderCatalog>,
    clock: Arc<FixedClock>,
    temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let catalog = Arc::new(
            JsonOrderCatalog::open(&temp_dir.path().join("orders.json"))
                .expect("Failed to open catalog"),
        );

        Self {
            storefront: Arc::new(MockStorefront::new()),
            resolver: Arc::new(MockResolver::new()),
            catalog,
            clock: Arc::new(FixedClock::new(fixtures::now())),
            temp_dir,
        }
    }

    fn session_path(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("session.json")
    }

    fn reports_dir(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("orders")
    }

    fn create_orchestrator(&self, config: PipelineConfig) -> Orchestrator {
        self.create_orchestrator_with_pacer(config, Pacer::disabled())
    }

    fn create_orchestrator_with_pacer(&self, config: PipelineConfig, pacer: Pacer) -> Orchestrator {
        self.build(config, pacer, self.catalog.clone())
    }

    /// An orchestrator with its own catalog handle on the shared data
    /// directory, standing in for a second `priceguard` process.
    fn create_process(&self, pacer: Pacer) -> (Orchestrator, Arc<JsonOrderCatalog>) {
        let catalog = Arc::new(
            JsonOrderCatalog::open(&self.temp_dir.path().join("orders.json"))
                .expect("Failed to open catalog"),
        );
        let orchestrator = self
            .build(PipelineConfig::default(), pacer, catalog.clone())
            .with_run_lock(RunLock::new(self.temp_dir.path().join("priceguard.lock")));
        (orchestrator, catalog)
    }

    fn build(
        &self,
        config: PipelineConfig,
        pacer: Pacer,
        catalog: Arc<JsonOrderCatalog>,
    ) -> Orchestrator {
        let sessions = SessionManager::new(
            SessionStore::new(self.session_path()),
            self.storefront.clone(),
            fixtures::credentials(),
            config.login_attempts,
            self.clock.clone(),
        );
        let executor = AdjustmentExecutor::new(
            self.storefront.clone(),
            self.resolver.clone(),
            Duration::from_secs(5),
            Pacer::disabled(),
        );
        let reports = OrderReportWriter::new(self.reports_dir(), config.max_attempts);

        Orchestrator::new(
            config,
            catalog,
            sessions,
            self.storefront.clone(),
            executor,
            self.clock.clone(),
        )
        .with_reports(reports)
        .with_pacer(pacer)
    }

    fn state_of(&self, id: &str) -> AdjustmentState {
        self.catalog
            .get(id)
            .expect("Failed to read catalog")
            .expect("Order missing")
            .adjustment_state
    }

    async fn always_ambiguous(&self, id: &str, times: usize) {
        for _ in 0..times {
            self.storefront
                .script_attempt(
                    id,
                    MockAttempt::Challenge(AdjustmentOutcome::Ambiguous {
                        detail: "dialog closed without confirmation".to_string(),
                    }),
                )
                .await;
        }
    }
}

fn slow_pacer() -> Pacer {
    Pacer::new(&PacingConfig {
        short_delay_ms: [0, 0],
        long_delay_ms: [200, 200],
    })
}

#[tokio::test]
async fn test_example_order_gets_adjusted() {
    let harness = TestHarness::new();
    let now = fixtures::now();
    harness
        .storefront
        .set_pages(vec![vec![fixtures::dropped_snapshot("PO-123456", 5, now)]])
        .await;
    harness.storefront.set_tracking("PO-123456", "TRK123").await;

    let orchestrator = harness.create_orchestrator(PipelineConfig::default());
    let report = orchestrator.run(RunTrigger::Manual).await.unwrap();

    assert_eq!(report.phase, RunPhase::Done);
    assert_eq!(report.eligible, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.refunded, dec!(8.00));
    assert_eq!(report.outcome(), RunOutcome::Succeeded);

    let order = harness.catalog.get("PO-123456").unwrap().unwrap();
    assert_eq!(order.adjustment_state, AdjustmentState::Succeeded);
    assert_eq!(order.attempt_count, 1);
    assert_eq!(order.refund_amount, Some(dec!(8.00)));
    assert_eq!(order.tracking_ref.as_deref(), Some("TRK123"));

    let states: Vec<_> = order.history.iter().map(|c| c.state).collect();
    assert_eq!(
        states,
        vec![
            AdjustmentState::Unseen,
            AdjustmentState::Eligible,
            AdjustmentState::Attempted,
            AdjustmentState::Succeeded,
        ]
    );

    let status_file = harness.reports_dir().join("SUCCEEDED_TRK123.txt");
    let content = std::fs::read_to_string(status_file).expect("status file missing");
    assert!(content.contains("Refund amount: 8.00"));
    assert!(!harness.reports_dir().join("ELIGIBLE_PO-123456.txt").exists());
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let harness = TestHarness::new();
    let now = fixtures::now();
    harness
        .storefront
        .set_pages(vec![vec![
            fixtures::dropped_snapshot("PO-1", 5, now),
            fixtures::snapshot("PO-2", 6, now),
        ]])
        .await;
    let orchestrator = harness.create_orchestrator(PipelineConfig::default());

    orchestrator.run(RunTrigger::Manual).await.unwrap();
    let after_first = harness.catalog.get("PO-1").unwrap().unwrap();
    harness.storefront.clear_recorded().await;

    let second = orchestrator.run(RunTrigger::Manual).await.unwrap();

    assert_eq!(second.outcome(), RunOutcome::Idle);
    assert!(harness.storefront.adjustment_requests().await.is_empty());
    assert_eq!(harness.catalog.get("PO-1").unwrap().unwrap(), after_first);
    assert_eq!(
        harness.catalog.merge_snapshot(fixtures::dropped_snapshot("PO-1", 5, now), now).unwrap(),
        MergeOutcome::Frozen
    );
}

#[tokio::test]
async fn test_attempts_stop_at_limit() {
    let harness = TestHarness::new();
    let now = fixtures::now();
    harness
        .storefront
        .set_pages(vec![vec![fixtures::dropped_snapshot("PO-1", 5, now)]])
        .await;
    harness.always_ambiguous("PO-1", 10).await;

    let config = PipelineConfig {
        max_attempts: 3,
        max_attempts_per_run: 2,
        ..Default::default()
    };
    let orchestrator = harness.create_orchestrator(config);

    let first = orchestrator.run(RunTrigger::Manual).await.unwrap();
    assert_eq!(first.retrying, 1);
    assert_eq!(first.outcome(), RunOutcome::Degraded);
    assert_eq!(harness.state_of("PO-1"), AdjustmentState::FailedRetryable);

    let second = orchestrator.run(RunTrigger::Manual).await.unwrap();
    assert_eq!(second.failed, 1);

    let order = harness.catalog.get("PO-1").unwrap().unwrap();
    assert_eq!(order.adjustment_state, AdjustmentState::FailedTerminal);
    assert_eq!(order.reason.as_deref(), Some(REASON_MAX_RETRIES));
    assert_eq!(order.attempt_count, 3);

    harness.storefront.clear_recorded().await;
    orchestrator.run(RunTrigger::Manual).await.unwrap();
    assert!(harness.storefront.adjustment_requests().await.is_empty());

    for pair in order.history.windows(2) {
        assert!(
            pair[1].state.rank() >= pair[0].state.rank(),
            "{} -> {} went backwards",
            pair[0].state,
            pair[1].state
        );
    }
}

#[tokio::test]
async fn test_not_available_is_terminal() {
    let harness = TestHarness::new();
    let now = fixtures::now();
    harness
        .storefront
        .set_pages(vec![vec![fixtures::dropped_snapshot("PO-1", 5, now)]])
        .await;
    harness
        .storefront
        .script_attempt(
            "PO-1",
            MockAttempt::Outcome(AdjustmentOutcome::Rejected {
                reason: "This item is not eligible for a price adjustment".to_string(),
            }),
        )
        .await;

    let report = harness
        .create_orchestrator(PipelineConfig::default())
        .run(RunTrigger::Manual)
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.not_available, 1);
    let order = harness.catalog.get("PO-1").unwrap().unwrap();
    assert_eq!(order.adjustment_state, AdjustmentState::FailedTerminal);
    assert!(order.reason.unwrap().starts_with("not_available"));
    assert_eq!(harness.storefront.adjustment_requests().await.len(), 1);
}

#[tokio::test]
async fn test_interrupted_attempt_resumes_like_uninterrupted_run() {
    let now = fixtures::now();

    let uninterrupted = TestHarness::new();
    uninterrupted
        .storefront
        .set_pages(vec![vec![fixtures::dropped_snapshot("PO-1", 5, now)]])
        .await;
    uninterrupted
        .create_orchestrator(PipelineConfig::default())
        .run(RunTrigger::Manual)
        .await
        .unwrap();

    // Crash right after the order was marked attempted
    let resumed = TestHarness::new();
    resumed
        .storefront
        .set_pages(vec![vec![fixtures::dropped_snapshot("PO-1", 5, now)]])
        .await;
    resumed
        .catalog
        .merge_snapshot(fixtures::dropped_snapshot("PO-1", 5, now), now)
        .unwrap();
    resumed
        .catalog
        .transition("PO-1", Transition::to(AdjustmentState::Eligible), now)
        .unwrap();
    resumed
        .catalog
        .transition("PO-1", Transition::to(AdjustmentState::Attempted), now)
        .unwrap();

    let report = resumed
        .create_orchestrator(PipelineConfig::default())
        .run(RunTrigger::Manual)
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(resumed.storefront.adjustment_requests().await.len(), 1);

    let a = uninterrupted.catalog.get("PO-1").unwrap().unwrap();
    let b = resumed.catalog.get("PO-1").unwrap().unwrap();
    assert_eq!(a.adjustment_state, b.adjustment_state);
    assert_eq!(a.attempt_count, b.attempt_count);
    assert_eq!(a.refund_amount, b.refund_amount);
}

#[tokio::test]
async fn test_login_failure_aborts_without_touching_catalog() {
    let harness = TestHarness::new();
    harness
        .storefront
        .set_pages(vec![vec![fixtures::dropped_snapshot("PO-1", 5, fixtures::now())]])
        .await;
    harness.storefront.fail_logins(3).await;

    let report = harness
        .create_orchestrator(PipelineConfig::default())
        .run(RunTrigger::Manual)
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Failed);
    assert_eq!(report.outcome(), RunOutcome::Aborted);
    assert!(report.abort_cause.unwrap().contains("3 attempts"));
    assert_eq!(harness.storefront.login_count().await, 3);
    assert_eq!(harness.storefront.listed_pages().await, 0);
    assert_eq!(harness.catalog.list(&Default::default()).unwrap().len(), 0);
}

#[tokio::test]
async fn test_session_expiry_mid_run_invalidates_session() {
    let harness = TestHarness::new();
    harness
        .storefront
        .set_pages(vec![vec![fixtures::dropped_snapshot("PO-1", 5, fixtures::now())]])
        .await;
    harness
        .storefront
        .script_attempt("PO-1", MockAttempt::RequestError(StorefrontError::SessionExpired))
        .await;
    let orchestrator = harness.create_orchestrator(PipelineConfig::default());

    let report = orchestrator.run(RunTrigger::Manual).await.unwrap();

    assert_eq!(report.phase, RunPhase::Failed);
    assert!(!harness.session_path().exists());
    // The in-flight attempt is picked up by the next run
    assert_eq!(harness.state_of("PO-1"), AdjustmentState::Attempted);

    let next = orchestrator.run(RunTrigger::Manual).await.unwrap();
    assert_eq!(next.succeeded, 1);
    let order = harness.catalog.get("PO-1").unwrap().unwrap();
    assert_eq!(order.adjustment_state, AdjustmentState::Succeeded);
    assert_eq!(order.attempt_count, 1);
}

#[tokio::test]
async fn test_page_error_truncates_scan_but_keeps_orders() {
    let harness = TestHarness::new();
    let now = fixtures::now();
    harness
        .storefront
        .set_pages(vec![
            vec![fixtures::dropped_snapshot("PO-1", 5, now)],
            vec![fixtures::dropped_snapshot("PO-2", 6, now)],
        ])
        .await;
    harness
        .storefront
        .fail_page(1, StorefrontError::Timeout("order list".to_string()))
        .await;

    let report = harness
        .create_orchestrator(PipelineConfig::default())
        .run(RunTrigger::Manual)
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Done);
    assert_eq!(report.orders_scanned, 1);
    assert!(report.scan_truncated.unwrap().starts_with("page 1"));
    assert_eq!(harness.state_of("PO-1"), AdjustmentState::Succeeded);
    assert!(harness.catalog.get("PO-2").unwrap().is_none());
}

#[tokio::test]
async fn test_window_expiry_ends_retry_cycle() {
    let harness = TestHarness::new();
    let now = fixtures::now();
    harness
        .storefront
        .set_pages(vec![vec![fixtures::dropped_snapshot("PO-1", 29, now)]])
        .await;
    harness.always_ambiguous("PO-1", 3).await;
    let orchestrator = harness.create_orchestrator(PipelineConfig::default());

    orchestrator.run(RunTrigger::Manual).await.unwrap();
    assert_eq!(harness.state_of("PO-1"), AdjustmentState::FailedRetryable);

    harness.clock.advance(chrono::Duration::days(2));
    harness.storefront.clear_recorded().await;
    orchestrator.run(RunTrigger::Manual).await.unwrap();

    let order = harness.catalog.get("PO-1").unwrap().unwrap();
    assert_eq!(order.adjustment_state, AdjustmentState::FailedTerminal);
    assert_eq!(order.reason.as_deref(), Some("window_expired"));
    assert!(harness.storefront.adjustment_requests().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let harness = TestHarness::new();
    let now = fixtures::now();
    harness
        .storefront
        .set_pages(vec![vec![
            fixtures::dropped_snapshot("PO-1", 5, now),
            fixtures::dropped_snapshot("PO-2", 6, now),
        ]])
        .await;
    let orchestrator = harness.create_orchestrator_with_pacer(PipelineConfig::default(), slow_pacer());

    let (first, second) = tokio::join!(orchestrator.run(RunTrigger::Scheduled), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.run(RunTrigger::Manual).await
    });

    assert_eq!(first.unwrap().succeeded, 2);
    assert!(matches!(second, Err(PipelineError::AlreadyRunning)));
}

#[tokio::test]
async fn test_second_process_waits_for_run_lock() {
    let harness = TestHarness::new();
    let now = fixtures::now();
    harness
        .storefront
        .set_pages(vec![vec![
            fixtures::dropped_snapshot("PO-1", 5, now),
            fixtures::dropped_snapshot("PO-2", 6, now),
        ]])
        .await;
    let (scheduled, _) = harness.create_process(slow_pacer());
    let (manual, _) = harness.create_process(Pacer::disabled());

    let (first, second) = tokio::join!(scheduled.run(RunTrigger::Scheduled), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        manual.run(RunTrigger::Manual).await
    });

    assert_eq!(first.unwrap().succeeded, 2);
    assert!(matches!(second, Err(PipelineError::AlreadyRunning)));
    assert_eq!(harness.storefront.adjustment_requests().await.len(), 2);
}

#[tokio::test]
async fn test_stale_process_does_not_undo_other_runs() {
    let harness = TestHarness::new();
    let now = fixtures::now();
    harness
        .storefront
        .set_pages(vec![vec![
            fixtures::dropped_snapshot("PO-1", 5, now),
            fixtures::snapshot("PO-2", 6, now),
        ]])
        .await;
    // Opened before the other process writes anything
    let (schedule, _) = harness.create_process(Pacer::disabled());
    let (manual, _) = harness.create_process(Pacer::disabled());

    let report = manual.run(RunTrigger::Manual).await.unwrap();
    assert_eq!(report.succeeded, 1);
    harness.storefront.clear_recorded().await;

    let report = schedule.run(RunTrigger::Scheduled).await.unwrap();

    assert_eq!(report.eligible, 0);
    assert!(harness.storefront.adjustment_requests().await.is_empty());
    let on_disk = JsonOrderCatalog::open(&harness.temp_dir.path().join("orders.json")).unwrap();
    assert_eq!(
        on_disk.get("PO-1").unwrap().unwrap().adjustment_state,
        AdjustmentState::Succeeded
    );
    assert_eq!(
        on_disk.get("PO-2").unwrap().unwrap().adjustment_state,
        AdjustmentState::Ineligible
    );
}

#[tokio::test]
async fn test_shutdown_stops_at_order_boundary() {
    let harness = TestHarness::new();
    let now = fixtures::now();
    harness
        .storefront
        .set_pages(vec![vec![
            fixtures::dropped_snapshot("PO-1", 7, now),
            fixtures::dropped_snapshot("PO-2", 6, now),
            fixtures::dropped_snapshot("PO-3", 5, now),
        ]])
        .await;
    let orchestrator = harness.create_orchestrator_with_pacer(PipelineConfig::default(), slow_pacer());

    let (report, _) = tokio::join!(orchestrator.run(RunTrigger::Manual), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.shutdown();
    });
    let report = report.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.deferred, 2);
    assert_eq!(report.outcome(), RunOutcome::Degraded);
    assert_eq!(harness.state_of("PO-1"), AdjustmentState::Succeeded);
    assert_eq!(harness.state_of("PO-2"), AdjustmentState::Eligible);
}

#[tokio::test]
async fn test_run_is_recorded_and_next_run_planned() {
    let harness = TestHarness::new();
    harness
        .storefront
        .set_pages(vec![vec![fixtures::dropped_snapshot("PO-1", 5, fixtures::now())]])
        .await;

    let history_path = harness.temp_dir.path().join("runs.json");
    let scheduler = Arc::new(
        Scheduler::new(
            SchedulerConfig {
                model: ModelKind::Frequency,
                utc_offset_minutes: Some(0),
                ..Default::default()
            },
            RunHistory::open(&history_path).unwrap(),
        )
        .unwrap(),
    );
    let orchestrator = harness
        .create_orchestrator(PipelineConfig::default())
        .with_scheduler(scheduler.clone());

    let report = orchestrator.run(RunTrigger::Manual).await.unwrap();

    assert!(report.next_run_at.is_some());
    let records = RunHistory::open(&history_path).unwrap().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, report.run_id);
    assert_eq!(records[0].adjustments_succeeded, 1);
    assert_eq!(records[0].outcome, RunOutcome::Succeeded);
}
