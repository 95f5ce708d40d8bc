//! Run orchestrator: drives one pass over the order history.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::config::PipelineConfig;
use super::lock::RunLock;
use super::types::{PipelineError, RunPhase, RunReport, RunTrigger, ScanError};
use crate::catalog::{OrderCatalog, OrderFilter, OrderReportWriter, Transition};
use crate::clock::Clock;
use crate::executor::{AdjustmentExecutor, AttemptStatus};
use crate::order::{evaluate_with_window, AdjustmentState, EligibilityVerdict, IneligibleReason, Order};
use crate::pacing::Pacer;
use crate::scheduler::Scheduler;
use crate::session::{Session, SessionError, SessionManager};
use crate::storefront::{order_pages, Storefront, StorefrontError};

/// Reason recorded when an in-progress order ages out of the window.
pub const REASON_WINDOW_EXPIRED: &str = "window_expired";
/// Reason recorded when an order used up its attempts.
pub const REASON_MAX_RETRIES: &str = "max_retries";

/// How processing left one order.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Disposition {
    Succeeded { refund: Option<Decimal> },
    Failed { not_available: bool },
    Retrying,
}

/// Reason kept on an ineligible order. Window expiry drops the order's age
/// so the stored reason stays the same from one day to the next.
fn stored_reason(reason: &IneligibleReason) -> String {
    match reason {
        IneligibleReason::WindowExpired { .. } => REASON_WINDOW_EXPIRED.to_string(),
        other => other.to_string(),
    }
}

/// Clears the running flag however the run ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives the catalog through one run: log in, scan the order history,
/// request adjustments for eligible orders, and record the outcome.
///
/// Only one run executes at a time. Every state change is persisted before
/// the next storefront action, so a run can be interrupted at any point and
/// the next one resumes where it stopped.
pub struct Orchestrator {
    config: PipelineConfig,
    max_pages: u32,
    catalog: Arc<dyn OrderCatalog>,
    sessions: SessionManager,
    storefront: Arc<dyn Storefront>,
    executor: AdjustmentExecutor,
    reports: Option<OrderReportWriter>,
    scheduler: Option<Arc<Scheduler>>,
    run_lock: Option<RunLock>,
    clock: Arc<dyn Clock>,
    pacer: Pacer,
    /// Whether a run is in progress.
    running: AtomicBool,
    /// Set once shutdown is requested; checked between orders.
    cancelled: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        catalog: Arc<dyn OrderCatalog>,
        sessions: SessionManager,
        storefront: Arc<dyn Storefront>,
        executor: AdjustmentExecutor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            max_pages: 20,
            catalog,
            sessions,
            storefront,
            executor,
            reports: None,
            scheduler: None,
            run_lock: None,
            clock,
            pacer: Pacer::disabled(),
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Write a status file per order after every transition.
    pub fn with_reports(mut self, reports: OrderReportWriter) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Record finished runs in the scheduler and plan the next one.
    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Hold `lock` for every run, so other processes on the same data
    /// directory wait their turn.
    pub fn with_run_lock(mut self, lock: RunLock) -> Self {
        self.run_lock = Some(lock);
        self
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    /// Upper bound on order-history pages read per scan.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver notified once shutdown is requested.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Request a graceful stop.
    ///
    /// A run in progress finishes the order it is working on, then reports.
    pub fn shutdown(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!("Shutdown requested");
        }
        let _ = self.shutdown_tx.send(());
    }

    /// Execute one run.
    ///
    /// Failures inside the run are reported through `RunReport::abort_cause`
    /// with phase `Failed`; only a run that could not start returns `Err`.
    pub async fn run(&self, trigger: RunTrigger) -> Result<RunReport, PipelineError> {
        if self.is_shutting_down() {
            return Err(PipelineError::ShuttingDown);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Run requested while another run is in progress");
            return Err(PipelineError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        let _lock = match &self.run_lock {
            Some(lock) => match lock.try_acquire().map_err(PipelineError::Lock)? {
                Some(held) => Some(held),
                None => {
                    warn!(
                        "Run requested while another process holds {}",
                        lock.path().display()
                    );
                    return Err(PipelineError::AlreadyRunning);
                }
            },
            None => None,
        };

        let mut report = RunReport::new(trigger, self.clock.now());
        info!("Run {} started ({})", report.run_id, trigger);

        if let Err(e) = self.execute(&mut report).await {
            error!(
                "Run {} aborted during {}: {}",
                report.run_id, report.phase, e
            );
            if matches!(e, PipelineError::Session(_)) && report.phase != RunPhase::Init {
                if let Err(e) = self.sessions.invalidate() {
                    warn!("Failed to invalidate session: {}", e);
                }
            }
            report.abort_cause = Some(e.to_string());
            report.phase = RunPhase::Failed;
        }

        self.finish(&mut report);
        Ok(report)
    }

    fn enter(&self, report: &mut RunReport, phase: RunPhase) {
        debug!("Run {}: {} -> {}", report.run_id, report.phase, phase);
        report.phase = phase;
    }

    async fn execute(&self, report: &mut RunReport) -> Result<(), PipelineError> {
        self.catalog.reload()?;
        let session = self.sessions.acquire().await?;
        self.enter(report, RunPhase::Authenticated);

        self.enter(report, RunPhase::Scanning);
        self.scan(&session, report).await?;
        let candidates = self.evaluate(report)?;

        self.enter(report, RunPhase::Processing);
        self.process(&session, candidates, report).await
    }

    /// Merge every listed order into the catalog.
    ///
    /// A failing page ends the scan but keeps what was already merged.
    async fn scan(&self, session: &Session, report: &mut RunReport) -> Result<(), PipelineError> {
        let now = self.clock.now();
        let mut pages = order_pages(self.storefront.as_ref(), session, self.max_pages);
        let mut page_index = 0u32;

        while let Some(page) = pages.next().await {
            match page {
                Ok(page) => {
                    for snapshot in page.orders {
                        let id = snapshot.id.clone();
                        let merged = self.catalog.merge_snapshot(snapshot, now)?;
                        debug!("Order {}: {:?}", id, merged);
                        report.orders_scanned += 1;
                    }
                    if page.next.is_some() {
                        self.pacer.long("before next order page").await;
                    }
                }
                Err(StorefrontError::SessionExpired) => {
                    return Err(SessionError::Expired.into());
                }
                Err(source) => {
                    let err = ScanError {
                        page: page_index,
                        source,
                    };
                    warn!("Order scan truncated at {}", err);
                    report.scan_truncated = Some(err.to_string());
                }
            }
            page_index += 1;
        }

        info!(
            "Scanned {} orders over {} pages",
            report.orders_scanned, page_index
        );
        Ok(())
    }

    /// Re-evaluate every non-terminal order and return the ones to process,
    /// oldest purchase first.
    fn evaluate(&self, report: &mut RunReport) -> Result<Vec<Order>, PipelineError> {
        let now = self.clock.now();
        let today = now.date_naive();
        let window = self.config.eligibility_window_days;
        let mut candidates = Vec::new();

        for order in self.catalog.list(&OrderFilter::new().non_terminal())? {
            let verdict = evaluate_with_window(&order, today, window);

            match order.adjustment_state {
                AdjustmentState::Attempted | AdjustmentState::FailedRetryable => {
                    if let EligibilityVerdict::Ineligible {
                        reason: IneligibleReason::WindowExpired { age_days },
                    } = verdict
                    {
                        info!(
                            "Order {} left the adjustment window ({} days old)",
                            order.id, age_days
                        );
                        self.transition(
                            &order.id,
                            Transition::to(AdjustmentState::FailedTerminal)
                                .with_reason(REASON_WINDOW_EXPIRED),
                        )?;
                    } else if order.adjustment_state == AdjustmentState::Attempted
                        || verdict.is_eligible()
                    {
                        candidates.push(order);
                    }
                }
                _ => {
                    let transition = match &verdict {
                        EligibilityVerdict::Eligible { savings } => {
                            debug!("Order {} eligible, savings {}", order.id, savings);
                            Transition::to(AdjustmentState::Eligible)
                        }
                        EligibilityVerdict::Ineligible { reason } => {
                            Transition::to(AdjustmentState::Ineligible)
                                .with_reason(stored_reason(reason))
                        }
                    };

                    let unchanged = order.adjustment_state == transition.to
                        && order.reason == transition.reason;
                    let order = if unchanged {
                        order
                    } else {
                        self.transition(&order.id, transition)?
                    };

                    if order.adjustment_state == AdjustmentState::Eligible {
                        candidates.push(order);
                    }
                }
            }
        }

        candidates.sort_by(|a, b| {
            a.purchase_date
                .cmp(&b.purchase_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        report.eligible = candidates.len() as u32;
        info!("{} orders eligible for adjustment", report.eligible);
        Ok(candidates)
    }

    async fn process(
        &self,
        session: &Session,
        candidates: Vec<Order>,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let total = candidates.len();

        for (index, order) in candidates.into_iter().enumerate() {
            if index >= self.config.max_orders_per_run {
                report.deferred = (total - index) as u32;
                info!(
                    "Per-run limit of {} orders reached, {} deferred",
                    self.config.max_orders_per_run, report.deferred
                );
                break;
            }
            if index > 0 {
                self.pacer.long("between orders").await;
            }
            if self.is_shutting_down() {
                report.cancelled = true;
                report.deferred = (total - index) as u32;
                info!("Stopping before order {}, {} deferred", order.id, report.deferred);
                break;
            }

            match self.process_order(session, order).await? {
                Disposition::Succeeded { refund } => {
                    report.succeeded += 1;
                    report.refunded += refund.unwrap_or_default();
                }
                Disposition::Failed { not_available } => {
                    report.failed += 1;
                    if not_available {
                        report.not_available += 1;
                    }
                }
                Disposition::Retrying => report.retrying += 1,
            }
        }
        Ok(())
    }

    /// Attempt one order up to the per-run limit, persisting every result.
    async fn process_order(
        &self,
        session: &Session,
        mut order: Order,
    ) -> Result<Disposition, PipelineError> {
        let max_attempts = self.config.max_attempts;
        let savings = order
            .current_price
            .map(|current| order.paid_price - current)
            .filter(|s| *s > Decimal::ZERO);

        let mut in_flight = order.adjustment_state == AdjustmentState::Attempted;
        if in_flight {
            info!("Order {}: resuming interrupted attempt", order.id);
        }

        for round in 1..=self.config.max_attempts_per_run {
            if !in_flight {
                if order.attempt_count >= max_attempts {
                    self.give_up(&order.id, order.reason.as_deref())?;
                    return Ok(Disposition::Failed {
                        not_available: false,
                    });
                }
                if round > 1 {
                    self.pacer.short("before retrying order").await;
                }
                order = self.transition(&order.id, Transition::to(AdjustmentState::Attempted))?;
            }
            in_flight = false;

            info!(
                "Order {}: attempt {}/{}",
                order.id, order.attempt_count, max_attempts
            );
            let result = self.executor.attempt(&order, session).await?;
            info!("Order {}: {}", order.id, result.status);

            let not_available = result.status.is_not_available();
            match result.status {
                AttemptStatus::Succeeded { refund } => {
                    let refund = refund.or(savings);
                    self.transition(
                        &order.id,
                        Transition::to(AdjustmentState::Succeeded)
                            .with_refund(refund)
                            .with_tracking(result.tracking_ref),
                    )?;
                    return Ok(Disposition::Succeeded { refund });
                }
                AttemptStatus::Terminal { reason } => {
                    self.transition(
                        &order.id,
                        Transition::to(AdjustmentState::FailedTerminal)
                            .with_reason(reason)
                            .with_tracking(result.tracking_ref),
                    )?;
                    return Ok(Disposition::Failed { not_available });
                }
                AttemptStatus::Retryable { reason } => {
                    if order.attempt_count >= max_attempts {
                        self.give_up(&order.id, Some(&reason))?;
                        return Ok(Disposition::Failed {
                            not_available: false,
                        });
                    }
                    order = self.transition(
                        &order.id,
                        Transition::to(AdjustmentState::FailedRetryable)
                            .with_reason(reason)
                            .with_tracking(result.tracking_ref),
                    )?;
                }
            }
        }

        Ok(Disposition::Retrying)
    }

    fn give_up(&self, id: &str, last_reason: Option<&str>) -> Result<Order, PipelineError> {
        warn!(
            "Order {}: giving up after {} attempts (last: {})",
            id,
            self.config.max_attempts,
            last_reason.unwrap_or("none")
        );
        self.transition(
            id,
            Transition::to(AdjustmentState::FailedTerminal).with_reason(REASON_MAX_RETRIES),
        )
    }

    /// Persist a state change, then refresh the order's status file.
    fn transition(&self, id: &str, transition: Transition) -> Result<Order, PipelineError> {
        let now = self.clock.now();
        let order = self.catalog.transition(id, transition, now)?;
        if let Some(reports) = &self.reports {
            if let Err(e) = reports.write(&order, now) {
                warn!("Failed to write status file for order {}: {}", id, e);
            }
        }
        Ok(order)
    }

    /// Record the run and plan the next one.
    fn finish(&self, report: &mut RunReport) {
        let now = self.clock.now();
        report.finished_at = now;
        if !report.is_aborted() {
            self.enter(report, RunPhase::Reporting);
        }

        if let Some(scheduler) = &self.scheduler {
            if let Err(e) = scheduler.record(report.to_record()) {
                let e = PipelineError::from(e);
                error!("Run {} could not be recorded: {}", report.run_id, e);
                report.abort_cause.get_or_insert_with(|| e.to_string());
                report.phase = RunPhase::Failed;
            }
            let plan = scheduler.next_run_time(now);
            info!("Next run planned for {}", plan);
            report.next_run_at = Some(plan.at);
        }

        if !report.is_aborted() {
            self.enter(report, RunPhase::Done);
        }
        info!("{}", report);
    }
}
