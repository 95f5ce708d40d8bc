//! Picks the next run time and drives scheduled runs.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, DurationRound, FixedOffset, Local, Timelike, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::config::SchedulerConfig;
use super::history::{RunHistory, RunRecord};
use super::model::{create_model, success_rate, training_set, Features, Sample, SuccessModel};
use crate::persist::PersistenceError;
use crate::pipeline::{Orchestrator, PipelineError, RunTrigger};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid UTC offset: {0} minutes")]
    InvalidOffset(i32),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Why a run was placed where it was.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanReason {
    /// The model's best slot inside the horizon.
    Model { probability: f64 },
    /// No run history yet.
    ColdStart,
    /// The model could not score the candidate slots.
    ModelUnavailable,
    /// Active hours leave no slot inside the horizon.
    NoSlot,
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanReason::Model { probability } => {
                write!(f, "best slot, p={:.2}", probability)
            }
            PlanReason::ColdStart => f.write_str("no history, default interval"),
            PlanReason::ModelUnavailable => f.write_str("model unavailable, default interval"),
            PlanReason::NoSlot => f.write_str("no slot in active hours, default interval"),
        }
    }
}

/// When the next run should start.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub at: DateTime<Utc>,
    pub reason: PlanReason,
}

impl RunPlan {
    pub fn is_fallback(&self) -> bool {
        !matches!(self.reason, PlanReason::Model { .. })
    }
}

impl fmt::Display for RunPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.at.format("%Y-%m-%d %H:%M UTC"), self.reason)
    }
}

/// Chooses run times from a learned success model over past runs.
pub struct Scheduler {
    config: SchedulerConfig,
    history: RunHistory,
    model: Mutex<Box<dyn SuccessModel>>,
    offset: FixedOffset,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("runs", &self.history.len())
            .field("offset", &self.offset)
            .finish()
    }
}

impl Scheduler {
    /// Build a scheduler and train its model on the existing history.
    pub fn new(config: SchedulerConfig, history: RunHistory) -> Result<Self, SchedulerError> {
        let offset = match config.utc_offset_minutes {
            Some(minutes) => minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or(SchedulerError::InvalidOffset(minutes))?,
            None => *Local::now().offset(),
        };

        let mut model = create_model(config.model);
        let records = history.records();
        model.fit(&training_set(&records, config.recent_window, offset));
        info!(
            "Scheduler ready: {} model trained on {} runs",
            model.name(),
            records.len()
        );

        Ok(Self {
            config,
            history,
            model: Mutex::new(model),
            offset,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    fn model(&self) -> MutexGuard<'_, Box<dyn SuccessModel>> {
        self.model.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a finished run and feed it to the model.
    ///
    /// Runs another process recorded since the last call are picked up
    /// first, retraining the model from scratch.
    pub fn record(&self, record: RunRecord) -> Result<(), SchedulerError> {
        let known = self.history.len();
        let on_disk = self.history.reload()?;
        if on_disk != known {
            info!(
                "Run history changed on disk ({} -> {} runs), retraining",
                known, on_disk
            );
            let records = self.history.records();
            self.model()
                .fit(&training_set(&records, self.config.recent_window, self.offset));
        }

        let earlier = self.history.recent(self.config.recent_window);
        let sample = Sample {
            features: Features::at(
                record.started_at.with_timezone(&self.offset),
                success_rate(&earlier),
            ),
            success: record.outcome.training_label(),
        };

        self.history.append(record)?;
        self.model().update(&sample);
        Ok(())
    }

    /// Pick the next run start after `now`.
    ///
    /// Candidates are whole-hour slots in `(now + min_spacing, now + horizon]`
    /// whose local hour lies in the active window. The most likely slot wins,
    /// the earliest one on ties, and a random offset inside the slot is added.
    pub fn next_run_time(&self, now: DateTime<Utc>) -> RunPlan {
        if self.history.is_empty() {
            return self.fallback(now, PlanReason::ColdStart);
        }

        let slots = self.candidate_slots(now);
        if slots.is_empty() {
            return self.fallback(now, PlanReason::NoSlot);
        }

        let recent = success_rate(&self.history.recent(self.config.recent_window));
        let model = self.model();

        let mut best: Option<(DateTime<Utc>, f64)> = None;
        for slot in slots {
            let features = Features::at(slot.with_timezone(&self.offset), recent);
            let Some(p) = model.predict(&features).filter(|p| p.is_finite()) else {
                warn!("{} model could not score slot {}", model.name(), slot);
                return self.fallback(now, PlanReason::ModelUnavailable);
            };
            debug!("Slot {} scored {:.3}", slot, p);
            if best.is_none_or(|(_, top)| p > top) {
                best = Some((slot, p));
            }
        }

        match best {
            Some((slot, probability)) => RunPlan {
                at: slot + self.jitter(),
                reason: PlanReason::Model { probability },
            },
            None => self.fallback(now, PlanReason::NoSlot),
        }
    }

    fn candidate_slots(&self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let Ok(hour_start) = now.duration_trunc(Duration::hours(1)) else {
            return Vec::new();
        };
        let earliest = now + Duration::hours(i64::from(self.config.min_spacing_hours));
        let latest = now + Duration::hours(i64::from(self.config.horizon_hours));
        let [first_hour, last_hour] = self.config.active_hours;

        (1..=i64::from(self.config.horizon_hours))
            .map(|h| hour_start + Duration::hours(h))
            .filter(|slot| *slot > earliest && *slot <= latest)
            .filter(|slot| {
                let hour = slot.with_timezone(&self.offset).hour();
                (first_hour..=last_hour).contains(&hour)
            })
            .collect()
    }

    fn jitter(&self) -> Duration {
        let max = i64::from(self.config.slot_jitter_minutes);
        if max == 0 {
            return Duration::zero();
        }
        Duration::minutes(rand::rng().random_range(0..=max))
    }

    fn fallback(&self, now: DateTime<Utc>, reason: PlanReason) -> RunPlan {
        RunPlan {
            at: now + Duration::hours(i64::from(self.config.default_interval_hours)),
            reason,
        }
    }

    /// Run the orchestrator at each planned time until shutdown.
    ///
    /// Runs never overlap: the next plan is only computed once the previous
    /// run has returned.
    pub async fn run_loop(
        &self,
        orchestrator: &Orchestrator,
        run_first: bool,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut planned = None;
        if run_first {
            match self.run_once(orchestrator).await {
                ControlFlow::Continue(next) => planned = next,
                ControlFlow::Break(()) => return,
            }
        }

        loop {
            let now = orchestrator.now();
            let at = self.next_wake(now, planned.take());

            let wait = (at - now).to_std().unwrap_or(StdDuration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => {
                    info!("Scheduler shutting down");
                    return;
                }
            }

            match self.run_once(orchestrator).await {
                ControlFlow::Continue(next) => planned = next,
                ControlFlow::Break(()) => return,
            }
        }
    }

    /// When to wake next: the time the last run already planned and
    /// reported, or a fresh plan when there is none.
    fn next_wake(&self, now: DateTime<Utc>, planned: Option<DateTime<Utc>>) -> DateTime<Utc> {
        match planned {
            Some(at) => {
                info!("Next run at {}", at.format("%Y-%m-%d %H:%M UTC"));
                at
            }
            None => {
                let plan = self.next_run_time(now);
                info!("Next run at {}", plan);
                plan.at
            }
        }
    }

    /// Breaks when the loop should stop; otherwise carries the next run
    /// time the report planned.
    async fn run_once(
        &self,
        orchestrator: &Orchestrator,
    ) -> ControlFlow<(), Option<DateTime<Utc>>> {
        match orchestrator.run(RunTrigger::Scheduled).await {
            Ok(report) => {
                info!("{}", report);
                ControlFlow::Continue(report.next_run_at)
            }
            Err(PipelineError::ShuttingDown) => {
                info!("Scheduler shutting down");
                ControlFlow::Break(())
            }
            Err(e) => {
                error!("Scheduled run did not start: {}", e);
                ControlFlow::Continue(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::config::ModelKind;
    use crate::scheduler::history::RunOutcome;
    use crate::testing::fixtures;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            model: ModelKind::Frequency,
            utc_offset_minutes: Some(0),
            slot_jitter_minutes: 0,
            ..Default::default()
        }
    }

    fn scheduler(dir: &TempDir, config: SchedulerConfig) -> Scheduler {
        let history = RunHistory::open(&dir.path().join("runs.json")).unwrap();
        Scheduler::new(config, history).unwrap()
    }

    fn record_at(started_at: DateTime<Utc>, outcome: RunOutcome) -> RunRecord {
        RunRecord {
            id: Uuid::new_v4(),
            started_at,
            finished_at: started_at + Duration::minutes(3),
            orders_scanned: 2,
            eligible: 0,
            adjustments_succeeded: 0,
            adjustments_failed: 0,
            deferred: 0,
            outcome,
        }
    }

    fn at_hour(days_ago: i64, hour: u32) -> DateTime<Utc> {
        let day = (fixtures::now() - Duration::days(days_ago)).date_naive();
        day.and_hms_opt(hour, 0, 0).unwrap().and_utc()
    }

    #[test]
    fn test_cold_start_uses_default_interval() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(&dir, config());

        let plan = scheduler.next_run_time(fixtures::now());

        assert_eq!(plan.reason, PlanReason::ColdStart);
        assert_eq!(plan.at, fixtures::now() + Duration::hours(24));
        assert!(plan.is_fallback());
    }

    #[test]
    fn test_picks_hour_with_best_history() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(&dir, config());
        for day in (1..=5).rev() {
            scheduler
                .record(record_at(at_hour(day, 10), RunOutcome::Aborted))
                .unwrap();
            scheduler
                .record(record_at(at_hour(day, 19), RunOutcome::Succeeded))
                .unwrap();
        }

        // now = 12:00; earliest slot is 17:00
        let plan = scheduler.next_run_time(fixtures::now());

        assert!(!plan.is_fallback());
        assert_eq!(plan.at, at_hour(0, 19));
    }

    #[test]
    fn test_respects_spacing_and_horizon() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(
            &dir,
            SchedulerConfig {
                active_hours: [0, 23],
                ..config()
            },
        );
        scheduler
            .record(record_at(at_hour(1, 12), RunOutcome::Idle))
            .unwrap();

        let now = fixtures::now() + Duration::minutes(20);
        for _ in 0..10 {
            let plan = scheduler.next_run_time(now);
            assert!(plan.at > now + Duration::hours(4));
            assert!(plan.at <= now + Duration::hours(24));
        }
    }

    #[test]
    fn test_ties_pick_earliest_slot() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(&dir, config());
        // Only 03:00 has data, so every Sunday slot scores the same
        scheduler
            .record(record_at(at_hour(7, 3), RunOutcome::Succeeded))
            .unwrap();

        let plan = scheduler.next_run_time(fixtures::now());

        // 17:00 is the first slot past the four hour spacing
        assert_eq!(plan.at, at_hour(0, 17));
    }

    #[test]
    fn test_no_slot_in_active_hours_falls_back() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(
            &dir,
            SchedulerConfig {
                horizon_hours: 5,
                active_hours: [9, 10],
                ..config()
            },
        );
        scheduler
            .record(record_at(at_hour(1, 9), RunOutcome::Idle))
            .unwrap();

        let plan = scheduler.next_run_time(fixtures::now());

        assert_eq!(plan.reason, PlanReason::NoSlot);
        assert_eq!(plan.at, fixtures::now() + Duration::hours(24));
    }

    #[test]
    fn test_jitter_stays_inside_slot() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(
            &dir,
            SchedulerConfig {
                slot_jitter_minutes: 15,
                ..config()
            },
        );
        scheduler
            .record(record_at(at_hour(1, 19), RunOutcome::Succeeded))
            .unwrap();

        for _ in 0..20 {
            let plan = scheduler.next_run_time(fixtures::now());
            let slot = plan.at.duration_trunc(Duration::hours(1)).unwrap();
            assert_eq!(slot, at_hour(0, 19));
            assert!(plan.at - slot <= Duration::minutes(15));
        }
    }

    #[test]
    fn test_record_persists_and_retrains_on_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let scheduler = scheduler(&dir, config());
            scheduler
                .record(record_at(at_hour(2, 19), RunOutcome::Succeeded))
                .unwrap();
        }

        let reopened = scheduler(&dir, config());

        assert_eq!(reopened.history().len(), 1);
        assert!(!reopened.next_run_time(fixtures::now()).is_fallback());
    }

    #[test]
    fn test_record_keeps_runs_from_other_writer() {
        let dir = TempDir::new().unwrap();
        let ours = scheduler(&dir, config());
        let theirs = scheduler(&dir, config());

        theirs
            .record(record_at(at_hour(1, 19), RunOutcome::Succeeded))
            .unwrap();
        ours.record(record_at(at_hour(0, 9), RunOutcome::Idle))
            .unwrap();

        assert_eq!(ours.history().len(), 2);
        let reopened = RunHistory::open(&dir.path().join("runs.json")).unwrap();
        assert_eq!(reopened.len(), 2);
        // Retrained on the other writer's evening run
        assert_eq!(ours.next_run_time(fixtures::now()).at, at_hour(0, 19));
    }

    #[test]
    fn test_wakes_at_reported_plan() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(
            &dir,
            SchedulerConfig {
                slot_jitter_minutes: 15,
                ..config()
            },
        );
        scheduler
            .record(record_at(at_hour(1, 19), RunOutcome::Succeeded))
            .unwrap();
        let reported = at_hour(0, 19) + Duration::minutes(7);

        for _ in 0..10 {
            assert_eq!(scheduler.next_wake(fixtures::now(), Some(reported)), reported);
        }
        let fresh = scheduler.next_wake(fixtures::now(), None);
        assert_eq!(fresh.duration_trunc(Duration::hours(1)).unwrap(), at_hour(0, 19));
    }

    #[test]
    fn test_invalid_offset_is_rejected() {
        let dir = TempDir::new().unwrap();
        let history = RunHistory::open(&dir.path().join("runs.json")).unwrap();
        let result = Scheduler::new(
            SchedulerConfig {
                utc_offset_minutes: Some(24 * 60),
                ..config()
            },
            history,
        );
        assert!(matches!(result, Err(SchedulerError::InvalidOffset(1440))));
    }

    #[test]
    fn test_plan_display() {
        let plan = RunPlan {
            at: at_hour(0, 19),
            reason: PlanReason::Model { probability: 0.8 },
        };
        assert_eq!(plan.to_string(), "2024-03-10 19:00 UTC (best slot, p=0.80)");
    }
}
