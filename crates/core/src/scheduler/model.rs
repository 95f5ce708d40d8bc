//! Success models: estimate how likely a run started at a given time is to
//! go through unhindered.

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, FixedOffset, Timelike};

use super::config::ModelKind;
use super::history::RunRecord;

/// Prior used for the recent success rate when there is no earlier run.
const NEUTRAL_RATE: f64 = 0.5;

/// Inputs describing one candidate start time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Features {
    /// Local hour of day, 0..24.
    pub hour: u32,
    /// Local weekday, Monday = 0.
    pub weekday: u32,
    /// Fraction of the preceding runs that went through.
    pub recent_success_rate: f64,
}

impl Features {
    pub fn at(time: DateTime<FixedOffset>, recent_success_rate: f64) -> Self {
        Self {
            hour: time.hour(),
            weekday: time.weekday().num_days_from_monday(),
            recent_success_rate,
        }
    }

    /// Cyclic encoding so 23:00 sits next to 00:00 and Sunday next to Monday.
    fn vector(&self) -> [f64; 6] {
        let hour = 2.0 * PI * f64::from(self.hour) / 24.0;
        let day = 2.0 * PI * f64::from(self.weekday) / 7.0;
        [
            1.0,
            hour.sin(),
            hour.cos(),
            day.sin(),
            day.cos(),
            self.recent_success_rate,
        ]
    }
}

/// One labelled observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub features: Features,
    pub success: bool,
}

/// Fraction of `records` whose outcome counts as a success.
pub fn success_rate(records: &[RunRecord]) -> f64 {
    if records.is_empty() {
        return NEUTRAL_RATE;
    }
    let ok = records
        .iter()
        .filter(|r| r.outcome.training_label())
        .count();
    ok as f64 / records.len() as f64
}

/// Turn a run history into samples, each using the `window` runs before it
/// for its recent success rate.
pub fn training_set(records: &[RunRecord], window: usize, offset: FixedOffset) -> Vec<Sample> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let earlier = &records[i.saturating_sub(window)..i];
            Sample {
                features: Features::at(
                    record.started_at.with_timezone(&offset),
                    success_rate(earlier),
                ),
                success: record.outcome.training_label(),
            }
        })
        .collect()
}

/// Estimates the probability that a run succeeds.
pub trait SuccessModel: Send + Sync {
    fn name(&self) -> &str;

    /// Retrain from scratch on the full sample set.
    fn fit(&mut self, samples: &[Sample]);

    /// Incorporate one new observation.
    fn update(&mut self, sample: &Sample);

    /// Probability in `[0, 1]`, or `None` when the model cannot answer.
    fn predict(&self, features: &Features) -> Option<f64>;
}

/// Build the model selected in configuration.
pub fn create_model(kind: ModelKind) -> Box<dyn SuccessModel> {
    match kind {
        ModelKind::Logistic => Box::new(LogisticModel::new()),
        ModelKind::Frequency => Box::new(FrequencyModel::new()),
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Logistic regression trained with plain stochastic gradient descent.
#[derive(Debug, Clone)]
pub struct LogisticModel {
    weights: [f64; 6],
    learning_rate: f64,
    l2: f64,
    epochs: usize,
    trained: bool,
}

impl Default for LogisticModel {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticModel {
    pub fn new() -> Self {
        Self {
            weights: [0.0; 6],
            learning_rate: 0.1,
            l2: 0.001,
            epochs: 200,
            trained: false,
        }
    }

    fn step(&mut self, sample: &Sample) {
        let x = sample.features.vector();
        let y = if sample.success { 1.0 } else { 0.0 };
        let error = y - self.score(&x);
        for (w, xi) in self.weights.iter_mut().zip(x) {
            *w += self.learning_rate * (error * xi - self.l2 * *w);
        }
    }

    fn score(&self, x: &[f64; 6]) -> f64 {
        let z: f64 = self.weights.iter().zip(x).map(|(w, xi)| w * xi).sum();
        sigmoid(z)
    }
}

impl SuccessModel for LogisticModel {
    fn name(&self) -> &str {
        "logistic"
    }

    fn fit(&mut self, samples: &[Sample]) {
        self.weights = [0.0; 6];
        for _ in 0..self.epochs {
            for sample in samples {
                self.step(sample);
            }
        }
        self.trained = !samples.is_empty();
    }

    fn update(&mut self, sample: &Sample) {
        self.step(sample);
        self.trained = true;
    }

    fn predict(&self, features: &Features) -> Option<f64> {
        if !self.trained {
            return None;
        }
        let p = self.score(&features.vector());
        p.is_finite().then_some(p)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    successes: u32,
    total: u32,
}

impl Tally {
    fn add(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.successes += 1;
        }
    }

    /// Laplace-smoothed success rate.
    fn rate(&self) -> f64 {
        (f64::from(self.successes) + 1.0) / (f64::from(self.total) + 2.0)
    }
}

/// Success counts per local hour and weekday.
#[derive(Debug, Clone)]
pub struct FrequencyModel {
    by_hour: [Tally; 24],
    by_weekday: [Tally; 7],
    total: u32,
}

impl Default for FrequencyModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyModel {
    pub fn new() -> Self {
        Self {
            by_hour: [Tally::default(); 24],
            by_weekday: [Tally::default(); 7],
            total: 0,
        }
    }
}

impl SuccessModel for FrequencyModel {
    fn name(&self) -> &str {
        "frequency"
    }

    fn fit(&mut self, samples: &[Sample]) {
        *self = Self::new();
        for sample in samples {
            self.update(sample);
        }
    }

    fn update(&mut self, sample: &Sample) {
        let f = sample.features;
        if let Some(t) = self.by_hour.get_mut(f.hour as usize) {
            t.add(sample.success);
        }
        if let Some(t) = self.by_weekday.get_mut(f.weekday as usize) {
            t.add(sample.success);
        }
        self.total += 1;
    }

    fn predict(&self, features: &Features) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let hour = self.by_hour.get(features.hour as usize)?.rate();
        let weekday = self.by_weekday.get(features.weekday as usize)?.rate();
        Some(0.75 * hour + 0.25 * weekday)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::history::RunOutcome;
    use crate::testing::fixtures;
    use chrono::Duration;
    use uuid::Uuid;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn features(hour: u32) -> Features {
        Features {
            hour,
            weekday: 2,
            recent_success_rate: 0.5,
        }
    }

    fn record(days_ago: i64, hour: u32, outcome: RunOutcome) -> RunRecord {
        let day = fixtures::now().date_naive() - Duration::days(days_ago);
        let started_at = day.and_hms_opt(hour, 0, 0).unwrap().and_utc();
        RunRecord {
            id: Uuid::new_v4(),
            started_at,
            finished_at: started_at + Duration::minutes(10),
            orders_scanned: 3,
            eligible: 0,
            adjustments_succeeded: 0,
            adjustments_failed: 0,
            deferred: 0,
            outcome,
        }
    }

    /// Ten days of runs: afternoons go through, mornings get blocked.
    fn afternoon_history() -> Vec<RunRecord> {
        let mut records = Vec::new();
        for day in (1..=10).rev() {
            records.push(record(day, 9, RunOutcome::Degraded));
            records.push(record(day, 15, RunOutcome::Succeeded));
        }
        records
    }

    #[test]
    fn test_success_rate() {
        assert_eq!(success_rate(&[]), NEUTRAL_RATE);
        let records = vec![
            record(2, 10, RunOutcome::Idle),
            record(1, 10, RunOutcome::Aborted),
        ];
        assert_eq!(success_rate(&records), 0.5);
    }

    #[test]
    fn test_training_set_uses_preceding_runs() {
        let records = vec![
            record(3, 10, RunOutcome::Aborted),
            record(2, 10, RunOutcome::Aborted),
            record(1, 14, RunOutcome::Succeeded),
        ];

        let samples = training_set(&records, 2, utc());

        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].features.recent_success_rate, NEUTRAL_RATE);
        assert_eq!(samples[2].features.recent_success_rate, 0.0);
        assert_eq!(samples[2].features.hour, 14);
        assert!(samples[2].success);
        assert!(!samples[0].success);
    }

    #[test]
    fn test_features_follow_offset() {
        let time = fixtures::now().with_timezone(&FixedOffset::east_opt(2 * 3600).unwrap());
        let f = Features::at(time, 1.0);
        assert_eq!(f.hour, 14);
        // 2024-03-10 is a Sunday
        assert_eq!(f.weekday, 6);
    }

    #[test]
    fn test_untrained_models_do_not_predict() {
        assert!(LogisticModel::new().predict(&features(12)).is_none());
        assert!(FrequencyModel::new().predict(&features(12)).is_none());
    }

    #[test]
    fn test_logistic_learns_good_hours() {
        let samples = training_set(&afternoon_history(), 5, utc());
        let mut model = LogisticModel::new();
        model.fit(&samples);

        let morning = model.predict(&features(9)).unwrap();
        let afternoon = model.predict(&features(15)).unwrap();

        assert!(afternoon > morning, "{} <= {}", afternoon, morning);
        assert!((0.0..=1.0).contains(&afternoon));
    }

    #[test]
    fn test_frequency_learns_good_hours() {
        let samples = training_set(&afternoon_history(), 5, utc());
        let mut model = FrequencyModel::new();
        model.fit(&samples);

        assert!(model.predict(&features(15)).unwrap() > model.predict(&features(9)).unwrap());
    }

    #[test]
    fn test_update_moves_prediction() {
        let mut model = FrequencyModel::new();
        let sample = Sample {
            features: features(11),
            success: true,
        };
        model.update(&sample);
        let before = model.predict(&features(11)).unwrap();
        model.update(&sample);

        assert!(model.predict(&features(11)).unwrap() > before);
    }

    #[test]
    fn test_fit_resets_previous_state() {
        let mut model = FrequencyModel::new();
        model.update(&Sample {
            features: features(11),
            success: true,
        });
        model.fit(&[]);

        assert!(model.predict(&features(11)).is_none());
    }

    #[test]
    fn test_create_model() {
        assert_eq!(create_model(ModelKind::Logistic).name(), "logistic");
        assert_eq!(create_model(ModelKind::Frequency).name(), "frequency");
    }
}
