//! Synthetic per-entity flow data with injected volume spikes
//!
//! Daily baselines are drawn from a log-normal distribution, so they stay
//! positive and right-skewed like real flow counts. Some days are skipped
//! entirely, and each remaining entity-day is emitted as several raw records
//! whose counts add up to the day's total.

use chrono::{Days, NaiveDate};
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::LogNormal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use flowspike_core::{EntityId, FlowRecord};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Invalid simulation config: {0}")]
    InvalidConfig(String),
}

/// An injected spike: this entity-day was multiplied well above its baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroundTruth {
    pub entity_id: EntityId,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub entities: u32,
    pub days: u32,
    pub start: NaiveDate,
    pub seed: u64,
    /// Mean of the underlying normal, so the median daily count is `exp(baseline_mu)`
    pub baseline_mu: f64,
    pub baseline_sigma: f64,
    /// Chance that an entity has no traffic at all on a day
    pub gap_probability: f64,
    pub spike_probability: f64,
    pub spike_multiplier_min: f64,
    pub spike_multiplier_max: f64,
    /// Upper bound on raw records per entity-day
    pub max_records_per_day: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            entities: 10,
            days: 90,
            start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            seed: 42,
            baseline_mu: 7.0,
            baseline_sigma: 0.25,
            gap_probability: 0.05,
            spike_probability: 0.03,
            spike_multiplier_min: 20.0,
            spike_multiplier_max: 60.0,
            max_records_per_day: 4,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        let probability = |name: &str, p: f64| {
            if (0.0..=1.0).contains(&p) {
                Ok(())
            } else {
                Err(SimError::InvalidConfig(format!("{} must be in [0, 1], got {}", name, p)))
            }
        };
        probability("gap_probability", self.gap_probability)?;
        probability("spike_probability", self.spike_probability)?;

        if !(self.spike_multiplier_min >= 1.0 && self.spike_multiplier_max >= self.spike_multiplier_min) {
            return Err(SimError::InvalidConfig(format!(
                "spike multipliers must satisfy 1 <= min <= max, got {}..{}",
                self.spike_multiplier_min, self.spike_multiplier_max
            )));
        }
        if self.max_records_per_day == 0 {
            return Err(SimError::InvalidConfig(
                "max_records_per_day must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Generated data set: raw records plus the spikes injected into them
#[derive(Debug, Clone, Default)]
pub struct SimulationOutput {
    pub records: Vec<FlowRecord>,
    pub truth: Vec<GroundTruth>,
}

pub struct FlowGenerator {
    config: SimConfig,
    rng: StdRng,
    baseline: LogNormal<f64>,
}

impl FlowGenerator {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let baseline = LogNormal::new(config.baseline_mu, config.baseline_sigma)
            .map_err(|e| SimError::InvalidConfig(e.to_string()))?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            rng,
            baseline,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn generate(&mut self) -> SimulationOutput {
        let mut output = SimulationOutput::default();

        for entity_id in 0..self.config.entities {
            let before = output.truth.len();
            for day in 0..self.config.days {
                self.generate_day(entity_id, day, &mut output);
            }
            debug!(
                entity_id,
                spikes = output.truth.len() - before,
                "Entity generated"
            );
        }

        info!(
            entities = self.config.entities,
            days = self.config.days,
            records = output.records.len(),
            spikes = output.truth.len(),
            "Simulation complete"
        );
        output
    }

    fn generate_day(&mut self, entity_id: EntityId, day: u32, output: &mut SimulationOutput) {
        if self.rng.random_bool(self.config.gap_probability) {
            return;
        }
        let date = self.config.start + Days::new(u64::from(day));

        let mut total = self.baseline.sample(&mut self.rng);
        if self.rng.random_bool(self.config.spike_probability) {
            let m = if self.config.spike_multiplier_max > self.config.spike_multiplier_min {
                self.rng
                    .random_range(self.config.spike_multiplier_min..self.config.spike_multiplier_max)
            } else {
                self.config.spike_multiplier_min
            };
            total *= m;
            output.truth.push(GroundTruth { entity_id, date });
        }

        let total = total.round().max(1.0) as u64;
        for part in self.split(total) {
            output
                .records
                .push(FlowRecord::new(entity_id, date, part as f64));
        }
    }

    /// Break `total` into up to `max_records_per_day` positive parts.
    fn split(&mut self, total: u64) -> Vec<u64> {
        let max_parts = u64::from(self.config.max_records_per_day).min(total);
        let parts = self.rng.random_range(1..=max_parts);

        let mut cuts: Vec<u64> = Vec::with_capacity(parts as usize + 1);
        cuts.push(0);
        while (cuts.len() as u64) < parts {
            let cut = self.rng.random_range(1..total);
            if !cuts.contains(&cut) {
                cuts.push(cut);
            }
        }
        cuts.push(total);
        cuts.sort_unstable();

        cuts.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

/// Generate with a fresh generator.
pub fn simulate(config: SimConfig) -> Result<SimulationOutput, SimError> {
    Ok(FlowGenerator::new(config)?.generate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowspike_core::SeriesStore;

    #[test]
    fn test_same_seed_same_output() {
        let a = simulate(SimConfig::default()).unwrap();
        let b = simulate(SimConfig::default()).unwrap();
        assert_eq!(a.records, b.records);
        assert_eq!(a.truth, b.truth);

        let c = simulate(SimConfig {
            seed: 7,
            ..Default::default()
        })
        .unwrap();
        assert_ne!(a.records, c.records);
    }

    #[test]
    fn test_split_preserves_total() {
        let mut generator = FlowGenerator::new(SimConfig::default()).unwrap();
        for total in [1, 2, 3, 17, 1_000] {
            let parts = generator.split(total);
            assert!(!parts.is_empty());
            assert!(parts.len() <= 4);
            assert!(parts.iter().all(|&p| p > 0));
            assert_eq!(parts.iter().sum::<u64>(), total);
        }
    }

    #[test]
    fn test_records_aggregate_into_series() {
        let config = SimConfig {
            entities: 3,
            days: 30,
            ..Default::default()
        };
        let output = simulate(config).unwrap();
        let store = SeriesStore::build(&output.records).unwrap();

        assert_eq!(store.entities(), vec![0, 1, 2]);
        assert!(store.max_len() <= 30);
        // several raw records per day on average
        let days: usize = store.iter().map(|(_, s)| s.len()).sum();
        assert!(output.records.len() >= days);
    }

    #[test]
    fn test_spikes_recorded_as_truth() {
        let config = SimConfig {
            entities: 2,
            days: 60,
            spike_probability: 0.2,
            gap_probability: 0.0,
            ..Default::default()
        };
        let output = simulate(config).unwrap();
        assert!(!output.truth.is_empty());

        let store = SeriesStore::build(&output.records).unwrap();
        for t in &output.truth {
            let series = store.get(t.entity_id).unwrap();
            assert!(series.dates().any(|d| d == t.date));
        }
    }

    #[test]
    fn test_no_gaps_gives_full_series() {
        let config = SimConfig {
            entities: 1,
            days: 20,
            gap_probability: 0.0,
            ..Default::default()
        };
        let store = SeriesStore::build(&simulate(config).unwrap().records).unwrap();
        assert_eq!(store.len_of(0), Some(20));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad_probability = SimConfig {
            gap_probability: 1.5,
            ..Default::default()
        };
        assert!(FlowGenerator::new(bad_probability).is_err());

        let bad_multiplier = SimConfig {
            spike_multiplier_min: 5.0,
            spike_multiplier_max: 2.0,
            ..Default::default()
        };
        assert!(FlowGenerator::new(bad_multiplier).is_err());

        let bad_sigma = SimConfig {
            baseline_sigma: -1.0,
            ..Default::default()
        };
        assert!(FlowGenerator::new(bad_sigma).is_err());
    }
}
