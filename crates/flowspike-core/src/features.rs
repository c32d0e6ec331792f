//! Robust-scaled magnitude and step-over-step ratio features
//!
//! Scaling parameters are fitted once over the complete series of an entity.
//! Refitting on a partially revealed prefix would move the median and IQR as
//! the cursor advances and recolour points that are already on screen, so the
//! rows are computed once at load and only ever sliced afterwards.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::series::{EntityId, EntitySeries, SeriesStore};

/// Features for one entity at one time index
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub flow_count: f64,
    /// `(flow_count - median) / IQR` over the whole series, 0 when IQR is 0
    pub scaled_magnitude: f64,
    /// `flow_count[t] / flow_count[t-1]`, `+inf` at `t = 0`
    pub ratio_to_prev: f64,
    /// `scaled_magnitude[t-1]`, duplicated from `t = 0` at the first step
    pub prev_scaled_magnitude: f64,
    /// `ratio_to_prev[t-1]`, `+inf` at `t = 0`
    pub prev_ratio_to_prev: f64,
}

/// Median / interquartile range fitted over a full series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RobustScale {
    pub median: f64,
    pub q25: f64,
    pub q75: f64,
    pub iqr: f64,
}

impl RobustScale {
    pub fn fit(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                median: 0.0,
                q25: 0.0,
                q75: 0.0,
                iqr: 0.0,
            };
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let q25 = quantile_sorted(&sorted, 0.25);
        let q75 = quantile_sorted(&sorted, 0.75);
        Self {
            median: quantile_sorted(&sorted, 0.5),
            q25,
            q75,
            iqr: q75 - q25,
        }
    }

    /// A constant (or near-constant) series has no spread to scale by.
    pub fn is_degenerate(&self) -> bool {
        self.iqr <= 0.0
    }

    pub fn transform(&self, value: f64) -> f64 {
        if self.is_degenerate() {
            0.0
        } else {
            (value - self.median) / self.iqr
        }
    }
}

/// Quantile with linear interpolation between the closest ranks.
/// `sorted` must be ascending. An empty slice gives 0.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    match n {
        0 => return 0.0,
        1 => return sorted[0],
        _ => {}
    }

    let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;

    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn ratio(current: f64, previous: f64) -> f64 {
    // 0 -> 0 is "no change", not NaN
    if current == 0.0 && previous == 0.0 {
        1.0
    } else {
        current / previous
    }
}

/// Stateless feature derivation
pub struct FeatureEngine;

impl FeatureEngine {
    /// One row per time index, same length and order as the input series.
    pub fn compute(series: &EntitySeries) -> Vec<FeatureRow> {
        let flows: Vec<f64> = series.flow_counts().collect();
        let scale = RobustScale::fit(&flows);
        Self::compute_with_scale(series, &scale)
    }

    pub fn compute_with_scale(series: &EntitySeries, scale: &RobustScale) -> Vec<FeatureRow> {
        let mut rows: Vec<FeatureRow> = Vec::with_capacity(series.len());

        for (t, &(date, flow_count)) in series.points().iter().enumerate() {
            let scaled_magnitude = scale.transform(flow_count);

            let row = match rows.last() {
                Some(prev) => FeatureRow {
                    date,
                    flow_count,
                    scaled_magnitude,
                    ratio_to_prev: ratio(flow_count, prev.flow_count),
                    prev_scaled_magnitude: prev.scaled_magnitude,
                    prev_ratio_to_prev: prev.ratio_to_prev,
                },
                None => {
                    debug_assert_eq!(t, 0);
                    FeatureRow {
                        date,
                        flow_count,
                        scaled_magnitude,
                        ratio_to_prev: f64::INFINITY,
                        prev_scaled_magnitude: scaled_magnitude,
                        prev_ratio_to_prev: f64::INFINITY,
                    }
                }
            };
            rows.push(row);
        }

        rows
    }
}

/// Fitted features for one entity
#[derive(Debug, Clone)]
pub struct EntityFeatures {
    pub scale: RobustScale,
    pub rows: Arc<[FeatureRow]>,
}

/// Per-entity feature cache, fitted once from a [`SeriesStore`]
#[derive(Debug, Clone, Default)]
pub struct FeatureStore {
    entities: BTreeMap<EntityId, EntityFeatures>,
}

impl FeatureStore {
    pub fn fit(store: &SeriesStore) -> Self {
        let entities = store
            .iter()
            .map(|(&entity_id, series)| {
                let flows: Vec<f64> = series.flow_counts().collect();
                let scale = RobustScale::fit(&flows);
                let rows: Arc<[FeatureRow]> =
                    FeatureEngine::compute_with_scale(series, &scale).into();
                debug!(
                    entity_id,
                    len = rows.len(),
                    median = scale.median,
                    iqr = scale.iqr,
                    "Fitted robust scale"
                );
                (entity_id, EntityFeatures { scale, rows })
            })
            .collect();

        Self { entities }
    }

    pub fn get(&self, entity_id: EntityId) -> Option<&EntityFeatures> {
        self.entities.get(&entity_id)
    }

    pub fn rows(&self, entity_id: EntityId) -> Option<Arc<[FeatureRow]>> {
        self.entities.get(&entity_id).map(|f| Arc::clone(&f.rows))
    }

    pub fn scale(&self, entity_id: EntityId) -> Option<RobustScale> {
        self.entities.get(&entity_id).map(|f| f.scale)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::FlowRecord;

    fn series_of(flows: &[f64]) -> EntitySeries {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let records: Vec<FlowRecord> = flows
            .iter()
            .enumerate()
            .map(|(i, &f)| FlowRecord::new(0, start + chrono::Days::new(i as u64), f))
            .collect();
        SeriesStore::build(&records).unwrap().get(0).unwrap().clone()
    }

    #[test]
    fn test_quantiles_interpolate_linearly() {
        let sorted = [10.0, 10.0, 10.0, 10000.0];
        assert_eq!(quantile_sorted(&sorted, 0.25), 10.0);
        assert_eq!(quantile_sorted(&sorted, 0.5), 10.0);
        assert!((quantile_sorted(&sorted, 0.75) - 2507.5).abs() < 1e-9);
    }

    #[test]
    fn test_quantile_of_empty_and_single() {
        assert_eq!(quantile_sorted(&[], 0.5), 0.0);
        assert_eq!(quantile_sorted(&[3.0], 0.75), 3.0);

        let scale = RobustScale::fit(&[]);
        assert!(scale.is_degenerate());
        assert_eq!(scale.transform(5.0), 0.0);
    }

    #[test]
    fn test_constant_series_scales_to_zero() {
        let rows = FeatureEngine::compute(&series_of(&[7.0; 10]));
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| r.scaled_magnitude == 0.0));
        assert!(rows.iter().all(|r| r.prev_scaled_magnitude == 0.0));
    }

    #[test]
    fn test_first_step_boundary_values() {
        let rows = FeatureEngine::compute(&series_of(&[10000.0, 10.0, 10.0, 10.0]));

        assert!(rows[0].ratio_to_prev.is_infinite());
        assert!(rows[0].prev_ratio_to_prev.is_infinite());
        assert_eq!(rows[0].prev_scaled_magnitude, rows[0].scaled_magnitude);
        assert!((rows[0].scaled_magnitude - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_shifted_features() {
        let rows = FeatureEngine::compute(&series_of(&[1.0, 2.0, 8.0, 4.0]));

        assert_eq!(rows[1].ratio_to_prev, 2.0);
        assert_eq!(rows[2].ratio_to_prev, 4.0);
        assert_eq!(rows[3].ratio_to_prev, 0.5);
        for t in 1..rows.len() {
            assert_eq!(rows[t].prev_scaled_magnitude, rows[t - 1].scaled_magnitude);
            assert_eq!(rows[t].prev_ratio_to_prev, rows[t - 1].ratio_to_prev);
        }
    }

    #[test]
    fn test_zero_to_zero_ratio_is_one() {
        let rows = FeatureEngine::compute(&series_of(&[0.0, 0.0, 5.0]));
        assert_eq!(rows[1].ratio_to_prev, 1.0);
        assert!(rows[2].ratio_to_prev.is_infinite());
    }

    #[test]
    fn test_store_matches_direct_compute() {
        let records = vec![
            FlowRecord::new(4, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), 3.0),
            FlowRecord::new(4, NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(), 30.0),
            FlowRecord::new(4, NaiveDate::from_ymd_opt(2020, 1, 3).unwrap(), 4.0),
        ];
        let store = SeriesStore::build(&records).unwrap();
        let features = FeatureStore::fit(&store);

        let cached = features.rows(4).unwrap();
        let direct = FeatureEngine::compute(store.get(4).unwrap());
        assert_eq!(&cached[..], &direct[..]);
        assert!(features.rows(5).is_none());
    }
}
