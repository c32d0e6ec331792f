//! Per-entity daily flow series
//!
//! Raw flow records are grouped by entity, then by date, with the flow counts
//! of records sharing an (entity, date) pair summed. Missing dates stay absent;
//! nothing is zero-filled.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::error::DataError;

/// Monitored traffic source (internal IP identifier)
pub type EntityId = u32;

/// Raw observation, loaded once and never mutated
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub entity_id: EntityId,
    pub date: NaiveDate,
    pub flow_count: f64,
}

impl FlowRecord {
    pub fn new(entity_id: EntityId, date: NaiveDate, flow_count: f64) -> Self {
        Self {
            entity_id,
            date,
            flow_count,
        }
    }
}

/// Date-ordered daily totals for one entity. Dates are strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySeries {
    pub entity_id: EntityId,
    points: Vec<(NaiveDate, f64)>,
}

impl EntitySeries {
    pub fn points(&self) -> &[(NaiveDate, f64)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|&(d, _)| d)
    }

    pub fn flow_counts(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|&(_, f)| f)
    }
}

/// Immutable mapping of entity id to its daily series, built once at load.
#[derive(Debug, Clone, Default)]
pub struct SeriesStore {
    series: BTreeMap<EntityId, EntitySeries>,
}

impl SeriesStore {
    /// Group and aggregate raw records into one series per entity.
    pub fn build(records: &[FlowRecord]) -> Result<Self, DataError> {
        Self::aggregate(records, None)
    }

    /// Like [`SeriesStore::build`], but every rostered entity must have at
    /// least one record, and records for entities outside the roster are
    /// dropped.
    pub fn build_with_roster(
        records: &[FlowRecord],
        roster: &[EntityId],
    ) -> Result<Self, DataError> {
        let roster: BTreeSet<EntityId> = roster.iter().copied().collect();
        Self::aggregate(records, Some(&roster))
    }

    fn aggregate(
        records: &[FlowRecord],
        roster: Option<&BTreeSet<EntityId>>,
    ) -> Result<Self, DataError> {
        if records.is_empty() {
            return Err(DataError::EmptyInput);
        }

        // entity -> date -> summed flows
        let mut grouped: BTreeMap<EntityId, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
        let mut dropped = 0usize;

        for r in records {
            if !r.flow_count.is_finite() {
                return Err(DataError::NonFiniteFlow {
                    entity_id: r.entity_id,
                    date: r.date,
                });
            }
            if r.flow_count < 0.0 {
                return Err(DataError::NegativeFlow {
                    entity_id: r.entity_id,
                    date: r.date,
                    flow_count: r.flow_count,
                });
            }
            if let Some(roster) = roster {
                if !roster.contains(&r.entity_id) {
                    dropped += 1;
                    continue;
                }
            }
            *grouped
                .entry(r.entity_id)
                .or_default()
                .entry(r.date)
                .or_insert(0.0) += r.flow_count;
        }

        if dropped > 0 {
            warn!(dropped, "Dropped flow records for entities outside the roster");
        }

        if let Some(roster) = roster {
            if let Some(&entity_id) = roster.iter().find(|id| !grouped.contains_key(id)) {
                return Err(DataError::MissingEntity { entity_id });
            }
        }

        if grouped.is_empty() {
            return Err(DataError::EmptyInput);
        }

        let series = grouped
            .into_iter()
            .map(|(entity_id, by_date)| {
                let points = by_date.into_iter().collect();
                (entity_id, EntitySeries { entity_id, points })
            })
            .collect();

        Ok(Self { series })
    }

    pub fn get(&self, entity_id: EntityId) -> Option<&EntitySeries> {
        self.series.get(&entity_id)
    }

    /// Entity ids in ascending order
    pub fn entities(&self) -> Vec<EntityId> {
        self.series.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &EntitySeries)> {
        self.series.iter()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn len_of(&self, entity_id: EntityId) -> Option<usize> {
        self.series.get(&entity_id).map(EntitySeries::len)
    }

    /// Length of the longest series
    pub fn max_len(&self) -> usize {
        self.series.values().map(EntitySeries::len).max().unwrap_or(0)
    }
}
