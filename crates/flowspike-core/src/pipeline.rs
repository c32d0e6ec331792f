//! Pipeline: SeriesStore -> FeatureStore -> tagging -> reveal
//!
//! Built once from an input table. Series and features are fixed after
//! `build`; queries only tag the cached rows and slice them to the cursor, so
//! selection changes and cursor advances never touch feature computation.

use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, TaggingPolicy};
use crate::error::{Result, UnknownEntityError};
use crate::features::{FeatureStore, RobustScale};
use crate::loader;
use crate::reveal::{RevealCursor, RevealWindow, TaggedPoint, VisibleSegment};
use crate::series::{EntityId, FlowRecord, SeriesStore};
use crate::tagger::AnomalyTagger;

/// One entity's part of a batch response
#[derive(Debug, Clone, PartialEq)]
pub struct EntityView<T> {
    pub entity_id: EntityId,
    pub result: std::result::Result<T, UnknownEntityError>,
}

impl<T> EntityView<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-entity diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub entity_id: EntityId,
    pub len: usize,
    pub scale: RobustScale,
    pub spikes: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    series: SeriesStore,
    features: FeatureStore,
}

impl Pipeline {
    pub fn build(records: &[FlowRecord], config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let series = match &config.roster {
            Some(roster) => SeriesStore::build_with_roster(records, roster)?,
            None => SeriesStore::build(records)?,
        };
        let features = FeatureStore::fit(&series);

        info!(
            records = records.len(),
            entities = series.len(),
            max_len = series.max_len(),
            step = config.step,
            "Pipeline built"
        );

        Ok(Self {
            config,
            series,
            features,
        })
    }

    pub fn from_csv(path: &Path, config: PipelineConfig) -> Result<Self> {
        let records = loader::load_csv(path)?;
        Self::build(&records, config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn series(&self) -> &SeriesStore {
        &self.series
    }

    pub fn features(&self) -> &FeatureStore {
        &self.features
    }

    pub fn list_entities(&self) -> Vec<EntityId> {
        self.series.entities()
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.series.get(entity_id).is_some()
    }

    /// Ticks until the longest series is fully revealed: `ceil(max_len / step)`.
    pub fn max_cursor(&self) -> usize {
        self.series.max_len().div_ceil(self.config.step)
    }

    pub fn scale_of(&self, entity_id: EntityId) -> std::result::Result<RobustScale, UnknownEntityError> {
        self.features
            .scale(entity_id)
            .ok_or(UnknownEntityError { entity_id })
    }

    /// Visible tagged points for each requested entity, using the configured policy.
    pub fn visible(
        &self,
        entity_ids: &[EntityId],
        cursor: RevealCursor,
    ) -> Vec<EntityView<Vec<TaggedPoint>>> {
        self.visible_with(entity_ids, cursor, &self.config.policy)
    }

    pub fn visible_with(
        &self,
        entity_ids: &[EntityId],
        cursor: RevealCursor,
        policy: &TaggingPolicy,
    ) -> Vec<EntityView<Vec<TaggedPoint>>> {
        debug!(entities = entity_ids.len(), cursor = cursor.0, "Visible query");

        entity_ids
            .iter()
            .map(|&entity_id| EntityView {
                entity_id,
                result: self.visible_one(entity_id, cursor, policy),
            })
            .collect()
    }

    pub fn visible_one(
        &self,
        entity_id: EntityId,
        cursor: RevealCursor,
        policy: &TaggingPolicy,
    ) -> std::result::Result<Vec<TaggedPoint>, UnknownEntityError> {
        let Some(rows) = self.features.rows(entity_id) else {
            warn!(entity_id, "Query for unknown entity");
            return Err(UnknownEntityError { entity_id });
        };
        let n = cursor.clamp_to(rows.len());
        let tags = AnomalyTagger::tag_prefix(&rows, n, self.config.step, policy);
        RevealWindow::visible(entity_id, cursor, &tags, Some(&rows[..n]))
    }

    /// Visible slices per entity, tagged with the per-slice rule.
    pub fn segments(
        &self,
        entity_ids: &[EntityId],
        cursor: RevealCursor,
    ) -> Vec<EntityView<Vec<VisibleSegment>>> {
        let policy = self.config.policy;
        entity_ids
            .iter()
            .map(|&entity_id| {
                let rows = self.features.rows(entity_id);
                let result = match &rows {
                    Some(rows) => {
                        let n = cursor.clamp_to(rows.len());
                        let (s, bound) = AnomalyTagger::visible_slices(rows.len(), n, self.config.step);
                        let tags = AnomalyTagger::tag_slices(&rows[..bound], &s, &policy);
                        RevealWindow::visible_segments(entity_id, cursor, &s, &tags, Some(&rows[..]))
                    }
                    None => Err(UnknownEntityError { entity_id }),
                };
                EntityView { entity_id, result }
            })
            .collect()
    }

    /// Length, scale and flagged step count for every entity.
    pub fn summary(&self) -> Vec<EntitySummary> {
        self.series
            .entities()
            .into_iter()
            .filter_map(|entity_id| {
                let f = self.features.get(entity_id)?;
                let spikes = AnomalyTagger::tag_with(&f.rows, self.config.step, &self.config.policy)
                    .into_iter()
                    .filter(|&t| t)
                    .count();
                Some(EntitySummary {
                    entity_id,
                    len: f.rows.len(),
                    scale: f.scale,
                    spikes,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn records() -> Vec<FlowRecord> {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let a = [10.0, 11.0, 9.0, 500.0, 10.0, 12.0, 11.0];
        let b = [3.0, 3.0, 4.0];
        let mut out = Vec::new();
        for (i, &f) in a.iter().enumerate() {
            out.push(FlowRecord::new(0, start + chrono::Days::new(i as u64), f));
        }
        for (i, &f) in b.iter().enumerate() {
            out.push(FlowRecord::new(1, start + chrono::Days::new(i as u64), f));
        }
        out
    }

    #[test]
    fn test_list_and_max_cursor() {
        let pipeline = Pipeline::build(&records(), PipelineConfig::default()).unwrap();
        assert_eq!(pipeline.list_entities(), vec![0, 1]);
        // ceil(7 / 3)
        assert_eq!(pipeline.max_cursor(), 3);
    }

    #[test]
    fn test_partial_batch_failure() {
        let pipeline = Pipeline::build(&records(), PipelineConfig::default()).unwrap();
        let views = pipeline.visible(&[0, 99, 1], RevealCursor(5));

        assert_eq!(views.len(), 3);
        assert_eq!(views[0].result.as_ref().unwrap().len(), 5);
        assert_eq!(views[1].result, Err(UnknownEntityError { entity_id: 99 }));
        assert_eq!(views[2].result.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn test_spike_tagged_in_view() {
        let pipeline = Pipeline::build(&records(), PipelineConfig::default()).unwrap();
        let views = pipeline.visible(&[0], RevealCursor(7));
        let points = views[0].result.as_ref().unwrap();
        let flagged: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.anomalous)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flagged, vec![3]);
    }

    #[test]
    fn test_summary_counts_spikes() {
        let pipeline = Pipeline::build(&records(), PipelineConfig::default()).unwrap();
        let summary = pipeline.summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].spikes, 1);
        assert_eq!(summary[1].spikes, 0);
        assert_eq!(summary[1].len, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            step: 0,
            ..Default::default()
        };
        assert!(Pipeline::build(&records(), config).is_err());
    }

    #[test]
    fn test_visible_matches_full_tagging() {
        for policy in [TaggingPolicy::lenient(), TaggingPolicy::trailing().per_slice()] {
            let config = PipelineConfig {
                policy,
                ..Default::default()
            };
            let pipeline = Pipeline::build(&records(), config).unwrap();
            let rows = pipeline.features().rows(0).unwrap();
            let full = AnomalyTagger::tag_with(&rows, 3, &policy);

            for k in 0..=rows.len() {
                let views = pipeline.visible(&[0], RevealCursor(k));
                let tags: Vec<bool> = views[0]
                    .result
                    .as_ref()
                    .unwrap()
                    .iter()
                    .map(|p| p.anomalous)
                    .collect();
                assert_eq!(tags, full[..k]);
            }
        }
    }

    #[test]
    fn test_segments() {
        let pipeline = Pipeline::build(&records(), PipelineConfig::default()).unwrap();
        let views = pipeline.segments(&[0, 5], RevealCursor(7));
        let segs = views[0].result.as_ref().unwrap();
        assert_eq!(segs.len(), 2);
        assert!(segs[0].anomalous);
        assert!(segs[1].anomalous);
        assert!(!views[1].is_ok());
    }
}
