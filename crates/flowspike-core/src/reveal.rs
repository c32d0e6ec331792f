//! Progressive reveal of tagged series
//!
//! The reveal cursor counts visible time steps. Views are plain truncations of
//! rows and tags computed over the complete series, so advancing the cursor
//! only ever appends trailing points.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::UnknownEntityError;
use crate::features::FeatureRow;
use crate::series::EntityId;
use crate::tagger::{AnomalyTag, Slice};

/// Number of time steps currently visible for every entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct RevealCursor(pub usize);

impl RevealCursor {
    pub fn from_ticks(ticks: usize, step: usize) -> Self {
        Self(ticks.saturating_mul(step))
    }

    pub fn steps(self) -> usize {
        self.0
    }

    /// Visible length for a series of `len` steps
    pub fn clamp_to(self, len: usize) -> usize {
        self.0.min(len)
    }
}

/// One revealed observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaggedPoint {
    pub date: NaiveDate,
    pub flow_count: f64,
    pub anomalous: AnomalyTag,
}

/// A slice clipped to the visible prefix, for segment-coloured renderers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleSegment {
    pub slice: Slice,
    pub anomalous: AnomalyTag,
    pub points: Vec<TaggedPoint>,
}

pub struct RevealWindow;

impl RevealWindow {
    /// The first `min(cursor, len)` rows of an entity, each with its tag.
    ///
    /// `rows` and `tags` must cover the complete series.
    pub fn visible(
        entity_id: EntityId,
        cursor: RevealCursor,
        tags: &[AnomalyTag],
        rows: Option<&[FeatureRow]>,
    ) -> Result<Vec<TaggedPoint>, UnknownEntityError> {
        let rows = rows.ok_or(UnknownEntityError { entity_id })?;
        debug_assert_eq!(rows.len(), tags.len());

        let n = cursor.clamp_to(rows.len());
        debug!(entity_id, cursor = cursor.0, visible = n, "Revealing series");

        Ok(rows[..n]
            .iter()
            .zip(tags)
            .map(|(row, &anomalous)| TaggedPoint {
                date: row.date,
                flow_count: row.flow_count,
                anomalous,
            })
            .collect())
    }

    /// Slices that start inside the visible prefix, each truncated to it.
    pub fn visible_segments(
        entity_id: EntityId,
        cursor: RevealCursor,
        slices: &[Slice],
        slice_tags: &[AnomalyTag],
        rows: Option<&[FeatureRow]>,
    ) -> Result<Vec<VisibleSegment>, UnknownEntityError> {
        let rows = rows.ok_or(UnknownEntityError { entity_id })?;
        let n = cursor.clamp_to(rows.len());

        Ok(slices
            .iter()
            .zip(slice_tags)
            .filter(|(s, _)| s.start < n)
            .map(|(s, &anomalous)| {
                let end = s.end.min(n);
                VisibleSegment {
                    slice: Slice { start: s.start, end },
                    anomalous,
                    points: rows[s.start..end]
                        .iter()
                        .map(|row| TaggedPoint {
                            date: row.date,
                            flow_count: row.flow_count,
                            anomalous,
                        })
                        .collect(),
                }
            })
            .collect())
    }
}

/// Tick driver for the reveal cursor.
///
/// Each tick reveals `step` more steps. The cursor only moves forward and
/// ticks past `max_ticks` are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Playback {
    ticks: usize,
    max_ticks: usize,
    step: usize,
}

impl Playback {
    pub fn new(step: usize, max_ticks: usize) -> Self {
        Self {
            ticks: 0,
            max_ticks,
            step: step.max(1),
        }
    }

    /// `ceil(max_len / step)` ticks reveal every step of the longest series.
    pub fn for_series_len(step: usize, max_len: usize) -> Self {
        let step = step.max(1);
        Self::new(step, max_len.div_ceil(step))
    }

    /// Advance one tick. Returns whether the cursor moved.
    pub fn advance(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.ticks += 1;
        true
    }

    pub fn is_finished(&self) -> bool {
        self.ticks >= self.max_ticks
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn max_ticks(&self) -> usize {
        self.max_ticks
    }

    pub fn cursor(&self) -> RevealCursor {
        RevealCursor::from_ticks(self.ticks, self.step)
    }
}
