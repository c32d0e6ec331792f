//! Threshold tagging over feature rows
//!
//! Tags are derived on demand from the full cached rows of an entity and never
//! stored. Because every rule only looks at the current and previous row, and
//! slices are laid out from index 0 independent of any cursor, a tag computed
//! for a step never depends on how much of the series is visible.

use serde::Serialize;

use crate::config::{Granularity, Strictness, TaggingPolicy};
use crate::features::FeatureRow;

/// `true` means "flagged as a volume spike"
pub type AnomalyTag = bool;

/// Half-open run of time indices `[start, end)`.
///
/// Adjacent slices share their boundary index so rendered segments join up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slice {
    pub start: usize,
    pub end: usize,
}

impl Slice {
    pub fn contains(&self, t: usize) -> bool {
        self.start <= t && t < self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// Chunk `0..len` into slices of `step + 1` indices starting at multiples of
/// `step`. A trailing start is skipped when its only index is already the
/// shared end point of the previous slice.
pub fn slices(len: usize, step: usize) -> Vec<Slice> {
    let step = step.max(1);
    let mut out = Vec::with_capacity(len / step + 1);

    let mut start = 0;
    while start < len {
        if start > 0 && start + 1 >= len {
            break;
        }
        out.push(Slice {
            start,
            end: (start + step + 1).min(len),
        });
        start += step;
    }

    out
}

/// Spread slice tags back onto steps. A step takes the tag of the slice that
/// starts at or before it (`t / step`), clamped to the last slice.
pub fn step_tags_from_slices(len: usize, step: usize, slice_tags: &[AnomalyTag]) -> Vec<AnomalyTag> {
    let step = step.max(1);
    if slice_tags.is_empty() {
        return vec![false; len];
    }
    let last = slice_tags.len() - 1;
    (0..len).map(|t| slice_tags[(t / step).min(last)]).collect()
}

/// Thresholds resolved from a [`TaggingPolicy`]
#[derive(Debug, Clone, Copy)]
struct Thresholds {
    magnitude: f64,
    ratio: f64,
}

impl Thresholds {
    /// A magnitude threshold below zero (or NaN) counts as zero, so a
    /// zero-IQR series is never flagged.
    fn from_policy(policy: &TaggingPolicy) -> Self {
        Self {
            magnitude: policy.effective_magnitude_threshold().max(0.0),
            ratio: policy.ratio_threshold,
        }
    }

    /// Magnitude and ratio both exceed their thresholds
    fn joint(&self, scaled: f64, ratio: f64) -> bool {
        scaled > self.magnitude && ratio > self.ratio
    }
}

pub struct AnomalyTagger;

impl AnomalyTagger {
    /// Whether step `t` of `rows` satisfies the per-step condition for `strictness`.
    pub fn step_is_anomalous(
        rows: &[FeatureRow],
        t: usize,
        strictness: Strictness,
        policy: &TaggingPolicy,
    ) -> bool {
        let Some(row) = rows.get(t) else {
            return false;
        };
        let th = Thresholds::from_policy(policy);
        let current = th.joint(row.scaled_magnitude, row.ratio_to_prev);

        match strictness {
            Strictness::Lenient => current,
            Strictness::Strict => {
                // The first step has boundary values in its prev_* fields, not
                // a real previous observation, so it cannot corroborate itself.
                if t == 0 {
                    return false;
                }
                current && th.joint(row.prev_scaled_magnitude, row.prev_ratio_to_prev)
            }
            Strictness::Trailing => current || row.prev_scaled_magnitude > th.magnitude,
        }
    }

    /// One tag per step, using the policy's strictness.
    pub fn tag(rows: &[FeatureRow], policy: &TaggingPolicy) -> Vec<AnomalyTag> {
        (0..rows.len())
            .map(|t| Self::step_is_anomalous(rows, t, policy.strictness, policy))
            .collect()
    }

    /// One tag per slice: a slice is flagged iff any step in it is.
    pub fn tag_slices(
        rows: &[FeatureRow],
        slices: &[Slice],
        policy: &TaggingPolicy,
    ) -> Vec<AnomalyTag> {
        let step_tags = Self::tag(rows, policy);
        slices
            .iter()
            .map(|s| {
                s.indices()
                    .filter_map(|t| step_tags.get(t))
                    .any(|&tagged| tagged)
            })
            .collect()
    }

    /// Slices of a `len`-step series that start inside the first `visible`
    /// steps, and the index their rows run up to.
    pub fn visible_slices(len: usize, visible: usize, step: usize) -> (Vec<Slice>, usize) {
        let visible_slices: Vec<Slice> = slices(len, step)
            .into_iter()
            .take_while(|s| s.start < visible)
            .collect();
        let bound = visible_slices.last().map_or(0, |s| s.end);
        (visible_slices, bound)
    }

    /// Tags for the first `visible` steps only. Matches the prefix of
    /// [`AnomalyTagger::tag_with`] over the whole series, but only reads the
    /// rows those tags depend on.
    pub fn tag_prefix(
        rows: &[FeatureRow],
        visible: usize,
        step: usize,
        policy: &TaggingPolicy,
    ) -> Vec<AnomalyTag> {
        let n = visible.min(rows.len());
        match policy.granularity {
            Granularity::PerStep => Self::tag(&rows[..n], policy),
            Granularity::PerSlice => {
                let (visible_slices, bound) = Self::visible_slices(rows.len(), n, step);
                let slice_tags = Self::tag_slices(&rows[..bound], &visible_slices, policy);
                step_tags_from_slices(n, step, &slice_tags)
            }
        }
    }

    /// Per-step tags for any granularity. Under [`Granularity::PerSlice`]
    /// each step carries its owning slice's tag.
    pub fn tag_with(rows: &[FeatureRow], step: usize, policy: &TaggingPolicy) -> Vec<AnomalyTag> {
        match policy.granularity {
            Granularity::PerStep => Self::tag(rows, policy),
            Granularity::PerSlice => {
                let slices = slices(rows.len(), step);
                let slice_tags = Self::tag_slices(rows, &slices, policy);
                step_tags_from_slices(rows.len(), step, &slice_tags)
            }
        }
    }
}
