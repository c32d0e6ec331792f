//! Detection scoring against injected ground truth
//!
//! A detection is an (entity, date) pair tagged anomalous over the complete
//! series. Precision, recall and F1 come from the usual confusion-matrix
//! counts.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

use flowspike_core::{Pipeline, RevealCursor, TaggingPolicy};

use crate::generator::GroundTruth;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
    pub policy: TaggingPolicy,
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl DetectionReport {
    pub fn from_counts(policy: TaggingPolicy, tp: u64, fp: u64, fn_: u64) -> Self {
        let (precision, recall, f1) = calculate_metrics(tp, fp, fn_);
        Self {
            policy,
            true_positives: tp,
            false_positives: fp,
            false_negatives: fn_,
            precision,
            recall,
            f1,
        }
    }
}

/// Calculate precision, recall, f1 from confusion matrix values
pub fn calculate_metrics(tp: u64, fp: u64, fn_: u64) -> (f64, f64, f64) {
    let precision = if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    };
    let recall = if tp + fn_ > 0 {
        tp as f64 / (tp + fn_) as f64
    } else {
        0.0
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (precision, recall, f1)
}

/// Every (entity, date) the policy flags over the fully revealed series.
pub fn detections(pipeline: &Pipeline, policy: &TaggingPolicy) -> BTreeSet<GroundTruth> {
    let ids = pipeline.list_entities();
    let full = RevealCursor(pipeline.series().max_len());

    pipeline
        .visible_with(&ids, full, policy)
        .into_iter()
        .filter_map(|view| {
            let entity_id = view.entity_id;
            view.result.ok().map(|points| (entity_id, points))
        })
        .flat_map(|(entity_id, points)| {
            points
                .into_iter()
                .filter(|p| p.anomalous)
                .map(move |p| GroundTruth {
                    entity_id,
                    date: p.date,
                })
        })
        .collect()
}

/// Score `policy` on `pipeline` against the injected spikes. Truth entries
/// for entities the pipeline does not hold count as misses.
pub fn evaluate(pipeline: &Pipeline, truth: &[GroundTruth], policy: &TaggingPolicy) -> DetectionReport {
    let predicted = detections(pipeline, policy);
    let expected: BTreeSet<GroundTruth> = truth.iter().copied().collect();

    let tp = predicted.intersection(&expected).count() as u64;
    let fp = predicted.difference(&expected).count() as u64;
    let fn_ = expected.difference(&predicted).count() as u64;

    debug!(tp, fp, fn_, "Confusion counts");
    let report = DetectionReport::from_counts(*policy, tp, fp, fn_);
    info!(
        strictness = ?policy.strictness,
        granularity = ?policy.granularity,
        precision = report.precision,
        recall = report.recall,
        f1 = report.f1,
        "Policy evaluated"
    );
    report
}
