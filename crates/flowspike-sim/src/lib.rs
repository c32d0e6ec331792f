//! # flowspike-sim
//!
//! Synthetic flow data with injected spikes, and scoring of tagging policies
//! against the injected ground truth.
//!
//! ```text
//! SimConfig ──► FlowGenerator ──► records ──► Pipeline ──┐
//!                     │                                  ├──► evaluate ──► DetectionReport
//!                     └──────────► GroundTruth ──────────┘
//! ```
//!
//! Generation holds no detection logic. Every injected spike is recorded as a
//! [`GroundTruth`] entry so detections can be scored exactly.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowspike_core::{Pipeline, PipelineConfig, TaggingPolicy};
//! use flowspike_sim::{SimConfig, evaluate, simulate};
//!
//! let output = simulate(SimConfig::default())?;
//! let pipeline = Pipeline::build(&output.records, PipelineConfig::default())?;
//! let report = evaluate(&pipeline, &output.truth, &TaggingPolicy::strict());
//! println!("F1 = {:.3}", report.f1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod evaluate;
pub mod generator;

pub use evaluate::{DetectionReport, calculate_metrics, detections, evaluate};
pub use generator::{FlowGenerator, GroundTruth, SimConfig, SimError, SimulationOutput, simulate};
