//! # flowspike-core
//!
//! Per-entity flow volume spike detection over a progressively revealed
//! daily time series.
//!
//! ```text
//! FlowRecord[] ──► SeriesStore ──► FeatureStore ──► AnomalyTagger ──► RevealWindow ──► renderer
//!                  (aggregate)     (fit once)       (on demand)       (slice to cursor)
//! ```
//!
//! Features are fitted over each entity's complete series when the
//! [`Pipeline`] is built. Every later query only tags those cached rows and
//! truncates them to the reveal cursor, so a point's colour never changes as
//! more of the series appears.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowspike_core::{Pipeline, PipelineConfig, RevealCursor};
//! use std::path::Path;
//!
//! let pipeline = Pipeline::from_csv(Path::new("flows.csv"), PipelineConfig::default())?;
//! for view in pipeline.visible(&[0, 1, 2, 3], RevealCursor(9)) {
//!     match view.result {
//!         Ok(points) => println!("entity {}: {} points", view.entity_id, points.len()),
//!         Err(e) => eprintln!("{}", e),
//!     }
//! }
//! # Ok::<(), flowspike_core::PipelineError>(())
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod loader;
pub mod pipeline;
pub mod reveal;
pub mod series;
pub mod tagger;

// Re-exports for convenience
pub use config::{Granularity, PipelineConfig, Strictness, TaggingPolicy};
pub use error::{ConfigError, DataError, LoadError, PipelineError, UnknownEntityError};
pub use features::{FeatureEngine, FeatureRow, FeatureStore, RobustScale};
pub use pipeline::{EntitySummary, EntityView, Pipeline};
pub use reveal::{Playback, RevealCursor, RevealWindow, TaggedPoint, VisibleSegment};
pub use series::{EntityId, EntitySeries, FlowRecord, SeriesStore};
pub use tagger::{AnomalyTag, AnomalyTagger, Slice, slices};
