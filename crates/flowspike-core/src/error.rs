//! Error types for the flow spike pipeline.
//!
//! Construction-time failures (`DataError`, `ConfigError`, `LoadError`) abort
//! the whole pipeline build. `UnknownEntityError` is scoped to one entity of a
//! batch query and never fails the rest of the batch.

use chrono::NaiveDate;
use thiserror::Error;

use crate::series::EntityId;

/// Structurally wrong input data. Fatal at load time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    /// No records at all
    #[error("Empty input: no flow records")]
    EmptyInput,

    /// A rostered entity has zero records
    #[error("Entity {entity_id} has no flow records")]
    MissingEntity { entity_id: EntityId },

    /// Flow counts are non-negative by definition
    #[error("Negative flow count {flow_count} for entity {entity_id} on {date}")]
    NegativeFlow {
        entity_id: EntityId,
        date: NaiveDate,
        flow_count: f64,
    },

    #[error("Non-finite flow count for entity {entity_id} on {date}")]
    NonFiniteFlow { entity_id: EntityId, date: NaiveDate },
}

/// Query referenced an entity id outside the loaded set.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unknown entity: {entity_id}")]
pub struct UnknownEntityError {
    pub entity_id: EntityId,
}

/// Configuration could not be read or is out of range.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// CSV input could not be read.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unparseable date {value:?} on line {line}")]
    BadDate { line: u64, value: String },

    #[error("Bad record: {0}")]
    BadRecord(String),
}

/// Any failure while constructing a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Result type alias for pipeline construction.
pub type Result<T> = std::result::Result<T, PipelineError>;
