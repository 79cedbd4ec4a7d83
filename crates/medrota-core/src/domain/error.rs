use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Unknown entity: {kind} {id}")]
    UnknownEntity { kind: &'static str, id: String },

    #[error("Duplicate assignment for person {person_id} on block {block_id}")]
    DuplicateAssignment { person_id: String, block_id: String },

    #[error("Concurrent modification of {kind} {id}")]
    Conflict { kind: &'static str, id: String },
}
