use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("Key-value store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Wrong value kind at key {key}: found {found}")]
    WrongKind { key: String, found: &'static str },

    #[error("Capacity exceeded: {reason}")]
    CapacityExceeded {
        reason: String,
        retry_after_secs: Option<u64>,
    },

    #[error("No instances registered for service {0}")]
    NoInstances(String),

    #[error("All {attempts} failover attempts failed for service {service}")]
    AllInstancesFailed { service: String, attempts: u32 },

    #[error("Unknown job function: {0}")]
    UnknownJobKind(String),

    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("Probe failed: {0}")]
    ProbeFailed(String),
}

pub type Result<T> = std::result::Result<T, OpsError>;
