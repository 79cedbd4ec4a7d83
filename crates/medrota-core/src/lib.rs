pub mod conflicts;
pub mod domain;
pub mod ports;
pub mod solver;
pub mod validator;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use domain::{
    Absence, Assignment, AssignmentRole, Block, Credential, DateRange, DomainError, HalfDay,
    JobExecution, JobOutcome, Person, PersonRole, RotationTemplate, ScheduledJob, SlotRequirement,
};

pub use ports::{CheckpointStore, ScheduleRepository};

pub use solver::{
    CancelToken, SoftViolation, SoftViolationKind, SoftWeights, SolverCheckpoint, SolverEngine,
    SolverOptions, SolverOutcome, SolverStatus, UnsatConstraint,
};

pub use validator::{
    AcgmeValidator, ValidationReport, ValidationStatistics, Violation, ViolationKind,
    ViolationSeverity,
};

pub use conflicts::{Conflict, ConflictCategory, ConflictEngine, ConflictSeverity, ConflictType};
