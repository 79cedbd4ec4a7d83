pub mod error;
pub mod models;

pub use error::DomainError;
pub use models::{
    Absence, Assignment, AssignmentRole, Block, Credential, DateRange, HalfDay, JobExecution,
    JobOutcome, Person, PersonRole, RotationTemplate, ScheduledJob, SlotRequirement,
};
