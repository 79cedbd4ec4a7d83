use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Person roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonRole {
    Resident,
    Faculty,
    ClinicalStaff,
}

impl PersonRole {
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s {
            "resident" => Ok(Self::Resident),
            "faculty" => Ok(Self::Faculty),
            "clinical_staff" => Ok(Self::ClinicalStaff),
            _ => Err(format!("Unknown person role: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonRole::Resident => "resident",
            PersonRole::Faculty => "faculty",
            PersonRole::ClinicalStaff => "clinical_staff",
        }
    }
}

impl std::fmt::Display for PersonRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A person who can hold schedule assignments.
///
/// Identity is immutable; role and PGY level are mutable through the admin
/// flow only. `pgy_level` is set for residents and `None` for everyone else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub name: String,
    pub role: PersonRole,
    pub pgy_level: Option<u8>,
}

impl Person {
    pub fn is_resident(&self) -> bool {
        self.role == PersonRole::Resident
    }

    pub fn is_faculty(&self) -> bool {
        self.role == PersonRole::Faculty
    }

    /// True for interns (PGY-1), who need the tightest supervision ratio.
    pub fn is_pgy1(&self) -> bool {
        self.is_resident() && self.pgy_level == Some(1)
    }
}

// Half-day slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HalfDay {
    Am,
    Pm,
}

impl HalfDay {
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s {
            "am" => Ok(Self::Am),
            "pm" => Ok(Self::Pm),
            _ => Err(format!("Unknown half day: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HalfDay::Am => "am",
            HalfDay::Pm => "pm",
        }
    }
}

impl std::fmt::Display for HalfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One schedulable half-day slot. Unique by (date, half_day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: Uuid,
    pub date: NaiveDate,
    pub half_day: HalfDay,
    pub is_weekend: bool,
    pub is_holiday: bool,
}

// Assignment roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentRole {
    Primary,
    Backup,
    Supervising,
}

impl AssignmentRole {
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s {
            "primary" => Ok(Self::Primary),
            "backup" => Ok(Self::Backup),
            "supervising" => Ok(Self::Supervising),
            _ => Err(format!("Unknown assignment role: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentRole::Primary => "primary",
            AssignmentRole::Backup => "backup",
            AssignmentRole::Supervising => "supervising",
        }
    }
}

impl std::fmt::Display for AssignmentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single placement of one person into one block under one rotation
/// template. At most one assignment exists per (person, block).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub person_id: Uuid,
    pub block_id: Uuid,
    pub template_id: Uuid,
    pub role: AssignmentRole,
}

/// Abbreviated description of the work that fills a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationTemplate {
    pub id: Uuid,
    /// Short code, e.g. "clinic", "call", "inpatient".
    pub code: String,
    pub name: String,
    /// Resident slots this template wants filled per block.
    pub slot_capacity: u32,
    /// Relative weight of leaving a slot uncovered (higher = worse).
    pub slot_priority: f64,
    /// Whether faculty supervision ratios apply to this template.
    pub requires_supervision: bool,
}

/// A period during which a person is unavailable. Overrides the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Absence {
    pub id: Uuid,
    pub person_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub kind: String,
}

impl Absence {
    /// Whether this absence covers the given date (inclusive range).
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// A credential held by a person. Lifetime credentials have no expiration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub person_id: Uuid,
    pub kind: String,
    pub issued_on: NaiveDate,
    pub expires_on: Option<NaiveDate>,
}

impl Credential {
    /// Whether the credential is valid on the given date.
    pub fn valid_on(&self, date: NaiveDate) -> bool {
        self.issued_on <= date && self.expires_on.map_or(true, |exp| date <= exp)
    }
}

/// Per-template credential requirements. Hard kinds prune solver domains;
/// preferred kinds only contribute to the soft objective.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SlotRequirement {
    pub template_id: Uuid,
    pub required_credentials: Vec<String>,
    pub preferred_credentials: Vec<String>,
}

/// Inclusive date range used by the solver, validator, and conflict engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar days in the range (inclusive).
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Iterate every date in the range.
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take(self.num_days().max(0) as usize)
    }
}

/// A background job definition persisted in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    /// Unique human-readable name; the scheduler keys installed jobs by it.
    pub name: String,
    /// Name of the registered job function to invoke.
    pub job_kind: String,
    /// Serialized trigger spec, `{kind, config}`.
    pub trigger: serde_json::Value,
    pub enabled: bool,
    pub run_count: i64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// One recorded execution of a scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Result summary on success, error message on failure.
    pub outcome: JobOutcome,
    pub retry_count: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum JobOutcome {
    Running,
    Success(String),
    Failure(String),
}
