//! Row structs and their domain conversions.

use crate::error::StorageError;
use chrono::{DateTime, NaiveDate, Utc};
use medrota_core::domain::{
    Absence, Assignment, AssignmentRole, Block, Credential, HalfDay, JobExecution, JobOutcome,
    Person, PersonRole, RotationTemplate, ScheduledJob, SlotRequirement,
};
use sqlx::FromRow;
use uuid::Uuid;

fn parse_uuid(table: &'static str, value: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(value).map_err(|_| StorageError::InvalidColumn {
        table,
        column: "id",
        value: value.to_string(),
    })
}

fn parse_date(
    table: &'static str,
    column: &'static str,
    value: &str,
) -> Result<NaiveDate, StorageError> {
    value
        .parse::<NaiveDate>()
        .map_err(|_| StorageError::InvalidColumn {
            table,
            column,
            value: value.to_string(),
        })
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

#[derive(Debug, FromRow)]
pub struct PersonRow {
    pub id: String,
    pub name: String,
    pub role: String,
    pub pgy_level: Option<i64>,
}

impl PersonRow {
    pub fn into_domain(self) -> Result<Person, StorageError> {
        Ok(Person {
            id: parse_uuid("people", &self.id)?,
            role: PersonRole::parse(&self.role).map_err(|_| StorageError::InvalidColumn {
                table: "people",
                column: "role",
                value: self.role.clone(),
            })?,
            name: self.name,
            pgy_level: self.pgy_level.map(|l| l as u8),
        })
    }
}

#[derive(Debug, FromRow)]
pub struct BlockRow {
    pub id: String,
    pub date: String,
    pub half_day: String,
    pub is_weekend: i64,
    pub is_holiday: i64,
}

impl BlockRow {
    pub fn into_domain(self) -> Result<Block, StorageError> {
        Ok(Block {
            id: parse_uuid("blocks", &self.id)?,
            date: parse_date("blocks", "date", &self.date)?,
            half_day: HalfDay::parse(&self.half_day).map_err(|_| {
                StorageError::InvalidColumn {
                    table: "blocks",
                    column: "half_day",
                    value: self.half_day.clone(),
                }
            })?,
            is_weekend: self.is_weekend != 0,
            is_holiday: self.is_holiday != 0,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct AssignmentRow {
    pub id: String,
    pub person_id: String,
    pub block_id: String,
    pub template_id: String,
    pub role: String,
}

impl AssignmentRow {
    pub fn into_domain(self) -> Result<Assignment, StorageError> {
        Ok(Assignment {
            id: parse_uuid("assignments", &self.id)?,
            person_id: parse_uuid("assignments", &self.person_id)?,
            block_id: parse_uuid("assignments", &self.block_id)?,
            template_id: parse_uuid("assignments", &self.template_id)?,
            role: AssignmentRole::parse(&self.role).map_err(|_| {
                StorageError::InvalidColumn {
                    table: "assignments",
                    column: "role",
                    value: self.role.clone(),
                }
            })?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct TemplateRow {
    pub id: String,
    pub code: String,
    pub name: String,
    pub slot_capacity: i64,
    pub slot_priority: f64,
    pub requires_supervision: i64,
}

impl TemplateRow {
    pub fn into_domain(self) -> Result<RotationTemplate, StorageError> {
        Ok(RotationTemplate {
            id: parse_uuid("rotation_templates", &self.id)?,
            code: self.code,
            name: self.name,
            slot_capacity: self.slot_capacity.max(0) as u32,
            slot_priority: self.slot_priority,
            requires_supervision: self.requires_supervision != 0,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct AbsenceRow {
    pub id: String,
    pub person_id: String,
    pub start_date: String,
    pub end_date: String,
    pub kind: String,
}

impl AbsenceRow {
    pub fn into_domain(self) -> Result<Absence, StorageError> {
        Ok(Absence {
            id: parse_uuid("absences", &self.id)?,
            person_id: parse_uuid("absences", &self.person_id)?,
            start_date: parse_date("absences", "start_date", &self.start_date)?,
            end_date: parse_date("absences", "end_date", &self.end_date)?,
            kind: self.kind,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct CredentialRow {
    pub person_id: String,
    pub kind: String,
    pub issued_on: String,
    pub expires_on: Option<String>,
}

impl CredentialRow {
    pub fn into_domain(self) -> Result<Credential, StorageError> {
        let expires_on = match &self.expires_on {
            Some(raw) => Some(parse_date("credentials", "expires_on", raw)?),
            None => None,
        };
        Ok(Credential {
            person_id: parse_uuid("credentials", &self.person_id)?,
            issued_on: parse_date("credentials", "issued_on", &self.issued_on)?,
            expires_on,
            kind: self.kind,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct SlotRequirementRow {
    pub template_id: String,
    pub required_credentials: String,
    pub preferred_credentials: String,
}

impl SlotRequirementRow {
    pub fn into_domain(self) -> Result<SlotRequirement, StorageError> {
        Ok(SlotRequirement {
            template_id: parse_uuid("slot_requirements", &self.template_id)?,
            required_credentials: serde_json::from_str(&self.required_credentials)
                .unwrap_or_default(),
            preferred_credentials: serde_json::from_str(&self.preferred_credentials)
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, FromRow)]
pub struct JobRow {
    pub id: String,
    pub name: String,
    pub job_kind: String,
    pub trigger_spec: String,
    pub enabled: i64,
    pub run_count: i64,
    pub last_run_at: Option<i64>,
    pub next_run_at: Option<i64>,
}

impl JobRow {
    pub fn into_domain(self) -> Result<ScheduledJob, StorageError> {
        Ok(ScheduledJob {
            id: parse_uuid("scheduled_jobs", &self.id)?,
            name: self.name,
            job_kind: self.job_kind,
            trigger: serde_json::from_str(&self.trigger_spec).map_err(|_| {
                StorageError::InvalidColumn {
                    table: "scheduled_jobs",
                    column: "trigger_spec",
                    value: self.trigger_spec.clone(),
                }
            })?,
            enabled: self.enabled != 0,
            run_count: self.run_count,
            last_run_at: self.last_run_at.map(millis_to_datetime),
            next_run_at: self.next_run_at.map(millis_to_datetime),
        })
    }
}

#[derive(Debug, FromRow)]
pub struct JobExecutionRow {
    pub id: String,
    pub job_id: String,
    pub scheduled_for: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: String,
    pub detail: Option<String>,
    pub retry_count: i64,
}

impl JobExecutionRow {
    pub fn into_domain(self) -> Result<JobExecution, StorageError> {
        let detail = self.detail.clone().unwrap_or_default();
        let outcome = match self.status.as_str() {
            "running" => JobOutcome::Running,
            "success" => JobOutcome::Success(detail),
            "failure" => JobOutcome::Failure(detail),
            other => {
                return Err(StorageError::InvalidColumn {
                    table: "job_executions",
                    column: "status",
                    value: other.to_string(),
                })
            }
        };
        Ok(JobExecution {
            id: parse_uuid("job_executions", &self.id)?,
            job_id: parse_uuid("job_executions", &self.job_id)?,
            scheduled_for: millis_to_datetime(self.scheduled_for),
            started_at: millis_to_datetime(self.started_at),
            finished_at: self.finished_at.map(millis_to_datetime),
            outcome,
            retry_count: self.retry_count as i32,
        })
    }
}

/// Split an outcome into its (status, detail) columns.
pub fn outcome_columns(outcome: &JobOutcome) -> (&'static str, Option<&str>) {
    match outcome {
        JobOutcome::Running => ("running", None),
        JobOutcome::Success(summary) => ("success", Some(summary)),
        JobOutcome::Failure(message) => ("failure", Some(message)),
    }
}
