//! SQLite implementation of the schedule repository port.

use crate::models::{
    AbsenceRow, AssignmentRow, BlockRow, CredentialRow, PersonRow, SlotRequirementRow,
    TemplateRow,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use medrota_core::domain::{
    Absence, Assignment, Block, Credential, Person, PersonRole, RotationTemplate, SlotRequirement,
};
use medrota_core::ports::ScheduleRepository;
use sqlx::{query, query_as, SqlitePool};
use uuid::Uuid;

pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

/// SQLite reports write-write collisions as busy/locked database errors.
fn is_serialization_conflict(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>().map_or(false, |e| match e {
        sqlx::Error::Database(db) => {
            let message = db.message().to_ascii_lowercase();
            message.contains("locked") || message.contains("busy")
        }
        _ => false,
    })
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the underlying pool for transaction creation
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Seed/admin write paths (one per entity type)
    // ========================================================================

    pub async fn insert_person(&self, person: &Person) -> anyhow::Result<()> {
        query(
            "INSERT INTO people (id, name, role, pgy_level) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                role = excluded.role,
                pgy_level = excluded.pgy_level",
        )
        .bind(person.id.to_string())
        .bind(&person.name)
        .bind(person.role.as_str())
        .bind(person.pgy_level.map(|l| l as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_block(&self, block: &Block) -> anyhow::Result<()> {
        query(
            "INSERT INTO blocks (id, date, half_day, is_weekend, is_holiday)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(date, half_day) DO UPDATE SET
                is_weekend = excluded.is_weekend,
                is_holiday = excluded.is_holiday",
        )
        .bind(block.id.to_string())
        .bind(block.date.to_string())
        .bind(block.half_day.as_str())
        .bind(block.is_weekend as i64)
        .bind(block.is_holiday as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_template(&self, template: &RotationTemplate) -> anyhow::Result<()> {
        query(
            "INSERT INTO rotation_templates
                (id, code, name, slot_capacity, slot_priority, requires_supervision)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(code) DO UPDATE SET
                name = excluded.name,
                slot_capacity = excluded.slot_capacity,
                slot_priority = excluded.slot_priority,
                requires_supervision = excluded.requires_supervision",
        )
        .bind(template.id.to_string())
        .bind(&template.code)
        .bind(&template.name)
        .bind(template.slot_capacity as i64)
        .bind(template.slot_priority)
        .bind(template.requires_supervision as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_absence(&self, absence: &Absence) -> anyhow::Result<()> {
        query(
            "INSERT INTO absences (id, person_id, start_date, end_date, kind)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(absence.id.to_string())
        .bind(absence.person_id.to_string())
        .bind(absence.start_date.to_string())
        .bind(absence.end_date.to_string())
        .bind(&absence.kind)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_credential(&self, credential: &Credential) -> anyhow::Result<()> {
        query(
            "INSERT INTO credentials (person_id, kind, issued_on, expires_on)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(person_id, kind) DO UPDATE SET
                issued_on = excluded.issued_on,
                expires_on = excluded.expires_on",
        )
        .bind(credential.person_id.to_string())
        .bind(&credential.kind)
        .bind(credential.issued_on.to_string())
        .bind(credential.expires_on.map(|d| d.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_assignments_once(&self, assignments: &[Assignment]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for assignment in assignments {
            query(
                "INSERT INTO assignments (id, person_id, block_id, template_id, role)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(person_id, block_id) DO UPDATE SET
                    template_id = excluded.template_id,
                    role = excluded.role",
            )
            .bind(assignment.id.to_string())
            .bind(assignment.person_id.to_string())
            .bind(assignment.block_id.to_string())
            .bind(assignment.template_id.to_string())
            .bind(assignment.role.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_slot_requirement(
        &self,
        requirement: &SlotRequirement,
    ) -> anyhow::Result<()> {
        query(
            "INSERT INTO slot_requirements
                (template_id, required_credentials, preferred_credentials)
             VALUES (?, ?, ?)
             ON CONFLICT(template_id) DO UPDATE SET
                required_credentials = excluded.required_credentials,
                preferred_credentials = excluded.preferred_credentials",
        )
        .bind(requirement.template_id.to_string())
        .bind(serde_json::to_string(&requirement.required_credentials)?)
        .bind(serde_json::to_string(&requirement.preferred_credentials)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    async fn people_by_role(&self, role: PersonRole) -> anyhow::Result<Vec<Person>> {
        let rows = query_as::<_, PersonRow>(
            "SELECT id, name, role, pgy_level FROM people WHERE role = ? ORDER BY name",
        )
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn person(&self, person_id: Uuid) -> anyhow::Result<Option<Person>> {
        let row = query_as::<_, PersonRow>(
            "SELECT id, name, role, pgy_level FROM people WHERE id = ?",
        )
        .bind(person_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_domain().map_err(Into::into)).transpose()
    }

    async fn blocks_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<Block>> {
        let rows = query_as::<_, BlockRow>(
            "SELECT id, date, half_day, is_weekend, is_holiday
             FROM blocks WHERE date >= ? AND date <= ?
             ORDER BY date, half_day",
        )
        .bind(start.to_string())
        .bind(end.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn assignments_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        person_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<Assignment>> {
        let base = "SELECT a.id, a.person_id, a.block_id, a.template_id, a.role
             FROM assignments a
             JOIN blocks b ON b.id = a.block_id
             WHERE b.date >= ? AND b.date <= ?";
        let rows = match person_id {
            Some(person) => {
                query_as::<_, AssignmentRow>(&format!("{} AND a.person_id = ?", base))
                    .bind(start.to_string())
                    .bind(end.to_string())
                    .bind(person.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                query_as::<_, AssignmentRow>(base)
                    .bind(start.to_string())
                    .bind(end.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn save_assignments(&self, assignments: &[Assignment]) -> anyhow::Result<()> {
        // Concurrent writers can collide on the same rows; one retry on a
        // detected serialization conflict, then surface.
        match self.save_assignments_once(assignments).await {
            Err(err) if is_serialization_conflict(&err) => {
                tracing::warn!("assignment write conflicted, retrying once");
                self.save_assignments_once(assignments).await
            }
            other => other,
        }
    }

    async fn clear_assignments_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<u64> {
        let result = query(
            "DELETE FROM assignments WHERE block_id IN
                (SELECT id FROM blocks WHERE date >= ? AND date <= ?)",
        )
        .bind(start.to_string())
        .bind(end.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn credentials_for(&self, person_id: Uuid) -> anyhow::Result<Vec<Credential>> {
        let rows = query_as::<_, CredentialRow>(
            "SELECT person_id, kind, issued_on, expires_on
             FROM credentials WHERE person_id = ?",
        )
        .bind(person_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn absences_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        person_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<Absence>> {
        let base = "SELECT id, person_id, start_date, end_date, kind
             FROM absences WHERE start_date <= ? AND end_date >= ?";
        let rows = match person_id {
            Some(person) => {
                query_as::<_, AbsenceRow>(&format!("{} AND person_id = ?", base))
                    .bind(end.to_string())
                    .bind(start.to_string())
                    .bind(person.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                query_as::<_, AbsenceRow>(base)
                    .bind(end.to_string())
                    .bind(start.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn templates_all(&self) -> anyhow::Result<Vec<RotationTemplate>> {
        let rows = query_as::<_, TemplateRow>(
            "SELECT id, code, name, slot_capacity, slot_priority, requires_supervision
             FROM rotation_templates ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn slot_requirements_for(
        &self,
        template_id: Uuid,
    ) -> anyhow::Result<Option<SlotRequirement>> {
        let row = query_as::<_, SlotRequirementRow>(
            "SELECT template_id, required_credentials, preferred_credentials
             FROM slot_requirements WHERE template_id = ?",
        )
        .bind(template_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_domain().map_err(Into::into)).transpose()
    }
}
