use crate::domain::{
    Absence, Assignment, Block, Credential, Person, PersonRole, RotationTemplate, SlotRequirement,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Get all people with the given role
    async fn people_by_role(&self, role: PersonRole) -> anyhow::Result<Vec<Person>>;

    /// Get a single person by id
    async fn person(&self, person_id: Uuid) -> anyhow::Result<Option<Person>>;

    /// Get all blocks whose date falls inside the range (inclusive)
    async fn blocks_in_range(&self, start: NaiveDate, end: NaiveDate)
        -> anyhow::Result<Vec<Block>>;

    /// Get assignments in the range, optionally restricted to one person
    async fn assignments_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        person_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<Assignment>>;

    /// Persist a batch of assignments atomically.
    ///
    /// Existing assignments for the same (person, block) are replaced.
    /// Either every row lands or none do.
    async fn save_assignments(&self, assignments: &[Assignment]) -> anyhow::Result<()>;

    /// Delete all assignments whose block date falls inside the range.
    /// Returns the number of rows removed.
    async fn clear_assignments_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<u64>;

    /// Get all credentials held by a person
    async fn credentials_for(&self, person_id: Uuid) -> anyhow::Result<Vec<Credential>>;

    /// Get absences overlapping the range, optionally restricted to one person
    async fn absences_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        person_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<Absence>>;

    /// Get all rotation templates
    async fn templates_all(&self) -> anyhow::Result<Vec<RotationTemplate>>;

    /// Get the slot requirement for a template, if one is configured
    async fn slot_requirements_for(
        &self,
        template_id: Uuid,
    ) -> anyhow::Result<Option<SlotRequirement>>;
}
