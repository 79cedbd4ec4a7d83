//! Entity builders and in-memory port implementations for tests.

use crate::domain::{
    Absence, Assignment, Block, Credential, HalfDay, Person, PersonRole, RotationTemplate,
    SlotRequirement,
};
use crate::ports::{CheckpointStore, ScheduleRepository};
use crate::solver::SolverCheckpoint;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

pub fn resident(name: &str, pgy_level: u8) -> Person {
    Person {
        id: Uuid::new_v4(),
        name: name.to_string(),
        role: PersonRole::Resident,
        pgy_level: Some(pgy_level),
    }
}

pub fn faculty(name: &str) -> Person {
    Person {
        id: Uuid::new_v4(),
        name: name.to_string(),
        role: PersonRole::Faculty,
        pgy_level: None,
    }
}

pub fn block(date: NaiveDate, half_day: HalfDay) -> Block {
    let is_weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
    Block {
        id: Uuid::new_v4(),
        date,
        half_day,
        is_weekend,
        is_holiday: false,
    }
}

/// AM + PM blocks for every date in the inclusive range.
pub fn blocks_for_range(start: NaiveDate, end: NaiveDate) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut date = start;
    while date <= end {
        blocks.push(block(date, HalfDay::Am));
        blocks.push(block(date, HalfDay::Pm));
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    blocks
}

pub fn clinic_template(slot_capacity: u32) -> RotationTemplate {
    RotationTemplate {
        id: Uuid::new_v4(),
        code: "clinic".to_string(),
        name: "Continuity Clinic".to_string(),
        slot_capacity,
        slot_priority: 1.0,
        requires_supervision: true,
    }
}

pub fn absence(person_id: Uuid, start: NaiveDate, end: NaiveDate) -> Absence {
    Absence {
        id: Uuid::new_v4(),
        person_id,
        start_date: start,
        end_date: end,
        kind: "leave".to_string(),
    }
}

pub fn credential(person_id: Uuid, kind: &str) -> Credential {
    Credential {
        person_id,
        kind: kind.to_string(),
        issued_on: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        expires_on: None,
    }
}

/// In-memory schedule repository backed by `RwLock`ed collections.
///
/// Implements the same trait the SQLite repository does, so solver and
/// validator tests run without a database.
#[derive(Default)]
pub struct InMemoryScheduleRepository {
    people: RwLock<Vec<Person>>,
    blocks: RwLock<Vec<Block>>,
    assignments: RwLock<Vec<Assignment>>,
    absences: RwLock<Vec<Absence>>,
    credentials: RwLock<Vec<Credential>>,
    templates: RwLock<Vec<RotationTemplate>>,
    requirements: RwLock<Vec<SlotRequirement>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_people(&self, people: impl IntoIterator<Item = Person>) {
        self.people.write().unwrap().extend(people);
    }

    pub fn add_blocks(&self, blocks: impl IntoIterator<Item = Block>) {
        self.blocks.write().unwrap().extend(blocks);
    }

    pub fn add_assignments(&self, assignments: impl IntoIterator<Item = Assignment>) {
        self.assignments.write().unwrap().extend(assignments);
    }

    pub fn add_absences(&self, absences: impl IntoIterator<Item = Absence>) {
        self.absences.write().unwrap().extend(absences);
    }

    pub fn add_credentials(&self, credentials: impl IntoIterator<Item = Credential>) {
        self.credentials.write().unwrap().extend(credentials);
    }

    pub fn add_template(&self, template: RotationTemplate) {
        self.templates.write().unwrap().push(template);
    }

    pub fn add_requirement(&self, requirement: SlotRequirement) {
        self.requirements.write().unwrap().push(requirement);
    }

    pub fn all_assignments(&self) -> Vec<Assignment> {
        self.assignments.read().unwrap().clone()
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn people_by_role(&self, role: PersonRole) -> anyhow::Result<Vec<Person>> {
        Ok(self
            .people
            .read()
            .unwrap()
            .iter()
            .filter(|p| p.role == role)
            .cloned()
            .collect())
    }

    async fn person(&self, person_id: Uuid) -> anyhow::Result<Option<Person>> {
        Ok(self
            .people
            .read()
            .unwrap()
            .iter()
            .find(|p| p.id == person_id)
            .cloned())
    }

    async fn blocks_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<Block>> {
        Ok(self
            .blocks
            .read()
            .unwrap()
            .iter()
            .filter(|b| start <= b.date && b.date <= end)
            .cloned()
            .collect())
    }

    async fn assignments_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        person_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<Assignment>> {
        let blocks = self.blocks.read().unwrap();
        let in_range: std::collections::HashSet<Uuid> = blocks
            .iter()
            .filter(|b| start <= b.date && b.date <= end)
            .map(|b| b.id)
            .collect();
        Ok(self
            .assignments
            .read()
            .unwrap()
            .iter()
            .filter(|a| in_range.contains(&a.block_id))
            .filter(|a| person_id.map_or(true, |p| a.person_id == p))
            .cloned()
            .collect())
    }

    async fn save_assignments(&self, assignments: &[Assignment]) -> anyhow::Result<()> {
        let mut store = self.assignments.write().unwrap();
        for a in assignments {
            store.retain(|existing| {
                !(existing.person_id == a.person_id && existing.block_id == a.block_id)
            });
            store.push(a.clone());
        }
        Ok(())
    }

    async fn clear_assignments_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<u64> {
        let blocks = self.blocks.read().unwrap();
        let in_range: std::collections::HashSet<Uuid> = blocks
            .iter()
            .filter(|b| start <= b.date && b.date <= end)
            .map(|b| b.id)
            .collect();
        let mut store = self.assignments.write().unwrap();
        let before = store.len();
        store.retain(|a| !in_range.contains(&a.block_id));
        Ok((before - store.len()) as u64)
    }

    async fn credentials_for(&self, person_id: Uuid) -> anyhow::Result<Vec<Credential>> {
        Ok(self
            .credentials
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.person_id == person_id)
            .cloned()
            .collect())
    }

    async fn absences_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        person_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<Absence>> {
        Ok(self
            .absences
            .read()
            .unwrap()
            .iter()
            .filter(|a| a.start_date <= end && start <= a.end_date)
            .filter(|a| person_id.map_or(true, |p| a.person_id == p))
            .cloned()
            .collect())
    }

    async fn templates_all(&self) -> anyhow::Result<Vec<RotationTemplate>> {
        Ok(self.templates.read().unwrap().clone())
    }

    async fn slot_requirements_for(
        &self,
        template_id: Uuid,
    ) -> anyhow::Result<Option<SlotRequirement>> {
        Ok(self
            .requirements
            .read()
            .unwrap()
            .iter()
            .find(|r| r.template_id == template_id)
            .cloned())
    }
}

/// In-memory checkpoint store with the same hash-verification behavior as
/// the KV-backed implementation.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, SolverCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Corrupt the stored checkpoint for a run (test helper).
    pub fn tamper(&self, run_id: &str) {
        if let Some(c) = self.checkpoints.write().unwrap().get_mut(run_id) {
            c.score += 1.0;
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &SolverCheckpoint) -> anyhow::Result<()> {
        self.checkpoints
            .write()
            .unwrap()
            .insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> anyhow::Result<Option<SolverCheckpoint>> {
        let store = self.checkpoints.read().unwrap();
        match store.get(run_id) {
            Some(c) if c.verify_integrity() => Ok(Some(c.clone())),
            Some(_) => Ok(None),
            None => Ok(None),
        }
    }

    async fn delete(&self, run_id: &str) -> anyhow::Result<()> {
        self.checkpoints.write().unwrap().remove(run_id);
        Ok(())
    }

    async fn history(&self, run_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .checkpoints
            .read()
            .unwrap()
            .get(run_id)
            .map(|c| vec![c.hash.clone()])
            .unwrap_or_default())
    }
}
