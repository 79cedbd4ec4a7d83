//! Branch-and-bound schedule generation.
//!
//! The engine turns repository data into a [`SolverModel`], then searches
//! resident slot assignments depth-first with smallest-domain-first variable
//! ordering and least-loaded value ordering. Hard constraints are enforced
//! incrementally through [`PersonLedger`]; the soft objective ranks complete
//! candidates and the best one becomes the outcome.
//!
//! Long runs checkpoint periodically through the [`CheckpointStore`] port
//! and observe a cancellation token at every iteration.

use crate::domain::{Assignment, AssignmentRole, DateRange, HalfDay, PersonRole};
use crate::ports::{CheckpointStore, ScheduleRepository};
use crate::solver::checkpoint::SolverCheckpoint;
use crate::solver::constraints::PersonLedger;
use crate::solver::eligibility::{block_tie_hash, SolverModel};
use crate::solver::objective::{self, ObjectiveInput};
use crate::solver::types::{
    HardConstraintKind, SoftViolation, SoftViolationKind, SolverOptions, SolverOutcome,
    SolverStatus, UnsatConstraint,
};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// How many iterations between cooperative yields back to the runtime.
const YIELD_EVERY: u64 = 64;

pub struct SolverEngine {
    repo: Arc<dyn ScheduleRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
}

/// One value choice for a slot variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Resident(usize),
    Uncovered,
}

/// One frame of the iterative depth-first search.
struct Frame {
    slot: usize,
    candidates: Vec<Choice>,
    next: usize,
}

/// Best complete candidate seen so far.
#[derive(Debug, Clone)]
struct Incumbent {
    assignments: Vec<Assignment>,
    score: f64,
    soft_violations: Vec<SoftViolation>,
}

impl SolverEngine {
    pub fn new(repo: Arc<dyn ScheduleRepository>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self { repo, checkpoints }
    }

    /// Generate assignments for the range under the given options.
    ///
    /// Never writes to the repository; callers commit the returned
    /// assignments (or discard drafts). Timeout and cancellation are
    /// normal returns carrying the best-so-far solution.
    pub async fn generate(
        &self,
        range: DateRange,
        options: SolverOptions,
    ) -> anyhow::Result<SolverOutcome> {
        let started = Instant::now();
        let model = self.load_model(range, &options).await?;

        if let Some(core) = fixed_double_bookings(&model) {
            return Ok(SolverOutcome::infeasible(core, 0));
        }

        if model.slots.is_empty() {
            return Ok(SolverOutcome {
                status: SolverStatus::Solved,
                assignments: model.fixed.clone(),
                score: 0.0,
                soft_violations: Vec::new(),
                unsat_core: Vec::new(),
                iterations: 0,
            });
        }

        let mut search = Search::new(&model, &options);

        // Warm start: an intact checkpoint for this run id seeds the
        // incumbent so resumed runs can only improve on it.
        if let Some(checkpoint) = self.checkpoints.load(&options.run_id).await? {
            if let Some(incumbent) = search.incumbent_from_checkpoint(&checkpoint) {
                tracing::info!(
                    run_id = %options.run_id,
                    iteration = checkpoint.iteration,
                    score = checkpoint.score,
                    "warm-starting solver from checkpoint"
                );
                search.best = Some(incumbent);
            }
        }

        loop {
            if options.cancel.is_canceled() {
                self.save_checkpoint(&search, &options).await;
                return Ok(search.into_outcome(SolverStatus::Canceled));
            }
            if started.elapsed() >= options.timeout {
                self.save_checkpoint(&search, &options).await;
                return Ok(search.into_outcome(SolverStatus::Timeout));
            }

            let exhausted = search.step();
            search.iterations += 1;

            if options.checkpoint_every > 0 && search.iterations % options.checkpoint_every == 0 {
                self.save_checkpoint(&search, &options).await;
            }
            if search.iterations % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }

            if exhausted {
                break;
            }
        }

        if search.best.is_none() {
            let core = search.minimal_unsat_core();
            return Ok(SolverOutcome::infeasible(core, search.iterations));
        }

        self.save_checkpoint(&search, &options).await;
        Ok(search.into_outcome(SolverStatus::Solved))
    }

    async fn load_model(
        &self,
        range: DateRange,
        options: &SolverOptions,
    ) -> anyhow::Result<SolverModel> {
        let residents = self.repo.people_by_role(PersonRole::Resident).await?;
        let faculty = self.repo.people_by_role(PersonRole::Faculty).await?;
        let blocks = self.repo.blocks_in_range(range.start, range.end).await?;
        let absences = self
            .repo
            .absences_in_range(range.start, range.end, None)
            .await?;

        let templates = self.repo.templates_all().await?;
        let template = templates
            .into_iter()
            .find(|t| t.code == options.template_code)
            .ok_or_else(|| {
                anyhow::anyhow!("unknown rotation template: {}", options.template_code)
            })?;
        let requirement = self.repo.slot_requirements_for(template.id).await?;

        let mut credentials = HashMap::new();
        for person in residents.iter().chain(faculty.iter()) {
            let held = self.repo.credentials_for(person.id).await?;
            if !held.is_empty() {
                credentials.insert(person.id, held);
            }
        }

        let fixed = if options.preserve_fixed {
            self.repo
                .assignments_in_range(range.start, range.end, None)
                .await?
        } else {
            Vec::new()
        };

        Ok(SolverModel::build(
            blocks,
            template,
            residents,
            faculty,
            &absences,
            &credentials,
            requirement.as_ref(),
            fixed,
            options.preserve_fixed,
        ))
    }

    async fn save_checkpoint(&self, search: &Search<'_>, options: &SolverOptions) {
        let Some(best) = &search.best else {
            return;
        };
        let tuples = best
            .assignments
            .iter()
            .map(|a| (a.person_id, a.block_id, Some(a.template_id)))
            .collect();
        let checkpoint = SolverCheckpoint::new(
            options.run_id.clone(),
            search.iterations,
            tuples,
            best.score,
            best.soft_violations.len() as u32,
        );
        if let Err(err) = self.checkpoints.save(&checkpoint).await {
            // Checkpointing is best-effort; the run itself continues.
            tracing::warn!(run_id = %options.run_id, error = %err, "checkpoint save failed");
        }
    }
}

struct Search<'a> {
    model: &'a SolverModel,
    options: &'a SolverOptions,
    /// Current value per slot; `None` while unassigned.
    chosen: Vec<Option<Choice>>,
    resident_ledgers: Vec<PersonLedger>,
    stack: Vec<Frame>,
    best: Option<Incumbent>,
    iterations: u64,
    /// Supervision shortfalls witnessed on otherwise-complete candidates.
    supervision_failures: HashMap<Uuid, UnsatConstraint>,
}

impl<'a> Search<'a> {
    fn new(model: &'a SolverModel, options: &'a SolverOptions) -> Self {
        let mut search = Self {
            model,
            options,
            chosen: vec![None; model.slots.len()],
            resident_ledgers: vec![PersonLedger::new(); model.residents.len()],
            stack: Vec::new(),
            best: None,
            iterations: 0,
            supervision_failures: HashMap::new(),
        };

        // Pinned slots and preserved fixed assignments are applied once and
        // never backtracked.
        for (slot_idx, slot) in model.slots.iter().enumerate() {
            if let Some(person) = slot.fixed_person {
                let block = &model.blocks[slot.block_idx];
                search.resident_ledgers[person].assign(block.date, block.half_day);
                search.chosen[slot_idx] = Some(Choice::Resident(person));
            }
        }
        if search.chosen.iter().all(|c| c.is_some()) {
            // Everything is pinned; the only candidate is the fixed set.
            search.evaluate_candidate();
        } else {
            search.push_next_frame();
        }
        search
    }

    /// Advance the search by one node expansion. Returns true once the
    /// space is exhausted.
    fn step(&mut self) -> bool {
        let (slot_idx, next_choice) = {
            let Some(frame) = self.stack.last_mut() else {
                return true;
            };
            let choice = frame.candidates.get(frame.next).copied();
            if choice.is_some() {
                frame.next += 1;
            }
            (frame.slot, choice)
        };

        // Undo the previous value of this frame, if any.
        if let Some(Choice::Resident(person)) = self.chosen[slot_idx] {
            let block = &self.model.blocks[self.model.slots[slot_idx].block_idx];
            self.resident_ledgers[person].unassign(block.date, block.half_day);
        }
        self.chosen[slot_idx] = None;

        let Some(choice) = next_choice else {
            self.stack.pop();
            return self.stack.is_empty();
        };

        if let Choice::Resident(person) = choice {
            let block = &self.model.blocks[self.model.slots[slot_idx].block_idx];
            self.resident_ledgers[person].assign(block.date, block.half_day);
        }
        self.chosen[slot_idx] = Some(choice);

        // Bound: uncovered cost alone already beats nothing further down
        // this branch, every other soft term being nonnegative.
        if let Some(best) = &self.best {
            if self.partial_uncovered_cost() >= best.score {
                return false;
            }
        }

        if self.chosen.iter().all(|c| c.is_some()) {
            self.evaluate_candidate();
            return false;
        }

        self.push_next_frame();
        false
    }

    /// Smallest-domain-first variable selection with deterministic ties.
    fn push_next_frame(&mut self) {
        let mut pick: Option<(usize, usize, u64, u32)> = None;
        for (slot_idx, slot) in self.model.slots.iter().enumerate() {
            if self.chosen[slot_idx].is_some() {
                continue;
            }
            let block = &self.model.blocks[slot.block_idx];
            let live = slot
                .domain
                .iter()
                .filter(|&&p| self.resident_ledgers[p].can_take(block.date, block.half_day))
                .count();
            let tie = block_tie_hash(block.id);
            let key = (slot_idx, live, tie, slot.slot_idx);
            let better = match &pick {
                None => true,
                Some((_, best_live, best_tie, best_slot)) => {
                    (live, tie, slot.slot_idx) < (*best_live, *best_tie, *best_slot)
                }
            };
            if better {
                pick = Some(key);
            }
        }

        let Some((slot_idx, _, _, _)) = pick else {
            return;
        };

        let slot = &self.model.slots[slot_idx];
        let block = &self.model.blocks[slot.block_idx];
        let mut eligible: Vec<usize> = slot
            .domain
            .iter()
            .copied()
            .filter(|&p| self.resident_ledgers[p].can_take(block.date, block.half_day))
            .collect();
        // Least-constrained value first: fewest cumulative hours, then id.
        eligible.sort_by(|&a, &b| {
            let hours_a = self.resident_ledgers[a].total_hours();
            let hours_b = self.resident_ledgers[b].total_hours();
            hours_a
                .partial_cmp(&hours_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.model.residents[a].id.cmp(&self.model.residents[b].id))
        });

        let mut candidates: Vec<Choice> = eligible.into_iter().map(Choice::Resident).collect();
        // A slot nobody can take stays schedulable: it degrades into an
        // uncovered-block soft violation rather than failing the run.
        candidates.push(Choice::Uncovered);

        self.stack.push(Frame {
            slot: slot_idx,
            candidates,
            next: 0,
        });
    }

    fn partial_uncovered_cost(&self) -> f64 {
        let uncovered = self
            .chosen
            .iter()
            .filter(|c| matches!(c, Some(Choice::Uncovered)))
            .count();
        self.options.weights.uncovered * self.model.template.slot_priority * uncovered as f64
    }

    /// Score a complete candidate; on success it may become the incumbent.
    fn evaluate_candidate(&mut self) {
        let Some(faculty_assignments) = self.assign_supervision() else {
            return;
        };

        let mut assignments: Vec<Assignment> = self.model.fixed.clone();
        let mut uncovered_priorities = Vec::new();
        let mut soft_violations = Vec::new();

        for (slot_idx, choice) in self.chosen.iter().enumerate() {
            let slot = &self.model.slots[slot_idx];
            if slot.fixed_person.is_some() {
                continue; // already present through `fixed`
            }
            let block = &self.model.blocks[slot.block_idx];
            match choice {
                Some(Choice::Resident(person)) => assignments.push(Assignment {
                    id: Uuid::new_v4(),
                    person_id: self.model.residents[*person].id,
                    block_id: block.id,
                    template_id: self.model.template.id,
                    role: AssignmentRole::Primary,
                }),
                Some(Choice::Uncovered) => {
                    uncovered_priorities.push(self.model.template.slot_priority);
                    soft_violations.push(SoftViolation {
                        kind: SoftViolationKind::UncoveredBlock,
                        block_id: Some(block.id),
                        cost: self.options.weights.uncovered * self.model.template.slot_priority,
                    });
                }
                None => continue,
            }
        }
        assignments.extend(faculty_assignments);

        let score = self.score_candidate(&assignments, &uncovered_priorities);
        let improved = self.best.as_ref().map_or(true, |b| score < b.score);
        if improved {
            self.best = Some(Incumbent {
                assignments,
                score,
                soft_violations,
            });
        }
    }

    /// Greedy faculty supervision pass over the candidate.
    ///
    /// Returns `None` when some block cannot reach its required faculty
    /// count, recording the shortfall for the UNSAT core.
    fn assign_supervision(&mut self) -> Option<Vec<Assignment>> {
        if !self.model.template.requires_supervision {
            return Some(Vec::new());
        }

        // Residents per block from both searched and fixed assignments.
        let mut pgy1_per_block: HashMap<usize, u32> = HashMap::new();
        let mut other_per_block: HashMap<usize, u32> = HashMap::new();
        for (slot_idx, choice) in self.chosen.iter().enumerate() {
            if let Some(Choice::Resident(person)) = choice {
                let block_idx = self.model.slots[slot_idx].block_idx;
                if self.model.residents[*person].is_pgy1() {
                    *pgy1_per_block.entry(block_idx).or_insert(0) += 1;
                } else {
                    *other_per_block.entry(block_idx).or_insert(0) += 1;
                }
            }
        }

        let mut faculty_ledgers: Vec<PersonLedger> =
            vec![PersonLedger::new(); self.model.faculty.len()];
        let mut supervision_counts = vec![0u32; self.model.faculty.len()];
        let mut result = Vec::new();

        // Preserved fixed supervising assignments keep their faculty busy
        // and already count toward the block's requirement.
        let faculty_index: HashMap<Uuid, usize> = self
            .model
            .faculty
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, i))
            .collect();
        let block_index: HashMap<Uuid, usize> = self
            .model
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id, i))
            .collect();
        let mut fixed_supervising: HashMap<usize, u32> = HashMap::new();
        for a in &self.model.fixed {
            let (Some(&f), Some(&b)) = (
                faculty_index.get(&a.person_id),
                block_index.get(&a.block_id),
            ) else {
                continue;
            };
            let block = &self.model.blocks[b];
            faculty_ledgers[f].assign(block.date, block.half_day);
            supervision_counts[f] += 1;
            *fixed_supervising.entry(b).or_insert(0) += 1;
        }

        for (block_idx, block) in self.model.blocks.iter().enumerate() {
            let pgy1 = pgy1_per_block.get(&block_idx).copied().unwrap_or(0);
            let other = other_per_block.get(&block_idx).copied().unwrap_or(0);
            let already = fixed_supervising.get(&block_idx).copied().unwrap_or(0);
            let required = required_faculty(pgy1, other).saturating_sub(already);
            if required == 0 {
                continue;
            }

            let mut available: Vec<usize> = (0..self.model.faculty.len())
                .filter(|&f| {
                    self.model.faculty_available[f][block_idx]
                        && faculty_ledgers[f].is_free(block.date, block.half_day)
                })
                .collect();
            if (available.len() as u32) < required {
                self.supervision_failures.insert(
                    block.id,
                    UnsatConstraint {
                        kind: HardConstraintKind::SupervisionRatio,
                        block_id: Some(block.id),
                        person_id: None,
                        detail: format!(
                            "block {} {} needs {} faculty, {} available",
                            block.date,
                            block.half_day,
                            required,
                            available.len()
                        ),
                    },
                );
                return None;
            }

            // Balance supervision load across faculty.
            available.sort_by_key(|&f| (supervision_counts[f], self.model.faculty[f].id));
            for &f in available.iter().take(required as usize) {
                faculty_ledgers[f].assign(block.date, block.half_day);
                supervision_counts[f] += 1;
                result.push(Assignment {
                    id: Uuid::new_v4(),
                    person_id: self.model.faculty[f].id,
                    block_id: block.id,
                    template_id: self.model.template.id,
                    role: AssignmentRole::Supervising,
                });
            }
        }

        Some(result)
    }

    fn score_candidate(&self, assignments: &[Assignment], uncovered_priorities: &[f64]) -> f64 {
        let block_by_id: HashMap<Uuid, (NaiveDate, HalfDay)> = self
            .model
            .blocks
            .iter()
            .map(|b| (b.id, (b.date, b.half_day)))
            .collect();
        let resident_ids: HashSet<Uuid> = self.model.residents.iter().map(|p| p.id).collect();

        let mut counts_by_resident: HashMap<Uuid, u32> = self
            .model
            .residents
            .iter()
            .map(|p| (p.id, 0))
            .collect();
        let mut person_day_halves: HashMap<(Uuid, NaiveDate), Vec<HalfDay>> = HashMap::new();
        let mut call_counts: HashMap<Uuid, u32> =
            self.model.residents.iter().map(|p| (p.id, 0)).collect();
        let mut person_day_templates: HashMap<Uuid, BTreeMap<NaiveDate, Uuid>> = HashMap::new();

        let is_call = self.model.template.code == "call";
        for a in assignments {
            let Some(&(date, half_day)) = block_by_id.get(&a.block_id) else {
                continue;
            };
            if !resident_ids.contains(&a.person_id) {
                continue;
            }
            *counts_by_resident.entry(a.person_id).or_insert(0) += 1;
            person_day_halves
                .entry((a.person_id, date))
                .or_default()
                .push(half_day);
            if is_call {
                *call_counts.entry(a.person_id).or_insert(0) += 1;
            }
            person_day_templates
                .entry(a.person_id)
                .or_default()
                .insert(date, a.template_id);
        }

        let resident_counts: Vec<u32> = counts_by_resident.values().copied().collect();
        let call_count_list: Vec<u32> = call_counts.values().copied().collect();

        objective::total_cost(
            &self.options.weights,
            &ObjectiveInput {
                resident_counts: &resident_counts,
                person_day_halves: &person_day_halves,
                call_counts: &call_count_list,
                person_day_templates: &person_day_templates,
                uncovered_priorities,
            },
        )
    }

    /// Rebuild an incumbent from checkpoint tuples, if they still map onto
    /// the current model.
    fn incumbent_from_checkpoint(&self, checkpoint: &SolverCheckpoint) -> Option<Incumbent> {
        let block_ids: HashSet<Uuid> = self.model.blocks.iter().map(|b| b.id).collect();
        let resident_ids: HashSet<Uuid> = self.model.residents.iter().map(|p| p.id).collect();
        let faculty_ids: HashSet<Uuid> = self.model.faculty.iter().map(|p| p.id).collect();

        let mut assignments = Vec::with_capacity(checkpoint.assignments.len());
        for &(person_id, block_id, template_id) in &checkpoint.assignments {
            if !block_ids.contains(&block_id) {
                return None;
            }
            let role = if resident_ids.contains(&person_id) {
                AssignmentRole::Primary
            } else if faculty_ids.contains(&person_id) {
                AssignmentRole::Supervising
            } else {
                return None;
            };
            assignments.push(Assignment {
                id: Uuid::new_v4(),
                person_id,
                block_id,
                template_id: template_id.unwrap_or(self.model.template.id),
                role,
            });
        }

        // Uncovered slots are whatever the checkpoint left unassigned.
        let mut covered: HashMap<usize, u32> = HashMap::new();
        for a in &assignments {
            if a.role != AssignmentRole::Primary {
                continue;
            }
            if let Some(idx) = self.model.blocks.iter().position(|b| b.id == a.block_id) {
                *covered.entry(idx).or_insert(0) += 1;
            }
        }
        let mut soft_violations = Vec::new();
        for slot in &self.model.slots {
            let have = covered.get(&slot.block_idx).copied().unwrap_or(0);
            if slot.slot_idx >= have {
                soft_violations.push(SoftViolation {
                    kind: SoftViolationKind::UncoveredBlock,
                    block_id: Some(self.model.blocks[slot.block_idx].id),
                    cost: self.options.weights.uncovered * self.model.template.slot_priority,
                });
            }
        }

        Some(Incumbent {
            assignments,
            score: checkpoint.score,
            soft_violations,
        })
    }

    /// Smallest witnessed set of unsatisfiable hard constraints.
    fn minimal_unsat_core(&self) -> Vec<UnsatConstraint> {
        let mut core: Vec<UnsatConstraint> =
            self.supervision_failures.values().cloned().collect();
        core.sort_by(|a, b| a.detail.cmp(&b.detail));
        core
    }

    fn into_outcome(self, status: SolverStatus) -> SolverOutcome {
        let iterations = self.iterations;
        match self.best {
            Some(best) => SolverOutcome {
                status,
                assignments: best.assignments,
                score: best.score,
                soft_violations: best.soft_violations,
                unsat_core: Vec::new(),
                iterations,
            },
            None => SolverOutcome {
                status,
                assignments: Vec::new(),
                score: f64::INFINITY,
                soft_violations: Vec::new(),
                unsat_core: Vec::new(),
                iterations,
            },
        }
    }
}

/// Faculty required on a block: `ceil(pgy1/2) + ceil(others/4)`, at least
/// one whenever residents are present.
pub fn required_faculty(pgy1_count: u32, other_count: u32) -> u32 {
    if pgy1_count + other_count == 0 {
        return 0;
    }
    (pgy1_count.div_ceil(2) + other_count.div_ceil(4)).max(1)
}

/// Detect preserved fixed assignments that double-book a person.
fn fixed_double_bookings(model: &SolverModel) -> Option<Vec<UnsatConstraint>> {
    let block_by_id: HashMap<Uuid, (NaiveDate, HalfDay)> = model
        .blocks
        .iter()
        .map(|b| (b.id, (b.date, b.half_day)))
        .collect();
    let mut seen: HashSet<(Uuid, NaiveDate, HalfDay)> = HashSet::new();
    let mut core = Vec::new();
    for a in &model.fixed {
        let Some(&(date, half_day)) = block_by_id.get(&a.block_id) else {
            continue;
        };
        if !seen.insert((a.person_id, date, half_day)) {
            core.push(UnsatConstraint {
                kind: HardConstraintKind::DoubleBooking,
                block_id: Some(a.block_id),
                person_id: Some(a.person_id),
                detail: format!("fixed assignments double-book {} {}", date, half_day),
            });
        }
    }
    if core.is_empty() {
        None
    } else {
        Some(core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_faculty_formula() {
        assert_eq!(required_faculty(0, 0), 0);
        assert_eq!(required_faculty(1, 0), 1);
        assert_eq!(required_faculty(2, 0), 1);
        assert_eq!(required_faculty(3, 0), 2);
        assert_eq!(required_faculty(0, 1), 1);
        assert_eq!(required_faculty(0, 4), 1);
        assert_eq!(required_faculty(0, 5), 2);
        assert_eq!(required_faculty(2, 4), 2);
        assert_eq!(required_faculty(3, 5), 4);
    }
}
