//! Model construction and eligibility pruning.
//!
//! Turns repository data into the solver's variable model: one slot variable
//! per (block, required resident slot), each with a pruned domain of
//! eligible people.

use crate::domain::{
    Absence, Assignment, Block, Credential, HalfDay, Person, RotationTemplate, SlotRequirement,
};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// One person-variable: a resident slot on a block.
#[derive(Debug, Clone)]
pub struct SlotVar {
    pub block_idx: usize,
    pub slot_idx: u32,
    /// Indices into `SolverModel::residents` eligible for this slot.
    pub domain: Vec<usize>,
    /// Pinned resident when a preserved fixed assignment covers the slot.
    pub fixed_person: Option<usize>,
}

/// Fully pruned in-memory model for one solver run.
#[derive(Debug)]
pub struct SolverModel {
    /// Blocks sorted by (date, half_day).
    pub blocks: Vec<Block>,
    pub template: RotationTemplate,
    pub residents: Vec<Person>,
    pub faculty: Vec<Person>,
    pub slots: Vec<SlotVar>,
    /// `faculty_available[f][b]` — faculty f may supervise block b.
    pub faculty_available: Vec<Vec<bool>>,
    /// Preserved fixed assignments carried into the output unchanged.
    pub fixed: Vec<Assignment>,
}

impl SolverModel {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        mut blocks: Vec<Block>,
        template: RotationTemplate,
        residents: Vec<Person>,
        faculty: Vec<Person>,
        absences: &[Absence],
        credentials: &HashMap<Uuid, Vec<Credential>>,
        requirement: Option<&SlotRequirement>,
        fixed: Vec<Assignment>,
        preserve_fixed: bool,
    ) -> Self {
        blocks.sort_by_key(|b| (b.date, b.half_day));

        let absences_by_person: HashMap<Uuid, Vec<&Absence>> = {
            let mut map: HashMap<Uuid, Vec<&Absence>> = HashMap::new();
            for a in absences {
                map.entry(a.person_id).or_default().push(a);
            }
            map
        };

        // Half-days already consumed by a preserved fixed assignment,
        // keyed by person. Blocks referenced by fixed assignments count as
        // occupied at their (date, half_day).
        let block_by_id: HashMap<Uuid, &Block> = blocks.iter().map(|b| (b.id, b)).collect();
        let mut fixed_half_days: HashMap<Uuid, HashSet<(NaiveDate, HalfDay)>> = HashMap::new();
        let mut fixed_on_block: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let resident_index: HashMap<Uuid, usize> = residents
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, i))
            .collect();

        if preserve_fixed {
            for a in &fixed {
                if let Some(block) = block_by_id.get(&a.block_id) {
                    fixed_half_days
                        .entry(a.person_id)
                        .or_default()
                        .insert((block.date, block.half_day));
                    // Only resident placements consume resident slots;
                    // fixed faculty assignments are handled by the
                    // supervision pass.
                    if resident_index.contains_key(&a.person_id) {
                        fixed_on_block
                            .entry(a.block_id)
                            .or_default()
                            .push(a.person_id);
                    }
                }
            }
        }

        let mut slots = Vec::new();
        for (block_idx, block) in blocks.iter().enumerate() {
            let fixed_here = fixed_on_block.get(&block.id);
            let fixed_count = fixed_here.map_or(0, |v| v.len()) as u32;

            for slot_idx in 0..template.slot_capacity {
                // Slots consumed by fixed assignments are pinned in order.
                let fixed_person = if slot_idx < fixed_count {
                    fixed_here
                        .and_then(|v| v.get(slot_idx as usize))
                        .and_then(|pid| resident_index.get(pid))
                        .copied()
                } else {
                    None
                };

                let domain = if fixed_person.is_some() {
                    Vec::new()
                } else {
                    eligible_residents(
                        block,
                        &residents,
                        &absences_by_person,
                        credentials,
                        requirement,
                        &fixed_half_days,
                    )
                };

                slots.push(SlotVar {
                    block_idx,
                    slot_idx,
                    domain,
                    fixed_person,
                });
            }
        }

        let faculty_available = faculty
            .iter()
            .map(|f| {
                let person_absences = absences_by_person.get(&f.id);
                blocks
                    .iter()
                    .map(|b| {
                        person_absences
                            .map_or(true, |list| !list.iter().any(|a| a.covers(b.date)))
                    })
                    .collect()
            })
            .collect();

        Self {
            blocks,
            template,
            residents,
            faculty,
            slots,
            faculty_available,
            fixed: if preserve_fixed { fixed } else { Vec::new() },
        }
    }
}

fn eligible_residents(
    block: &Block,
    residents: &[Person],
    absences_by_person: &HashMap<Uuid, Vec<&Absence>>,
    credentials: &HashMap<Uuid, Vec<Credential>>,
    requirement: Option<&SlotRequirement>,
    fixed_half_days: &HashMap<Uuid, HashSet<(NaiveDate, HalfDay)>>,
) -> Vec<usize> {
    residents
        .iter()
        .enumerate()
        .filter(|(_, person)| {
            // Absence overrides everything
            if let Some(list) = absences_by_person.get(&person.id) {
                if list.iter().any(|a| a.covers(block.date)) {
                    return false;
                }
            }
            // Fixed assignment elsewhere at the same half-day
            if let Some(taken) = fixed_half_days.get(&person.id) {
                if taken.contains(&(block.date, block.half_day)) {
                    return false;
                }
            }
            // Hard credential requirements, valid on the block date
            if let Some(req) = requirement {
                let held = credentials.get(&person.id);
                for kind in &req.required_credentials {
                    let ok = held.map_or(false, |creds| {
                        creds
                            .iter()
                            .any(|c| &c.kind == kind && c.valid_on(block.date))
                    });
                    if !ok {
                        return false;
                    }
                }
            }
            true
        })
        .map(|(idx, _)| idx)
        .collect()
}

/// Deterministic hash of a block id, used to break variable-ordering ties
/// reproducibly. FNV-1a over the raw UUID bytes.
pub fn block_tie_hash(block_id: Uuid) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in block_id.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_absent_resident_pruned_from_domain() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let block = fixtures::block(date, HalfDay::Am);
        let r1 = fixtures::resident("R1", 1);
        let r2 = fixtures::resident("R2", 2);
        let absence = fixtures::absence(r1.id, date, date);
        let template = fixtures::clinic_template(1);

        let model = SolverModel::build(
            vec![block],
            template,
            vec![r1, r2],
            vec![],
            &[absence],
            &HashMap::new(),
            None,
            vec![],
            false,
        );

        assert_eq!(model.slots.len(), 1);
        assert_eq!(model.slots[0].domain, vec![1], "only R2 is eligible");
    }

    #[test]
    fn test_missing_required_credential_pruned() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let block = fixtures::block(date, HalfDay::Am);
        let r1 = fixtures::resident("R1", 1);
        let r2 = fixtures::resident("R2", 2);
        let template = fixtures::clinic_template(1);
        let requirement = SlotRequirement {
            template_id: template.id,
            required_credentials: vec!["acls".to_string()],
            preferred_credentials: vec![],
        };

        let mut credentials = HashMap::new();
        credentials.insert(r2.id, vec![fixtures::credential(r2.id, "acls")]);

        let model = SolverModel::build(
            vec![block],
            template,
            vec![r1, r2],
            vec![],
            &[],
            &credentials,
            Some(&requirement),
            vec![],
            false,
        );

        assert_eq!(model.slots[0].domain, vec![1]);
    }

    #[test]
    fn test_tie_hash_is_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(block_tie_hash(id), block_tie_hash(id));
    }
}
