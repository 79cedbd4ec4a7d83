//! Soft-objective scoring for candidate schedules.
//!
//! Every function here is pure over the candidate assignment set; the engine
//! combines them through [`SoftWeights`] into a single cost (lower is
//! better).

use crate::domain::{Block, HalfDay};
use crate::solver::types::SoftWeights;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Gini coefficient of a count distribution, in [0, 1].
///
/// 0.0 means perfectly even workload; values near 1.0 mean one person
/// carries nearly everything. Empty or all-zero inputs score 0.0.
pub fn gini_coefficient(counts: &[u32]) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    let total: u64 = counts.iter().map(|&c| c as u64).sum();
    if total == 0 {
        return 0.0;
    }

    let mut sorted: Vec<u64> = counts.iter().map(|&c| c as u64).collect();
    sorted.sort_unstable();

    let n = sorted.len() as f64;
    let sum: f64 = total as f64;
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, &c)| (i as f64 + 1.0) * c as f64)
        .sum();

    (2.0 * weighted) / (n * sum) - (n + 1.0) / n
}

/// Fraction of duty days that are full days (AM and PM both assigned),
/// over all people. 0.0 when nobody works a full day.
pub fn back_to_back_density(
    person_day_halves: &HashMap<(Uuid, NaiveDate), Vec<HalfDay>>,
) -> f64 {
    if person_day_halves.is_empty() {
        return 0.0;
    }
    let full_days = person_day_halves
        .values()
        .filter(|halves| halves.contains(&HalfDay::Am) && halves.contains(&HalfDay::Pm))
        .count();
    full_days as f64 / person_day_halves.len() as f64
}

/// Population variance of per-person call counts.
pub fn call_count_variance(call_counts: &[u32]) -> f64 {
    if call_counts.is_empty() {
        return 0.0;
    }
    let n = call_counts.len() as f64;
    let mean = call_counts.iter().map(|&c| c as f64).sum::<f64>() / n;
    call_counts
        .iter()
        .map(|&c| {
            let d = c as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n
}

/// Count of rotation switches between adjacent duty days, per person,
/// summed. A switch is two consecutive calendar days assigned to different
/// templates.
pub fn sequencing_penalty(person_day_templates: &HashMap<Uuid, BTreeMap<NaiveDate, Uuid>>) -> f64 {
    let mut switches = 0u32;
    for days in person_day_templates.values() {
        let mut prev: Option<(NaiveDate, Uuid)> = None;
        for (&date, &template) in days {
            if let Some((prev_date, prev_template)) = prev {
                if (date - prev_date).num_days() == 1 && template != prev_template {
                    switches += 1;
                }
            }
            prev = Some((date, template));
        }
    }
    switches as f64
}

/// Inputs for a full soft-objective evaluation of one candidate.
pub struct ObjectiveInput<'a> {
    /// Per-resident total assignment counts (covered slots only).
    pub resident_counts: &'a [u32],
    /// (person, date) -> half-days assigned that day.
    pub person_day_halves: &'a HashMap<(Uuid, NaiveDate), Vec<HalfDay>>,
    /// Per-resident call assignment counts.
    pub call_counts: &'a [u32],
    /// person -> date -> template assigned that day.
    pub person_day_templates: &'a HashMap<Uuid, BTreeMap<NaiveDate, Uuid>>,
    /// Slot priorities of uncovered slots.
    pub uncovered_priorities: &'a [f64],
}

/// Weighted total soft cost for one candidate schedule. Lower is better.
pub fn total_cost(weights: &SoftWeights, input: &ObjectiveInput<'_>) -> f64 {
    weights.imbalance * gini_coefficient(input.resident_counts)
        + weights.back_to_back * back_to_back_density(input.person_day_halves)
        + weights.call_variance * call_count_variance(input.call_counts)
        + weights.sequencing * sequencing_penalty(input.person_day_templates)
        + uncovered_cost(weights, input.uncovered_priorities)
}

/// Cost contribution of uncovered slots, proportional to slot priority.
pub fn uncovered_cost(weights: &SoftWeights, uncovered_priorities: &[f64]) -> f64 {
    weights.uncovered * uncovered_priorities.iter().sum::<f64>()
}

/// Whether a block counts toward coverage (weekends are excluded).
pub fn counts_for_coverage(block: &Block) -> bool {
    !block.is_weekend
}
