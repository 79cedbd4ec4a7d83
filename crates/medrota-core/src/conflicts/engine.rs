//! Conflict analysis orchestration.

use crate::conflicts::detectors::{default_detectors, AnalysisContext, ConflictDetector};
use crate::conflicts::types::{Conflict, ConflictCategory, ConflictSeverity};
use crate::domain::{DateRange, PersonRole};
use crate::ports::ScheduleRepository;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Aggregate view over one analysis run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConflictSummary {
    pub total: usize,
    pub critical_count: usize,
    pub by_severity: HashMap<String, usize>,
    pub by_category: HashMap<String, usize>,
    pub affected_people_count: usize,
}

pub struct ConflictEngine {
    repo: Arc<dyn ScheduleRepository>,
    detectors: Vec<Box<dyn ConflictDetector>>,
}

impl ConflictEngine {
    pub fn new(repo: Arc<dyn ScheduleRepository>) -> Self {
        Self {
            repo,
            detectors: default_detectors(),
        }
    }

    /// Replace the detector set (used to narrow analysis to categories).
    pub fn with_detectors(
        repo: Arc<dyn ScheduleRepository>,
        detectors: Vec<Box<dyn ConflictDetector>>,
    ) -> Self {
        Self { repo, detectors }
    }

    /// Detect conflicts in the range. All detectors run concurrently over
    /// shared context; results are merged, de-duplicated by conflict id,
    /// and sorted most severe first.
    pub async fn analyze(
        &self,
        range: DateRange,
        person_filter: Option<Uuid>,
    ) -> anyhow::Result<Vec<Conflict>> {
        let ctx = self.load_context(range).await?;

        let detections = join_all(self.detectors.iter().map(|d| d.detect(&ctx))).await;

        let mut seen: HashSet<String> = HashSet::new();
        let mut conflicts: Vec<Conflict> = detections
            .into_iter()
            .flatten()
            .filter(|c| {
                person_filter.map_or(true, |person| c.affected_people.contains(&person))
            })
            .filter(|c| seen.insert(c.conflict_id.clone()))
            .collect();

        sort_by_display_order(&mut conflicts);
        Ok(conflicts)
    }

    async fn load_context(&self, range: DateRange) -> anyhow::Result<AnalysisContext> {
        let residents = self.repo.people_by_role(PersonRole::Resident).await?;
        let faculty = self.repo.people_by_role(PersonRole::Faculty).await?;
        let blocks = self.repo.blocks_in_range(range.start, range.end).await?;
        let assignments = self
            .repo
            .assignments_in_range(range.start, range.end, None)
            .await?;
        let absences = self
            .repo
            .absences_in_range(range.start, range.end, None)
            .await?;

        Ok(AnalysisContext {
            start_date: range.start,
            end_date: range.end,
            today: Utc::now().date_naive(),
            residents,
            faculty,
            blocks,
            assignments,
            absences,
        })
    }
}

/// Severity ordinal first, then the weighted display score.
pub fn sort_by_display_order(conflicts: &mut [Conflict]) {
    conflicts.sort_by(|a, b| {
        b.severity.cmp(&a.severity).then_with(|| {
            b.display_score()
                .partial_cmp(&a.display_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
}

/// Pure summary over a conflict list.
pub fn summarize(conflicts: &[Conflict]) -> ConflictSummary {
    let mut by_severity: HashMap<String, usize> = HashMap::new();
    let mut by_category: HashMap<String, usize> = HashMap::new();
    let mut people: HashSet<Uuid> = HashSet::new();

    for c in conflicts {
        *by_severity.entry(c.severity.as_str().to_string()).or_insert(0) += 1;
        *by_category.entry(c.category.as_str().to_string()).or_insert(0) += 1;
        people.extend(&c.affected_people);
    }

    ConflictSummary {
        total: conflicts.len(),
        critical_count: conflicts
            .iter()
            .filter(|c| c.severity == ConflictSeverity::Critical)
            .count(),
        by_severity,
        by_category,
        affected_people_count: people.len(),
    }
}

/// Conflicts grouped per category (diagnostic convenience).
pub fn by_category(conflicts: &[Conflict]) -> HashMap<ConflictCategory, Vec<&Conflict>> {
    let mut map: HashMap<ConflictCategory, Vec<&Conflict>> = HashMap::new();
    for c in conflicts {
        map.entry(c.category).or_default().push(c);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::types::{conflict_id, ConflictType};
    use chrono::NaiveDate;

    fn conflict(severity: ConflictSeverity, impact: f64) -> Conflict {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let person = Uuid::new_v4();
        Conflict {
            conflict_id: conflict_id(ConflictType::DoubleBooking, &[person], date, date),
            category: ConflictCategory::TimeOverlap,
            conflict_type: ConflictType::DoubleBooking,
            severity,
            title: String::new(),
            description: String::new(),
            start_date: date,
            end_date: date,
            detected_at: Utc::now(),
            affected_people: vec![person],
            affected_blocks: Vec::new(),
            affected_assignments: Vec::new(),
            impact_score: impact,
            urgency_score: 0.5,
            complexity_score: 0.5,
            auto_resolvable: false,
            context: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_sort_puts_critical_before_high_impact_low() {
        let mut conflicts = vec![
            conflict(ConflictSeverity::Low, 1.0),
            conflict(ConflictSeverity::Critical, 0.1),
            conflict(ConflictSeverity::High, 0.9),
        ];
        sort_by_display_order(&mut conflicts);
        assert_eq!(conflicts[0].severity, ConflictSeverity::Critical);
        assert_eq!(conflicts[1].severity, ConflictSeverity::High);
    }

    #[test]
    fn test_sort_breaks_severity_ties_by_display_score() {
        let mut conflicts = vec![
            conflict(ConflictSeverity::High, 0.2),
            conflict(ConflictSeverity::High, 0.9),
        ];
        sort_by_display_order(&mut conflicts);
        assert!(conflicts[0].impact_score > conflicts[1].impact_score);
    }

    #[test]
    fn test_summary_counts() {
        let conflicts = vec![
            conflict(ConflictSeverity::Critical, 0.5),
            conflict(ConflictSeverity::Critical, 0.5),
            conflict(ConflictSeverity::Low, 0.5),
        ];
        let summary = summarize(&conflicts);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.critical_count, 2);
        assert_eq!(summary.by_severity["critical"], 2);
        assert_eq!(summary.by_severity["low"], 1);
        assert_eq!(summary.affected_people_count, 3);
    }
}
