//! Conflict analysis over a date range.

use anyhow::Result;
use chrono::NaiveDate;
use medrota_core::conflicts::{summarize, visualizer, ConflictEngine};
use medrota_core::domain::DateRange;
use medrota_storage::SqliteScheduleRepository;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

pub async fn run(
    pool: SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
    person: Option<Uuid>,
    timeline: bool,
) -> Result<()> {
    let repo = Arc::new(SqliteScheduleRepository::new(pool));
    let engine = ConflictEngine::new(repo);
    let range = DateRange::new(start, end);
    let conflicts = engine.analyze(range, person).await?;

    let summary = summarize(&conflicts);
    println!(
        "{} conflict(s), {} critical, {} people affected",
        summary.total, summary.critical_count, summary.affected_people_count
    );
    for (category, count) in &summary.by_category {
        println!("  {}: {}", category, count);
    }

    for conflict in conflicts.iter().take(20) {
        println!(
            "[{}] {} ({} .. {}) impact={:.2} urgency={:.2}",
            conflict.severity.as_str(),
            conflict.title,
            conflict.start_date,
            conflict.end_date,
            conflict.impact_score,
            conflict.urgency_score,
        );
    }

    if timeline {
        for point in visualizer::timeline(&conflicts, range) {
            if point.conflict_count > 0 {
                println!(
                    "{}  score={:.2}  conflicts={}",
                    point.date, point.severity_score, point.conflict_count
                );
            }
        }
    }
    Ok(())
}
