//! Validate the persisted schedule and print the report.

use anyhow::Result;
use chrono::NaiveDate;
use medrota_core::domain::DateRange;
use medrota_core::validator::AcgmeValidator;
use medrota_storage::SqliteScheduleRepository;
use sqlx::SqlitePool;
use std::sync::Arc;

pub async fn run(pool: SqlitePool, start: NaiveDate, end: NaiveDate) -> Result<()> {
    let repo = Arc::new(SqliteScheduleRepository::new(pool));
    let validator = AcgmeValidator::new(repo);
    let report = validator.validate(DateRange::new(start, end), None).await?;

    println!(
        "valid: {}  coverage: {:.1}%  assignments: {}  residents scheduled: {}",
        report.valid,
        report.coverage_rate,
        report.statistics.total_assignments,
        report.statistics.residents_scheduled
    );

    if report.violations.is_empty() {
        println!("no violations");
        return Ok(());
    }
    println!("{} violation(s):", report.violations.len());
    for violation in &report.violations {
        println!("  [{:?}] {}", violation.severity, violation.message);
    }
    Ok(())
}
