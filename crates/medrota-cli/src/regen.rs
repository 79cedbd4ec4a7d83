//! Block regeneration: optional clear, solver run, validation, and a
//! PII-free summary for quick audit.

use crate::blocks::block_dates;
use anyhow::Result;
use medrota_core::solver::{SolverEngine, SolverOptions, SolverStatus};
use medrota_core::validator::AcgmeValidator;
use medrota_ops::kv::MemoryKv;
use medrota_ops::metrics::OpsMetrics;
use medrota_ops::snapshot::KvCheckpointStore;
use medrota_core::ScheduleRepository;
use medrota_storage::SqliteScheduleRepository;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RegenArgs {
    pub block: u32,
    pub year: i32,
    pub clear: bool,
    pub timeout_secs: u64,
    pub draft: bool,
    pub template: String,
}

pub async fn run(pool: SqlitePool, args: RegenArgs) -> Result<()> {
    let range = block_dates(args.block, args.year)?;
    tracing::info!(
        block = args.block,
        year = args.year,
        start = %range.start,
        end = %range.end,
        "regenerating block"
    );

    let repo = Arc::new(SqliteScheduleRepository::new(pool));

    if args.clear {
        let removed = repo
            .clear_assignments_in_range(range.start, range.end)
            .await?;
        println!("cleared {} existing assignments", removed);
    }

    let checkpoints = Arc::new(KvCheckpointStore::new(Arc::new(MemoryKv::new())));
    let engine = SolverEngine::new(repo.clone(), checkpoints);

    let mut options = SolverOptions::new(format!("block-{}-{}", args.block, args.year));
    options.template_code = args.template.clone();
    options.timeout = Duration::from_secs(args.timeout_secs);
    options.draft = args.draft;
    options.preserve_fixed = !args.clear;

    let metrics = OpsMetrics::new()?;
    let solve_started = Instant::now();
    let outcome = engine.generate(range, options).await?;
    if outcome.iterations > 0 {
        metrics
            .solver_iteration_duration
            .observe(solve_started.elapsed().as_secs_f64() / outcome.iterations as f64);
    }
    println!(
        "solver: status={:?} score={:.3} iterations={} assignments={}",
        outcome.status,
        outcome.score,
        outcome.iterations,
        outcome.assignments.len()
    );
    if !outcome.soft_violations.is_empty() {
        println!("soft violations: {}", outcome.soft_violations.len());
    }
    for unsat in &outcome.unsat_core {
        println!("unsat: {:?} {}", unsat.kind, unsat.detail);
    }

    if matches!(outcome.status, SolverStatus::Infeasible | SolverStatus::Canceled) {
        return Ok(());
    }

    // Validate the candidate before any commit decision.
    let validator = AcgmeValidator::new(repo.clone());
    let report = validator
        .validate(range, Some(&outcome.assignments))
        .await?;
    println!(
        "validation: valid={} coverage={:.1}% violations={}",
        report.valid,
        report.coverage_rate,
        report.violations.len()
    );

    if args.draft {
        println!("draft run, nothing committed");
        return Ok(());
    }
    if report.has_critical() {
        println!("critical violations present, refusing to commit");
        return Ok(());
    }

    repo.save_assignments(&outcome.assignments).await?;

    // PII-free audit summary: counts by assignment role only.
    let mut by_role: BTreeMap<&str, usize> = BTreeMap::new();
    for a in &outcome.assignments {
        *by_role.entry(a.role.as_str()).or_insert(0) += 1;
    }
    println!("committed {} assignments:", outcome.assignments.len());
    for (role, count) in by_role {
        println!("  {}: {}", role, count);
    }
    Ok(())
}
