//! Full-stack regeneration flow: seed a SQLite database, run the solver,
//! commit, and validate the persisted schedule.

use chrono::NaiveDate;
use medrota_core::domain::{DateRange, PersonRole};
use medrota_core::ports::ScheduleRepository;
use medrota_core::solver::{SolverEngine, SolverOptions, SolverStatus};
use medrota_core::testing::fixtures;
use medrota_core::validator::AcgmeValidator;
use medrota_ops::kv::MemoryKv;
use medrota_ops::snapshot::KvCheckpointStore;
use medrota_storage::{create_pool, run_migrations, SqliteScheduleRepository};
use std::sync::Arc;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

#[tokio::test]
async fn test_seed_solve_commit_validate() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_pool(&dir.path().join("medrota.db")).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let repo = Arc::new(SqliteScheduleRepository::new(pool));

    // Seed one week of clinic for two residents and one attending.
    let r1 = fixtures::resident("R1", 1);
    let r2 = fixtures::resident("R2", 2);
    let f1 = fixtures::faculty("F1");
    for person in [&r1, &r2, &f1] {
        repo.insert_person(person).await.unwrap();
    }
    let blocks = fixtures::blocks_for_range(day(3), day(9));
    for block in &blocks {
        repo.insert_block(block).await.unwrap();
    }
    repo.insert_template(&fixtures::clinic_template(1))
        .await
        .unwrap();

    let range = DateRange::new(day(3), day(9));
    let checkpoints = Arc::new(KvCheckpointStore::new(Arc::new(MemoryKv::new())));
    let engine = SolverEngine::new(repo.clone(), checkpoints);

    let outcome = engine
        .generate(range, SolverOptions::new("regen-test"))
        .await
        .unwrap();
    assert_eq!(outcome.status, SolverStatus::Solved);
    assert!(outcome.soft_violations.is_empty());

    // Commit and validate what actually landed in the database.
    repo.save_assignments(&outcome.assignments).await.unwrap();
    let persisted = repo
        .assignments_in_range(range.start, range.end, None)
        .await
        .unwrap();
    assert_eq!(persisted.len(), outcome.assignments.len());

    let validator = AcgmeValidator::new(repo.clone());
    let report = validator.validate(range, None).await.unwrap();
    assert!(report.valid, "violations: {:?}", report.violations);
    assert!((report.coverage_rate - 100.0).abs() < 1e-9);

    // Clearing the range removes everything the run committed.
    let removed = repo
        .clear_assignments_in_range(range.start, range.end)
        .await
        .unwrap();
    assert_eq!(removed as usize, persisted.len());
    assert!(repo
        .people_by_role(PersonRole::Resident)
        .await
        .unwrap()
        .len()
        == 2);
}
