//! Integration tests for the SQLite schedule repository.

use chrono::NaiveDate;
use medrota_core::domain::{
    Absence, Assignment, AssignmentRole, Block, Credential, HalfDay, Person, PersonRole,
    RotationTemplate, SlotRequirement,
};
use medrota_core::ports::ScheduleRepository;
use medrota_storage::{create_pool, run_migrations, SqliteScheduleRepository};
use uuid::Uuid;

async fn repository() -> (SqliteScheduleRepository, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_pool(&dir.path().join("test.db")).await.unwrap();
    run_migrations(&pool).await.unwrap();
    (SqliteScheduleRepository::new(pool), dir)
}

fn person(name: &str, role: PersonRole, pgy: Option<u8>) -> Person {
    Person {
        id: Uuid::new_v4(),
        name: name.to_string(),
        role,
        pgy_level: pgy,
    }
}

fn block(date: NaiveDate, half_day: HalfDay) -> Block {
    Block {
        id: Uuid::new_v4(),
        date,
        half_day,
        is_weekend: false,
        is_holiday: false,
    }
}

fn template(code: &str) -> RotationTemplate {
    RotationTemplate {
        id: Uuid::new_v4(),
        code: code.to_string(),
        name: code.to_string(),
        slot_capacity: 1,
        slot_priority: 1.0,
        requires_supervision: true,
    }
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

#[tokio::test]
async fn test_people_round_trip_by_role() {
    let (repo, _dir) = repository().await;
    let resident = person("R1", PersonRole::Resident, Some(2));
    let faculty = person("F1", PersonRole::Faculty, None);
    repo.insert_person(&resident).await.unwrap();
    repo.insert_person(&faculty).await.unwrap();

    let residents = repo.people_by_role(PersonRole::Resident).await.unwrap();
    assert_eq!(residents, vec![resident.clone()]);
    let loaded = repo.person(resident.id).await.unwrap();
    assert_eq!(loaded, Some(resident));
    assert_eq!(repo.person(Uuid::new_v4()).await.unwrap(), None);
}

#[tokio::test]
async fn test_blocks_query_is_range_inclusive_and_ordered() {
    let (repo, _dir) = repository().await;
    let b1 = block(day(3), HalfDay::Pm);
    let b2 = block(day(3), HalfDay::Am);
    let b3 = block(day(5), HalfDay::Am);
    let outside = block(day(9), HalfDay::Am);
    for b in [&b1, &b2, &b3, &outside] {
        repo.insert_block(b).await.unwrap();
    }

    let found = repo.blocks_in_range(day(3), day(5)).await.unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(found[0], b2, "AM sorts before PM");
    assert_eq!(found[1], b1);
    assert_eq!(found[2], b3);
}

#[tokio::test]
async fn test_save_assignments_upserts_on_person_block() {
    let (repo, _dir) = repository().await;
    let r1 = person("R1", PersonRole::Resident, Some(1));
    let b1 = block(day(3), HalfDay::Am);
    let clinic = template("clinic");
    let call = template("call");
    repo.insert_person(&r1).await.unwrap();
    repo.insert_block(&b1).await.unwrap();
    repo.insert_template(&clinic).await.unwrap();
    repo.insert_template(&call).await.unwrap();

    let first = Assignment {
        id: Uuid::new_v4(),
        person_id: r1.id,
        block_id: b1.id,
        template_id: clinic.id,
        role: AssignmentRole::Primary,
    };
    repo.save_assignments(std::slice::from_ref(&first))
        .await
        .unwrap();

    // Same (person, block) again: replaced, not duplicated.
    let second = Assignment {
        id: Uuid::new_v4(),
        person_id: r1.id,
        block_id: b1.id,
        template_id: call.id,
        role: AssignmentRole::Backup,
    };
    repo.save_assignments(std::slice::from_ref(&second))
        .await
        .unwrap();

    let found = repo
        .assignments_in_range(day(3), day(3), None)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].template_id, call.id);
    assert_eq!(found[0].role, AssignmentRole::Backup);
}

#[tokio::test]
async fn test_assignments_filter_by_person_and_clear_range() {
    let (repo, _dir) = repository().await;
    let r1 = person("R1", PersonRole::Resident, Some(1));
    let r2 = person("R2", PersonRole::Resident, Some(2));
    let clinic = template("clinic");
    repo.insert_person(&r1).await.unwrap();
    repo.insert_person(&r2).await.unwrap();
    repo.insert_template(&clinic).await.unwrap();

    let mut assignments = Vec::new();
    for d in [3, 4] {
        for r in [&r1, &r2] {
            let b = block(day(d), HalfDay::Am);
            repo.insert_block(&b).await.unwrap();
            assignments.push(Assignment {
                id: Uuid::new_v4(),
                person_id: r.id,
                block_id: b.id,
                template_id: clinic.id,
                role: AssignmentRole::Primary,
            });
        }
    }
    repo.save_assignments(&assignments).await.unwrap();

    let only_r1 = repo
        .assignments_in_range(day(3), day(4), Some(r1.id))
        .await
        .unwrap();
    assert_eq!(only_r1.len(), 2);
    assert!(only_r1.iter().all(|a| a.person_id == r1.id));

    let removed = repo.clear_assignments_in_range(day(3), day(3)).await.unwrap();
    assert_eq!(removed, 2);
    let left = repo
        .assignments_in_range(day(3), day(4), None)
        .await
        .unwrap();
    assert_eq!(left.len(), 2);
}

#[tokio::test]
async fn test_absences_overlap_semantics() {
    let (repo, _dir) = repository().await;
    let r1 = person("R1", PersonRole::Resident, Some(1));
    repo.insert_person(&r1).await.unwrap();
    let absence = Absence {
        id: Uuid::new_v4(),
        person_id: r1.id,
        start_date: day(5),
        end_date: day(10),
        kind: "leave".to_string(),
    };
    repo.insert_absence(&absence).await.unwrap();

    // Overlapping from the left edge.
    let found = repo.absences_in_range(day(1), day(5), None).await.unwrap();
    assert_eq!(found, vec![absence.clone()]);
    // Fully before: no hit.
    assert!(repo
        .absences_in_range(day(1), day(4), None)
        .await
        .unwrap()
        .is_empty());
    // Person filter.
    assert!(repo
        .absences_in_range(day(5), day(6), Some(Uuid::new_v4()))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_credentials_and_requirements_round_trip() {
    let (repo, _dir) = repository().await;
    let r1 = person("R1", PersonRole::Resident, Some(1));
    let clinic = template("clinic");
    repo.insert_person(&r1).await.unwrap();
    repo.insert_template(&clinic).await.unwrap();

    let lifetime = Credential {
        person_id: r1.id,
        kind: "bls".to_string(),
        issued_on: day(1),
        expires_on: None,
    };
    let expiring = Credential {
        person_id: r1.id,
        kind: "acls".to_string(),
        issued_on: day(1),
        expires_on: Some(NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()),
    };
    repo.insert_credential(&lifetime).await.unwrap();
    repo.insert_credential(&expiring).await.unwrap();

    let mut held = repo.credentials_for(r1.id).await.unwrap();
    held.sort_by(|a, b| a.kind.cmp(&b.kind));
    assert_eq!(held, vec![expiring, lifetime]);

    let requirement = SlotRequirement {
        template_id: clinic.id,
        required_credentials: vec!["acls".to_string()],
        preferred_credentials: vec!["pals".to_string()],
    };
    repo.insert_slot_requirement(&requirement).await.unwrap();
    assert_eq!(
        repo.slot_requirements_for(clinic.id).await.unwrap(),
        Some(requirement)
    );
    assert_eq!(repo.slot_requirements_for(Uuid::new_v4()).await.unwrap(), None);
}
