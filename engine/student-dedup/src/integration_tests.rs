//! End-to-end passes against the in-memory store
//! These tests run whole resolutions and check the dataset afterwards

use std::collections::HashSet;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::cleanup::purge_test_students;
use crate::memory::{Dataset, InMemoryStudentStore};
use crate::model::{StudentRecord, SubscriptionRecord};
use crate::{
    DisposalAction, DisposalMode, DuplicateResolver, GroupKey, GroupingRules, ResolutionReport,
    StepOutcome,
};

struct Academy {
    org: Uuid,
    data: Dataset,
}

impl Academy {
    fn new() -> Self {
        Self { org: Uuid::new_v4(), data: Dataset::new() }
    }

    fn student(&mut self, name: &str, national_id: Option<&str>, age_days: i64) -> Uuid {
        let (first, last) = name.split_once(' ').unwrap_or((name, ""));
        self.data.insert_student(
            self.org,
            StudentRecord {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                first_name: first.to_string(),
                last_name: last.to_string(),
                email: None,
                national_id: national_id.map(str::to_string),
                is_active: true,
                created_at: Utc::now() - Duration::days(age_days),
            },
        )
    }

    fn subscription(&mut self, student_id: Uuid, active: bool) -> Uuid {
        self.data.insert_subscription(SubscriptionRecord {
            id: Uuid::new_v4(),
            student_id,
            plan_id: Uuid::new_v4(),
            plan_name: "Mensal".to_string(),
            is_active: active,
            current_price: None,
        })
    }

    fn attendances(&mut self, student_id: Uuid, count: usize) {
        for _ in 0..count {
            self.data.insert_attendance(student_id);
        }
    }

    fn into_store(self) -> (Uuid, InMemoryStudentStore) {
        (self.org, InMemoryStudentStore::new(self.data))
    }
}

async fn resolve(store: &InMemoryStudentStore, org: Uuid, mode: DisposalMode) -> ResolutionReport {
    DuplicateResolver::new(store, GroupingRules::default(), mode)
        .run(org)
        .await
        .unwrap()
}

fn assert_no_orphans(data: &Dataset) {
    let students: HashSet<Uuid> = data.students.iter().map(|s| s.record.id).collect();
    assert!(data.subscriptions.iter().all(|s| students.contains(&s.student_id)));
    assert!(data.attendances.iter().all(|a| students.contains(&a.student_id)));
    assert!(data.links.iter().all(|l| students.contains(&l.student_id)));
}

fn assert_no_inactive_with_active_subscriptions(data: &Dataset) {
    for student in data.students.iter().filter(|s| !s.record.is_active) {
        let id = student.record.id;
        let active =
            data.subscriptions.iter().filter(|s| s.student_id == id && s.is_active).count();
        assert_eq!(active, 0, "inactive student {id} holds {active} active subscription(s)");
    }
}

fn assert_single_links(data: &Dataset) {
    let external: HashSet<&str> = data.links.iter().map(|l| l.external_id.as_str()).collect();
    let owners: HashSet<Uuid> = data.links.iter().map(|l| l.student_id).collect();
    assert_eq!(external.len(), data.links.len());
    assert_eq!(owners.len(), data.links.len());
}

#[cfg(test)]
#[allow(clippy::module_inception)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_linked_record_keeps_group_and_takes_attendances() {
        let mut academy = Academy::new();
        let a = academy.student("Maria Souza", Some("123.456.789-01"), 30);
        let b = academy.student("Maria Souza", Some("12345678901"), 1);
        academy.data.insert_link(a, "cus_000111").unwrap();
        academy.attendances(b, 10);
        let (org, store) = academy.into_store();

        let report = resolve(&store, org, DisposalMode::HardDelete).await;

        assert_eq!(report.groups.len(), 1);
        let group = &report.groups[0];
        assert_eq!(group.key, GroupKey::NationalId("12345678901".to_string()));
        assert_eq!(group.keeper.id, a);
        assert_eq!(group.losers[0].member.id, b);
        assert_eq!(report.totals().attendances_moved, 10);

        let data = store.snapshot().await;
        assert!(data.student(b).is_none());
        assert_eq!(data.attendances.len(), 10);
        assert!(data.attendances.iter().all(|att| att.student_id == a));
        assert_no_orphans(&data);
    }

    #[tokio::test]
    async fn test_same_name_with_distinct_ids_is_not_merged() {
        let mut academy = Academy::new();
        academy.student("Maria Silva", Some("11111111111"), 1);
        academy.student("maria silva", Some("22222222222"), 2);
        academy.student("MARIA SILVA ", Some("33333333333"), 3);
        let (org, store) = academy.into_store();
        let before = store.snapshot().await;

        let report = resolve(&store, org, DisposalMode::HardDelete).await;

        assert!(report.groups.is_empty());
        assert_eq!(store.snapshot().await, before);
        assert_eq!(store.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_test_records_form_no_group_but_are_purged() {
        let mut academy = Academy::new();
        let first = academy.student("Test Student", None, 1);
        let second = academy.student("Teste Aluno", None, 2);
        let real = academy.student("Paulo Reis", None, 3);
        let (org, store) = academy.into_store();

        let report = resolve(&store, org, DisposalMode::HardDelete).await;
        assert!(report.groups.is_empty());

        let rules = GroupingRules::default();
        let purge =
            purge_test_students(&store, org, &rules, DisposalMode::HardDelete).await.unwrap();
        assert_eq!(purge.disposed(), 2);

        let data = store.snapshot().await;
        assert!(data.student(first).is_none());
        assert!(data.student(second).is_none());
        assert!(data.student(real).is_some());
    }

    #[tokio::test]
    async fn test_second_link_is_cleaned_and_loser_disposed() {
        let mut academy = Academy::new();
        let a = academy.student("Lucas Prado", Some("98765432100"), 10);
        let b = academy.student("Lucas Prado", Some("98765432100"), 1);
        academy.data.insert_link(a, "cus_a").unwrap();
        academy.data.insert_link(b, "cus_b").unwrap();
        academy.subscription(a, true);
        academy.attendances(a, 3);
        academy.subscription(b, true);
        let (org, store) = academy.into_store();

        let report = resolve(&store, org, DisposalMode::HardDelete).await;

        let loser = &report.groups[0].losers[0];
        let migration = loser.migration.as_ref().unwrap();
        assert_eq!(migration.subscriptions_deleted(), 1);
        assert_eq!(migration.link_cleanup, Some(StepOutcome::Applied(())));
        assert!(matches!(loser.disposal, StepOutcome::Applied(DisposalAction::Deleted(_))));

        let data = store.snapshot().await;
        assert_eq!(data.subscriptions.len(), 1);
        assert_eq!(data.subscriptions[0].student_id, a);
        assert_eq!(data.links.len(), 1);
        assert_eq!(data.links[0].student_id, a);
        assert_single_links(&data);
    }

    #[tokio::test]
    async fn test_failed_link_cleanup_does_not_block_soft_delete() {
        let mut academy = Academy::new();
        let a = academy.student("Lucas Prado", Some("98765432100"), 10);
        let b = academy.student("Lucas Prado", Some("98765432100"), 1);
        academy.data.insert_link(a, "cus_a").unwrap();
        let pinned = academy.data.insert_link(b, "cus_b").unwrap();
        academy.data.insert_payment(pinned);
        academy.subscription(a, true);
        academy.attendances(a, 3);
        academy.subscription(b, true);
        let (org, store) = academy.into_store();

        let report = resolve(&store, org, DisposalMode::SoftDelete).await;

        let loser = &report.groups[0].losers[0];
        let migration = loser.migration.as_ref().unwrap();
        assert!(matches!(migration.link_cleanup, Some(StepOutcome::Failed(_))));
        assert_eq!(loser.disposal, StepOutcome::Applied(DisposalAction::Deactivated));

        let errors = report.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].student_id, b);
        assert_eq!(errors[0].name, "Lucas Prado");

        let data = store.snapshot().await;
        assert!(!data.student(b).unwrap().is_active);
        assert!(data.subscriptions.iter().all(|s| s.student_id == a));
    }

    #[tokio::test]
    async fn test_dry_run_reports_then_apply_converges() {
        let mut academy = Academy::new();
        let keeper = academy.student("Ana Beatriz Lopes", Some("45678912300"), 20);
        let newer = academy.student("Ana Beatriz Lopes", None, 2);
        let newest = academy.student("ana beatriz lopes", None, 1);
        academy.subscription(keeper, true);
        academy.attendances(newer, 3);
        academy.attendances(newest, 1);
        let (org, store) = academy.into_store();
        let before = store.snapshot().await;

        let preview = resolve(&store, org, DisposalMode::Preview).await;
        assert_eq!(preview.groups.len(), 1);
        let group = &preview.groups[0];
        assert_eq!(group.key, GroupKey::Name("ana beatriz lopes".to_string()));
        assert_eq!(group.keeper.id, keeper);
        assert!(group.keeper.rank.has_active_subscription);
        assert_eq!(group.losers.len(), 2);
        assert_eq!(group.losers[0].member.id, newer);
        assert_eq!(group.losers[0].member.rank.attendance_count, 3);
        assert!(group
            .losers
            .iter()
            .all(|l| l.disposal == StepOutcome::Applied(DisposalAction::WouldDispose)));
        assert_eq!(store.snapshot().await, before);
        assert_eq!(store.write_count().await, 0);

        let applied = resolve(&store, org, DisposalMode::HardDelete).await;
        assert_eq!(applied.totals(), {
            let mut expected = preview.totals();
            expected.losers_disposed = 2;
            expected
        });

        let data = store.snapshot().await;
        assert_eq!(data.students.len(), 1);
        assert_eq!(data.attendances.len(), 4);
        assert_no_orphans(&data);

        let writes = store.write_count().await;
        let again = resolve(&store, org, DisposalMode::HardDelete).await;
        assert!(again.groups.is_empty());
        assert_eq!(store.write_count().await, writes);
        assert_eq!(store.snapshot().await, data);
    }

    #[tokio::test]
    async fn test_soft_delete_is_idempotent() {
        let mut academy = Academy::new();
        let keeper = academy.student("Rafael Nunes", Some("32165498700"), 5);
        let loser = academy.student("Rafael Nunes", Some("321.654.987-00"), 1);
        academy.subscription(keeper, true);
        academy.subscription(loser, false);
        academy.attendances(loser, 4);
        let (org, store) = academy.into_store();

        resolve(&store, org, DisposalMode::SoftDelete).await;
        let after_first = store.snapshot().await;
        let writes = store.write_count().await;
        assert!(!after_first.student(loser).unwrap().is_active);
        assert_eq!(after_first.subscriptions.iter().filter(|s| s.student_id == keeper).count(), 2);

        let second = resolve(&store, org, DisposalMode::SoftDelete).await;
        assert_eq!(second.groups.len(), 1);
        assert_eq!(second.groups[0].keeper.id, keeper);
        assert_eq!(
            second.groups[0].losers[0].disposal,
            StepOutcome::Applied(DisposalAction::AlreadyDeactivated)
        );
        assert_eq!(store.write_count().await, writes);
        assert_eq!(store.snapshot().await, after_first);
    }

    #[tokio::test]
    async fn test_linked_member_always_kept() {
        // The linked record is the oldest, inactive and has nothing else attached
        let mut academy = Academy::new();
        let linked = academy.student("Helena Castro", Some("74185296300"), 400);
        let busy = academy.student("Helena Castro", Some("74185296300"), 3);
        let recent = academy.student("Helena Castro", Some("74185296300"), 1);
        academy.data.insert_link(linked, "cus_helena").unwrap();
        if let Some(stored) = academy.data.students.iter_mut().find(|s| s.record.id == linked) {
            stored.record.is_active = false;
        }
        academy.subscription(busy, true);
        academy.attendances(busy, 50);
        academy.attendances(recent, 5);
        let (org, store) = academy.into_store();

        let report = resolve(&store, org, DisposalMode::HardDelete).await;
        assert_eq!(report.groups[0].keeper.id, linked);

        let data = store.snapshot().await;
        assert_eq!(data.students.len(), 1);
        assert!(data.subscriptions.iter().all(|s| s.student_id == linked));
        assert_eq!(data.attendances.len(), 55);
        assert_single_links(&data);
        assert_no_inactive_with_active_subscriptions(&data);
    }

    async fn inactive_linked_keeper_scenario(mode: DisposalMode) {
        let mut academy = Academy::new();
        let linked = academy.student("Otavio Ramos", Some("74185296300"), 90);
        let active = academy.student("Otavio Ramos", Some("741.852.963-00"), 2);
        academy.data.insert_link(linked, "cus_otavio").unwrap();
        if let Some(stored) = academy.data.students.iter_mut().find(|s| s.record.id == linked) {
            stored.record.is_active = false;
        }
        academy.subscription(active, true);
        let (org, store) = academy.into_store();

        let report = resolve(&store, org, mode).await;
        assert_eq!(report.groups[0].keeper.id, linked);
        assert_eq!(report.totals().subscriptions_moved, 1);
        let repair = report.repair.as_ref().unwrap();
        assert_eq!(repair.entries.len(), 1);
        assert_eq!(repair.entries[0].student.id, linked);
        assert_eq!(repair.subscriptions_deactivated(), 1);
        assert!(report.errors().is_empty());

        let data = store.snapshot().await;
        let keeper = data.student(linked).unwrap();
        assert!(!keeper.is_active);
        assert_eq!(data.subscriptions.len(), 1);
        assert_eq!(data.subscriptions[0].student_id, linked);
        assert_no_inactive_with_active_subscriptions(&data);
        assert_no_orphans(&data);
    }

    #[tokio::test]
    async fn test_inactive_keeper_keeps_no_active_subscription_hard() {
        inactive_linked_keeper_scenario(DisposalMode::HardDelete).await;
    }

    #[tokio::test]
    async fn test_inactive_keeper_keeps_no_active_subscription_soft() {
        inactive_linked_keeper_scenario(DisposalMode::SoftDelete).await;
    }

    #[tokio::test]
    async fn test_preview_runs_no_repair() {
        let mut academy = Academy::new();
        let dormant = academy.student("Livia Prates", Some("96385274100"), 30);
        academy.student("Livia Prates", Some("96385274100"), 1);
        if let Some(stored) = academy.data.students.iter_mut().find(|s| s.record.id == dormant) {
            stored.record.is_active = false;
        }
        academy.subscription(dormant, true);
        let (org, store) = academy.into_store();

        let report = resolve(&store, org, DisposalMode::Preview).await;
        assert_eq!(report.groups.len(), 1);
        assert!(report.repair.is_none());
        assert_eq!(store.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_one_failing_loser_does_not_stop_the_run() {
        let mut academy = Academy::new();
        let keeper_one = academy.student("Bruna Tavares", Some("15975345600"), 10);
        let stuck = academy.student("Bruna Tavares", Some("15975345600"), 1);
        let keeper_two = academy.student("Caio Martins", Some("75395145600"), 10);
        let freed = academy.student("Caio Martins", Some("75395145600"), 1);
        academy.subscription(keeper_one, true);
        academy.subscription(keeper_two, true);
        academy.attendances(stuck, 2);
        academy.attendances(freed, 2);
        let (org, store) = academy.into_store();
        store.fail_mutations_for(stuck).await;

        let report = resolve(&store, org, DisposalMode::HardDelete).await;

        assert_eq!(report.groups.len(), 2);
        let totals = report.totals();
        assert_eq!(totals.losers_disposed, 1);
        assert_eq!(totals.errors, 2);
        assert!(report.errors().iter().all(|e| e.student_id == stuck));

        let data = store.snapshot().await;
        assert!(data.student(stuck).is_some());
        assert!(data.student(freed).is_none());
        assert_eq!(data.attendances.iter().filter(|a| a.student_id == stuck).count(), 2);
        assert_eq!(data.attendances.iter().filter(|a| a.student_id == keeper_two).count(), 2);
        assert_no_orphans(&data);
    }
}
