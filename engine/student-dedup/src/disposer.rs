//! Disposal of duplicate and test students

use crate::migrator::MigrationReport;
use crate::model::StudentSummary;
use crate::store::{PurgeCounts, StepOutcome, StudentStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Whether a pass touches the datastore at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Preview,
    Apply,
}

impl RunMode {
    pub fn is_preview(self) -> bool {
        self == RunMode::Preview
    }
}

/// How losers are disposed of, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposalMode {
    /// Report only; nothing in the run is mutated
    Preview,
    /// Mark the student inactive
    SoftDelete,
    /// Remove the student, its remaining dependents and its user record
    HardDelete,
}

impl DisposalMode {
    pub fn run_mode(self) -> RunMode {
        match self {
            DisposalMode::Preview => RunMode::Preview,
            DisposalMode::SoftDelete | DisposalMode::HardDelete => RunMode::Apply,
        }
    }

    pub fn is_preview(self) -> bool {
        self.run_mode().is_preview()
    }
}

impl fmt::Display for DisposalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisposalMode::Preview => write!(f, "preview"),
            DisposalMode::SoftDelete => write!(f, "soft"),
            DisposalMode::HardDelete => write!(f, "hard"),
        }
    }
}

/// What happened to a disposed student
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DisposalAction {
    WouldDispose,
    Deactivated,
    /// Soft mode found it inactive with nothing attached
    AlreadyDeactivated,
    Deleted(PurgeCounts),
}

impl fmt::Display for DisposalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisposalAction::WouldDispose => write!(f, "would dispose"),
            DisposalAction::Deactivated => write!(f, "deactivated"),
            DisposalAction::AlreadyDeactivated => write!(f, "already deactivated"),
            DisposalAction::Deleted(_) => write!(f, "deleted"),
        }
    }
}

pub struct Disposer<'a, S: StudentStore + ?Sized> {
    store: &'a S,
    mode: DisposalMode,
}

impl<'a, S: StudentStore + ?Sized> Disposer<'a, S> {
    pub fn new(store: &'a S, mode: DisposalMode) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> DisposalMode {
        self.mode
    }

    /// Dispose of a loser whose dependents were handed to the keeper.
    ///
    /// A loser whose transfer failed is left in place, since removing it would
    /// take its subscriptions and attendances with it.
    pub async fn dispose_migrated(
        &self,
        loser: &StudentSummary,
        migration: &MigrationReport,
    ) -> StepOutcome<DisposalAction> {
        if !migration.dependents_migrated() {
            return StepOutcome::Failed(format!(
                "dependents of {} were not migrated; record left in place",
                loser.id()
            ));
        }
        self.dispose(loser).await
    }

    pub async fn dispose(&self, student: &StudentSummary) -> StepOutcome<DisposalAction> {
        let record = &student.student;
        let outcome = match self.mode {
            DisposalMode::Preview => StepOutcome::Applied(DisposalAction::WouldDispose),
            DisposalMode::SoftDelete if student.is_settled() => {
                debug!("{} ({}) already deactivated", record.full_name(), record.id);
                StepOutcome::Applied(DisposalAction::AlreadyDeactivated)
            }
            DisposalMode::SoftDelete => {
                StepOutcome::from_result(self.store.deactivate_student(record.id).await)
                    .map(|_| DisposalAction::Deactivated)
            }
            DisposalMode::HardDelete => StepOutcome::from_result(
                self.store.purge_student(record.id, record.user_id).await,
            )
            .map(DisposalAction::Deleted),
        };

        if let StepOutcome::Failed(message) = &outcome {
            warn!(
                "Failed to dispose of {} ({}) in {} mode: {}",
                record.full_name(),
                record.id,
                self.mode,
                message
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Dataset, InMemoryStudentStore};
    use crate::model::StudentRecord;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(first: &str, active: bool) -> StudentRecord {
        StudentRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: "Lima".to_string(),
            email: None,
            national_id: None,
            is_active: active,
            created_at: Utc::now(),
        }
    }

    async fn load_one(store: &InMemoryStudentStore, org: Uuid) -> StudentSummary {
        store.load_students(org).await.unwrap().remove(0)
    }

    #[test]
    fn test_mode_run_modes() {
        assert_eq!(DisposalMode::HardDelete.to_string(), "hard");
        assert!(DisposalMode::Preview.is_preview());
        assert_eq!(DisposalMode::Preview.run_mode(), RunMode::Preview);
        assert_eq!(DisposalMode::HardDelete.run_mode(), RunMode::Apply);
    }

    #[tokio::test]
    async fn test_preview_touches_nothing() {
        let org = Uuid::new_v4();
        let mut data = Dataset::new();
        data.insert_student(org, record("Ana", true));
        let store = InMemoryStudentStore::new(data);
        let student = load_one(&store, org).await;

        let outcome = Disposer::new(&store, DisposalMode::Preview).dispose(&student).await;
        assert_eq!(outcome, StepOutcome::Applied(DisposalAction::WouldDispose));
        assert_eq!(store.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_soft_delete_and_settled_loser() {
        let org = Uuid::new_v4();
        let mut data = Dataset::new();
        let id = data.insert_student(org, record("Ana", true));
        let store = InMemoryStudentStore::new(data);
        let disposer = Disposer::new(&store, DisposalMode::SoftDelete);

        let student = load_one(&store, org).await;
        assert_eq!(
            disposer.dispose(&student).await,
            StepOutcome::Applied(DisposalAction::Deactivated)
        );
        assert!(!store.snapshot().await.student(id).unwrap().is_active);

        let student = load_one(&store, org).await;
        assert_eq!(
            disposer.dispose(&student).await,
            StepOutcome::Applied(DisposalAction::AlreadyDeactivated)
        );
        assert_eq!(store.write_count().await, 1);
    }

    #[tokio::test]
    async fn test_hard_delete_removes_student_and_user() {
        let org = Uuid::new_v4();
        let mut data = Dataset::new();
        let student = record("Ana", true);
        let user_id = student.user_id;
        let id = data.insert_student(org, student);
        data.insert_attendance(id);
        data.insert_link(id, "cus_ana").unwrap();
        let store = InMemoryStudentStore::new(data);
        let student = load_one(&store, org).await;

        let outcome = Disposer::new(&store, DisposalMode::HardDelete).dispose(&student).await;
        match outcome {
            StepOutcome::Applied(DisposalAction::Deleted(counts)) => {
                assert_eq!(counts.attendances, 1);
                assert_eq!(counts.links, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let data = store.snapshot().await;
        assert!(data.student(id).is_none());
        assert!(!data.users.contains(&user_id));
        assert!(data.attendances.is_empty());
        assert!(data.links.is_empty());

        // Second attempt finds nothing to delete
        assert_eq!(
            Disposer::new(&store, DisposalMode::HardDelete).dispose(&student).await,
            StepOutcome::AlreadyGone
        );
    }

    #[tokio::test]
    async fn test_failed_migration_blocks_disposal() {
        let org = Uuid::new_v4();
        let mut data = Dataset::new();
        data.insert_student(org, record("Ana", true));
        let store = InMemoryStudentStore::new(data);
        let student = load_one(&store, org).await;

        let migration = MigrationReport {
            subscription_action: crate::store::SubscriptionAction::Reassign,
            transfer: StepOutcome::Failed("deadlock detected".to_string()),
            link_cleanup: None,
            preview: false,
        };
        let outcome = Disposer::new(&store, DisposalMode::HardDelete)
            .dispose_migrated(&student, &migration)
            .await;
        assert!(outcome.is_failed());
        assert_eq!(store.write_count().await, 0);
    }
}
