//! Consistency repair: inactive students must not hold active subscriptions

use crate::disposer::RunMode;
use crate::report::{ErrorEntry, MemberSnapshot};
use crate::store::{StepOutcome, StudentStore};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

/// Which side of the inconsistency gets changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepairPolicy {
    /// Keep the student inactive and stop its subscriptions
    #[default]
    DeactivateSubscriptions,
    /// Treat the active subscription as the truth and reactivate the student
    ReactivateStudents,
}

impl fmt::Display for RepairPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairPolicy::DeactivateSubscriptions => write!(f, "deactivate-subscriptions"),
            RepairPolicy::ReactivateStudents => write!(f, "reactivate-students"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairEntry {
    pub student: MemberSnapshot,
    pub active_subscriptions: u64,
    /// Subscriptions deactivated, or 1 for a reactivated student
    pub outcome: StepOutcome<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub policy: RepairPolicy,
    pub run_mode: RunMode,
    pub entries: Vec<RepairEntry>,
}

impl RepairReport {
    pub fn subscriptions_deactivated(&self) -> u64 {
        match self.policy {
            RepairPolicy::DeactivateSubscriptions => {
                self.entries.iter().filter_map(|e| e.outcome.applied()).sum()
            }
            RepairPolicy::ReactivateStudents => 0,
        }
    }

    pub fn students_reactivated(&self) -> usize {
        match self.policy {
            RepairPolicy::DeactivateSubscriptions => 0,
            RepairPolicy::ReactivateStudents => {
                self.entries.iter().filter(|e| e.outcome.applied().is_some()).count()
            }
        }
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.entries
            .iter()
            .filter_map(|e| {
                e.outcome
                    .failure()
                    .map(|message| ErrorEntry::new(e.student.id, &e.student.name, message))
            })
            .collect()
    }
}

pub struct ConsistencyRepair<'a, S: StudentStore + ?Sized> {
    store: &'a S,
    policy: RepairPolicy,
    run_mode: RunMode,
}

impl<'a, S: StudentStore + ?Sized> ConsistencyRepair<'a, S> {
    pub fn new(store: &'a S, policy: RepairPolicy, run_mode: RunMode) -> Self {
        Self { store, policy, run_mode }
    }

    pub async fn run(&self, organization_id: Uuid) -> Result<RepairReport> {
        let students =
            self.store.inactive_students_with_active_subscriptions(organization_id).await?;
        info!(
            "Found {} inactive student(s) with active subscriptions, policy: {}",
            students.len(),
            self.policy
        );

        let mut entries = Vec::with_capacity(students.len());
        for summary in &students {
            let id = summary.id();
            let outcome = match (self.run_mode, self.policy) {
                (RunMode::Preview, RepairPolicy::DeactivateSubscriptions) => {
                    StepOutcome::Applied(summary.active_subscriptions)
                }
                (RunMode::Preview, RepairPolicy::ReactivateStudents) => StepOutcome::Applied(1),
                (RunMode::Apply, RepairPolicy::DeactivateSubscriptions) => {
                    StepOutcome::from_result(self.store.deactivate_active_subscriptions(id).await)
                }
                (RunMode::Apply, RepairPolicy::ReactivateStudents) => {
                    StepOutcome::from_result(self.store.activate_student(id).await).map(|_| 1)
                }
            };

            if let Some(message) = outcome.failure() {
                warn!("Repair failed for {} ({}): {}", summary.student.full_name(), id, message);
            }
            entries.push(RepairEntry {
                student: MemberSnapshot::from(summary),
                active_subscriptions: summary.active_subscriptions,
                outcome,
            });
        }

        Ok(RepairReport { policy: self.policy, run_mode: self.run_mode, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Dataset, InMemoryStudentStore};
    use crate::model::{StudentRecord, SubscriptionRecord};
    use chrono::Utc;

    fn student(active: bool) -> StudentRecord {
        StudentRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            first_name: "Rita".to_string(),
            last_name: "Melo".to_string(),
            email: None,
            national_id: None,
            is_active: active,
            created_at: Utc::now(),
        }
    }

    fn subscription(student_id: Uuid, active: bool) -> SubscriptionRecord {
        SubscriptionRecord {
            id: Uuid::new_v4(),
            student_id,
            plan_id: Uuid::new_v4(),
            plan_name: "Mensal".to_string(),
            is_active: active,
            current_price: None,
        }
    }

    fn dataset(org: Uuid) -> (Dataset, Uuid) {
        let mut data = Dataset::new();
        let inactive = data.insert_student(org, student(false));
        data.insert_subscription(subscription(inactive, true));
        data.insert_subscription(subscription(inactive, true));
        data.insert_subscription(subscription(inactive, false));
        let active = data.insert_student(org, student(true));
        data.insert_subscription(subscription(active, true));
        (data, inactive)
    }

    #[test]
    fn test_default_policy() {
        assert_eq!(RepairPolicy::default(), RepairPolicy::DeactivateSubscriptions);
        assert_eq!(RepairPolicy::ReactivateStudents.to_string(), "reactivate-students");
    }

    #[tokio::test]
    async fn test_deactivates_subscriptions_of_inactive_students() {
        let org = Uuid::new_v4();
        let (data, inactive) = dataset(org);
        let store = InMemoryStudentStore::new(data);

        let report = ConsistencyRepair::new(&store, RepairPolicy::default(), RunMode::Apply)
            .run(org)
            .await
            .unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].student.id, inactive);
        assert_eq!(report.subscriptions_deactivated(), 2);

        let data = store.snapshot().await;
        assert!(!data.subscriptions.iter().any(|s| s.student_id == inactive && s.is_active));
        assert_eq!(data.subscriptions.iter().filter(|s| s.is_active).count(), 1);

        // Converged: nothing left to repair
        let again = ConsistencyRepair::new(&store, RepairPolicy::default(), RunMode::Apply)
            .run(org)
            .await
            .unwrap();
        assert!(again.entries.is_empty());
    }

    #[tokio::test]
    async fn test_reactivate_policy() {
        let org = Uuid::new_v4();
        let (data, inactive) = dataset(org);
        let store = InMemoryStudentStore::new(data);

        let report =
            ConsistencyRepair::new(&store, RepairPolicy::ReactivateStudents, RunMode::Apply)
                .run(org)
                .await
                .unwrap();
        assert_eq!(report.students_reactivated(), 1);

        let data = store.snapshot().await;
        assert!(data.student(inactive).unwrap().is_active);
        assert_eq!(data.subscriptions.iter().filter(|s| s.is_active).count(), 3);
    }

    #[tokio::test]
    async fn test_preview_reports_without_writing() {
        let org = Uuid::new_v4();
        let (data, _) = dataset(org);
        let store = InMemoryStudentStore::new(data);
        let before = store.snapshot().await;

        let report = ConsistencyRepair::new(&store, RepairPolicy::default(), RunMode::Preview)
            .run(org)
            .await
            .unwrap();
        assert_eq!(report.subscriptions_deactivated(), 2);
        assert_eq!(store.snapshot().await, before);
        assert_eq!(store.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let org = Uuid::new_v4();
        let (data, inactive) = dataset(org);
        let store = InMemoryStudentStore::new(data);
        store.fail_mutations_for(inactive).await;

        let report = ConsistencyRepair::new(&store, RepairPolicy::default(), RunMode::Apply)
            .run(org)
            .await
            .unwrap();
        let errors = report.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].student_id, inactive);
        assert_eq!(errors[0].name, "Rita Melo");
    }
}
