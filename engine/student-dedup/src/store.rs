//! Datastore abstraction consumed by the cleanup passes

use crate::error::{DedupError, Result};
use crate::model::{OrganizationCounts, PlanUsage, StudentSummary, SubscriptionRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happens to the loser's subscriptions during a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    /// Re-parent onto the keeper
    Reassign,
    /// Remove; they belong to the loser's own gateway customer
    Delete,
}

/// Move one loser's dependents onto the keeper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentTransfer {
    pub from: Uuid,
    pub to: Uuid,
    pub subscriptions: SubscriptionAction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCounts {
    /// Subscriptions reassigned or deleted, per the transfer's action
    pub subscriptions: u64,
    pub attendances: u64,
}

/// Rows removed by a hard delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeCounts {
    pub subscriptions: u64,
    pub attendances: u64,
    pub links: u64,
}

/// Result of one step against one record
///
/// Expected failure modes are data: a record removed by an earlier or concurrent
/// run is `AlreadyGone`, anything the datastore refused is `Failed` with its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome<T = u64> {
    Applied(T),
    AlreadyGone,
    Failed(String),
}

impl<T> StepOutcome<T> {
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => StepOutcome::Applied(value),
            Err(err) if err.is_not_found() => StepOutcome::AlreadyGone,
            Err(err) => StepOutcome::Failed(err.to_string()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StepOutcome<U> {
        match self {
            StepOutcome::Applied(value) => StepOutcome::Applied(f(value)),
            StepOutcome::AlreadyGone => StepOutcome::AlreadyGone,
            StepOutcome::Failed(message) => StepOutcome::Failed(message),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }

    pub fn applied(&self) -> Option<&T> {
        match self {
            StepOutcome::Applied(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            StepOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Datastore operations needed by the cleanup passes.
///
/// Every mutation either fully applies or leaves the datastore untouched.
/// Mutations against a record that does not exist return `DedupError::NotFound`.
#[async_trait::async_trait]
pub trait StudentStore: Send + Sync {
    /// All students of an organization with dependent summaries, newest first
    async fn load_students(&self, organization_id: Uuid) -> Result<Vec<StudentSummary>>;

    /// Re-parent (or delete) subscriptions and re-parent attendances in one transaction
    async fn transfer_dependents(&self, transfer: &DependentTransfer) -> Result<TransferCounts>;

    async fn delete_external_link(&self, link_id: Uuid) -> Result<()>;

    async fn deactivate_student(&self, student_id: Uuid) -> Result<()>;

    async fn activate_student(&self, student_id: Uuid) -> Result<()>;

    /// Remove remaining dependents, the link, the student and then its user record
    async fn purge_student(&self, student_id: Uuid, user_id: Uuid) -> Result<PurgeCounts>;

    async fn inactive_students_with_active_subscriptions(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<StudentSummary>>;

    /// Deactivate every active subscription of a student, returning how many changed
    async fn deactivate_active_subscriptions(&self, student_id: Uuid) -> Result<u64>;

    /// Active subscriptions of the organization, grouped by student in load order
    async fn active_subscriptions(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<SubscriptionRecord>>;

    async fn deactivate_subscription(&self, subscription_id: Uuid) -> Result<()>;

    async fn plan_usage(&self, organization_id: Uuid) -> Result<Vec<PlanUsage>>;

    async fn deactivate_plan(&self, plan_id: Uuid) -> Result<()>;

    async fn counts(&self, organization_id: Uuid) -> Result<OrganizationCounts>;
}

/// Convenience for stores: turn a zero row count into `NotFound`
pub(crate) fn expect_row(rows: u64, entity: &'static str, id: Uuid) -> Result<()> {
    if rows == 0 {
        Err(DedupError::not_found(entity, id))
    } else {
        Ok(())
    }
}
