//! Dependent migration from a loser onto its keeper

use crate::model::{ExternalCustomerLink, StudentSummary};
use crate::store::{
    DependentTransfer, StepOutcome, StudentStore, SubscriptionAction, TransferCounts,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// What a migration will do, computed from the loaded summaries alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub keeper_id: Uuid,
    pub loser_id: Uuid,
    pub subscription_action: SubscriptionAction,
    pub subscriptions: u64,
    pub attendances: u64,
    pub link_to_remove: Option<ExternalCustomerLink>,
}

impl MigrationPlan {
    /// A loser linked to the gateway has its subscriptions removed, since they bill
    /// through the loser's own customer; otherwise they follow the student.
    pub fn for_pair(keeper: &StudentSummary, loser: &StudentSummary) -> Self {
        let subscription_action = if loser.has_link() {
            SubscriptionAction::Delete
        } else {
            SubscriptionAction::Reassign
        };

        Self {
            keeper_id: keeper.id(),
            loser_id: loser.id(),
            subscription_action,
            subscriptions: loser.total_subscriptions,
            attendances: loser.attendance_count,
            link_to_remove: loser.link.clone(),
        }
    }

    fn transfer(&self) -> DependentTransfer {
        DependentTransfer {
            from: self.loser_id,
            to: self.keeper_id,
            subscriptions: self.subscription_action,
        }
    }
}

/// What a migration did (or, in preview, would do)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub subscription_action: SubscriptionAction,
    pub transfer: StepOutcome<TransferCounts>,
    /// Present only when the loser had a gateway link
    pub link_cleanup: Option<StepOutcome<()>>,
    pub preview: bool,
}

impl MigrationReport {
    pub fn planned(plan: &MigrationPlan) -> Self {
        Self {
            subscription_action: plan.subscription_action,
            transfer: StepOutcome::Applied(TransferCounts {
                subscriptions: plan.subscriptions,
                attendances: plan.attendances,
            }),
            link_cleanup: plan.link_to_remove.as_ref().map(|_| StepOutcome::Applied(())),
            preview: true,
        }
    }

    /// Precondition for disposal: the transfer did not fail
    pub fn dependents_migrated(&self) -> bool {
        !self.transfer.is_failed()
    }

    fn counts(&self) -> TransferCounts {
        self.transfer.applied().copied().unwrap_or_default()
    }

    pub fn subscriptions_moved(&self) -> u64 {
        match self.subscription_action {
            SubscriptionAction::Reassign => self.counts().subscriptions,
            SubscriptionAction::Delete => 0,
        }
    }

    pub fn subscriptions_deleted(&self) -> u64 {
        match self.subscription_action {
            SubscriptionAction::Reassign => 0,
            SubscriptionAction::Delete => self.counts().subscriptions,
        }
    }

    pub fn attendances_moved(&self) -> u64 {
        self.counts().attendances
    }
}

/// Moves dependents between students through a [`StudentStore`]
pub struct DependentMigrator<'a, S: StudentStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: StudentStore + ?Sized> DependentMigrator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Transfer the loser's dependents, then try to drop its gateway link.
    ///
    /// Never returns an error: failures are recorded in the report so the caller
    /// can move on to the next loser.
    pub async fn migrate(
        &self,
        keeper: &StudentSummary,
        loser: &StudentSummary,
    ) -> MigrationReport {
        let plan = MigrationPlan::for_pair(keeper, loser);

        let transfer =
            StepOutcome::from_result(self.store.transfer_dependents(&plan.transfer()).await);
        match &transfer {
            StepOutcome::Applied(counts) => debug!(
                "Moved {} subscription(s) ({:?}) and {} attendance(s) from {} to {}",
                counts.subscriptions, plan.subscription_action, counts.attendances,
                plan.loser_id, plan.keeper_id
            ),
            StepOutcome::AlreadyGone => {
                debug!("Student {} already removed, nothing to transfer", plan.loser_id)
            }
            StepOutcome::Failed(message) => {
                warn!(
                    "Failed to migrate dependents of {} ({}): {}",
                    loser.student.full_name(),
                    plan.loser_id,
                    message
                );
                return MigrationReport {
                    subscription_action: plan.subscription_action,
                    transfer,
                    link_cleanup: None,
                    preview: false,
                };
            }
        }

        let link_cleanup = match &plan.link_to_remove {
            Some(link) => {
                let outcome =
                    StepOutcome::from_result(self.store.delete_external_link(link.id).await);
                if let StepOutcome::Failed(message) = &outcome {
                    // Best effort: the student is disposed of regardless
                    warn!(
                        "Could not delete gateway customer {} of {} ({}): {}",
                        link.external_id,
                        loser.student.full_name(),
                        plan.loser_id,
                        message
                    );
                }
                Some(outcome)
            }
            None => None,
        };

        MigrationReport {
            subscription_action: plan.subscription_action,
            transfer,
            link_cleanup,
            preview: false,
        }
    }
}
