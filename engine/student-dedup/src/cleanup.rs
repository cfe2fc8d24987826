//! Housekeeping passes run alongside duplicate resolution
//!
//! - test-student purge: records whose name carries a test marker
//! - subscription consolidation: one active subscription per student
//! - plan pruning: deactivate plans nobody is subscribed to

use crate::disposer::{DisposalAction, DisposalMode, Disposer, RunMode};
use crate::grouping::GroupingRules;
use crate::identity::is_test_name;
use crate::model::{BillingPlan, SubscriptionRecord};
use crate::report::{ErrorEntry, MemberSnapshot};
use crate::store::{StepOutcome, StudentStore};
use crate::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgedStudent {
    pub student: MemberSnapshot,
    pub outcome: StepOutcome<DisposalAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub mode: DisposalMode,
    pub students: Vec<PurgedStudent>,
}

impl PurgeReport {
    pub fn disposed(&self) -> usize {
        self.students.iter().filter(|s| !s.outcome.is_failed()).count()
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.students
            .iter()
            .filter_map(|s| {
                s.outcome
                    .failure()
                    .map(|message| ErrorEntry::new(s.student.id, &s.student.name, message))
            })
            .collect()
    }
}

/// Dispose of every student whose name contains a test marker, duplicate or not
pub async fn purge_test_students<S: StudentStore + ?Sized>(
    store: &S,
    organization_id: Uuid,
    rules: &GroupingRules,
    mode: DisposalMode,
) -> Result<PurgeReport> {
    let students = store.load_students(organization_id).await?;
    let targets: Vec<_> = students
        .iter()
        .filter(|s| is_test_name(&s.student.full_name(), &rules.test_markers))
        .collect();
    info!("Found {} test student(s), mode: {}", targets.len(), mode);

    let disposer = Disposer::new(store, mode);
    let mut purged = Vec::with_capacity(targets.len());
    for summary in targets {
        let outcome = disposer.dispose(summary).await;
        purged.push(PurgedStudent { student: MemberSnapshot::from(summary), outcome });
    }

    Ok(PurgeReport { mode, students: purged })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedStudent {
    pub student_id: Uuid,
    pub kept: SubscriptionRecord,
    pub deactivated: Vec<(SubscriptionRecord, StepOutcome<()>)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub run_mode: RunMode,
    pub students: Vec<ConsolidatedStudent>,
}

impl ConsolidationReport {
    pub fn subscriptions_deactivated(&self) -> usize {
        self.students
            .iter()
            .flat_map(|s| s.deactivated.iter())
            .filter(|(_, outcome)| !outcome.is_failed())
            .count()
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.students
            .iter()
            .flat_map(|s| {
                s.deactivated.iter().filter_map(move |(sub, outcome)| {
                    outcome.failure().map(|message| {
                        ErrorEntry::new(
                            s.student_id,
                            format!("subscription {} ({})", sub.id, sub.plan_name),
                            message,
                        )
                    })
                })
            })
            .collect()
    }
}

/// Order subscriptions so the one to keep comes first: preferred plan, then
/// highest price (missing counts as zero), then load order.
fn compare_subscriptions(
    a: &SubscriptionRecord,
    b: &SubscriptionRecord,
    preferred: &str,
) -> Ordering {
    let is_preferred = |s: &SubscriptionRecord| s.plan_name.eq_ignore_ascii_case(preferred);
    let price = |s: &SubscriptionRecord| s.current_price.unwrap_or(Decimal::ZERO);

    is_preferred(b)
        .cmp(&is_preferred(a))
        .then_with(|| price(b).cmp(&price(a)))
}

/// Leave each student with a single active subscription
pub async fn consolidate_subscriptions<S: StudentStore + ?Sized>(
    store: &S,
    organization_id: Uuid,
    preferred_plan_name: &str,
    run_mode: RunMode,
) -> Result<ConsolidationReport> {
    let subscriptions = store.active_subscriptions(organization_id).await?;

    // Bucket by student, keeping load order
    let mut order: Vec<Uuid> = Vec::new();
    let mut by_student: HashMap<Uuid, Vec<SubscriptionRecord>> = HashMap::new();
    for sub in subscriptions {
        let bucket = by_student.entry(sub.student_id).or_insert_with(|| {
            order.push(sub.student_id);
            Vec::new()
        });
        bucket.push(sub);
    }

    let mut students = Vec::new();
    for student_id in order {
        let Some(mut subs) = by_student.remove(&student_id) else {
            continue;
        };
        if subs.len() < 2 {
            continue;
        }

        subs.sort_by(|a, b| compare_subscriptions(a, b, preferred_plan_name));
        let mut rest = subs.into_iter();
        let Some(kept) = rest.next() else {
            continue;
        };

        let mut deactivated = Vec::new();
        for sub in rest {
            let outcome = match run_mode {
                RunMode::Preview => StepOutcome::Applied(()),
                RunMode::Apply => {
                    StepOutcome::from_result(store.deactivate_subscription(sub.id).await)
                }
            };
            if let Some(message) = outcome.failure() {
                warn!(
                    "Could not deactivate subscription {} of {}: {}",
                    sub.id, student_id, message
                );
            }
            deactivated.push((sub, outcome));
        }

        info!(
            "Student {}: keeping {} subscription, {} extra",
            student_id,
            kept.plan_name,
            deactivated.len()
        );
        students.push(ConsolidatedStudent { student_id, kept, deactivated });
    }

    Ok(ConsolidationReport { run_mode, students })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPruneReport {
    pub run_mode: RunMode,
    pub plans: Vec<(BillingPlan, StepOutcome<()>)>,
}

impl PlanPruneReport {
    pub fn deactivated(&self) -> usize {
        self.plans.iter().filter(|(_, outcome)| !outcome.is_failed()).count()
    }
}

/// Deactivate active plans with no active subscriptions, except the preferred one
pub async fn prune_plans<S: StudentStore + ?Sized>(
    store: &S,
    organization_id: Uuid,
    preferred_plan_name: &str,
    run_mode: RunMode,
) -> Result<PlanPruneReport> {
    let usage = store.plan_usage(organization_id).await?;

    let mut plans = Vec::new();
    for entry in usage {
        let plan = entry.plan;
        if !plan.is_active
            || entry.active_subscriptions > 0
            || plan.name.eq_ignore_ascii_case(preferred_plan_name)
        {
            continue;
        }

        let outcome = match run_mode {
            RunMode::Preview => StepOutcome::Applied(()),
            RunMode::Apply => StepOutcome::from_result(store.deactivate_plan(plan.id).await),
        };
        if let Some(message) = outcome.failure() {
            warn!("Could not deactivate plan {} ({}): {}", plan.name, plan.id, message);
        }
        plans.push((plan, outcome));
    }

    info!("{} unused plan(s) to deactivate", plans.len());
    Ok(PlanPruneReport { run_mode, plans })
}
