//! Duplicate resolution pass
//!
//! Loads one snapshot, builds duplicate groups, ranks each group and then walks
//! the losers in order: migrate dependents onto the keeper, then dispose of the
//! loser. Once every group is applied the consistency repair runs, since a keeper
//! that is inactive may have just received active subscriptions. Record-level
//! failures land in the report; only loading a snapshot can fail the pass.

use crate::disposer::{DisposalAction, DisposalMode, Disposer};
use crate::grouping::{build_groups, DuplicateGroup, GroupingRules};
use crate::migrator::{DependentMigrator, MigrationPlan, MigrationReport};
use crate::model::StudentSummary;
use crate::ranking::{rank_group, RankedGroup};
use crate::repair::{ConsistencyRepair, RepairPolicy};
use crate::report::{GroupReport, LoserReport, MemberSnapshot, ResolutionReport};
use crate::store::{StepOutcome, StudentStore, SubscriptionAction};
use crate::Result;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tracks what earlier groups of the same pass did to the snapshot
///
/// A student may sit in an ID group and a later name group. Once disposed it
/// must not be ranked again, and a keeper that absorbed dependents must rank
/// with its new counts.
#[derive(Debug, Default)]
struct Ledger {
    removed: HashSet<Uuid>,
    updated: HashMap<Uuid, StudentSummary>,
}

impl Ledger {
    fn refresh(&self, group: DuplicateGroup) -> DuplicateGroup {
        let members = group
            .members
            .into_iter()
            .filter(|m| !self.removed.contains(&m.id()))
            .map(|m| self.updated.get(&m.id()).cloned().unwrap_or(m))
            .collect();
        DuplicateGroup { key: group.key, members }
    }

    fn absorb(
        &mut self,
        keeper: &mut StudentSummary,
        loser: &StudentSummary,
        migration: &MigrationReport,
    ) {
        if let Some(counts) = migration.transfer.applied() {
            if migration.subscription_action == SubscriptionAction::Reassign {
                keeper.total_subscriptions += counts.subscriptions;
                keeper.active_subscriptions += loser.active_subscriptions;
            }
            keeper.attendance_count += counts.attendances;
        }
        self.updated.insert(keeper.id(), keeper.clone());
    }

    fn record_loser(
        &mut self,
        loser: &StudentSummary,
        migration: Option<&MigrationReport>,
        disposed: bool,
    ) {
        if disposed {
            self.removed.insert(loser.id());
            return;
        }
        // Still present; whatever moved no longer counts towards it
        if let Some(migration) = migration.filter(|m| m.dependents_migrated()) {
            let mut remaining = loser.clone();
            remaining.total_subscriptions = 0;
            remaining.active_subscriptions = 0;
            remaining.attendance_count = 0;
            if matches!(migration.link_cleanup, Some(StepOutcome::Applied(_))) {
                remaining.link = None;
            }
            self.updated.insert(loser.id(), remaining);
        }
    }
}

pub struct DuplicateResolver<'a, S: StudentStore + ?Sized> {
    store: &'a S,
    rules: GroupingRules,
    mode: DisposalMode,
}

impl<'a, S: StudentStore + ?Sized> DuplicateResolver<'a, S> {
    pub fn new(store: &'a S, rules: GroupingRules, mode: DisposalMode) -> Self {
        Self { store, rules, mode }
    }

    pub async fn run(&self, organization_id: Uuid) -> Result<ResolutionReport> {
        let students = self.store.load_students(organization_id).await?;
        info!("Loaded {} students for organization {}", students.len(), organization_id);

        let groups = build_groups(&students, &self.rules);
        info!("Found {} duplicate group(s), mode: {}", groups.len(), self.mode);

        let mut report = ResolutionReport::new(self.mode, students.len());
        let mut ledger = Ledger::default();

        for group in groups {
            let group = ledger.refresh(group);
            if group.members.len() < 2 {
                debug!("Group {} already resolved by an earlier group", group.key);
                report.groups_skipped += 1;
                continue;
            }
            if let Some(ranked) = rank_group(group) {
                report.groups.push(self.resolve_group(ranked, &mut ledger).await);
            }
        }

        if !self.mode.is_preview() {
            let repair =
                ConsistencyRepair::new(self.store, RepairPolicy::default(), self.mode.run_mode());
            report.repair = Some(repair.run(organization_id).await?);
        }

        let totals = report.totals();
        info!(
            "Resolution finished: {} group(s), {} loser(s) disposed, {} error(s)",
            totals.groups, totals.losers_disposed, totals.errors
        );
        Ok(report)
    }

    async fn resolve_group(&self, ranked: RankedGroup, ledger: &mut Ledger) -> GroupReport {
        let RankedGroup { key, mut keeper, losers } = ranked;
        info!(
            "Group {}: keeping {} ({}), {} duplicate(s)",
            key,
            keeper.student.full_name(),
            keeper.student.short_id(),
            losers.len()
        );

        let keeper_snapshot = MemberSnapshot::from(&keeper);
        let migrator = DependentMigrator::new(self.store);
        let disposer = Disposer::new(self.store, self.mode);
        let mut loser_reports = Vec::with_capacity(losers.len());

        for loser in &losers {
            let member = MemberSnapshot::from(loser);

            if self.mode == DisposalMode::SoftDelete && loser.is_settled() {
                debug!("{} ({}) already deactivated, skipping", member.name, member.id);
                ledger.record_loser(loser, None, true);
                loser_reports.push(LoserReport {
                    member,
                    migration: None,
                    disposal: StepOutcome::Applied(DisposalAction::AlreadyDeactivated),
                });
                continue;
            }

            let migration = if self.mode.is_preview() {
                MigrationReport::planned(&MigrationPlan::for_pair(&keeper, loser))
            } else {
                migrator.migrate(&keeper, loser).await
            };
            ledger.absorb(&mut keeper, loser, &migration);

            let disposal = disposer.dispose_migrated(loser, &migration).await;
            if disposal.is_failed() {
                warn!("Duplicate {} ({}) left in place", member.name, member.id);
            }
            ledger.record_loser(loser, Some(&migration), !disposal.is_failed());

            loser_reports.push(LoserReport { member, migration: Some(migration), disposal });
        }

        GroupReport { key, keeper: keeper_snapshot, losers: loser_reports }
    }
}
