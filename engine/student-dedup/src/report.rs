//! Run reports
//!
//! Plain serializable data; rendering is left to the caller.

use crate::disposer::{DisposalAction, DisposalMode};
use crate::grouping::GroupKey;
use crate::migrator::MigrationReport;
use crate::model::StudentSummary;
use crate::ranking::RankInputs;
use crate::repair::RepairReport;
use crate::store::StepOutcome;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A group member as it looked when ranked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub id: Uuid,
    pub name: String,
    pub external_id: Option<String>,
    pub rank: RankInputs,
}

impl From<&StudentSummary> for MemberSnapshot {
    fn from(summary: &StudentSummary) -> Self {
        Self {
            id: summary.id(),
            name: summary.student.full_name(),
            external_id: summary.link.as_ref().map(|l| l.external_id.clone()),
            rank: RankInputs::from(summary),
        }
    }
}

/// A record-level failure, listed at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub student_id: Uuid,
    pub name: String,
    pub message: String,
}

impl ErrorEntry {
    pub fn new(student_id: Uuid, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { student_id, name: name.into(), message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoserReport {
    pub member: MemberSnapshot,
    /// `None` when the loser was already settled and left alone
    pub migration: Option<MigrationReport>,
    pub disposal: StepOutcome<DisposalAction>,
}

impl LoserReport {
    /// Disposed by this run, already gone, or already settled
    pub fn is_disposed(&self) -> bool {
        !self.disposal.is_failed()
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        let mut errors = Vec::new();
        let entry = |message: &str| ErrorEntry::new(self.member.id, &self.member.name, message);

        if let Some(migration) = &self.migration {
            if let Some(message) = migration.transfer.failure() {
                errors.push(entry(&format!("dependent transfer failed: {message}")));
            }
            if let Some(message) = migration.link_cleanup.as_ref().and_then(|c| c.failure()) {
                errors.push(entry(&format!("gateway link cleanup failed: {message}")));
            }
        }
        if let Some(message) = self.disposal.failure() {
            errors.push(entry(&format!("disposal failed: {message}")));
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    pub key: GroupKey,
    pub keeper: MemberSnapshot,
    pub losers: Vec<LoserReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionTotals {
    pub groups: usize,
    pub losers_disposed: usize,
    pub subscriptions_moved: u64,
    pub subscriptions_deleted: u64,
    pub attendances_moved: u64,
    pub errors: usize,
}

/// Outcome of one duplicate resolution pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub mode: DisposalMode,
    pub students_loaded: usize,
    pub groups: Vec<GroupReport>,
    /// Groups that shrank below two members after earlier groups were resolved
    pub groups_skipped: usize,
    /// Repair run after the groups were applied; `None` in preview
    pub repair: Option<RepairReport>,
}

impl ResolutionReport {
    pub fn new(mode: DisposalMode, students_loaded: usize) -> Self {
        Self { mode, students_loaded, groups: Vec::new(), groups_skipped: 0, repair: None }
    }

    fn losers(&self) -> impl Iterator<Item = &LoserReport> {
        self.groups.iter().flat_map(|g| g.losers.iter())
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        let mut errors: Vec<ErrorEntry> = self.losers().flat_map(LoserReport::errors).collect();
        if let Some(repair) = &self.repair {
            errors.extend(repair.errors());
        }
        errors
    }

    pub fn totals(&self) -> ResolutionTotals {
        let mut totals = ResolutionTotals { groups: self.groups.len(), ..Default::default() };
        for loser in self.losers() {
            if loser.is_disposed() {
                totals.losers_disposed += 1;
            }
            if let Some(migration) = &loser.migration {
                totals.subscriptions_moved += migration.subscriptions_moved();
                totals.subscriptions_deleted += migration.subscriptions_deleted();
                totals.attendances_moved += migration.attendances_moved();
            }
        }
        totals.errors = self.errors().len();
        totals
    }
}
