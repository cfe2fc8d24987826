//! Keeper selection
//!
//! Priority, highest first, each rule only breaking ties left by the previous:
//! 1. linked to the payment gateway
//! 2. has an active subscription
//! 3. more attendances
//! 4. active
//! 5. created more recently

use crate::grouping::{DuplicateGroup, GroupKey};
use crate::model::StudentSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The fields the keeper comparator looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankInputs {
    pub has_external_link: bool,
    pub has_active_subscription: bool,
    pub attendance_count: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&StudentSummary> for RankInputs {
    fn from(summary: &StudentSummary) -> Self {
        Self {
            has_external_link: summary.has_link(),
            has_active_subscription: summary.has_active_subscription(),
            attendance_count: summary.attendance_count,
            is_active: summary.student.is_active,
            created_at: summary.student.created_at,
        }
    }
}

/// `Less` means `a` ranks above `b`
pub fn compare_priority(a: &RankInputs, b: &RankInputs) -> Ordering {
    b.has_external_link
        .cmp(&a.has_external_link)
        .then_with(|| b.has_active_subscription.cmp(&a.has_active_subscription))
        .then_with(|| b.attendance_count.cmp(&a.attendance_count))
        .then_with(|| b.is_active.cmp(&a.is_active))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// A duplicate group in rank order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedGroup {
    pub key: GroupKey,
    pub keeper: StudentSummary,
    /// Remaining members, best first
    pub losers: Vec<StudentSummary>,
}

/// Sort a group by priority and split off the keeper; `None` for an empty group
pub fn rank_group(group: DuplicateGroup) -> Option<RankedGroup> {
    let mut members = group.members;
    // Vec::sort_by is stable: full ties keep load order
    members.sort_by(|a, b| compare_priority(&RankInputs::from(a), &RankInputs::from(b)));

    let mut members = members.into_iter();
    let keeper = members.next()?;
    Some(RankedGroup { key: group.key, keeper, losers: members.collect() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn inputs(link: bool, sub: bool, attendance: u64, active: bool, day: u32) -> RankInputs {
        RankInputs {
            has_external_link: link,
            has_active_subscription: sub,
            attendance_count: attendance,
            is_active: active,
            created_at: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_link_dominates_everything() {
        let linked = inputs(true, false, 0, false, 1);
        let busy = inputs(false, true, 500, true, 28);
        assert_eq!(compare_priority(&linked, &busy), Ordering::Less);
        assert_eq!(compare_priority(&busy, &linked), Ordering::Greater);
    }

    #[test]
    fn test_active_subscription_beats_attendance() {
        let subscribed = inputs(false, true, 0, false, 1);
        let attended = inputs(false, false, 40, true, 28);
        assert_eq!(compare_priority(&subscribed, &attended), Ordering::Less);
    }

    #[test]
    fn test_attendance_beats_active_flag() {
        let attended = inputs(false, false, 3, false, 1);
        let active = inputs(false, false, 2, true, 28);
        assert_eq!(compare_priority(&attended, &active), Ordering::Less);
    }

    #[test]
    fn test_active_flag_beats_recency() {
        let active = inputs(false, false, 0, true, 1);
        let recent = inputs(false, false, 0, false, 28);
        assert_eq!(compare_priority(&active, &recent), Ordering::Less);
    }

    #[test]
    fn test_recency_is_last_tie_break() {
        let older = inputs(false, false, 0, true, 1);
        let newer = inputs(false, false, 0, true, 2);
        assert_eq!(compare_priority(&newer, &older), Ordering::Less);
        assert_eq!(compare_priority(&older, &older), Ordering::Equal);
    }
}
