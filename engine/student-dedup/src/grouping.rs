//! Duplicate group builder
//!
//! Partitions the students of an organization into groups that plausibly
//! represent the same person. National ID is the primary key; the normalized
//! full name is the fallback, guarded so that two members with different IDs
//! never end up merged.

use crate::identity::{format_national_id, is_test_name, normalize_name, normalize_national_id};
use crate::model::StudentSummary;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Thresholds for identity keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingRules {
    /// National IDs with fewer digits are treated as absent
    pub min_national_id_digits: usize,
    /// Names shorter than this are never used as a key
    pub min_name_len: usize,
    /// Names containing any of these are test data
    pub test_markers: Vec<String>,
}

impl Default for GroupingRules {
    fn default() -> Self {
        Self {
            min_national_id_digits: 11,
            min_name_len: 4,
            test_markers: vec!["test".to_string(), "teste".to_string()],
        }
    }
}

/// The identity a duplicate group was formed on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GroupKey {
    NationalId(String),
    Name(String),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::NationalId(digits) => write!(f, "CPF {}", format_national_id(digits)),
            GroupKey::Name(name) => write!(f, "Name {}", name.to_uppercase()),
        }
    }
}

/// Two or more students believed to be the same person
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub key: GroupKey,
    pub members: Vec<StudentSummary>,
}

/// Insertion-ordered bucketing
struct Buckets<K> {
    order: Vec<(K, Vec<usize>)>,
    index: HashMap<K, usize>,
}

impl<K: std::hash::Hash + Eq + Clone> Buckets<K> {
    fn new() -> Self {
        Self { order: Vec::new(), index: HashMap::new() }
    }

    fn push(&mut self, key: K, item: usize) {
        match self.index.get(&key) {
            Some(&slot) => self.order[slot].1.push(item),
            None => {
                self.index.insert(key.clone(), self.order.len());
                self.order.push((key, vec![item]));
            }
        }
    }

    fn into_multi(self) -> impl Iterator<Item = (K, Vec<usize>)> {
        self.order.into_iter().filter(|(_, items)| items.len() >= 2)
    }
}

/// Build duplicate groups: ID groups first, then name groups, each in first-seen order
pub fn build_groups(students: &[StudentSummary], rules: &GroupingRules) -> Vec<DuplicateGroup> {
    let national_ids: Vec<Option<String>> = students
        .iter()
        .map(|s| {
            normalize_national_id(s.student.national_id.as_deref(), rules.min_national_id_digits)
        })
        .collect();

    let mut by_id = Buckets::new();
    for (idx, id) in national_ids.iter().enumerate() {
        if let Some(id) = id {
            by_id.push(id.clone(), idx);
        }
    }

    let mut groups = Vec::new();
    // student index -> ID group it was placed in
    let mut id_group_of: HashMap<usize, usize> = HashMap::new();

    for (id, members) in by_id.into_multi() {
        let group_no = groups.len();
        for &idx in &members {
            id_group_of.insert(idx, group_no);
        }
        groups.push(DuplicateGroup {
            key: GroupKey::NationalId(id),
            members: members.iter().map(|&idx| students[idx].clone()).collect(),
        });
    }

    let mut by_name = Buckets::new();
    for (idx, summary) in students.iter().enumerate() {
        let full_name = summary.student.full_name();
        if !is_name_key_usable(&full_name, rules) {
            continue;
        }
        by_name.push(normalize_name(&full_name), idx);
    }

    for (name, members) in by_name.into_multi() {
        let distinct_ids: BTreeSet<&str> =
            members.iter().filter_map(|&idx| national_ids[idx].as_deref()).collect();
        if distinct_ids.len() > 1 {
            tracing::debug!(
                "Name group '{}' has {} distinct national IDs, not merging",
                name,
                distinct_ids.len()
            );
            continue;
        }

        if covered_by_single_id_group(&members, &id_group_of) {
            continue;
        }

        groups.push(DuplicateGroup {
            key: GroupKey::Name(name),
            members: members.iter().map(|&idx| students[idx].clone()).collect(),
        });
    }

    groups
}

fn is_name_key_usable(full_name: &str, rules: &GroupingRules) -> bool {
    let name = normalize_name(full_name);
    !name.is_empty()
        && name.chars().count() >= rules.min_name_len
        && !is_test_name(&name, &rules.test_markers)
}

fn covered_by_single_id_group(members: &[usize], id_group_of: &HashMap<usize, usize>) -> bool {
    let mut groups = members.iter().map(|idx| id_group_of.get(idx));
    match groups.next() {
        Some(Some(first)) => groups.all(|g| g == Some(first)),
        _ => false,
    }
}
