//! Student deduplication - duplicate resolution and data repair for academy organizations
//!
//! This crate groups students that are the same person (by national ID, with
//! the display name as fallback), picks one record to keep per group, moves the
//! others' subscriptions and attendances onto it and disposes of the rest. It
//! also carries the repair passes run around it: inactive students holding
//! active subscriptions, test records, duplicate subscriptions and unused plans.
//!
//! All datastore access goes through [`StudentStore`]; [`PgStudentStore`] talks
//! to Postgres and [`InMemoryStudentStore`] backs tests and rehearsals.

pub mod cleanup;
pub mod config;
pub mod disposer;
pub mod error;
pub mod grouping;
pub mod identity;
pub mod memory;
pub mod migrator;
pub mod model;
pub mod postgres;
pub mod ranking;
pub mod repair;
pub mod report;
pub mod resolver;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::DedupConfig;
pub use error::{DedupError, Result};

// Re-export commonly used types
pub use disposer::{DisposalAction, DisposalMode, Disposer, RunMode};
pub use grouping::{build_groups, DuplicateGroup, GroupKey, GroupingRules};
pub use memory::{Dataset, InMemoryStudentStore};
pub use migrator::{DependentMigrator, MigrationReport};
pub use model::{OrganizationCounts, StudentRecord, StudentSummary};
pub use postgres::PgStudentStore;
pub use ranking::{compare_priority, rank_group, RankInputs, RankedGroup};
pub use repair::{ConsistencyRepair, RepairPolicy, RepairReport};
pub use report::{ErrorEntry, ResolutionReport, ResolutionTotals};
pub use resolver::DuplicateResolver;
pub use store::{StepOutcome, StudentStore};
