//! Command line definition

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use student_dedup::{DedupConfig, DisposalMode, RepairPolicy, RunMode};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "student-cleanup")]
#[command(about = "Duplicate student resolution and data repair for an academy organization")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Organization to work on (overrides ORGANIZATION_ID)
    #[arg(long, global = true)]
    pub org: Option<Uuid>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Print reports as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn apply_overrides(&self, config: &mut DedupConfig) {
        if let Some(org) = self.org {
            config.organization_id = org;
        }
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Merge duplicate students into one record per person
    Dedupe(DisposalArgs),

    /// Fix inactive students that still hold active subscriptions
    Repair {
        #[command(flatten)]
        preview: PreviewArgs,

        #[arg(long, value_enum, default_value_t = PolicyArg::DeactivateSubscriptions)]
        policy: PolicyArg,
    },

    /// Remove students whose name marks them as test data
    PurgeTest(DisposalArgs),

    /// Keep a single active subscription per student
    Consolidate(PreviewArgs),

    /// Deactivate billing plans nobody is subscribed to
    PrunePlans(PreviewArgs),

    /// purge-test, dedupe, consolidate, repair and prune-plans, in that order
    All(DisposalArgs),
}

#[derive(Args, Debug, Clone, Copy)]
pub struct PreviewArgs {
    /// Report what would change without writing anything
    #[arg(long)]
    pub dry_run: bool,
}

impl PreviewArgs {
    pub fn run_mode(self) -> RunMode {
        if self.dry_run {
            RunMode::Preview
        } else {
            RunMode::Apply
        }
    }
}

#[derive(Args, Debug, Clone, Copy)]
pub struct DisposalArgs {
    /// Report what would change without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// How disposed students are removed
    #[arg(long, value_enum, default_value_t = ModeArg::Hard)]
    pub mode: ModeArg,
}

impl DisposalArgs {
    pub fn disposal_mode(self) -> DisposalMode {
        match (self.dry_run, self.mode) {
            (true, _) => DisposalMode::Preview,
            (false, ModeArg::Soft) => DisposalMode::SoftDelete,
            (false, ModeArg::Hard) => DisposalMode::HardDelete,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Delete the record, its remaining dependents and its user
    Hard,
    /// Mark the record inactive
    Soft,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    DeactivateSubscriptions,
    ReactivateStudents,
}

impl From<PolicyArg> for RepairPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::DeactivateSubscriptions => RepairPolicy::DeactivateSubscriptions,
            PolicyArg::ReactivateStudents => RepairPolicy::ReactivateStudents,
        }
    }
}
