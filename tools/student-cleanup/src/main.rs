//! Student cleanup CLI
//!
//! Runs duplicate resolution and the repair passes against one organization.
//! Per-record failures are reported and the run still exits 0; only bad
//! configuration, an unreachable database or a failed initial load exit non-zero.

mod cli;
mod logging;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use serde::Serialize;
use student_dedup::cleanup::{consolidate_subscriptions, prune_plans, purge_test_students};
use student_dedup::{
    ConsistencyRepair, DedupConfig, DisposalMode, DuplicateResolver, PgStudentStore, RepairPolicy,
    RunMode, StudentStore,
};
use tracing::info;

use cli::{Cli, Command};

/// Print a report either as JSON or through its console renderer
fn emit<T: Serialize>(json: bool, report: &T, render: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        render(report);
    }
    Ok(())
}

struct Runner<'a, S: StudentStore + ?Sized> {
    store: &'a S,
    config: &'a DedupConfig,
    json: bool,
}

impl<'a, S: StudentStore + ?Sized> Runner<'a, S> {
    /// Resolve duplicates; the resolver repairs inactive keepers before returning
    async fn dedupe(&self, mode: DisposalMode) -> Result<()> {
        let report = DuplicateResolver::new(self.store, self.config.grouping.clone(), mode)
            .run(self.config.organization_id)
            .await
            .context("Failed to load students for duplicate resolution or repair")?;
        emit(self.json, &report, render::render_resolution)
    }

    async fn purge_test(&self, mode: DisposalMode) -> Result<()> {
        let organization_id = self.config.organization_id;
        let report = purge_test_students(self.store, organization_id, &self.config.grouping, mode)
            .await
            .context("Failed to load students for test purge")?;
        emit(self.json, &report, render::render_purge)
    }

    async fn repair(&self, policy: RepairPolicy, run_mode: RunMode) -> Result<()> {
        let report = ConsistencyRepair::new(self.store, policy, run_mode)
            .run(self.config.organization_id)
            .await
            .context("Failed to load inactive students with active subscriptions")?;
        emit(self.json, &report, render::render_repair)
    }

    async fn consolidate(&self, run_mode: RunMode) -> Result<()> {
        let report = consolidate_subscriptions(
            self.store,
            self.config.organization_id,
            &self.config.subscriptions.preferred_plan_name,
            run_mode,
        )
        .await
        .context("Failed to load active subscriptions")?;
        emit(self.json, &report, render::render_consolidation)
    }

    async fn prune_plans(&self, run_mode: RunMode) -> Result<()> {
        let report = prune_plans(
            self.store,
            self.config.organization_id,
            &self.config.subscriptions.preferred_plan_name,
            run_mode,
        )
        .await
        .context("Failed to load billing plans")?;
        emit(self.json, &report, render::render_plan_prune)
    }

    async fn all(&self, mode: DisposalMode) -> Result<()> {
        let run_mode = mode.run_mode();
        self.purge_test(mode).await?;
        self.dedupe(mode).await?;
        self.consolidate(run_mode).await?;
        self.repair(RepairPolicy::default(), run_mode).await?;
        self.prune_plans(run_mode).await
    }

    async fn final_counts(&self) -> Result<()> {
        let counts = self
            .store
            .counts(self.config.organization_id)
            .await
            .context("Failed to read final counts")?;
        emit(self.json, &counts, render::render_counts)
    }
}

async fn connect(config: &DedupConfig) -> Result<PgStudentStore> {
    let timeout = config.connect_timeout();
    tokio::time::timeout(timeout, PgStudentStore::connect(&config.database))
        .await
        .with_context(|| {
            format!("Database connection timed out after {} seconds", timeout.as_secs())
        })?
        .context("Failed to connect to database")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        DedupConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;

    logging::initialize_logging(&config.logging)?;

    if !cli.json {
        println!("{}", "🚀 Student cleanup".cyan().bold());
        println!("🏫 Organization: {}", config.organization_id);
    }

    let store = connect(&config).await?;
    info!("Connected to database");

    let runner = Runner { store: &store, config: &config, json: cli.json };
    let mutating = match cli.command {
        Command::Dedupe(args) => {
            runner.dedupe(args.disposal_mode()).await?;
            !args.dry_run
        }
        Command::PurgeTest(args) => {
            runner.purge_test(args.disposal_mode()).await?;
            !args.dry_run
        }
        Command::Repair { preview, policy } => {
            runner.repair(policy.into(), preview.run_mode()).await?;
            !preview.dry_run
        }
        Command::Consolidate(preview) => {
            runner.consolidate(preview.run_mode()).await?;
            !preview.dry_run
        }
        Command::PrunePlans(preview) => {
            runner.prune_plans(preview.run_mode()).await?;
            !preview.dry_run
        }
        Command::All(args) => {
            runner.all(args.disposal_mode()).await?;
            !args.dry_run
        }
    };

    if mutating {
        runner.final_counts().await?;
    }

    if !cli.json {
        println!();
        println!("{}", "🎉 Done".green().bold());
    }

    Ok(())
}
