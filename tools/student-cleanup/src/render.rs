//! Console rendering of run reports

use chrono::{DateTime, Utc};
use colored::*;
use student_dedup::cleanup::{ConsolidationReport, PlanPruneReport, PurgeReport};
use student_dedup::report::{GroupReport, LoserReport, MemberSnapshot};
use student_dedup::{
    DisposalAction, DisposalMode, ErrorEntry, OrganizationCounts, RepairPolicy, RepairReport,
    ResolutionReport, RunMode, StepOutcome,
};

fn flag(value: bool) -> ColoredString {
    if value {
        "yes".green()
    } else {
        "no".dimmed()
    }
}

fn date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

fn rank_line(member: &MemberSnapshot) -> String {
    let link = match &member.external_id {
        Some(external_id) => format!("{} ({})", flag(true), external_id),
        None => flag(false).to_string(),
    };
    format!(
        "link: {} | active sub: {} | attendances: {} | active: {} | created: {}",
        link,
        flag(member.rank.has_active_subscription),
        member.rank.attendance_count,
        flag(member.rank.is_active),
        date(member.rank.created_at)
    )
}

fn short(id: &uuid::Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

fn disposal_text(outcome: &StepOutcome<DisposalAction>) -> ColoredString {
    match outcome {
        StepOutcome::Applied(DisposalAction::WouldDispose) => "would dispose".yellow(),
        StepOutcome::Applied(action @ DisposalAction::Deleted(_)) => action.to_string().red(),
        StepOutcome::Applied(action) => action.to_string().yellow(),
        StepOutcome::AlreadyGone => "already removed".dimmed(),
        StepOutcome::Failed(message) => format!("FAILED: {message}").red().bold(),
    }
}

fn render_loser(loser: &LoserReport, preview: bool) {
    let member = &loser.member;
    println!("    {} {} ({})", "✗".red(), member.name, short(&member.id));
    println!("      {}", rank_line(member));

    if let Some(migration) = &loser.migration {
        let (moved, deleted, removed) = if preview {
            ("would move", "would delete", "would remove")
        } else {
            ("moved", "deleted", "removed")
        };
        match &migration.transfer {
            StepOutcome::Failed(message) => {
                println!("      {} {}", "transfer failed:".red().bold(), message)
            }
            StepOutcome::AlreadyGone => println!("      {}", "already removed".dimmed()),
            StepOutcome::Applied(_) => {
                let subscriptions = if migration.subscriptions_deleted() > 0 {
                    format!("{} {} subscription(s)", deleted, migration.subscriptions_deleted())
                } else {
                    format!("{} {} subscription(s)", moved, migration.subscriptions_moved())
                };
                println!(
                    "      {}, {} {} attendance(s)",
                    subscriptions,
                    moved,
                    migration.attendances_moved()
                );
            }
        }
        match &migration.link_cleanup {
            Some(StepOutcome::Failed(message)) => {
                println!("      {} {}", "link cleanup failed:".yellow(), message)
            }
            Some(_) => println!("      {} gateway link", removed),
            None => {}
        }
    }

    println!("      → {}", disposal_text(&loser.disposal));
}

fn render_group(index: usize, group: &GroupReport, preview: bool) {
    println!();
    println!("{}", format!("[{}] {}", index + 1, group.key).cyan().bold());
    println!("    {} {} ({})", "✓".green(), group.keeper.name.bold(), short(&group.keeper.id));
    println!("      {}", rank_line(&group.keeper));
    for loser in &group.losers {
        render_loser(loser, preview);
    }
}

pub fn render_errors(errors: &[ErrorEntry]) {
    if errors.is_empty() {
        return;
    }
    println!();
    println!("{}", format!("❌ {} error(s):", errors.len()).red().bold());
    for error in errors {
        println!("   {} {} - {}", error.student_id, error.name.bold(), error.message);
    }
}

pub fn render_resolution(report: &ResolutionReport) {
    let preview = report.mode == DisposalMode::Preview;
    println!();
    println!(
        "{}",
        format!("🔍 Duplicate resolution ({} mode)", report.mode).cyan().bold()
    );
    println!("📊 {} students loaded", report.students_loaded);

    for (index, group) in report.groups.iter().enumerate() {
        render_group(index, group, preview);
    }

    // errors of the repair are listed with the resolution's
    if let Some(repair) = &report.repair {
        render_repair_entries(repair);
    }

    let totals = report.totals();
    println!();
    println!("{}", "📋 Summary".bold());
    println!("   Groups found:          {}", totals.groups);
    if report.groups_skipped > 0 {
        println!("   Groups already merged: {}", report.groups_skipped);
    }
    println!("   Losers disposed:       {}", totals.losers_disposed);
    println!("   Subscriptions moved:   {}", totals.subscriptions_moved);
    println!("   Subscriptions deleted: {}", totals.subscriptions_deleted);
    println!("   Attendances moved:     {}", totals.attendances_moved);
    render_errors(&report.errors());

    if preview && totals.groups > 0 {
        println!();
        let note = "ℹ️  Dry run: nothing was written. Re-run without --dry-run to apply.";
        println!("{}", note.yellow());
    }
}

pub fn render_purge(report: &PurgeReport) {
    println!();
    println!("{}", format!("🧹 Test student purge ({} mode)", report.mode).cyan().bold());
    for purged in &report.students {
        println!(
            "   {} ({}) → {}",
            purged.student.name,
            short(&purged.student.id),
            disposal_text(&purged.outcome)
        );
    }
    println!("   {} of {} test student(s) disposed", report.disposed(), report.students.len());
    render_errors(&report.errors());
}

pub fn render_repair(report: &RepairReport) {
    render_repair_entries(report);
    render_errors(&report.errors());
    preview_note(report.run_mode);
}

fn render_repair_entries(report: &RepairReport) {
    println!();
    println!("{}", format!("🔧 Consistency repair ({})", report.policy).cyan().bold());
    for entry in &report.entries {
        let status = match &entry.outcome {
            StepOutcome::Failed(message) => format!("FAILED: {message}").red(),
            StepOutcome::AlreadyGone => "already removed".dimmed(),
            StepOutcome::Applied(_) => match report.policy {
                RepairPolicy::DeactivateSubscriptions => {
                    format!("{} subscription(s) deactivated", entry.active_subscriptions).yellow()
                }
                RepairPolicy::ReactivateStudents => "student reactivated".green(),
            },
        };
        println!("   {} ({}) → {}", entry.student.name, short(&entry.student.id), status);
    }
    match report.policy {
        RepairPolicy::DeactivateSubscriptions => {
            println!("   {} subscription(s) deactivated", report.subscriptions_deactivated())
        }
        RepairPolicy::ReactivateStudents => {
            println!("   {} student(s) reactivated", report.students_reactivated())
        }
    }
}

pub fn render_consolidation(report: &ConsolidationReport) {
    println!();
    println!("{}", "💳 Subscription consolidation".cyan().bold());
    for student in &report.students {
        println!(
            "   {} keeps {} ({}), {} extra",
            short(&student.student_id),
            student.kept.plan_name.bold(),
            student.kept.current_price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            student.deactivated.len()
        );
    }
    println!("   {} subscription(s) deactivated", report.subscriptions_deactivated());
    render_errors(&report.errors());
    preview_note(report.run_mode);
}

pub fn render_plan_prune(report: &PlanPruneReport) {
    println!();
    println!("{}", "🗂️  Plan pruning".cyan().bold());
    for (plan, outcome) in &report.plans {
        let status = match outcome {
            StepOutcome::Failed(message) => format!("FAILED: {message}").red(),
            _ => "deactivated".yellow(),
        };
        println!("   {} ({}) → {}", plan.name, short(&plan.id), status);
    }
    println!("   {} unused plan(s) deactivated", report.deactivated());
    preview_note(report.run_mode);
}

pub fn render_counts(counts: &OrganizationCounts) {
    println!();
    println!("{}", "📈 Final counts".green().bold());
    println!("   Students:             {}", counts.students);
    println!("   Active students:      {}", counts.active_students);
    println!("   Active subscriptions: {}", counts.active_subscriptions);
}

fn preview_note(run_mode: RunMode) {
    if run_mode.is_preview() {
        println!("   {}", "(dry run, nothing written)".dimmed());
    }
}
