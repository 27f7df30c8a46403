use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};

use crate::activity::{self, ActivityPatch, NewActivityReport};
use crate::db::Database;
use crate::metrics;
use crate::models::ActivityReport;
use crate::policy;
use crate::session::Session;

use super::{print_json, truncate, user_name};

pub fn add(db: &Database, session: &Session, report: NewActivityReport) -> Result<()> {
    if let Some(ticket) = report.ticket_id {
        db.require_ticket(ticket)?;
    }
    let (report, minutes) = activity::prepare_report(report, session)?;
    let id = db.insert_activity_report(session.user_id(), &report, minutes, Utc::now())?;
    println!(
        "Filed activity report #{} for {} ({})",
        id,
        report.date,
        metrics::format_hours(minutes as f64 / 60.0)
    );
    Ok(())
}

fn require_report(db: &Database, session: &Session, id: i64) -> Result<ActivityReport> {
    let report = match db.get_activity_report(id)? {
        Some(r) => r,
        None => bail!("Activity report #{} not found", id),
    };
    policy::require(
        policy::can_view_activity_report(session.role(), &report, session.user_id()),
        "activity reports are visible to their author and project managers",
    )?;
    Ok(report)
}

fn span(report: &ActivityReport) -> String {
    let start = report.start_time.format("%H:%M").to_string();
    let end = report.end_time.format("%H:%M").to_string();
    match metrics::duration_between(&start, &end) {
        Ok(span) => format!("{}-{} ({})", start, end, span),
        Err(_) => format!("{}-{}", start, end),
    }
}

pub fn list(
    db: &Database,
    session: &Session,
    user_id: Option<i64>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    json: bool,
) -> Result<()> {
    let scope = activity::report_scope(session, user_id);
    let reports = db.list_activity_reports(scope, from, to)?;
    if json {
        return print_json(&reports);
    }
    if reports.is_empty() {
        println!("No activity reports found.");
        return Ok(());
    }

    let users = db.list_users()?;
    for report in reports {
        println!(
            "#{:<4} {} {:<12} {:<28} {:14} {}",
            report.id,
            report.date,
            truncate(&user_name(&users, report.user_id), 12),
            span(&report),
            report.activity_type,
            truncate(&report.description, 40)
        );
    }
    Ok(())
}

pub fn show(db: &Database, session: &Session, id: i64, json: bool) -> Result<()> {
    let report = require_report(db, session, id)?;
    if json {
        return print_json(&report);
    }

    let users = db.list_users()?;
    println!("Activity report #{}", report.id);
    println!("Author: {}", user_name(&users, report.user_id));
    println!("Date: {}", report.date);
    println!("Time: {}", span(&report));
    println!("Worked: {}", metrics::format_hours(report.minutes_worked as f64 / 60.0));
    println!("Activity: {}", report.activity_type);
    if let Some(ticket) = report.ticket_id {
        println!("Ticket: #{}", ticket);
    }
    if let Some(feature) = &report.feature_worked {
        println!("Feature: {}", feature);
    }
    println!("\n{}", report.description);
    if let Some(done) = &report.accomplishments {
        println!("\nAccomplishments:\n  {}", done);
    }
    if let Some(blockers) = &report.blockers {
        println!("\nBlockers:\n  {}", blockers);
    }
    Ok(())
}

pub fn edit(db: &Database, session: &Session, id: i64, patch: ActivityPatch) -> Result<()> {
    let report = require_report(db, session, id)?;
    let updated = activity::apply_patch(&report, patch, session)?;
    db.update_activity_report(&updated)?;
    println!("Updated activity report #{}", id);
    Ok(())
}

pub fn delete(db: &Database, session: &Session, id: i64) -> Result<()> {
    let report = require_report(db, session, id)?;
    policy::require(
        policy::can_edit_activity_report(&report, session.user_id()),
        "only the author can delete an activity report",
    )?;
    db.delete_activity_report(id)?;
    println!("Deleted activity report #{}", id);
    Ok(())
}

pub fn summary(
    db: &Database,
    session: &Session,
    user_id: Option<i64>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    json: bool,
) -> Result<()> {
    let scope = activity::report_scope(session, user_id);
    let summary = activity::summarize(&db.list_activity_reports(scope, from, to)?);
    if json {
        return print_json(&summary);
    }

    println!(
        "{} reports over {} days, {} worked",
        summary.total_reports,
        summary.days_reported,
        metrics::format_hours(summary.total_hours)
    );
    for (kind, hours) in &summary.activity_breakdown {
        println!("  {:<14} {}", kind, metrics::format_hours(*hours));
    }
    Ok(())
}
