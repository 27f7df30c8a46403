use anyhow::{bail, Result};
use chrono::Utc;

use crate::db::Database;
use crate::metrics;
use crate::models::TimeEntry;
use crate::policy;
use crate::session::Session;
use crate::timetrack::{self, EntryFilter, NewTimeEntry, TimeEntryPatch};

use super::{load_visible_ticket, print_json, truncate, user_name};

pub fn log(db: &Database, session: &Session, entry: NewTimeEntry) -> Result<()> {
    let ticket = db.require_ticket(entry.ticket_id)?;
    let entry = timetrack::prepare_entry(entry, &ticket, session)?;
    let id = db.insert_time_entry(session.user_id(), &entry)?;
    tracing::info!(entry_id = id, ticket_id = entry.ticket_id, hours = entry.hours, "time logged");
    println!(
        "Logged {} on #{} (entry #{})",
        metrics::format_hours(entry.hours),
        entry.ticket_id,
        id
    );
    Ok(())
}

fn print_entries(db: &Database, entries: &[TimeEntry]) -> Result<()> {
    if entries.is_empty() {
        println!("No time entries found.");
        return Ok(());
    }
    let users = db.list_users()?;
    for entry in entries {
        let activity = entry.activity_type.map(|a| a.as_str()).unwrap_or("-");
        let billable = if entry.is_billable { "" } else { " (non-billable)" };
        println!(
            "#{:<4} {} #{:<4} {:>8} {:14} {:<12} {}{}",
            entry.id,
            entry.logged_at.format("%Y-%m-%d"),
            entry.ticket_id,
            metrics::format_hours(entry.hours),
            activity,
            truncate(&user_name(&users, entry.user_id), 12),
            entry.description.as_deref().unwrap_or(""),
            billable
        );
    }
    Ok(())
}

pub fn list(db: &Database, session: &Session, ticket_id: i64, json: bool) -> Result<()> {
    load_visible_ticket(db, session, ticket_id)?;
    let entries = db.list_time_entries(Some(ticket_id), None)?;
    if json {
        return print_json(&entries);
    }
    print_entries(db, &entries)
}

pub fn mine(db: &Database, session: &Session, json: bool) -> Result<()> {
    let entries = db.list_time_entries(None, Some(session.user_id()))?;
    if json {
        return print_json(&entries);
    }
    print_entries(db, &entries)
}

fn require_entry(db: &Database, id: i64) -> Result<TimeEntry> {
    match db.get_time_entry(id)? {
        Some(e) => Ok(e),
        None => bail!("Time entry #{} not found", id),
    }
}

pub fn edit(db: &Database, session: &Session, id: i64, patch: TimeEntryPatch) -> Result<()> {
    let entry = require_entry(db, id)?;
    let updated = timetrack::apply_patch(&entry, patch, session)?;
    db.update_time_entry(&updated)?;
    println!("Updated time entry #{}", id);
    Ok(())
}

pub fn delete(db: &Database, session: &Session, id: i64) -> Result<()> {
    let entry = require_entry(db, id)?;
    policy::require(
        policy::can_edit_time_entry(session.role(), &entry, session.user_id()),
        "only the author or a project manager can delete a time entry",
    )?;
    if db.delete_time_entry(id)? {
        println!("Deleted time entry #{}", id);
    } else {
        bail!("Time entry #{} not found", id);
    }
    Ok(())
}

pub fn stats(db: &Database, session: &Session, ticket_id: i64, json: bool) -> Result<()> {
    let ticket = load_visible_ticket(db, session, ticket_id)?;
    let entries = db.list_time_entries(Some(ticket_id), None)?;
    let stats = timetrack::time_stats(&entries, ticket.estimated_hours);
    if json {
        return print_json(&stats);
    }

    println!("Ticket #{}: {}", ticket.id, ticket.title);
    println!("Total: {} in {} entries", metrics::format_hours(stats.total_hours), stats.entry_count);
    println!("Billable: {}", metrics::format_hours(stats.billable_hours));
    println!("Non-billable: {}", metrics::format_hours(stats.non_billable_hours));
    if let Some(estimate) = stats.estimated_hours {
        println!("Estimate: {}", metrics::format_hours(estimate));
    }
    if let (Some(remaining), Some(percent)) = (stats.remaining_hours, stats.percent_complete) {
        println!("Remaining: {} ({:.0}% used)", metrics::format_hours(remaining), percent);
    }
    Ok(())
}

pub fn user_stats(db: &Database, session: &Session, user_id: Option<i64>, json: bool) -> Result<()> {
    let subject = user_id.unwrap_or(session.user_id());
    policy::require(
        policy::can_view_user_stats(session.role(), subject, session.user_id()),
        "only project managers can see another user's time",
    )?;
    let user = match db.get_user(subject)? {
        Some(u) => u,
        None => bail!("User #{} not found", subject),
    };
    let entries = db.list_time_entries(None, Some(subject))?;
    let stats = timetrack::time_stats(&entries, None);
    if json {
        return print_json(&stats);
    }
    println!("{}: {} in {} entries", user.name, metrics::format_hours(stats.total_hours), stats.entry_count);
    println!("Billable: {}", metrics::format_hours(stats.billable_hours));
    println!("Non-billable: {}", metrics::format_hours(stats.non_billable_hours));
    Ok(())
}

pub fn summary(db: &Database, session: &Session, filter: &EntryFilter, json: bool) -> Result<()> {
    policy::require(
        policy::can_view_time_summary(session.role()),
        "only project managers can see the team time summary",
    )?;
    let summary = timetrack::team_summary(&db.list_time_entries(None, None)?, &db.list_users()?, filter);
    if json {
        return print_json(&summary);
    }

    println!(
        "Total: {} ({} billable, {} non-billable) in {} entries",
        metrics::format_hours(summary.total_hours),
        metrics::format_hours(summary.billable_hours),
        metrics::format_hours(summary.non_billable_hours),
        summary.entries_count
    );
    for (title, breakdown) in [
        ("By activity", &summary.by_activity_type),
        ("By user", &summary.by_user),
        ("By date", &summary.by_date),
    ] {
        if breakdown.is_empty() {
            continue;
        }
        println!("\n{}:", title);
        for (key, hours) in breakdown {
            println!("  {:<20} {}", key, metrics::format_hours(*hours));
        }
    }
    Ok(())
}
