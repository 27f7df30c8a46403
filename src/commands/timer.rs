use anyhow::{bail, Result};
use chrono::Utc;

use crate::db::Database;
use crate::metrics;
use crate::models::ActivityType;
use crate::policy;
use crate::session::Session;

pub fn start(
    db: &Database,
    session: &Session,
    ticket_id: i64,
    activity_type: Option<ActivityType>,
    description: Option<&str>,
) -> Result<()> {
    let ticket = db.require_ticket(ticket_id)?;
    policy::require(
        policy::can_log_time(session.role(), &ticket, session.user_id()),
        "only the assigned developer or a project manager can track time on this ticket",
    )?;

    if let Some(active) = db.get_active_timer(session.user_id())? {
        if active.ticket_id == ticket_id {
            bail!("Timer already running for ticket #{}", ticket_id);
        } else {
            bail!(
                "Timer already running for ticket #{}. Stop it first with 'ticketdesk timer stop'.",
                active.ticket_id
            );
        }
    }

    db.start_timer(session.user_id(), ticket_id, activity_type, description, Utc::now())?;
    println!("Started timer for #{}: {}", ticket_id, ticket.title);
    println!("Run 'ticketdesk timer stop' when done.");

    Ok(())
}

pub fn stop(db: &Database, session: &Session, non_billable: bool, description: Option<&str>) -> Result<()> {
    let entry = match db.stop_timer(session.user_id(), !non_billable, description, Utc::now())? {
        Some(e) => e,
        None => bail!("No timer running. Start one with 'ticketdesk timer start <id>'."),
    };

    let title = db
        .get_ticket(entry.ticket_id)?
        .map(|t| t.title)
        .unwrap_or_else(|| "(deleted)".to_string());
    println!("Stopped timer for #{}: {}", entry.ticket_id, title);
    println!("Logged: {} (entry #{})", metrics::format_hours(entry.hours), entry.id);

    let total: f64 = db
        .list_time_entries(Some(entry.ticket_id), None)?
        .iter()
        .map(|e| e.hours)
        .sum();
    println!("Total time on this ticket: {}", metrics::format_hours(total));

    Ok(())
}

pub fn status(db: &Database, session: &Session) -> Result<()> {
    match db.get_active_timer(session.user_id())? {
        Some(timer) => {
            let duration = Utc::now().signed_duration_since(timer.started_at);
            let hours = duration.num_hours();
            let minutes = duration.num_minutes() % 60;
            let seconds = duration.num_seconds() % 60;

            let title = db
                .get_ticket(timer.ticket_id)?
                .map(|t| t.title)
                .unwrap_or_else(|| "(deleted)".to_string());

            println!("Timer running: #{} {}", timer.ticket_id, title);
            if let Some(kind) = timer.activity_type {
                println!("Activity: {}", kind);
            }
            println!("Elapsed: {}h {}m {}s", hours, minutes, seconds);
        }
        None => {
            println!("No timer running.");
        }
    }

    Ok(())
}
