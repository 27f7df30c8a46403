use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use crate::db::Database;
use crate::metrics;
use crate::models::{Comment, Ticket};
use crate::policy;
use crate::session::Session;
use crate::timetrack::{self, TimeStats};

use super::{load_visible_ticket, print_json, user_name};

#[derive(Serialize)]
struct TicketDetail {
    #[serde(flatten)]
    ticket: Ticket,
    comments: Vec<Comment>,
    time: TimeStats,
    actions: Vec<String>,
}

pub fn run(db: &Database, session: &Session, id: i64, json: bool) -> Result<()> {
    let ticket = load_visible_ticket(db, session, id)?;
    let comments = db.get_comments(id)?;
    let entries = db.list_time_entries(Some(id), None)?;
    let time = timetrack::time_stats(&entries, ticket.estimated_hours);
    let actions: Vec<String> = policy::available_actions(session.role(), &ticket, session.user_id())
        .iter()
        .map(|a| a.describe())
        .collect();

    if json {
        return print_json(&TicketDetail {
            ticket,
            comments,
            time,
            actions,
        });
    }

    let now = Utc::now();
    let users = db.list_users()?;

    println!("Ticket #{}: {}", ticket.id, ticket.title);
    println!("Status: {}", ticket.status.label());
    println!("Type: {}", ticket.ticket_type);
    println!("Priority: {}", ticket.priority);
    println!("Reporter: {}", user_name(&users, ticket.reporter_id));
    match ticket.assignee_id {
        Some(assignee) => println!("Assignee: {}", user_name(&users, assignee)),
        None => println!("Assignee: (unassigned)"),
    }
    if let Some(branch) = ticket.branch_id.map(|b| db.get_branch(b)).transpose()?.flatten() {
        println!("Branch: {}", branch.name);
    }
    println!("Created: {}", ticket.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Updated: {}", ticket.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(start) = ticket.start_date {
        println!("Start: {}", start.format("%Y-%m-%d"));
    }
    if let Some(end) = ticket.end_date {
        println!("Target: {}", end.format("%Y-%m-%d"));
    }
    if let Some(completed) = ticket.completed_at {
        println!("Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(remaining) = metrics::sla_remaining_hours(&ticket, now) {
        if metrics::is_overdue(remaining) {
            println!("SLA: overdue by {}", metrics::format_span(-remaining));
        } else {
            println!("SLA: {} left", metrics::format_span(remaining));
        }
    }

    if let Some(desc) = &ticket.description {
        if !desc.is_empty() {
            println!("\nDescription:");
            for line in desc.lines() {
                println!("  {}", line);
            }
        }
    }

    if !comments.is_empty() {
        println!("\nComments:");
        for comment in &comments {
            let author = comment
                .user_id
                .map(|uid| user_name(&users, uid))
                .unwrap_or_else(|| "system".to_string());
            let marker = if comment.kind.is_system() { "*" } else { " " };
            let mut lines = comment.body.lines();
            println!(
                " {}[{}] {}: {}",
                marker,
                comment.created_at.format("%Y-%m-%d %H:%M"),
                author,
                lines.next().unwrap_or_default()
            );
            for line in lines {
                println!("      {}", line);
            }
        }
    }

    println!(
        "\nTime: {} logged ({} billable)",
        metrics::format_hours(time.total_hours),
        metrics::format_hours(time.billable_hours)
    );
    if let (Some(remaining), Some(percent)) = (time.remaining_hours, time.percent_complete) {
        println!("Remaining: {} ({:.0}% of estimate)", metrics::format_hours(remaining), percent);
    }

    println!("\nYou can: {}", actions.join(", "));
    Ok(())
}
