pub mod activity;
pub mod assign;
pub mod comment;
pub mod create;
pub mod dashboard;
pub mod directory;
pub mod init;
pub mod list;
pub mod notify;
pub mod oncall;
pub mod report;
pub mod show;
pub mod status;
pub mod time;
pub mod timer;
pub mod update;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::db::Database;
use crate::error::TicketError;
use crate::models::{Ticket, User};
use crate::policy;
use crate::session::Session;

/// `YYYY-MM-DD` as a calendar date. Used as a clap value parser.
pub fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}'. Use YYYY-MM-DD", value))
}

/// `YYYY-MM-DD` as midnight UTC, for planning dates.
pub fn parse_day(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_date(value).map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn truncate(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars - 3).collect();
        format!("{}...", truncated)
    }
}

pub fn user_name(users: &[User], id: i64) -> String {
    users
        .iter()
        .find(|u| u.id == id)
        .map(|u| u.name.clone())
        .unwrap_or_else(|| format!("User {}", id))
}

/// Loads a ticket the session is allowed to look at.
pub fn load_visible_ticket(db: &Database, session: &Session, id: i64) -> Result<Ticket> {
    let ticket = db.require_ticket(id)?;
    if !policy::can_view_ticket(session.role(), &ticket, session.user_id(), session.branch_id()) {
        tracing::warn!(ticket_id = id, user_id = session.user_id(), "ticket outside viewer's branch");
        return Err(TicketError::not_found("Ticket", id).into());
    }
    Ok(ticket)
}
