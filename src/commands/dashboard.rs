use anyhow::Result;
use chrono::Utc;

use crate::db::Database;
use crate::reports;
use crate::session::Session;

use super::print_json;

pub fn run(db: &Database, session: &Session, json: bool) -> Result<()> {
    let cards = reports::dashboard(session, &db.list_tickets()?, Utc::now());
    if json {
        return print_json(&cards);
    }

    println!("Dashboard for {} ({})", session.user().name, session.role());
    println!("  Tickets:         {}", cards.total);
    println!("  Assigned to me:  {}", cards.assigned_to_me);
    println!("  Overdue:         {}", cards.overdue);
    println!("  Completed today: {}", cards.completed_today);
    if let Some(active) = cards.active {
        println!("  Being worked on: {}", active);
    }
    let unread = db.unread_count(session.user_id())?;
    if unread > 0 {
        println!("\n{} unread notification(s)", unread);
    }
    Ok(())
}
