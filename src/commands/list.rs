use anyhow::Result;

use crate::db::Database;
use crate::session::Session;
use crate::visibility::{self, TicketFilter};

use super::{print_json, truncate, user_name};

pub fn run(db: &Database, session: &Session, filter: &TicketFilter, json: bool) -> Result<()> {
    let tickets = visibility::visible_tickets(
        session.role(),
        &db.list_tickets()?,
        session.user_id(),
        session.branch_id(),
        filter,
    );

    if json {
        return print_json(&tickets);
    }

    if tickets.is_empty() {
        println!("No tickets found.");
        return Ok(());
    }

    let users = db.list_users()?;
    for ticket in tickets {
        let status_display = format!("[{}]", ticket.status);
        let assignee = ticket
            .assignee_id
            .map(|id| user_name(&users, id))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "#{:<4} {:13} {:8} {:8} {:<40} {}",
            ticket.id,
            status_display,
            ticket.ticket_type,
            ticket.priority,
            truncate(&ticket.title, 40),
            assignee
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::NewTicket;
    use crate::models::{Priority, TicketType};
    use crate::test_support::{seed_team, setup_test_db};
    use crate::visibility::AssigneeFilter;
    use chrono::Utc;

    #[test]
    fn test_list_empty() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let session = Session::new(team.pm.clone());
        assert!(run(&db, &session, &TicketFilter::default(), false).is_ok());
        assert!(run(&db, &session, &TicketFilter::default(), true).is_ok());
    }

    #[test]
    fn test_list_with_filters() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let mut new = NewTicket::new("Mine", TicketType::Support, Priority::High);
        new.assignee_id = Some(team.dev.id);
        db.create_ticket(&new, team.pm.id, Utc::now()).unwrap();
        db.create_ticket(&NewTicket::new("Open", TicketType::Feature, Priority::Low), team.pm.id, Utc::now())
            .unwrap();

        let session = Session::new(team.dev.clone());
        let filter = TicketFilter {
            assignee: Some(AssigneeFilter::Unassigned),
            ticket_type: Some(TicketType::Feature),
            ..TicketFilter::default()
        };
        assert!(run(&db, &session, &filter, false).is_ok());
    }
}
