use anyhow::Result;
use chrono::Utc;

use crate::db::Database;
use crate::lifecycle::{self, Schedule};
use crate::session::Session;

use super::user_name;

pub fn run(db: &Database, session: &Session, id: i64, assignee_id: i64, schedule: Schedule) -> Result<()> {
    let ticket = db.require_ticket(id)?;
    let directory = db.list_users()?;
    let now = Utc::now();
    let change = lifecycle::assign(&ticket, assignee_id, &directory, session.user(), schedule, now)?;
    db.apply_change(&change, now)?;

    let verb = if ticket.assignee_id.map_or(false, |prev| prev != assignee_id) {
        "Reassigned"
    } else {
        "Assigned"
    };
    println!("{} ticket #{} to {}", verb, id, user_name(&directory, assignee_id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TicketError;
    use crate::lifecycle::NewTicket;
    use crate::models::{NotificationKind, Priority, TicketType};
    use crate::test_support::{seed_team, setup_test_db};

    #[test]
    fn test_reassign_notifies_new_dev() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let pm = Session::new(team.pm.clone());
        let id = db
            .create_ticket(&NewTicket::new("Wifi", TicketType::Support, Priority::Normal), team.requester.id, Utc::now())
            .unwrap();

        run(&db, &pm, id, team.dev.id, Schedule::default()).unwrap();
        run(&db, &pm, id, team.dev2.id, Schedule::default()).unwrap();

        assert_eq!(db.require_ticket(id).unwrap().assignee_id, Some(team.dev2.id));
        let inbox = db.list_notifications(team.dev2.id, true).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::TicketReassigned);
        let comments = db.get_comments(id).unwrap();
        assert!(comments[1].body.starts_with("Ticket reassigned to Dana"));
    }

    #[test]
    fn test_only_pm_assigns() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let id = db
            .create_ticket(&NewTicket::new("Wifi", TicketType::Support, Priority::Normal), team.requester.id, Utc::now())
            .unwrap();
        let err = run(&db, &Session::new(team.dev.clone()), id, team.dev.id, Schedule::default()).unwrap_err();
        assert!(err.downcast_ref::<TicketError>().unwrap().is_unauthorized());
        assert!(db.get_comments(id).unwrap().is_empty());
    }
}
