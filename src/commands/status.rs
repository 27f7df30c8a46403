use anyhow::Result;
use chrono::Utc;

use crate::db::Database;
use crate::lifecycle::{self, Actor};
use crate::models::Status;
use crate::session::Session;

use super::load_visible_ticket;

pub fn advance(db: &Database, session: &Session, id: i64, to: Status) -> Result<()> {
    let ticket = load_visible_ticket(db, session, id)?;
    let now = Utc::now();
    let change = lifecycle::advance(&ticket, to, Actor::User(session.user()), now)?;

    if !change.changed {
        println!("Ticket #{} is already {}", id, to.label());
        return Ok(());
    }
    db.apply_change(&change, now)?;
    println!("Ticket #{} moved to {}", id, to.label());
    Ok(())
}

pub fn reopen(db: &Database, session: &Session, id: i64, reason: &str) -> Result<()> {
    let ticket = load_visible_ticket(db, session, id)?;
    let now = Utc::now();
    let change = lifecycle::reopen(&ticket, reason, session.user(), now)?;
    db.apply_change(&change, now)?;
    println!("Reopened ticket #{}", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::assign;
    use crate::error::TicketError;
    use crate::lifecycle::{NewTicket, Schedule};
    use crate::models::{CommentKind, Priority, SystemEvent, TicketType};
    use crate::test_support::{at, seed_team, setup_test_db};

    fn as_ticket_error(err: &anyhow::Error) -> &TicketError {
        err.downcast_ref::<TicketError>().unwrap()
    }

    #[test]
    fn test_full_lifecycle_with_reopen() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let requester = Session::new(team.requester.clone());
        let pm = Session::new(team.pm.clone());
        let dev = Session::new(team.dev.clone());

        let id = db
            .create_ticket(
                &NewTicket::new("Scanner broken", TicketType::Support, Priority::High),
                requester.user_id(),
                Utc::now(),
            )
            .unwrap();
        let created = db.require_ticket(id).unwrap();
        assert_eq!(created.status, Status::Backlog);
        assert_eq!(created.assignee_id, None);

        let schedule = Schedule {
            start_date: None,
            end_date: Some(at(2024, 6, 1, 0, 0)),
        };
        assign::run(&db, &pm, id, team.dev.id, schedule).unwrap();
        let assigned = db.require_ticket(id).unwrap();
        assert_eq!(assigned.assignee_id, Some(team.dev.id));
        assert_eq!(assigned.end_date, Some(at(2024, 6, 1, 0, 0)));
        let comments = db.get_comments(id).unwrap();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].body.contains("Dario"));
        assert!(comments[0].body.contains("2024-06-01"));

        for (step, next) in [Status::InProgress, Status::Review, Status::Done].into_iter().enumerate() {
            advance(&db, &dev, id, next).unwrap();
            let ticket = db.require_ticket(id).unwrap();
            assert_eq!(ticket.status, next);
            assert_eq!(ticket.completed_at.is_some(), next == Status::Done);
            assert_eq!(db.get_comments(id).unwrap().len(), step + 2);
        }
        let comments = db.get_comments(id).unwrap();
        assert_eq!(comments[1].body, "Status changed to: IN PROGRESS");
        assert_eq!(comments[2].body, "Status changed to: REVIEW");
        assert_eq!(comments[3].body, "Status changed to: DONE");

        reopen(&db, &requester, id, "still broken").unwrap();
        let reopened = db.require_ticket(id).unwrap();
        assert_eq!(reopened.status, Status::Backlog);
        assert_eq!(reopened.completed_at, None);
        let comments = db.get_comments(id).unwrap();
        assert_eq!(comments.len(), 5);
        let last = &comments[4];
        assert!(last.body.contains("REOPENED"));
        assert!(last.body.contains("still broken"));
        assert_eq!(last.kind, CommentKind::System(SystemEvent::Reopened));
    }

    #[test]
    fn test_done_twice_adds_no_comment() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let mut new = NewTicket::new("Badge reader", TicketType::Support, Priority::Normal);
        new.assignee_id = Some(team.dev.id);
        let id = db.create_ticket(&new, team.pm.id, Utc::now()).unwrap();
        let dev = Session::new(team.dev.clone());

        for next in [Status::InProgress, Status::Review, Status::Done] {
            advance(&db, &dev, id, next).unwrap();
        }
        let before = db.require_ticket(id).unwrap();
        advance(&db, &dev, id, Status::Done).unwrap();
        assert_eq!(db.require_ticket(id).unwrap(), before);
        assert_eq!(db.get_comments(id).unwrap().len(), 3);
    }

    #[test]
    fn test_skip_is_rejected_without_side_effects() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let mut new = NewTicket::new("Skip me", TicketType::Feature, Priority::Low);
        new.assignee_id = Some(team.dev.id);
        let id = db.create_ticket(&new, team.pm.id, Utc::now()).unwrap();

        let err = advance(&db, &Session::new(team.dev.clone()), id, Status::Done).unwrap_err();
        assert!(matches!(as_ticket_error(&err), TicketError::InvalidTransition { .. }));
        assert_eq!(db.require_ticket(id).unwrap().status, Status::Backlog);
        assert!(db.get_comments(id).unwrap().is_empty());
    }

    #[test]
    fn test_other_dev_and_pm_cannot_advance() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let mut new = NewTicket::new("Not yours", TicketType::Support, Priority::Low);
        new.assignee_id = Some(team.dev.id);
        let id = db.create_ticket(&new, team.pm.id, Utc::now()).unwrap();

        for session in [Session::new(team.dev2.clone()), Session::new(team.pm.clone())] {
            let err = advance(&db, &session, id, Status::InProgress).unwrap_err();
            assert!(as_ticket_error(&err).is_unauthorized());
        }
    }

    #[test]
    fn test_blank_reason_is_validation_for_any_role() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let id = db
            .create_ticket(&NewTicket::new("Any", TicketType::Support, Priority::Low), team.requester.id, Utc::now())
            .unwrap();
        for user in [&team.pm, &team.dev, &team.requester] {
            let err = reopen(&db, &Session::new(user.clone()), id, "   ").unwrap_err();
            assert!(as_ticket_error(&err).is_validation());
        }
    }
}
