#![no_main]

//! Drives a single ticket through random lifecycle requests from random
//! actors and checks the workflow invariants after every step.

use arbitrary::Arbitrary;
use chrono::{Duration, TimeZone, Utc};
use libfuzzer_sys::fuzz_target;

use ticketdesk::lifecycle::{self, Actor, NewTicket, Schedule};
use ticketdesk::models::{Priority, Role, Status, Ticket, TicketType, User};

#[derive(Arbitrary, Debug, Clone, Copy)]
enum Who {
    Pm,
    Dev,
    OtherDev,
    Reporter,
    System,
}

#[derive(Arbitrary, Debug)]
enum Step {
    Advance { who: Who, to: u8 },
    Reopen { who: Who, reason: String },
    Assign { who: Who, to_other: bool },
    Comment { who: Who, body: String },
}

fn user(id: i64, name: &str, role: Role) -> User {
    User {
        id,
        name: name.to_string(),
        role,
        branch_id: Some(1),
        created_at: Utc.timestamp_opt(0, 0).unwrap(),
    }
}

fn status_from(n: u8) -> Status {
    Status::ALL[usize::from(n) % Status::ALL.len()]
}

fuzz_target!(|steps: Vec<Step>| {
    let directory = vec![
        user(1, "pm", Role::Pm),
        user(2, "dev", Role::Dev),
        user(3, "other", Role::Dev),
        user(4, "reporter", Role::Requester),
    ];
    let actor = |who: Who| -> Option<&User> {
        match who {
            Who::Pm => Some(&directory[0]),
            Who::Dev => Some(&directory[1]),
            Who::OtherDev => Some(&directory[2]),
            Who::Reporter => Some(&directory[3]),
            Who::System => None,
        }
    };

    let mut now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let new = match lifecycle::prepare_ticket(
        NewTicket::new("fuzz", TicketType::Support, Priority::Normal),
        &directory[3],
        &directory,
        now,
    ) {
        Ok(n) => n,
        Err(_) => return,
    };
    let mut ticket = Ticket {
        id: 1,
        title: new.title,
        description: None,
        ticket_type: new.ticket_type,
        priority: new.priority,
        status: Status::Backlog,
        reporter_id: 4,
        assignee_id: None,
        branch_id: new.branch_id,
        start_date: None,
        end_date: None,
        due_at: None,
        completed_at: None,
        sla_hours: None,
        estimated_hours: None,
        created_at: now,
        updated_at: now,
    };

    for step in steps.into_iter().take(64) {
        now += Duration::minutes(5);
        let before = ticket.clone();
        let result = match step {
            Step::Advance { who, to } => {
                let requested = status_from(to);
                let actor = match actor(who) {
                    Some(u) => Actor::User(u),
                    None => Actor::System,
                };
                lifecycle::advance(&ticket, requested, actor, now)
            }
            Step::Reopen { who, reason } => match actor(who) {
                Some(u) => lifecycle::reopen(&ticket, &reason, u, now),
                None => continue,
            },
            Step::Assign { who, to_other } => match actor(who) {
                Some(u) => {
                    let target = if to_other { 3 } else { 2 };
                    lifecycle::assign(&ticket, target, &directory, u, Schedule::default(), now)
                }
                None => continue,
            },
            Step::Comment { who, body } => match actor(who) {
                Some(u) => lifecycle::comment(&ticket, &body, u),
                None => continue,
            },
        };

        if let Ok(change) = result {
            if change.changed {
                let moved = before.status != change.ticket.status;
                if moved {
                    let forward = before.status.next() == Some(change.ticket.status);
                    let reopened = before.status == Status::Done && change.ticket.status == Status::Backlog;
                    assert!(forward || reopened, "illegal move {:?} -> {:?}", before.status, change.ticket.status);
                    assert!(change.comment.as_ref().map_or(false, |c| c.kind.is_system()));
                }
            } else {
                assert_eq!(change.ticket, before);
            }
            ticket = change.ticket;
        }

        assert_eq!(ticket.completed_at.is_some(), ticket.status == Status::Done);
        if ticket.status == Status::Done {
            assert!(lifecycle::advance(&ticket, Status::Done, Actor::System, now).map_or(false, |c| !c.changed));
        }
    }
});
