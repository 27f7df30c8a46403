//! Builders shared by unit tests across the crate.

use chrono::{DateTime, TimeZone, Utc};
use tempfile::tempdir;

use crate::db::Database;
use crate::models::{Priority, Role, Status, Ticket, TicketType, User};

pub fn setup_test_db() -> (Database, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let db = Database::open(&db_path).unwrap();
    (db, dir)
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn user(id: i64, name: &str, role: Role, branch_id: Option<i64>) -> User {
    User {
        id,
        name: name.to_string(),
        role,
        branch_id,
        created_at: at(2024, 1, 1, 9, 0),
    }
}

pub fn ticket(id: i64, reporter_id: i64, assignee_id: Option<i64>, status: Status) -> Ticket {
    let created = at(2024, 5, 1, 9, 0);
    Ticket {
        id,
        title: format!("Ticket {}", id),
        description: None,
        ticket_type: TicketType::Support,
        priority: Priority::Normal,
        status,
        reporter_id,
        assignee_id,
        branch_id: None,
        start_date: None,
        end_date: None,
        due_at: None,
        completed_at: if status == Status::Done { Some(created) } else { None },
        sla_hours: None,
        estimated_hours: None,
        created_at: created,
        updated_at: created,
    }
}

/// A small organization stored in `db`: one branch, a pm, two devs and a requester.
pub struct Team {
    pub branch: i64,
    pub pm: User,
    pub dev: User,
    pub dev2: User,
    pub requester: User,
}

pub fn seed_team(db: &Database) -> Team {
    let branch = db.create_branch("Lisbon").unwrap();
    let load = |name: &str, role: Role| {
        let id = db.create_user(name, role, Some(branch)).unwrap();
        db.get_user(id).unwrap().unwrap()
    };
    Team {
        branch,
        pm: load("Paula", Role::Pm),
        dev: load("Dario", Role::Dev),
        dev2: load("Dana", Role::Dev),
        requester: load("Rui", Role::Requester),
    }
}
