use anyhow::{bail, Result};
use chrono::Utc;

use crate::db::Database;
use crate::lifecycle::{self, NewTicket};
use crate::session::Session;

use super::user_name;

pub fn run(db: &Database, session: &Session, new: NewTicket) -> Result<()> {
    if let Some(branch) = new.branch_id {
        if db.get_branch(branch)?.is_none() {
            bail!("Branch #{} not found", branch);
        }
    }

    let now = Utc::now();
    let directory = db.list_users()?;
    let ready = lifecycle::prepare_ticket(new, session.user(), &directory, now)?;
    let id = db.create_ticket(&ready, session.user_id(), now)?;

    println!("Created ticket #{}: {}", id, ready.title);
    if let Some(assignee) = ready.assignee_id {
        println!("Assigned to {}", user_name(&directory, assignee));
    }
    if let Some(due) = ready.due_at {
        println!("Due: {}", due.format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}
