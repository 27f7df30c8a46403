use anyhow::Result;
use chrono::Utc;

use crate::db::Database;
use crate::lifecycle::{self, TicketPatch};
use crate::session::Session;

pub fn run(db: &Database, session: &Session, id: i64, patch: TicketPatch) -> Result<()> {
    let ticket = db.require_ticket(id)?;
    let now = Utc::now();
    let change = lifecycle::edit(&ticket, patch, session.user(), now)?;
    db.apply_change(&change, now)?;
    println!("Updated ticket #{}", id);
    Ok(())
}
