use anyhow::Result;

use crate::db::Database;
use crate::lifecycle;
use crate::session::Session;

use super::load_visible_ticket;

pub fn run(db: &Database, session: &Session, id: i64, text: &str) -> Result<()> {
    let ticket = load_visible_ticket(db, session, id)?;
    let change = lifecycle::comment(&ticket, text, session.user())?;
    db.apply_change(&change, chrono::Utc::now())?;
    println!("Added comment to ticket #{}", id);
    Ok(())
}
