use anyhow::{bail, Result};
use chrono::Utc;

use crate::db::Database;
use crate::policy;
use crate::reports;
use crate::session::Session;

use super::{print_json, user_name};

pub const ROSTER_WEEKS: usize = 12;

pub fn seed(db: &Database, session: &Session, user_ids: &[i64]) -> Result<()> {
    policy::require(
        policy::can_manage_directory(session.role()),
        "only project managers can seed the on-call roster",
    )?;
    if user_ids.is_empty() {
        bail!("Give at least one user id");
    }
    for id in user_ids {
        if db.get_user(*id)?.is_none() {
            bail!("User #{} not found", id);
        }
    }

    let shifts = reports::oncall_rotation(user_ids, Utc::now().date_naive(), ROSTER_WEEKS);
    db.replace_roster(&shifts)?;
    println!(
        "Seeded {} weeks of on-call starting {}",
        shifts.len(),
        shifts.first().map(|s| s.starts_on.to_string()).unwrap_or_default()
    );
    Ok(())
}

pub fn current(db: &Database) -> Result<()> {
    let monday = reports::monday_of(Utc::now().date_naive());
    let users = db.list_users()?;
    match db.list_roster()?.into_iter().find(|s| s.starts_on == monday) {
        Some(shift) => println!("On call this week ({}): {}", monday, user_name(&users, shift.user_id)),
        None => println!("Nobody is on call this week."),
    }
    Ok(())
}

pub fn roster(db: &Database, json: bool) -> Result<()> {
    let shifts = db.list_roster()?;
    if json {
        return print_json(&shifts);
    }
    if shifts.is_empty() {
        println!("No on-call roster. Seed one with 'ticketdesk oncall seed <ids>'.");
        return Ok(());
    }
    let users = db.list_users()?;
    for shift in shifts {
        println!("{}  {}", shift.starts_on, user_name(&users, shift.user_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_team, setup_test_db};

    #[test]
    fn test_seed_replaces_roster() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let pm = Session::new(team.pm.clone());

        seed(&db, &pm, &[team.dev.id, team.dev2.id]).unwrap();
        seed(&db, &pm, &[team.dev.id, team.dev2.id]).unwrap();
        let shifts = db.list_roster().unwrap();
        assert_eq!(shifts.len(), ROSTER_WEEKS);
        assert_eq!(shifts[0].starts_on, reports::monday_of(Utc::now().date_naive()));
        assert_eq!(shifts[1].user_id, team.dev2.id);
        assert!(current(&db).is_ok());
        assert!(roster(&db, false).is_ok());
    }

    #[test]
    fn test_seed_validation() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        assert!(seed(&db, &Session::new(team.dev.clone()), &[team.dev.id]).is_err());
        assert!(seed(&db, &Session::new(team.pm.clone()), &[]).is_err());
        assert!(seed(&db, &Session::new(team.pm.clone()), &[999]).is_err());
        assert!(db.list_roster().unwrap().is_empty());
    }
}
