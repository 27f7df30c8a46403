use anyhow::{bail, Result};

use crate::db::Database;
use crate::models::{Role, UserPatch};
use crate::policy;
use crate::session::Session;

use super::print_json;

pub fn whoami(db: &Database, session: &Session) -> Result<()> {
    let user = session.user();
    println!("#{} {} ({})", user.id, user.name, user.role);
    if let Some(branch) = user.branch_id.map(|b| db.get_branch(b)).transpose()?.flatten() {
        println!("Branch: {}", branch.name);
    }
    Ok(())
}

pub fn user_add(db: &Database, session: &Session, name: &str, role: Role, branch_id: Option<i64>) -> Result<()> {
    policy::require(
        policy::can_manage_directory(session.role()),
        "only project managers can add users",
    )?;
    let id = db.create_user(name, role, branch_id)?;
    tracing::info!(user_id = id, role = %role, "user added");
    println!("Created user #{}: {} ({})", id, name.trim(), role);
    Ok(())
}

pub fn user_edit(db: &Database, session: &Session, id: i64, patch: UserPatch) -> Result<()> {
    policy::require(
        policy::can_manage_directory(session.role()),
        "only project managers can edit users",
    )?;
    if patch.is_empty() {
        bail!("Nothing to change. Pass --name, --role or --branch");
    }
    let user = db.update_user(id, &patch)?;
    println!("Updated user #{}: {} ({})", user.id, user.name, user.role);
    Ok(())
}

/// Project managers see everyone; others see their own branch.
pub fn user_list(db: &Database, session: &Session, json: bool) -> Result<()> {
    let users: Vec<_> = db
        .list_users()?
        .into_iter()
        .filter(|u| policy::can_see_all_branches(session.role()) || u.branch_id == session.branch_id())
        .collect();
    if json {
        return print_json(&users);
    }
    for user in users {
        let branch = user
            .branch_id
            .map(|b| format!("branch #{}", b))
            .unwrap_or_else(|| "-".to_string());
        println!("#{:<4} {:<24} {:10} {}", user.id, user.name, user.role, branch);
    }
    Ok(())
}

pub fn branch_add(db: &Database, session: &Session, name: &str) -> Result<()> {
    policy::require(
        policy::can_manage_directory(session.role()),
        "only project managers can add branches",
    )?;
    let id = db.create_branch(name)?;
    println!("Created branch #{}: {}", id, name.trim());
    Ok(())
}

pub fn branch_list(db: &Database, json: bool) -> Result<()> {
    let branches = db.list_branches()?;
    if json {
        return print_json(&branches);
    }
    if branches.is_empty() {
        println!("No branches.");
    }
    for branch in branches {
        println!("#{:<4} {}", branch.id, branch.name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TicketError;
    use crate::test_support::{seed_team, setup_test_db};

    #[test]
    fn test_directory_is_pm_managed() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let dev = Session::new(team.dev.clone());
        assert!(user_add(&db, &dev, "Eve", Role::Dev, None).is_err());
        assert!(branch_add(&db, &dev, "Braga").is_err());

        let pm = Session::new(team.pm.clone());
        user_add(&db, &pm, "Eve", Role::Dev, Some(team.branch)).unwrap();
        branch_add(&db, &pm, "Braga").unwrap();
        assert!(branch_add(&db, &pm, "Braga").is_err());
        assert_eq!(db.list_users().unwrap().len(), 5);
        assert_eq!(db.list_branches().unwrap().len(), 2);
    }

    #[test]
    fn test_user_edit() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let promote = UserPatch {
            role: Some(Role::Dev),
            ..UserPatch::default()
        };

        let dev = Session::new(team.dev.clone());
        let err = user_edit(&db, &dev, team.requester.id, promote.clone()).unwrap_err();
        assert!(err.downcast_ref::<TicketError>().map_or(false, |e| e.is_unauthorized()));

        let pm = Session::new(team.pm.clone());
        user_edit(&db, &pm, team.requester.id, promote.clone()).unwrap();
        assert_eq!(db.get_user(team.requester.id).unwrap().unwrap().role, Role::Dev);

        let err = user_edit(&db, &pm, 999, promote).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TicketError>(),
            Some(TicketError::NotFound { entity: "User", .. })
        ));
        assert!(user_edit(&db, &pm, team.dev.id, UserPatch::default()).is_err());
    }

    #[test]
    fn test_listing_and_whoami() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let requester = Session::new(team.requester.clone());
        assert!(whoami(&db, &requester).is_ok());
        assert!(user_list(&db, &requester, true).is_ok());
        assert!(branch_list(&db, false).is_ok());
    }
}
