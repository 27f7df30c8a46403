use crate::db::Database;
use crate::error::{Result, TicketError};
use crate::models::{Role, User};

/// The acting user for one CLI invocation.
///
/// Passed explicitly to every policy check and mutation; nothing looks the
/// current user up from global state.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    user: User,
}

impl Session {
    pub fn new(user: User) -> Self {
        Session { user }
    }

    /// Resolves a user id against the directory.
    pub fn resolve(db: &Database, user_id: i64) -> Result<Self> {
        let user = db
            .get_user(user_id)?
            .ok_or_else(|| TicketError::not_found("User", user_id))?;
        tracing::debug!(user_id, role = %user.role, "session resolved");
        Ok(Session::new(user))
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn user_id(&self) -> i64 {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn branch_id(&self) -> Option<i64> {
        self.user.branch_id
    }

    pub fn is_pm(&self) -> bool {
        self.user.role == Role::Pm
    }
}
