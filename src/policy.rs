//! Role policy: pure predicates deciding who may do what to a ticket.
//!
//! Every mutation in the crate consults these before touching storage, and
//! `show` uses [`available_actions`] to list what the viewer can do next.

use crate::error::{Result, TicketError};
use crate::models::{ActivityReport, Role, Status, Ticket, TimeEntry};

/// Quick status changes belong to the assigned dev until the ticket is done.
pub fn can_change_status(role: Role, ticket: &Ticket, acting_user_id: i64) -> bool {
    role == Role::Dev && ticket.assignee_id == Some(acting_user_id) && ticket.status != Status::Done
}

pub fn can_reopen(role: Role, ticket: &Ticket, acting_user_id: i64) -> bool {
    role == Role::Requester && ticket.reporter_id == acting_user_id && ticket.status == Status::Done
}

pub fn can_assign(role: Role) -> bool {
    role == Role::Pm
}

pub fn can_reassign(role: Role) -> bool {
    can_assign(role)
}

pub fn can_create_ticket(_role: Role) -> bool {
    true
}

pub fn can_see_all_branches(role: Role) -> bool {
    role == Role::Pm
}

/// Requesters only open tickets of their branch or ones they filed.
pub fn can_view_ticket(role: Role, ticket: &Ticket, acting_user_id: i64, branch_id: Option<i64>) -> bool {
    match role {
        Role::Pm | Role::Dev => true,
        Role::Requester => ticket.reporter_id == acting_user_id || ticket.branch_id == branch_id,
    }
}

/// Requesters file tickets for their own branch only.
pub fn can_file_for_branch(role: Role, own_branch: Option<i64>, target_branch: Option<i64>) -> bool {
    match role {
        Role::Requester => own_branch == target_branch,
        Role::Dev | Role::Pm => true,
    }
}

/// Editing title, description, priority and planning fields.
pub fn can_edit_details(role: Role, ticket: &Ticket, acting_user_id: i64) -> bool {
    role == Role::Pm || ticket.reporter_id == acting_user_id || ticket.assignee_id == Some(acting_user_id)
}

pub fn can_log_time(role: Role, ticket: &Ticket, acting_user_id: i64) -> bool {
    match role {
        Role::Pm => true,
        Role::Dev => ticket.assignee_id == Some(acting_user_id),
        Role::Requester => false,
    }
}

pub fn can_edit_time_entry(role: Role, entry: &TimeEntry, acting_user_id: i64) -> bool {
    role == Role::Pm || entry.user_id == acting_user_id
}

pub fn can_view_time_summary(role: Role) -> bool {
    role == Role::Pm
}

pub fn can_view_user_stats(role: Role, subject_id: i64, acting_user_id: i64) -> bool {
    role == Role::Pm || subject_id == acting_user_id
}

/// Users, branches and the on-call roster.
pub fn can_manage_directory(role: Role) -> bool {
    role == Role::Pm
}

pub fn can_view_activity_report(role: Role, report: &ActivityReport, acting_user_id: i64) -> bool {
    role == Role::Pm || report.user_id == acting_user_id
}

pub fn can_edit_activity_report(report: &ActivityReport, acting_user_id: i64) -> bool {
    report.user_id == acting_user_id
}

pub fn can_set_report_branch(role: Role) -> bool {
    role == Role::Pm
}

pub fn can_send_sla_alerts(role: Role) -> bool {
    role == Role::Pm
}

/// Turns a failed predicate into `Unauthorized`, logging the denial.
pub fn require(allowed: bool, action: &str) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        tracing::warn!(action, "action denied by role policy");
        Err(TicketError::Unauthorized(action.to_string()))
    }
}

/// Something the viewer may do to a ticket right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Advance(Status),
    Reopen,
    Assign,
    LogTime,
    Comment,
}

impl Action {
    pub fn describe(&self) -> String {
        match self {
            Action::Advance(to) => format!("advance to {}", to),
            Action::Reopen => "reopen".to_string(),
            Action::Assign => "assign".to_string(),
            Action::LogTime => "log time".to_string(),
            Action::Comment => "comment".to_string(),
        }
    }
}

pub fn available_actions(role: Role, ticket: &Ticket, acting_user_id: i64) -> Vec<Action> {
    let mut actions = Vec::new();
    if can_change_status(role, ticket, acting_user_id) {
        if let Some(next) = ticket.status.next() {
            actions.push(Action::Advance(next));
        }
    }
    if can_reopen(role, ticket, acting_user_id) {
        actions.push(Action::Reopen);
    }
    if can_assign(role) {
        actions.push(Action::Assign);
    }
    if can_log_time(role, ticket, acting_user_id) {
        actions.push(Action::LogTime);
    }
    actions.push(Action::Comment);
    actions
}
