//! Per-role projections over the ticket collection.
//!
//! Nothing here mutates; each function returns the matching tickets in input order.

use std::str::FromStr;

use crate::error::TicketError;
use crate::models::{Priority, Role, Status, Ticket, TicketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssigneeFilter {
    Any,
    Me,
    Unassigned,
    User(i64),
}

impl FromStr for AssigneeFilter {
    type Err = TicketError;

    fn from_str(s: &str) -> Result<Self, TicketError> {
        match s.trim().to_lowercase().as_str() {
            "all" | "any" => Ok(AssigneeFilter::Any),
            "me" | "mine" => Ok(AssigneeFilter::Me),
            "unassigned" | "none" => Ok(AssigneeFilter::Unassigned),
            other => other.parse::<i64>().map(AssigneeFilter::User).map_err(|_| {
                TicketError::Validation(format!(
                    "Invalid assignee filter '{}'. Use all, me, unassigned or a user id",
                    s
                ))
            }),
        }
    }
}

/// Explicit narrowing requested by the viewer. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketFilter {
    /// `None` means the role's default lens.
    pub assignee: Option<AssigneeFilter>,
    pub branch_id: Option<i64>,
    pub ticket_type: Option<TicketType>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
}

impl TicketFilter {
    fn matches_fields(&self, ticket: &Ticket) -> bool {
        self.ticket_type.map_or(true, |t| ticket.ticket_type == t)
            && self.priority.map_or(true, |p| ticket.priority == p)
            && self.status.map_or(true, |s| ticket.status == s)
    }
}

fn matches_assignee(filter: AssigneeFilter, ticket: &Ticket, actor_id: i64) -> bool {
    match filter {
        AssigneeFilter::Any => true,
        AssigneeFilter::Me => ticket.assignee_id == Some(actor_id),
        AssigneeFilter::Unassigned => ticket.assignee_id.is_none(),
        AssigneeFilter::User(id) => ticket.assignee_id == Some(id),
    }
}

/// The board view for `role`.
///
/// * pm: everything, with every filter ANDed.
/// * dev: own tickets unless the filter asks for `all`; "all" is not branch scoped.
/// * requester: tickets of their branch, narrowed by type, priority and status only.
pub fn visible_tickets(
    role: Role,
    tickets: &[Ticket],
    actor_id: i64,
    branch_id: Option<i64>,
    filter: &TicketFilter,
) -> Vec<Ticket> {
    let visible: Vec<Ticket> = match role {
        Role::Pm | Role::Dev => {
            let default = if role == Role::Pm {
                AssigneeFilter::Any
            } else {
                AssigneeFilter::Me
            };
            let assignee = filter.assignee.unwrap_or(default);
            tickets
                .iter()
                .filter(|t| matches_assignee(assignee, t, actor_id))
                .filter(|t| filter.branch_id.map_or(true, |b| t.branch_id == Some(b)))
                .filter(|t| filter.matches_fields(t))
                .cloned()
                .collect()
        }
        Role::Requester => my_branch_tickets(tickets, branch_id)
            .into_iter()
            .filter(|t| filter.matches_fields(t))
            .collect(),
    };
    tracing::debug!(role = %role, total = tickets.len(), visible = visible.len(), "tickets filtered");
    visible
}

/// Requester board lens: tickets filed under their branch.
pub fn my_branch_tickets(tickets: &[Ticket], branch_id: Option<i64>) -> Vec<Ticket> {
    tickets
        .iter()
        .filter(|t| t.branch_id == branch_id)
        .cloned()
        .collect()
}

/// Requester dashboard lens: whatever is being worked on right now.
pub fn my_active_tickets(tickets: &[Ticket]) -> Vec<Ticket> {
    tickets
        .iter()
        .filter(|t| t.status.is_active())
        .cloned()
        .collect()
}
