//! Ticket lifecycle: status transitions, reopen, assignment and edits.
//!
//! Every operation here is pure. It checks policy and input, then returns a
//! [`TicketChange`] describing the new ticket row, the audit comment to post
//! and the notifications to send. `Database::apply_change` persists all three
//! in one transaction.
//!
//! Workflow: `backlog -> in_progress -> review -> done`, plus `done -> backlog`
//! through [`reopen`]. Nothing else is a legal move.

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, TicketError};
use crate::models::{CommentKind, Priority, Role, Status, SystemEvent, Ticket, TicketType, User};
use crate::notify::{self, NotificationDraft};
use crate::policy;

#[derive(Debug, Clone, Copy)]
pub enum Actor<'a> {
    User(&'a User),
    /// Automated transitions. Bypasses role checks but not the transition table.
    System,
}

impl Actor<'_> {
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Actor::User(user) => Some(user.id),
            Actor::System => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentDraft {
    pub author_id: Option<i64>,
    pub kind: CommentKind,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TicketChange {
    pub ticket: Ticket,
    /// False when the request left the ticket as it was.
    pub changed: bool,
    pub comment: Option<CommentDraft>,
    pub notifications: Vec<NotificationDraft>,
}

impl TicketChange {
    fn unchanged(ticket: &Ticket) -> Self {
        TicketChange {
            ticket: ticket.clone(),
            changed: false,
            comment: None,
            notifications: Vec::new(),
        }
    }
}

/// Moves a ticket one step forward.
///
/// Re-requesting the current status is a no-op for anyone allowed to hold
/// the ticket there, so pressing "done" twice never stamps a second comment.
pub fn advance(ticket: &Ticket, requested: Status, actor: Actor<'_>, now: DateTime<Utc>) -> Result<TicketChange> {
    if let Actor::User(user) = actor {
        let holds_ticket = user.role == Role::Dev && ticket.assignee_id == Some(user.id);
        if requested == ticket.status && holds_ticket {
            return Ok(TicketChange::unchanged(ticket));
        }
        policy::require(
            policy::can_change_status(user.role, ticket, user.id),
            "only the assigned developer can change the status of an open ticket",
        )?;
    } else if requested == ticket.status {
        return Ok(TicketChange::unchanged(ticket));
    }

    if ticket.status.next() != Some(requested) {
        return Err(TicketError::InvalidTransition {
            from: ticket.status,
            to: requested,
        });
    }

    let mut next = ticket.clone();
    next.status = requested;
    next.updated_at = now;
    next.completed_at = if requested == Status::Done { Some(now) } else { None };

    let notifications = notify::status_changed(&next, actor.user_id());
    Ok(TicketChange {
        ticket: next,
        changed: true,
        comment: Some(CommentDraft {
            author_id: actor.user_id(),
            kind: CommentKind::System(SystemEvent::StatusChange),
            body: format!("Status changed to: {}", requested.label()),
        }),
        notifications,
    })
}

/// Sends a finished ticket back to the backlog. The reason is checked before the role.
pub fn reopen(ticket: &Ticket, reason: &str, actor: &User, now: DateTime<Utc>) -> Result<TicketChange> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(TicketError::Validation(
            "A reason is required to reopen a ticket".to_string(),
        ));
    }
    policy::require(
        policy::can_reopen(actor.role, ticket, actor.id),
        "only the reporter can reopen a completed ticket",
    )?;

    let mut next = ticket.clone();
    next.status = Status::Backlog;
    next.completed_at = None;
    next.updated_at = now;

    let notifications = notify::reopened(&next, Some(actor.id));
    Ok(TicketChange {
        ticket: next,
        changed: true,
        comment: Some(CommentDraft {
            author_id: Some(actor.id),
            kind: CommentKind::System(SystemEvent::Reopened),
            body: format!("TICKET REOPENED by {}\nReason: {}", actor.name, reason),
        }),
        notifications,
    })
}

/// Planning dates that may accompany an assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Schedule {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Assigns or reassigns a ticket to a developer from `directory`.
pub fn assign(
    ticket: &Ticket,
    assignee_id: i64,
    directory: &[User],
    actor: &User,
    schedule: Schedule,
    now: DateTime<Utc>,
) -> Result<TicketChange> {
    policy::require(policy::can_assign(actor.role), "only a project manager can assign tickets")?;
    let assignee = resolve_dev(assignee_id, directory)?;
    check_dates(
        schedule.start_date.or(ticket.start_date),
        schedule.end_date.or(ticket.end_date),
    )?;

    let mut next = ticket.clone();
    next.assignee_id = Some(assignee.id);
    if schedule.start_date.is_some() {
        next.start_date = schedule.start_date;
    }
    if schedule.end_date.is_some() {
        next.end_date = schedule.end_date;
    }
    next.updated_at = now;

    let verb = match ticket.assignee_id {
        Some(previous) if previous != assignee.id => "reassigned",
        _ => "assigned",
    };
    let mut body = format!("Ticket {} to {} by {}", verb, assignee.name, actor.name);
    if let Some(start) = schedule.start_date {
        body.push_str(&format!("\nStart: {}", start.format("%Y-%m-%d")));
    }
    if let Some(end) = schedule.end_date {
        body.push_str(&format!("\nTarget: {}", end.format("%Y-%m-%d")));
    }

    let notifications = notify::assigned(&next, ticket.assignee_id, Some(actor.id));
    Ok(TicketChange {
        ticket: next,
        changed: true,
        comment: Some(CommentDraft {
            author_id: Some(actor.id),
            kind: CommentKind::System(SystemEvent::Reassigned),
            body,
        }),
        notifications,
    })
}

/// A person's comment. The ticket row itself is left alone.
pub fn comment(ticket: &Ticket, body: &str, actor: &User) -> Result<TicketChange> {
    if body.trim().is_empty() {
        return Err(TicketError::Validation("Comment cannot be empty".to_string()));
    }
    Ok(TicketChange {
        ticket: ticket.clone(),
        changed: false,
        comment: Some(CommentDraft {
            author_id: Some(actor.id),
            kind: CommentKind::User,
            body: body.to_string(),
        }),
        notifications: notify::commented(ticket, Some(actor.id)),
    })
}

/// Field edits that never touch status or assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub ticket_type: Option<TicketType>,
    pub priority: Option<Priority>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub sla_hours: Option<f64>,
    pub estimated_hours: Option<f64>,
}

impl TicketPatch {
    pub fn is_empty(&self) -> bool {
        *self == TicketPatch::default()
    }
}

pub fn edit(ticket: &Ticket, patch: TicketPatch, actor: &User, now: DateTime<Utc>) -> Result<TicketChange> {
    if patch.is_empty() {
        return Err(TicketError::Validation(
            "Nothing to update. Use --title, --description, --priority or a date option.".to_string(),
        ));
    }
    policy::require(
        policy::can_edit_details(actor.role, ticket, actor.id),
        "only the reporter, the assignee or a project manager can edit a ticket",
    )?;

    let mut next = ticket.clone();
    if let Some(title) = patch.title {
        next.title = validate_title(&title)?;
    }
    if let Some(description) = patch.description {
        next.description = Some(description);
    }
    if let Some(ticket_type) = patch.ticket_type {
        next.ticket_type = ticket_type;
    }
    if let Some(priority) = patch.priority {
        next.priority = priority;
    }
    if patch.start_date.is_some() {
        next.start_date = patch.start_date;
    }
    if patch.end_date.is_some() {
        next.end_date = patch.end_date;
    }
    if patch.due_at.is_some() {
        next.due_at = patch.due_at;
    }
    if let Some(hours) = patch.sla_hours {
        next.sla_hours = Some(validate_budget("SLA hours", hours)?);
    }
    if let Some(hours) = patch.estimated_hours {
        next.estimated_hours = Some(validate_budget("Estimated hours", hours)?);
    }
    check_dates(next.start_date, next.end_date)?;
    next.updated_at = now;

    let notifications = notify::updated(&next, Some(actor.id));
    Ok(TicketChange {
        ticket: next,
        changed: true,
        comment: None,
        notifications,
    })
}

/// Input for a ticket that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTicket {
    pub title: String,
    pub description: Option<String>,
    pub ticket_type: TicketType,
    pub priority: Priority,
    pub branch_id: Option<i64>,
    pub assignee_id: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub sla_hours: Option<f64>,
    pub estimated_hours: Option<f64>,
}

impl NewTicket {
    pub fn new(title: &str, ticket_type: TicketType, priority: Priority) -> Self {
        NewTicket {
            title: title.to_string(),
            description: None,
            ticket_type,
            priority,
            branch_id: None,
            assignee_id: None,
            start_date: None,
            end_date: None,
            due_at: None,
            sla_hours: None,
            estimated_hours: None,
        }
    }
}

/// Validates a new ticket for `actor` and fills in defaults.
///
/// The branch defaults to the actor's own. With an SLA and no explicit due
/// time, the ticket falls due `sla_hours` after `now`.
pub fn prepare_ticket(mut new: NewTicket, actor: &User, directory: &[User], now: DateTime<Utc>) -> Result<NewTicket> {
    policy::require(policy::can_create_ticket(actor.role), "create tickets")?;
    new.title = validate_title(&new.title)?;

    if new.branch_id.is_none() {
        new.branch_id = actor.branch_id;
    }
    policy::require(
        policy::can_file_for_branch(actor.role, actor.branch_id, new.branch_id),
        "requesters can only file tickets for their own branch",
    )?;

    if let Some(assignee_id) = new.assignee_id {
        policy::require(policy::can_assign(actor.role), "only a project manager can assign tickets")?;
        resolve_dev(assignee_id, directory)?;
    }

    if let Some(hours) = new.sla_hours {
        validate_budget("SLA hours", hours)?;
        if new.due_at.is_none() {
            let due = Duration::try_milliseconds((hours * 3_600_000.0) as i64)
                .and_then(|offset| now.checked_add_signed(offset))
                .ok_or_else(|| TicketError::Validation("SLA hours out of range".to_string()))?;
            new.due_at = Some(due);
        }
    }
    if let Some(hours) = new.estimated_hours {
        validate_budget("Estimated hours", hours)?;
    }
    check_dates(new.start_date, new.end_date)?;
    Ok(new)
}

fn resolve_dev(assignee_id: i64, directory: &[User]) -> Result<&User> {
    directory
        .iter()
        .find(|u| u.id == assignee_id && u.role == Role::Dev)
        .ok_or_else(|| {
            TicketError::Validation(format!("User #{} is not a developer", assignee_id))
        })
}

fn validate_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(TicketError::Validation("Title cannot be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

fn validate_budget(what: &str, hours: f64) -> Result<f64> {
    if hours.is_finite() && hours > 0.0 {
        Ok(hours)
    } else {
        Err(TicketError::Validation(format!("{} must be positive", what)))
    }
}

fn check_dates(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<()> {
    match (start, end) {
        (Some(s), Some(e)) if e < s => Err(TicketError::Validation(
            "End date cannot be before start date".to_string(),
        )),
        _ => Ok(()),
    }
}
