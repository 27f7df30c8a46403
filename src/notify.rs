//! In-app notification planning.
//!
//! Ticket changes produce [`NotificationDraft`]s; the database decides at
//! write time whether each recipient's preferences let the draft through.

use crate::error::{Result, TicketError};
use crate::models::{Channel, NotificationKind, NotificationPreferences, Ticket};

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub ticket_id: Option<i64>,
    pub related_user_id: Option<i64>,
}

fn recipients(candidates: &[Option<i64>], actor_id: Option<i64>) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::new();
    for id in candidates.iter().flatten() {
        if Some(*id) != actor_id && !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

fn draft(
    user_id: i64,
    kind: NotificationKind,
    title: &str,
    message: String,
    ticket: &Ticket,
    actor_id: Option<i64>,
) -> NotificationDraft {
    NotificationDraft {
        user_id,
        kind,
        title: title.to_string(),
        message,
        ticket_id: Some(ticket.id),
        related_user_id: actor_id,
    }
}

pub fn status_changed(ticket: &Ticket, actor_id: Option<i64>) -> Vec<NotificationDraft> {
    recipients(&[ticket.assignee_id, Some(ticket.reporter_id)], actor_id)
        .into_iter()
        .map(|uid| {
            draft(
                uid,
                NotificationKind::TicketStatusChanged,
                "Status Updated",
                format!("Ticket #{} status changed to {}", ticket.id, ticket.status),
                ticket,
                actor_id,
            )
        })
        .collect()
}

/// Only the incoming assignee hears about an assignment, and only when it changed.
pub fn assigned(ticket: &Ticket, previous: Option<i64>, actor_id: Option<i64>) -> Vec<NotificationDraft> {
    if ticket.assignee_id == previous {
        return Vec::new();
    }
    let (kind, title) = if previous.is_some() {
        (NotificationKind::TicketReassigned, "Ticket Reassigned")
    } else {
        (NotificationKind::TicketAssigned, "Ticket Assigned")
    };
    recipients(&[ticket.assignee_id], actor_id)
        .into_iter()
        .map(|uid| {
            draft(
                uid,
                kind,
                title,
                format!("You have been assigned to ticket #{}: {}", ticket.id, ticket.title),
                ticket,
                actor_id,
            )
        })
        .collect()
}

pub fn reopened(ticket: &Ticket, actor_id: Option<i64>) -> Vec<NotificationDraft> {
    recipients(&[ticket.assignee_id], actor_id)
        .into_iter()
        .map(|uid| {
            draft(
                uid,
                NotificationKind::TicketReopened,
                "Ticket Reopened",
                format!("Ticket #{} has been reopened", ticket.id),
                ticket,
                actor_id,
            )
        })
        .collect()
}

pub fn commented(ticket: &Ticket, actor_id: Option<i64>) -> Vec<NotificationDraft> {
    recipients(&[ticket.assignee_id, Some(ticket.reporter_id)], actor_id)
        .into_iter()
        .map(|uid| {
            draft(
                uid,
                NotificationKind::TicketCommented,
                "New Comment",
                format!("New comment on ticket #{}", ticket.id),
                ticket,
                actor_id,
            )
        })
        .collect()
}

pub fn updated(ticket: &Ticket, actor_id: Option<i64>) -> Vec<NotificationDraft> {
    recipients(&[ticket.assignee_id, Some(ticket.reporter_id)], actor_id)
        .into_iter()
        .map(|uid| {
            draft(
                uid,
                NotificationKind::TicketUpdated,
                "Ticket Updated",
                format!("Ticket #{} was updated", ticket.id),
                ticket,
                actor_id,
            )
        })
        .collect()
}

/// SLA warning for the assignee, or the reporter when nobody is assigned.
pub fn sla_alert(ticket: &Ticket, hours_remaining: f64, is_overdue: bool) -> NotificationDraft {
    let message = if is_overdue {
        format!("Ticket #{} is {:.1}h past its due time", ticket.id, hours_remaining)
    } else {
        format!("Ticket #{} is due in {:.1}h", ticket.id, hours_remaining)
    };
    NotificationDraft {
        user_id: ticket.assignee_id.unwrap_or(ticket.reporter_id),
        kind: NotificationKind::SlaAlert,
        title: "SLA Alert".to_string(),
        message,
        ticket_id: Some(ticket.id),
        related_user_id: None,
    }
}

/// In-app delivery gate.
pub fn deliverable(prefs: &NotificationPreferences, kind: NotificationKind) -> bool {
    prefs.allows(Channel::App, kind)
}

pub fn validate_quiet_hour(hour: i64) -> Result<u8> {
    if (0..=23).contains(&hour) {
        Ok(hour as u8)
    } else {
        Err(TicketError::Validation(format!(
            "Quiet hour must be between 0 and 23, got {}",
            hour
        )))
    }
}

/// Whether `hour` falls inside the quiet window. Windows may wrap past midnight.
pub fn is_quiet_hour(prefs: &NotificationPreferences, hour: u8) -> bool {
    match (prefs.quiet_hours_start, prefs.quiet_hours_end) {
        (Some(start), Some(end)) if start <= end => hour >= start && hour < end,
        (Some(start), Some(end)) => hour >= start || hour < end,
        _ => false,
    }
}
