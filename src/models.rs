use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TicketError;

/// Declares a closed enum stored and displayed by its snake_case spelling.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $wire)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = TicketError;

            fn from_str(s: &str) -> Result<Self, TicketError> {
                let wanted = s.trim().to_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| {
                        let valid: Vec<&str> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        TicketError::Validation(format!(
                            "Invalid {} '{}'. Must be one of: {}",
                            $what,
                            s,
                            valid.join(", ")
                        ))
                    })
            }
        }
    };
}

wire_enum! {
    /// Session role. Fixed for the lifetime of a session.
    Role, "role" {
        Requester => "requester",
        Dev => "dev",
        Pm => "pm",
    }
}

wire_enum! {
    TicketType, "type" {
        Support => "support",
        Feature => "feature",
    }
}

wire_enum! {
    Priority, "priority" {
        Critical => "critical",
        High => "high",
        Normal => "normal",
        Low => "low",
    }
}

impl Priority {
    /// Sort weight, higher is more urgent.
    pub fn weight(&self) -> i32 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Normal => 2,
            Priority::Low => 1,
        }
    }
}

wire_enum! {
    /// Workflow column. Declaration order is workflow order.
    Status, "status" {
        Backlog => "backlog",
        InProgress => "in_progress",
        Review => "review",
        Done => "done",
    }
}

impl Status {
    /// The single forward step out of this status, if any.
    pub fn next(&self) -> Option<Status> {
        match self {
            Status::Backlog => Some(Status::InProgress),
            Status::InProgress => Some(Status::Review),
            Status::Review => Some(Status::Done),
            Status::Done => None,
        }
    }

    /// Upper-cased, space separated form used in audit comments ("IN PROGRESS").
    pub fn label(&self) -> String {
        self.as_str().replace('_', " ").to_uppercase()
    }

    /// Tickets someone is actively working on.
    pub fn is_active(&self) -> bool {
        matches!(self, Status::InProgress | Status::Review)
    }
}

wire_enum! {
    ActivityType, "activity type" {
        Coding => "coding",
        Testing => "testing",
        CodeReview => "code_review",
        Meeting => "meeting",
        Documentation => "documentation",
        Debugging => "debugging",
        Deployment => "deployment",
        Planning => "planning",
        Support => "support",
        Other => "other",
    }
}

wire_enum! {
    /// Audit events recorded as system comments.
    SystemEvent, "system event" {
        StatusChange => "status_change",
        Reopened => "reopened",
        Reassigned => "reassigned",
    }
}

wire_enum! {
    NotificationKind, "notification type" {
        TicketAssigned => "ticket_assigned",
        TicketUpdated => "ticket_updated",
        TicketCommented => "ticket_commented",
        TicketReopened => "ticket_reopened",
        TicketStatusChanged => "ticket_status_changed",
        TicketReassigned => "ticket_reassigned",
        Mention => "mention",
        DueDateReminder => "due_date_reminder",
        SlaAlert => "sla_alert",
    }
}

wire_enum! {
    Channel, "channel" {
        Email => "email",
        App => "app",
    }
}

wire_enum! {
    DigestFrequency, "digest frequency" {
        Off => "none",
        Daily => "daily",
        Weekly => "weekly",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub role: Role,
    pub branch_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Directory edits to a user. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub branch_id: Option<i64>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.role.is_none() && self.branch_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    pub priority: Priority,
    pub status: Status,
    pub reporter_id: i64,
    pub assignee_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub sla_hours: Option<f64>,
    pub estimated_hours: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Target date used for overdue checks: the planned end date, else the legacy due date.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.end_date.or(self.due_at)
    }
}

/// Whether a comment was written by a person or generated by a ticket change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    User,
    System(SystemEvent),
}

impl CommentKind {
    pub fn is_system(&self) -> bool {
        matches!(self, CommentKind::System(_))
    }

    /// Storage spelling: "user" or the system event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentKind::User => "user",
            CommentKind::System(event) => event.as_str(),
        }
    }

    pub fn from_stored(stored: Option<&str>, body: &str) -> CommentKind {
        match stored {
            Some("user") => CommentKind::User,
            Some(other) => other
                .parse::<SystemEvent>()
                .map(CommentKind::System)
                .unwrap_or_else(|_| CommentKind::sniff(body)),
            None => CommentKind::sniff(body),
        }
    }

    /// Classifies untagged comment bodies by the legacy substring convention.
    pub fn sniff(body: &str) -> CommentKind {
        if body.contains("Status changed") {
            CommentKind::System(SystemEvent::StatusChange)
        } else if body.contains("REOPENED") {
            CommentKind::System(SystemEvent::Reopened)
        } else if body.contains("assigned") {
            // also catches "reassigned"
            CommentKind::System(SystemEvent::Reassigned)
        } else {
            CommentKind::User
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub ticket_id: i64,
    /// None for comments written by the system actor.
    pub user_id: Option<i64>,
    pub kind: CommentKind,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: i64,
    pub ticket_id: i64,
    pub user_id: i64,
    pub hours: f64,
    pub activity_type: Option<ActivityType>,
    pub is_billable: bool,
    pub description: Option<String>,
    pub logged_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTimer {
    pub user_id: i64,
    pub ticket_id: i64,
    pub activity_type: Option<ActivityType>,
    pub description: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityReport {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub minutes_worked: i64,
    pub activity_type: ActivityType,
    pub ticket_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub feature_worked: Option<String>,
    pub description: String,
    pub accomplishments: Option<String>,
    pub blockers: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub ticket_id: Option<i64>,
    pub related_user_id: Option<i64>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Per-channel opt-ins. Kinds without a flag here are always delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFlags {
    pub ticket_assigned: bool,
    pub ticket_updated: bool,
    pub ticket_commented: bool,
    pub ticket_reopened: bool,
    pub due_date_reminder: bool,
    pub sla_alert: bool,
}

impl Default for ChannelFlags {
    fn default() -> Self {
        ChannelFlags {
            ticket_assigned: true,
            ticket_updated: true,
            ticket_commented: true,
            ticket_reopened: true,
            due_date_reminder: true,
            sla_alert: true,
        }
    }
}

impl ChannelFlags {
    pub fn flag(&self, kind: NotificationKind) -> Option<bool> {
        match kind {
            NotificationKind::TicketAssigned => Some(self.ticket_assigned),
            NotificationKind::TicketUpdated => Some(self.ticket_updated),
            NotificationKind::TicketCommented => Some(self.ticket_commented),
            NotificationKind::TicketReopened => Some(self.ticket_reopened),
            NotificationKind::DueDateReminder => Some(self.due_date_reminder),
            NotificationKind::SlaAlert => Some(self.sla_alert),
            _ => None,
        }
    }

    pub fn flag_mut(&mut self, kind: NotificationKind) -> Option<&mut bool> {
        match kind {
            NotificationKind::TicketAssigned => Some(&mut self.ticket_assigned),
            NotificationKind::TicketUpdated => Some(&mut self.ticket_updated),
            NotificationKind::TicketCommented => Some(&mut self.ticket_commented),
            NotificationKind::TicketReopened => Some(&mut self.ticket_reopened),
            NotificationKind::DueDateReminder => Some(&mut self.due_date_reminder),
            NotificationKind::SlaAlert => Some(&mut self.sla_alert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: i64,
    pub email: ChannelFlags,
    pub app: ChannelFlags,
    pub digest_frequency: DigestFrequency,
    pub quiet_hours_start: Option<u8>,
    pub quiet_hours_end: Option<u8>,
}

impl NotificationPreferences {
    pub fn defaults_for(user_id: i64) -> Self {
        NotificationPreferences {
            user_id,
            email: ChannelFlags::default(),
            app: ChannelFlags::default(),
            digest_frequency: DigestFrequency::Off,
            quiet_hours_start: None,
            quiet_hours_end: None,
        }
    }

    pub fn channel(&self, channel: Channel) -> &ChannelFlags {
        match channel {
            Channel::Email => &self.email,
            Channel::App => &self.app,
        }
    }

    pub fn channel_mut(&mut self, channel: Channel) -> &mut ChannelFlags {
        match channel {
            Channel::Email => &mut self.email,
            Channel::App => &mut self.app,
        }
    }

    pub fn allows(&self, channel: Channel, kind: NotificationKind) -> bool {
        self.channel(channel).flag(kind).unwrap_or(true)
    }
}

/// One week of on-call duty, starting on a Monday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OncallShift {
    pub starts_on: NaiveDate,
    pub user_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_and_label() {
        assert_eq!("in_progress".parse::<Status>().unwrap(), Status::InProgress);
        assert_eq!(" Done ".parse::<Status>().unwrap(), Status::Done);
        assert_eq!(Status::InProgress.label(), "IN PROGRESS");
        assert_eq!(Status::Review.label(), "REVIEW");
    }

    #[test]
    fn test_invalid_priority_message() {
        let err = "urgent".parse::<Priority>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Invalid priority 'urgent'"));
        assert!(msg.contains("critical, high, normal, low"));
    }

    #[test]
    fn test_status_next_chain() {
        assert_eq!(Status::Backlog.next(), Some(Status::InProgress));
        assert_eq!(Status::InProgress.next(), Some(Status::Review));
        assert_eq!(Status::Review.next(), Some(Status::Done));
        assert_eq!(Status::Done.next(), None);
    }

    #[test]
    fn test_digest_off_spelled_none() {
        assert_eq!(DigestFrequency::Off.as_str(), "none");
        assert_eq!("none".parse::<DigestFrequency>().unwrap(), DigestFrequency::Off);
    }

    #[test]
    fn test_comment_sniffing_legacy_bodies() {
        assert_eq!(
            CommentKind::sniff("Status changed to: REVIEW"),
            CommentKind::System(SystemEvent::StatusChange)
        );
        assert_eq!(
            CommentKind::sniff("TICKET REOPENED by Ana\nReason: x"),
            CommentKind::System(SystemEvent::Reopened)
        );
        assert_eq!(
            CommentKind::sniff("Ticket reassigned to Bo by Ana"),
            CommentKind::System(SystemEvent::Reassigned)
        );
        assert_eq!(CommentKind::sniff("looks good to me"), CommentKind::User);
    }

    #[test]
    fn test_stored_kind_wins_over_body() {
        // a person quoting the audit text is still a user comment
        let kind = CommentKind::from_stored(Some("user"), "Status changed to: DONE?");
        assert_eq!(kind, CommentKind::User);
        let kind = CommentKind::from_stored(None, "Status changed to: DONE");
        assert!(kind.is_system());
    }

    #[test]
    fn test_preferences_gate_only_flagged_kinds() {
        let mut prefs = NotificationPreferences::defaults_for(1);
        prefs.app.ticket_commented = false;
        assert!(!prefs.allows(Channel::App, NotificationKind::TicketCommented));
        assert!(prefs.allows(Channel::Email, NotificationKind::TicketCommented));
        assert!(prefs.allows(Channel::App, NotificationKind::TicketStatusChanged));
    }

    #[test]
    fn test_ticket_serializes_type_field() {
        let now = Utc::now();
        let ticket = Ticket {
            id: 1,
            title: "Printer".to_string(),
            description: None,
            ticket_type: TicketType::Support,
            priority: Priority::High,
            status: Status::Backlog,
            reporter_id: 1,
            assignee_id: None,
            branch_id: None,
            start_date: None,
            end_date: None,
            due_at: None,
            completed_at: None,
            sla_hours: None,
            estimated_hours: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["type"], "support");
        assert_eq!(json["status"], "backlog");
    }
}
