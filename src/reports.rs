//! Weekly, SLA, standup and dashboard aggregations.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::metrics;
use crate::models::{OncallShift, Role, Status, Ticket, TicketType, User};
use crate::session::Session;
use crate::visibility;

pub const SLA_WARNING_HOURS: i64 = 4;
pub const BLOCKER_AFTER_DAYS: i64 = 2;

pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn user_name(users: &[User], id: i64) -> Option<String> {
    users.iter().find(|u| u.id == id).map(|u| u.name.clone())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyReport {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub tickets_opened: usize,
    pub tickets_closed: usize,
    pub features_completed: usize,
    pub support_mttr_hours: f64,
    pub feature_lead_time_hours: f64,
    pub oncall_user: String,
}

fn mean_turnaround(done: &[&Ticket]) -> f64 {
    if done.is_empty() {
        return 0.0;
    }
    let total: f64 = done
        .iter()
        .filter_map(|t| t.completed_at.map(|c| metrics::elapsed_hours_since(t.created_at, c)))
        .sum();
    total / done.len() as f64
}

/// Throughput for the Monday-to-Sunday week starting at `week_start`.
pub fn weekly_report(tickets: &[Ticket], roster: &[OncallShift], users: &[User], week_start: NaiveDate) -> WeeklyReport {
    let week_start = monday_of(week_start);
    let from = midnight(week_start);
    let to = from + Duration::days(7);
    let in_week = |at: DateTime<Utc>| at >= from && at < to;

    let finished = |kind: TicketType| -> Vec<&Ticket> {
        tickets
            .iter()
            .filter(|t| t.ticket_type == kind && t.status == Status::Done)
            .filter(|t| t.completed_at.map_or(false, in_week))
            .collect()
    };
    let support_done = finished(TicketType::Support);
    let features_done = finished(TicketType::Feature);

    let oncall_user = roster
        .iter()
        .find(|shift| shift.starts_on == week_start)
        .and_then(|shift| user_name(users, shift.user_id))
        .unwrap_or_else(|| "None".to_string());

    WeeklyReport {
        week_start,
        week_end: week_start + Duration::days(6),
        tickets_opened: tickets
            .iter()
            .filter(|t| t.ticket_type == TicketType::Support && in_week(t.created_at))
            .count(),
        tickets_closed: support_done.len(),
        features_completed: features_done.len(),
        support_mttr_hours: mean_turnaround(&support_done),
        feature_lead_time_hours: mean_turnaround(&features_done),
        oncall_user,
    }
}

/// Round-robin roster of `weeks` shifts starting on the Monday of `first_week`.
pub fn oncall_rotation(user_ids: &[i64], first_week: NaiveDate, weeks: usize) -> Vec<OncallShift> {
    if user_ids.is_empty() {
        return Vec::new();
    }
    let start = monday_of(first_week);
    (0..weeks)
        .map(|i| OncallShift {
            starts_on: start + Duration::weeks(i as i64),
            user_id: user_ids[i % user_ids.len()],
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaAlert {
    pub ticket_id: i64,
    pub title: String,
    pub assignee: String,
    pub due_at: DateTime<Utc>,
    /// Always positive; see `is_overdue` for the direction.
    pub hours_remaining: f64,
    pub is_overdue: bool,
}

/// Open tickets due within the warning window or already late.
/// A dev only sees alerts for tickets assigned to them.
pub fn sla_alerts(session: &Session, tickets: &[Ticket], users: &[User], now: DateTime<Utc>) -> Vec<SlaAlert> {
    let horizon = now + Duration::hours(SLA_WARNING_HOURS);
    tickets
        .iter()
        .filter(|t| t.status != Status::Done)
        .filter(|t| session.role() != Role::Dev || t.assignee_id == Some(session.user_id()))
        .filter_map(|t| t.due_at.filter(|due| *due <= horizon).map(|due| (t, due)))
        .map(|(t, due)| {
            let remaining = metrics::elapsed_hours_since(now, due);
            SlaAlert {
                ticket_id: t.id,
                title: t.title.clone(),
                assignee: t
                    .assignee_id
                    .and_then(|id| user_name(users, id))
                    .unwrap_or_else(|| "Unassigned".to_string()),
                due_at: due,
                hours_remaining: remaining.abs(),
                is_overdue: metrics::is_overdue(remaining),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestItem {
    pub id: i64,
    pub title: String,
    pub status: Status,
}

impl From<&Ticket> for DigestItem {
    fn from(t: &Ticket) -> Self {
        DigestItem {
            id: t.id,
            title: t.title.clone(),
            status: t.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Blocker {
    #[serde(flatten)]
    pub item: DigestItem,
    pub stuck_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandupDigest {
    pub user_id: i64,
    pub user_name: String,
    pub yesterday_moved: Vec<DigestItem>,
    pub today_assigned: Vec<DigestItem>,
    pub blockers: Vec<Blocker>,
}

impl StandupDigest {
    pub fn is_empty(&self) -> bool {
        self.yesterday_moved.is_empty() && self.today_assigned.is_empty() && self.blockers.is_empty()
    }
}

pub fn standup_digest(user: &User, tickets: &[Ticket], now: DateTime<Utc>) -> StandupDigest {
    let yesterday = now - Duration::days(1);
    let today_start = metrics::start_of_day(now);
    let stale_before = now - Duration::days(BLOCKER_AFTER_DAYS);
    let assigned = |t: &&Ticket| t.assignee_id == Some(user.id);

    StandupDigest {
        user_id: user.id,
        user_name: user.name.clone(),
        yesterday_moved: tickets
            .iter()
            .filter(|t| t.assignee_id == Some(user.id) || t.reporter_id == user.id)
            .filter(|t| t.updated_at >= yesterday && t.updated_at != t.created_at)
            .map(DigestItem::from)
            .collect(),
        today_assigned: tickets
            .iter()
            .filter(assigned)
            .filter(|t| t.updated_at >= today_start)
            .map(DigestItem::from)
            .collect(),
        blockers: tickets
            .iter()
            .filter(assigned)
            .filter(|t| t.status != Status::Done && t.updated_at <= stale_before)
            .map(|t| Blocker {
                item: DigestItem::from(t),
                stuck_days: (now - t.updated_at).num_days(),
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub total: usize,
    pub assigned_to_me: usize,
    pub overdue: usize,
    pub completed_today: usize,
    /// Requesters only: tickets currently being worked on.
    pub active: Option<usize>,
}

/// Dashboard cards over the tickets `session` can see on the board.
pub fn dashboard(session: &Session, tickets: &[Ticket], now: DateTime<Utc>) -> Dashboard {
    let everything = visibility::TicketFilter {
        assignee: Some(visibility::AssigneeFilter::Any),
        ..visibility::TicketFilter::default()
    };
    let visible = visibility::visible_tickets(
        session.role(),
        tickets,
        session.user_id(),
        session.branch_id(),
        &everything,
    );
    Dashboard {
        total: visible.len(),
        assigned_to_me: visible
            .iter()
            .filter(|t| t.assignee_id == Some(session.user_id()))
            .count(),
        overdue: metrics::overdue_count(&visible, now),
        completed_today: metrics::completed_today(&visible, now),
        active: (session.role() == Role::Requester)
            .then(|| visibility::my_active_tickets(&visible).len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, ticket, user};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_monday_of() {
        assert_eq!(monday_of(day(2024, 6, 5)), day(2024, 6, 3));
        assert_eq!(monday_of(day(2024, 6, 3)), day(2024, 6, 3));
        assert_eq!(monday_of(day(2024, 6, 9)), day(2024, 6, 3));
    }

    #[test]
    fn test_weekly_report_counts_completion_time() {
        let users = vec![user(2, "Dario", Role::Dev, None)];
        let mut opened = ticket(1, 9, None, Status::Backlog);
        opened.created_at = at(2024, 6, 4, 9, 0);

        let mut closed = ticket(2, 9, Some(2), Status::Done);
        closed.created_at = at(2024, 6, 3, 8, 0);
        closed.completed_at = Some(at(2024, 6, 3, 12, 0));
        // edited after the fact; completion still counts
        closed.updated_at = at(2024, 6, 20, 0, 0);

        let mut feature = ticket(3, 9, Some(2), Status::Done);
        feature.ticket_type = TicketType::Feature;
        feature.created_at = at(2024, 5, 30, 0, 0);
        feature.completed_at = Some(at(2024, 6, 6, 0, 0));

        let roster = vec![OncallShift {
            starts_on: day(2024, 6, 3),
            user_id: 2,
        }];
        let report = weekly_report(&[opened, closed, feature], &roster, &users, day(2024, 6, 5));
        assert_eq!(report.week_start, day(2024, 6, 3));
        assert_eq!(report.week_end, day(2024, 6, 9));
        assert_eq!(report.tickets_opened, 2);
        assert_eq!(report.tickets_closed, 1);
        assert_eq!(report.features_completed, 1);
        assert_eq!(report.support_mttr_hours, 4.0);
        assert_eq!(report.feature_lead_time_hours, 168.0);
        assert_eq!(report.oncall_user, "Dario");
    }

    #[test]
    fn test_oncall_rotation_cycles() {
        let shifts = oncall_rotation(&[2, 4], day(2024, 6, 5), 3);
        assert_eq!(shifts.len(), 3);
        assert_eq!(shifts[0].starts_on, day(2024, 6, 3));
        assert_eq!(shifts[2].starts_on, day(2024, 6, 17));
        assert_eq!(shifts.iter().map(|s| s.user_id).collect::<Vec<_>>(), vec![2, 4, 2]);
        assert!(oncall_rotation(&[], day(2024, 6, 3), 4).is_empty());
    }

    #[test]
    fn test_weekly_report_without_shift() {
        let report = weekly_report(&[], &[], &[], day(2024, 6, 5));
        assert_eq!(report.oncall_user, "None");
        assert_eq!(report.support_mttr_hours, 0.0);
    }

    #[test]
    fn test_sla_alerts_window() {
        let now = at(2024, 6, 3, 12, 0);
        let users = vec![user(2, "Dario", Role::Dev, None)];
        let mut soon = ticket(1, 9, Some(2), Status::InProgress);
        soon.due_at = Some(at(2024, 6, 3, 14, 0));
        let mut late = ticket(2, 9, None, Status::Backlog);
        late.due_at = Some(at(2024, 6, 3, 9, 0));
        let mut far = ticket(3, 9, Some(2), Status::Backlog);
        far.due_at = Some(at(2024, 6, 4, 12, 0));
        let mut done = ticket(4, 9, Some(2), Status::Done);
        done.due_at = Some(at(2024, 6, 1, 0, 0));
        let tickets = vec![soon, late, far, done];

        let pm = Session::new(user(1, "Paula", Role::Pm, None));
        let alerts = sla_alerts(&pm, &tickets, &users, now);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].hours_remaining, 2.0);
        assert!(!alerts[0].is_overdue);
        assert_eq!(alerts[1].assignee, "Unassigned");
        assert_eq!(alerts[1].hours_remaining, 3.0);
        assert!(alerts[1].is_overdue);

        let dev = Session::new(users[0].clone());
        let mine = sla_alerts(&dev, &tickets, &users, now);
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].ticket_id, 1);
    }

    #[test]
    fn test_standup_digest() {
        let now = at(2024, 6, 10, 9, 0);
        let dario = user(2, "Dario", Role::Dev, None);

        let mut moved = ticket(1, 9, Some(2), Status::Review);
        moved.updated_at = at(2024, 6, 9, 15, 0);
        let mut fresh = ticket(2, 9, Some(2), Status::Backlog);
        fresh.created_at = at(2024, 6, 10, 8, 0);
        fresh.updated_at = fresh.created_at;
        let mut stuck = ticket(3, 9, Some(2), Status::InProgress);
        stuck.updated_at = at(2024, 6, 6, 9, 0);

        let digest = standup_digest(&dario, &[moved, fresh, stuck], now);
        assert_eq!(digest.yesterday_moved.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(digest.today_assigned.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(digest.blockers.len(), 1);
        assert_eq!(digest.blockers[0].stuck_days, 4);
    }

    #[test]
    fn test_dashboard_for_requester() {
        let now = at(2024, 6, 10, 12, 0);
        let rui = user(9, "Rui", Role::Requester, Some(1));
        let mut a = ticket(1, 9, Some(2), Status::InProgress);
        a.branch_id = Some(1);
        let mut b = ticket(2, 9, None, Status::Backlog);
        b.branch_id = Some(1);
        b.end_date = Some(at(2024, 6, 1, 0, 0));
        let mut other = ticket(3, 8, Some(2), Status::Review);
        other.branch_id = Some(2);

        let cards = dashboard(&Session::new(rui), &[a, b, other], now);
        assert_eq!(cards.total, 2);
        assert_eq!(cards.overdue, 1);
        assert_eq!(cards.active, Some(1));
        assert_eq!(cards.assigned_to_me, 0);
    }
}
