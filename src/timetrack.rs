//! Time entries: input rules, timer arithmetic and aggregate statistics.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{Result, TicketError};
use crate::models::{ActivityType, Ticket, TimeEntry, User};
use crate::policy;
use crate::session::Session;

pub const MAX_HOURS: f64 = 999.99;

/// Manually logged hours: positive, quarter-hour steps, at most `MAX_HOURS`.
pub fn validate_hours(hours: f64) -> Result<f64> {
    if !hours.is_finite() || hours <= 0.0 {
        return Err(TicketError::Validation("Hours must be positive".to_string()));
    }
    if hours > MAX_HOURS {
        return Err(TicketError::Validation(format!(
            "Hours cannot exceed {}",
            MAX_HOURS
        )));
    }
    let quarters = hours * 4.0;
    if (quarters - quarters.round()).abs() > 1e-9 {
        return Err(TicketError::Validation(
            "Hours must be in 0.25 increments".to_string(),
        ));
    }
    Ok(hours)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTimeEntry {
    pub ticket_id: i64,
    pub hours: f64,
    pub activity_type: Option<ActivityType>,
    pub is_billable: bool,
    pub description: Option<String>,
    pub logged_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl NewTimeEntry {
    pub fn manual(ticket_id: i64, hours: f64, logged_at: DateTime<Utc>) -> Self {
        NewTimeEntry {
            ticket_id,
            hours,
            activity_type: None,
            is_billable: true,
            description: None,
            logged_at,
            started_at: None,
            stopped_at: None,
        }
    }
}

pub fn prepare_entry(entry: NewTimeEntry, ticket: &Ticket, session: &Session) -> Result<NewTimeEntry> {
    policy::require(
        policy::can_log_time(session.role(), ticket, session.user_id()),
        "only the assigned developer or a project manager can log time on this ticket",
    )?;
    validate_hours(entry.hours)?;
    Ok(entry)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeEntryPatch {
    pub hours: Option<f64>,
    pub activity_type: Option<ActivityType>,
    pub is_billable: Option<bool>,
    pub description: Option<String>,
}

impl TimeEntryPatch {
    pub fn is_empty(&self) -> bool {
        *self == TimeEntryPatch::default()
    }
}

/// Applies an edit to a copy of `entry` after checking ownership.
pub fn apply_patch(entry: &TimeEntry, patch: TimeEntryPatch, session: &Session) -> Result<TimeEntry> {
    policy::require(
        policy::can_edit_time_entry(session.role(), entry, session.user_id()),
        "only the author or a project manager can change a time entry",
    )?;
    if patch.is_empty() {
        return Err(TicketError::Validation("Nothing to update".to_string()));
    }
    let mut updated = entry.clone();
    if let Some(hours) = patch.hours {
        updated.hours = validate_hours(hours)?;
    }
    if patch.activity_type.is_some() {
        updated.activity_type = patch.activity_type;
    }
    if let Some(billable) = patch.is_billable {
        updated.is_billable = billable;
    }
    if patch.description.is_some() {
        updated.description = patch.description;
    }
    Ok(updated)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Hours on a stopped timer, to two decimals.
pub fn stopped_hours(started_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    round2((now - started_at).num_seconds().max(0) as f64 / 3600.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeStats {
    pub total_hours: f64,
    pub billable_hours: f64,
    pub non_billable_hours: f64,
    pub entry_count: usize,
    pub estimated_hours: Option<f64>,
    pub remaining_hours: Option<f64>,
    pub percent_complete: Option<f64>,
}

/// Totals over `entries`. Remaining and percent appear only with a positive estimate.
pub fn time_stats(entries: &[TimeEntry], estimated_hours: Option<f64>) -> TimeStats {
    let total: f64 = entries.iter().map(|e| e.hours).sum();
    let billable: f64 = entries.iter().filter(|e| e.is_billable).map(|e| e.hours).sum();
    let estimate = estimated_hours.filter(|h| *h > 0.0);
    TimeStats {
        total_hours: round2(total),
        billable_hours: round2(billable),
        non_billable_hours: round2(total - billable),
        entry_count: entries.len(),
        estimated_hours,
        remaining_hours: estimate.map(|est| round2((est - total).max(0.0))),
        percent_complete: estimate.map(|est| (total / est * 100.0).min(100.0)),
    }
}

/// Narrowing for the team summary. Dates are inclusive and compare the logged day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub ticket_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &TimeEntry) -> bool {
        let day = entry.logged_at.date_naive();
        self.from.map_or(true, |d| day >= d)
            && self.to.map_or(true, |d| day <= d)
            && self.ticket_id.map_or(true, |id| entry.ticket_id == id)
            && self.user_id.map_or(true, |id| entry.user_id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSummary {
    pub total_hours: f64,
    pub billable_hours: f64,
    pub non_billable_hours: f64,
    pub entries_count: usize,
    pub by_activity_type: BTreeMap<String, f64>,
    pub by_user: BTreeMap<String, f64>,
    pub by_date: BTreeMap<String, f64>,
}

pub fn team_summary(entries: &[TimeEntry], users: &[User], filter: &EntryFilter) -> TimeSummary {
    let selected: Vec<&TimeEntry> = entries.iter().filter(|e| filter.matches(e)).collect();

    let mut by_activity_type = BTreeMap::new();
    let mut by_user = BTreeMap::new();
    let mut by_date = BTreeMap::new();
    for entry in &selected {
        let activity = entry.activity_type.unwrap_or(ActivityType::Other);
        *by_activity_type.entry(activity.as_str().to_string()).or_insert(0.0) += entry.hours;

        // Names are not unique, so the id is part of the key.
        let label = users
            .iter()
            .find(|u| u.id == entry.user_id)
            .map(|u| format!("{} (#{})", u.name, u.id))
            .unwrap_or_else(|| format!("User #{}", entry.user_id));
        *by_user.entry(label).or_insert(0.0) += entry.hours;

        let day = entry.logged_at.format("%Y-%m-%d").to_string();
        *by_date.entry(day).or_insert(0.0) += entry.hours;
    }

    let total: f64 = selected.iter().map(|e| e.hours).sum();
    let billable: f64 = selected.iter().filter(|e| e.is_billable).map(|e| e.hours).sum();
    TimeSummary {
        total_hours: round2(total),
        billable_hours: round2(billable),
        non_billable_hours: round2(total - billable),
        entries_count: selected.len(),
        by_activity_type,
        by_user,
        by_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, Status};
    use crate::test_support::{at, ticket, user};
    use chrono::Duration;
    use proptest::prelude::*;

    fn entry(id: i64, user_id: i64, hours: f64, billable: bool) -> TimeEntry {
        TimeEntry {
            id,
            ticket_id: 1,
            user_id,
            hours,
            activity_type: None,
            is_billable: billable,
            description: None,
            logged_at: at(2024, 6, 3, 10, 0),
            started_at: None,
            stopped_at: None,
        }
    }

    #[test]
    fn test_two_entries_total() {
        let stats = time_stats(&[entry(1, 2, 1.5, true), entry(2, 2, 0.75, true)], None);
        assert_eq!(stats.total_hours, 2.25);
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.remaining_hours, None);
    }

    #[test]
    fn test_stats_against_estimate() {
        let entries = [entry(1, 2, 3.0, true), entry(2, 2, 1.0, false)];
        let stats = time_stats(&entries, Some(8.0));
        assert_eq!(stats.billable_hours, 3.0);
        assert_eq!(stats.non_billable_hours, 1.0);
        assert_eq!(stats.remaining_hours, Some(4.0));
        assert_eq!(stats.percent_complete, Some(50.0));

        let over = time_stats(&entries, Some(2.0));
        assert_eq!(over.remaining_hours, Some(0.0));
        assert_eq!(over.percent_complete, Some(100.0));
    }

    #[test]
    fn test_validate_hours() {
        assert!(validate_hours(0.25).is_ok());
        assert!(validate_hours(999.75).is_ok());
        assert!(validate_hours(0.0).is_err());
        assert!(validate_hours(-1.0).is_err());
        assert!(validate_hours(0.3).is_err());
        assert!(validate_hours(1000.0).is_err());
    }

    #[test]
    fn test_stopped_hours_rounds() {
        let start = at(2024, 6, 3, 9, 0);
        assert_eq!(stopped_hours(start, start + Duration::minutes(90)), 1.5);
        assert_eq!(stopped_hours(start, start + Duration::seconds(100)), 0.03);
    }

    #[test]
    fn test_prepare_entry_policy() {
        let t = ticket(1, 9, Some(2), Status::InProgress);
        let new = NewTimeEntry::manual(1, 1.0, at(2024, 6, 3, 9, 0));

        let dev = Session::new(user(2, "Dario", Role::Dev, None));
        assert!(prepare_entry(new.clone(), &t, &dev).is_ok());

        let other = Session::new(user(3, "Dana", Role::Dev, None));
        assert!(prepare_entry(new.clone(), &t, &other).unwrap_err().is_unauthorized());

        let pm = Session::new(user(1, "Paula", Role::Pm, None));
        assert!(prepare_entry(new, &t, &pm).is_ok());
    }

    #[test]
    fn test_patch_by_author_or_pm() {
        let e = entry(1, 2, 1.0, true);
        let patch = TimeEntryPatch {
            hours: Some(2.5),
            ..TimeEntryPatch::default()
        };
        let author = Session::new(user(2, "Dario", Role::Dev, None));
        assert_eq!(apply_patch(&e, patch.clone(), &author).unwrap().hours, 2.5);

        let stranger = Session::new(user(3, "Dana", Role::Dev, None));
        assert!(apply_patch(&e, patch.clone(), &stranger).is_err());

        let pm = Session::new(user(1, "Paula", Role::Pm, None));
        assert!(apply_patch(&e, patch, &pm).is_ok());
    }

    #[test]
    fn test_team_summary_breakdowns() {
        let users = vec![user(2, "Dario", Role::Dev, None)];
        let mut coding = entry(1, 2, 2.0, true);
        coding.activity_type = Some(ActivityType::Coding);
        let other = entry(2, 7, 0.5, false);
        let mut later = entry(3, 2, 1.0, true);
        later.logged_at = at(2024, 6, 5, 10, 0);

        let summary = team_summary(&[coding, other, later], &users, &EntryFilter::default());
        assert_eq!(summary.total_hours, 3.5);
        assert_eq!(summary.billable_hours, 3.0);
        assert_eq!(summary.by_activity_type["coding"], 2.0);
        assert_eq!(summary.by_activity_type["other"], 1.5);
        assert_eq!(summary.by_user["Dario (#2)"], 3.0);
        assert_eq!(summary.by_user["User #7"], 0.5);
        assert_eq!(summary.by_date["2024-06-03"], 2.5);

        let filter = EntryFilter {
            from: NaiveDate::from_ymd_opt(2024, 6, 4),
            ..EntryFilter::default()
        };
        let narrowed = team_summary(&[entry(1, 2, 2.0, true)], &users, &filter);
        assert_eq!(narrowed.entries_count, 0);
    }

    #[test]
    fn test_team_summary_keeps_namesakes_apart() {
        let users = vec![user(2, "Ana", Role::Dev, None), user(5, "Ana", Role::Dev, None)];
        let entries = [entry(1, 2, 1.0, true), entry(2, 5, 2.5, true)];

        let summary = team_summary(&entries, &users, &EntryFilter::default());
        assert_eq!(summary.by_user.len(), 2);
        assert_eq!(summary.by_user["Ana (#2)"], 1.0);
        assert_eq!(summary.by_user["Ana (#5)"], 2.5);
    }

    proptest! {
        #[test]
        fn prop_quarter_hours_accepted(quarters in 1u32..3999) {
            let hours = quarters as f64 * 0.25;
            prop_assert!(validate_hours(hours).is_ok());
        }

        #[test]
        fn prop_billable_split_sums_to_total(
            parts in proptest::collection::vec((1u32..40, any::<bool>()), 0..15)
        ) {
            let entries: Vec<TimeEntry> = parts
                .iter()
                .enumerate()
                .map(|(i, (q, b))| entry(i as i64, 2, *q as f64 * 0.25, *b))
                .collect();
            let stats = time_stats(&entries, None);
            prop_assert!((stats.billable_hours + stats.non_billable_hours - stats.total_hours).abs() < 1e-9);
            prop_assert_eq!(stats.entry_count, entries.len());
        }
    }
}
