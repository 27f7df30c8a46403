//! Daily activity reports: validation, minutes worked and summaries.

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, TicketError};
use crate::metrics::minutes_of_day;
use crate::models::{ActivityReport, ActivityType};
use crate::policy;
use crate::session::Session;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Minutes from `start` to `end`, wrapping past midnight. Equal times are rejected.
pub fn minutes_worked(start: NaiveTime, end: NaiveTime) -> Result<i64> {
    let mut minutes = minutes_of_day(end) - minutes_of_day(start);
    if minutes < 0 {
        minutes += MINUTES_PER_DAY;
    }
    if minutes == 0 {
        return Err(TicketError::Validation(
            "End time must differ from start time".to_string(),
        ));
    }
    Ok(minutes)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewActivityReport {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub activity_type: ActivityType,
    pub ticket_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub feature_worked: Option<String>,
    pub description: String,
    pub accomplishments: Option<String>,
    pub blockers: Option<String>,
}

/// Checks a new report for `session` and returns it with its minutes worked.
///
/// The branch defaults to the author's; only a pm may name one explicitly.
pub fn prepare_report(mut new: NewActivityReport, session: &Session) -> Result<(NewActivityReport, i64)> {
    if new.description.trim().is_empty() {
        return Err(TicketError::Validation("Description cannot be empty".to_string()));
    }
    match new.branch_id {
        Some(branch) if Some(branch) != session.branch_id() => policy::require(
            policy::can_set_report_branch(session.role()),
            "only a project manager can file a report for another branch",
        )?,
        Some(_) => {}
        None => new.branch_id = session.branch_id(),
    }
    let minutes = minutes_worked(new.start_time, new.end_time)?;
    Ok((new, minutes))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityPatch {
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub activity_type: Option<ActivityType>,
    pub ticket_id: Option<i64>,
    pub feature_worked: Option<String>,
    pub description: Option<String>,
    pub accomplishments: Option<String>,
    pub blockers: Option<String>,
}

impl ActivityPatch {
    pub fn is_empty(&self) -> bool {
        *self == ActivityPatch::default()
    }
}

/// Owner-only edit. Changing either time recomputes the stored minutes.
pub fn apply_patch(report: &ActivityReport, patch: ActivityPatch, session: &Session) -> Result<ActivityReport> {
    policy::require(
        policy::can_edit_activity_report(report, session.user_id()),
        "only the author can change an activity report",
    )?;
    if patch.is_empty() {
        return Err(TicketError::Validation("Nothing to update".to_string()));
    }
    let mut updated = report.clone();
    if let Some(date) = patch.date {
        updated.date = date;
    }
    if let Some(start) = patch.start_time {
        updated.start_time = start;
    }
    if let Some(end) = patch.end_time {
        updated.end_time = end;
    }
    if let Some(kind) = patch.activity_type {
        updated.activity_type = kind;
    }
    if patch.ticket_id.is_some() {
        updated.ticket_id = patch.ticket_id;
    }
    if patch.feature_worked.is_some() {
        updated.feature_worked = patch.feature_worked;
    }
    if let Some(description) = patch.description {
        if description.trim().is_empty() {
            return Err(TicketError::Validation("Description cannot be empty".to_string()));
        }
        updated.description = description;
    }
    if patch.accomplishments.is_some() {
        updated.accomplishments = patch.accomplishments;
    }
    if patch.blockers.is_some() {
        updated.blockers = patch.blockers;
    }
    updated.minutes_worked = minutes_worked(updated.start_time, updated.end_time)?;
    Ok(updated)
}

/// Whose reports a listing may include: pm picks anyone (or everyone), others only themselves.
pub fn report_scope(session: &Session, requested_user: Option<i64>) -> Option<i64> {
    if session.is_pm() {
        requested_user
    } else {
        Some(session.user_id())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub total_reports: usize,
    pub total_minutes: i64,
    pub total_hours: f64,
    /// Hours per activity type.
    pub activity_breakdown: BTreeMap<String, f64>,
    pub days_reported: usize,
}

pub fn summarize(reports: &[ActivityReport]) -> ActivitySummary {
    let total_minutes: i64 = reports.iter().map(|r| r.minutes_worked).sum();
    let mut minutes_by_type: BTreeMap<String, i64> = BTreeMap::new();
    let mut days = BTreeSet::new();
    for report in reports {
        *minutes_by_type
            .entry(report.activity_type.as_str().to_string())
            .or_insert(0) += report.minutes_worked;
        days.insert(report.date);
    }
    ActivitySummary {
        total_reports: reports.len(),
        total_minutes,
        total_hours: (total_minutes as f64 / 60.0 * 100.0).round() / 100.0,
        activity_breakdown: minutes_by_type
            .into_iter()
            .map(|(kind, minutes)| (kind, minutes as f64 / 60.0))
            .collect(),
        days_reported: days.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::parse_clock;
    use crate::models::Role;
    use crate::test_support::{at, user};

    fn clock(s: &str) -> NaiveTime {
        parse_clock(s).unwrap()
    }

    fn new_report() -> NewActivityReport {
        NewActivityReport {
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            start_time: clock("09:00"),
            end_time: clock("12:30"),
            activity_type: ActivityType::Coding,
            ticket_id: None,
            branch_id: None,
            feature_worked: None,
            description: "login form".to_string(),
            accomplishments: None,
            blockers: None,
        }
    }

    fn stored(id: i64, user_id: i64, day: u32, kind: ActivityType, minutes: i64) -> ActivityReport {
        ActivityReport {
            id,
            user_id,
            date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            start_time: clock("09:00"),
            end_time: clock("10:00"),
            minutes_worked: minutes,
            activity_type: kind,
            ticket_id: None,
            branch_id: None,
            feature_worked: None,
            description: "work".to_string(),
            accomplishments: None,
            blockers: None,
            created_at: at(2024, 6, day, 18, 0),
        }
    }

    #[test]
    fn test_minutes_worked_wraps_midnight() {
        assert_eq!(minutes_worked(clock("09:00"), clock("12:30")).unwrap(), 210);
        assert_eq!(minutes_worked(clock("22:00"), clock("01:15")).unwrap(), 195);
        assert!(minutes_worked(clock("10:00"), clock("10:00")).is_err());
    }

    #[test]
    fn test_prepare_defaults_branch() {
        let dev = Session::new(user(2, "Dario", Role::Dev, Some(4)));
        let (ready, minutes) = prepare_report(new_report(), &dev).unwrap();
        assert_eq!(ready.branch_id, Some(4));
        assert_eq!(minutes, 210);
    }

    #[test]
    fn test_explicit_branch_is_pm_only() {
        let mut report = new_report();
        report.branch_id = Some(9);

        let dev = Session::new(user(2, "Dario", Role::Dev, Some(4)));
        assert!(prepare_report(report.clone(), &dev).unwrap_err().is_unauthorized());

        let pm = Session::new(user(1, "Paula", Role::Pm, None));
        let (ready, _) = prepare_report(report, &pm).unwrap();
        assert_eq!(ready.branch_id, Some(9));
    }

    #[test]
    fn test_patch_recomputes_minutes() {
        let report = stored(1, 2, 3, ActivityType::Coding, 60);
        let owner = Session::new(user(2, "Dario", Role::Dev, None));
        let patch = ActivityPatch {
            end_time: Some(clock("11:45")),
            ..ActivityPatch::default()
        };
        let updated = apply_patch(&report, patch.clone(), &owner).unwrap();
        assert_eq!(updated.minutes_worked, 165);

        let pm = Session::new(user(1, "Paula", Role::Pm, None));
        assert!(apply_patch(&report, patch, &pm).unwrap_err().is_unauthorized());
    }

    #[test]
    fn test_scope() {
        let pm = Session::new(user(1, "Paula", Role::Pm, None));
        assert_eq!(report_scope(&pm, None), None);
        assert_eq!(report_scope(&pm, Some(2)), Some(2));
        let dev = Session::new(user(2, "Dario", Role::Dev, None));
        assert_eq!(report_scope(&dev, Some(5)), Some(2));
    }

    #[test]
    fn test_summarize() {
        let reports = vec![
            stored(1, 2, 3, ActivityType::Coding, 90),
            stored(2, 2, 3, ActivityType::Meeting, 30),
            stored(3, 2, 4, ActivityType::Coding, 60),
        ];
        let summary = summarize(&reports);
        assert_eq!(summary.total_reports, 3);
        assert_eq!(summary.total_minutes, 180);
        assert_eq!(summary.total_hours, 3.0);
        assert_eq!(summary.activity_breakdown["coding"], 2.5);
        assert_eq!(summary.activity_breakdown["meeting"], 0.5);
        assert_eq!(summary.days_reported, 2);
    }
}
