//! Derived figures for dashboards and reports.
//!
//! All counts are independent of input order.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use std::fmt;

use crate::error::{Result, TicketError};
use crate::models::{Status, Ticket};

/// Open tickets whose deadline (end date, else due date) has passed.
pub fn overdue_count(tickets: &[Ticket], now: DateTime<Utc>) -> usize {
    tickets
        .iter()
        .filter(|t| t.status != Status::Done)
        .filter(|t| t.deadline().map_or(false, |d| d < now))
        .count()
}

/// Done tickets with `completed_at` in `[from, to)`.
pub fn completed_in_window(tickets: &[Ticket], from: DateTime<Utc>, to: DateTime<Utc>) -> usize {
    tickets
        .iter()
        .filter(|t| t.status == Status::Done)
        .filter(|t| t.completed_at.map_or(false, |c| c >= from && c < to))
        .count()
}

pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

pub fn completed_today(tickets: &[Ticket], now: DateTime<Utc>) -> usize {
    let start = start_of_day(now);
    completed_in_window(tickets, start, start + Duration::days(1))
}

pub fn elapsed_hours_since(from: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - from).num_milliseconds() as f64 / 3_600_000.0
}

/// Hours left in the SLA budget; negative once breached. `None` without a budget.
pub fn sla_remaining_hours(ticket: &Ticket, now: DateTime<Utc>) -> Option<f64> {
    ticket
        .sla_hours
        .map(|budget| budget - elapsed_hours_since(ticket.created_at, now))
}

pub fn is_overdue(remaining_hours: f64) -> bool {
    remaining_hours < 0.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSpan {
    pub hours: i64,
    pub minutes: i64,
}

impl fmt::Display for ClockSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h {}m", self.hours, self.minutes)
    }
}

pub fn parse_clock(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| TicketError::Validation(format!("Invalid time '{}'. Use HH:MM", value)))
}

pub fn minutes_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Same-day span between two `HH:MM` clock readings.
///
/// Spans crossing midnight come out negative (floored hours, truncated
/// minutes). Activity reports compute their stored minutes separately.
pub fn duration_between(start: &str, end: &str) -> Result<ClockSpan> {
    let total = minutes_of_day(parse_clock(end)?) - minutes_of_day(parse_clock(start)?);
    Ok(ClockSpan {
        hours: total.div_euclid(60),
        minutes: total % 60,
    })
}

/// Renders decimal hours as "1h 30m". Hours and minutes are rounded together
/// so 1.999 becomes "2h 0m", never "1h 60m".
pub fn format_hours(hours: f64) -> String {
    let total_minutes = (hours * 60.0).round() as i64;
    let (h, m) = (total_minutes.div_euclid(60), total_minutes.rem_euclid(60));
    if h == 0 {
        format!("{}m", m)
    } else {
        format!("{}h {}m", h, m)
    }
}

/// Compact rendering for SLA alerts: minutes, tenths of hours, or days.
pub fn format_span(hours: f64) -> String {
    if hours < 1.0 {
        format!("{}m", (hours * 60.0).round() as i64)
    } else if hours < 24.0 {
        format!("{:.1}h", hours)
    } else {
        format!("{}d", (hours / 24.0).round() as i64)
    }
}

/// "just now", "5m ago", "3h ago", "2d ago".
pub fn format_relative(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now - then;
    if elapsed.num_minutes() < 1 {
        "just now".to_string()
    } else if elapsed.num_minutes() < 60 {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed.num_hours() < 24 {
        format!("{}h ago", elapsed.num_hours())
    } else {
        format!("{}d ago", elapsed.num_days())
    }
}
