use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};

use crate::db::Database;
use crate::metrics;
use crate::notify;
use crate::policy;
use crate::reports::{self, DigestItem};
use crate::session::Session;

use super::print_json;

pub fn weekly(db: &Database, week: Option<NaiveDate>, json: bool) -> Result<()> {
    let week = week.unwrap_or_else(|| Utc::now().date_naive());
    let report = reports::weekly_report(&db.list_tickets()?, &db.list_roster()?, &db.list_users()?, week);
    if json {
        return print_json(&report);
    }

    println!("Week {} to {}", report.week_start, report.week_end);
    println!("Support tickets opened: {}", report.tickets_opened);
    println!("Support tickets closed: {}", report.tickets_closed);
    println!("Features completed: {}", report.features_completed);
    println!("Support MTTR: {}", metrics::format_hours(report.support_mttr_hours));
    println!("Feature lead time: {}", metrics::format_hours(report.feature_lead_time_hours));
    println!("On call: {}", report.oncall_user);
    Ok(())
}

/// Prints SLA alerts; with `send`, also drops an in-app notification per alert.
pub fn sla(db: &Database, session: &Session, send: bool, json: bool) -> Result<()> {
    if send {
        policy::require(
            policy::can_send_sla_alerts(session.role()),
            "only project managers can send SLA alerts",
        )?;
    }
    let now = Utc::now();
    let tickets = db.list_tickets()?;
    let alerts = reports::sla_alerts(session, &tickets, &db.list_users()?, now);

    if send {
        let drafts: Vec<_> = alerts
            .iter()
            .filter_map(|alert| tickets.iter().find(|t| t.id == alert.ticket_id).map(|t| (t, alert)))
            .map(|(t, alert)| notify::sla_alert(t, alert.hours_remaining, alert.is_overdue))
            .collect();
        let sent = db.notify(&drafts, now)?;
        tracing::info!(alerts = alerts.len(), sent, "sla alerts sent");
    }

    if json {
        return print_json(&alerts);
    }
    if alerts.is_empty() {
        println!("No SLA alerts.");
        return Ok(());
    }
    for alert in &alerts {
        let when = if alert.is_overdue {
            format!("OVERDUE by {}", metrics::format_span(alert.hours_remaining))
        } else {
            format!("due in {}", metrics::format_span(alert.hours_remaining))
        };
        println!("#{:<4} {:<40} {:<12} {}", alert.ticket_id, alert.title, alert.assignee, when);
    }
    Ok(())
}

fn print_items(heading: &str, items: &[DigestItem]) {
    println!("{}:", heading);
    if items.is_empty() {
        println!("  (none)");
    }
    for item in items {
        println!("  #{} [{}] {}", item.id, item.status, item.title);
    }
}

pub fn standup(db: &Database, session: &Session, user_id: Option<i64>, json: bool) -> Result<()> {
    let subject = user_id.unwrap_or(session.user_id());
    policy::require(
        policy::can_view_user_stats(session.role(), subject, session.user_id()),
        "only project managers can read another user's standup",
    )?;
    let user = match db.get_user(subject)? {
        Some(u) => u,
        None => bail!("User #{} not found", subject),
    };
    let digest = reports::standup_digest(&user, &db.list_tickets()?, Utc::now());
    if json {
        return print_json(&digest);
    }

    println!("Standup for {}", digest.user_name);
    if digest.is_empty() {
        println!("Nothing to report.");
        return Ok(());
    }
    print_items("Moved since yesterday", &digest.yesterday_moved);
    print_items("Assigned today", &digest.today_assigned);
    println!("Blockers:");
    if digest.blockers.is_empty() {
        println!("  (none)");
    }
    for blocker in &digest.blockers {
        println!(
            "  #{} [{}] {} (stuck {}d)",
            blocker.item.id, blocker.item.status, blocker.item.title, blocker.stuck_days
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::NewTicket;
    use crate::models::{NotificationKind, Priority, TicketType};
    use crate::test_support::{seed_team, setup_test_db};

    #[test]
    fn test_sla_send_is_pm_only_and_notifies() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let mut new = NewTicket::new("Server room heat", TicketType::Support, Priority::Critical);
        new.assignee_id = Some(team.dev.id);
        new.due_at = Some(Utc::now() + chrono::Duration::hours(1));
        db.create_ticket(&new, team.pm.id, Utc::now()).unwrap();
        db.mark_all_notifications_read(team.dev.id, Utc::now()).unwrap();

        assert!(sla(&db, &Session::new(team.dev.clone()), true, false).is_err());
        assert!(sla(&db, &Session::new(team.dev.clone()), false, false).is_ok());

        sla(&db, &Session::new(team.pm.clone()), true, false).unwrap();
        let inbox = db.list_notifications(team.dev.id, true).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::SlaAlert);
    }

    #[test]
    fn test_weekly_and_standup_run() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        db.create_ticket(&NewTicket::new("Any", TicketType::Support, Priority::Low), team.requester.id, Utc::now())
            .unwrap();
        assert!(weekly(&db, None, false).is_ok());
        assert!(weekly(&db, None, true).is_ok());
        assert!(standup(&db, &Session::new(team.dev.clone()), None, false).is_ok());
        assert!(standup(&db, &Session::new(team.dev.clone()), Some(team.dev2.id), false).is_err());
        assert!(standup(&db, &Session::new(team.pm.clone()), Some(team.dev2.id), true).is_ok());
    }
}
