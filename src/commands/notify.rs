use anyhow::{bail, Context, Result};
use chrono::{Timelike, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::db::Database;
use crate::metrics;
use crate::models::{Channel, DigestFrequency, NotificationKind};
use crate::notify;
use crate::session::Session;

use super::print_json;

pub fn list(db: &Database, session: &Session, unread_only: bool, json: bool) -> Result<()> {
    let notifications = db.list_notifications(session.user_id(), unread_only)?;
    if json {
        return print_json(&notifications);
    }
    if notifications.is_empty() {
        println!("No notifications.");
        return Ok(());
    }

    let now = Utc::now();
    for n in notifications {
        let marker = if n.is_read { " " } else { "*" };
        println!(
            "{}#{:<4} {:<10} {}: {}",
            marker,
            n.id,
            metrics::format_relative(n.created_at, now),
            n.title,
            n.message
        );
    }
    Ok(())
}

pub fn read(db: &Database, session: &Session, id: i64) -> Result<()> {
    if !db.mark_notification_read(id, session.user_id(), Utc::now())? {
        bail!("Notification #{} not found", id);
    }
    println!("Marked notification #{} as read", id);
    Ok(())
}

pub fn read_all(db: &Database, session: &Session) -> Result<()> {
    let count = db.mark_all_notifications_read(session.user_id(), Utc::now())?;
    println!("Marked {} notification(s) as read", count);
    Ok(())
}

pub fn delete(db: &Database, session: &Session, id: i64) -> Result<()> {
    if !db.delete_notification(id, session.user_id())? {
        bail!("Notification #{} not found", id);
    }
    println!("Deleted notification #{}", id);
    Ok(())
}

pub fn count(db: &Database, session: &Session) -> Result<()> {
    println!("{}", db.unread_count(session.user_id())?);
    Ok(())
}

const WATCH_TICK: Duration = Duration::from_millis(200);

/// Sleep ticks between two polls. Saturates on absurd intervals.
fn ticks_per_poll(interval_secs: u64) -> u64 {
    interval_secs.saturating_mul(1000 / WATCH_TICK.as_millis() as u64)
}

/// Polls the unread count every `interval_secs` until SIGINT or SIGTERM.
/// Prints only when the count changes, and stays silent in quiet hours.
pub fn watch(db: &Database, session: &Session, interval_secs: u64) -> Result<()> {
    if interval_secs == 0 {
        bail!("Interval must be at least one second");
    }
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stop))
            .context("Failed to install signal handler")?;
    }

    let prefs = db.get_preferences(session.user_id())?;
    let ticks = ticks_per_poll(interval_secs);
    let mut last = None;

    println!("Watching notifications every {}s. Press Ctrl-C to stop.", interval_secs);
    while !stop.load(Ordering::Relaxed) {
        let unread = db.unread_count(session.user_id())?;
        let hour = Utc::now().hour() as u8;
        if last != Some(unread) && !notify::is_quiet_hour(&prefs, hour) {
            println!("{} unread notification(s)", unread);
            last = Some(unread);
        }

        for _ in 0..ticks {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            thread::sleep(WATCH_TICK);
        }
    }
    tracing::debug!(user_id = session.user_id(), "notification watch stopped");
    Ok(())
}

pub fn prefs_show(db: &Database, session: &Session, json: bool) -> Result<()> {
    let prefs = db.get_preferences(session.user_id())?;
    if json {
        return print_json(&prefs);
    }

    println!("{:<22} {:>6} {:>6}", "", "email", "app");
    for kind in NotificationKind::ALL {
        if let (Some(email), Some(app)) = (prefs.email.flag(*kind), prefs.app.flag(*kind)) {
            let on = |b: bool| if b { "on" } else { "off" };
            println!("{:<22} {:>6} {:>6}", kind.as_str(), on(email), on(app));
        }
    }
    println!("Digest: {}", prefs.digest_frequency);
    match (prefs.quiet_hours_start, prefs.quiet_hours_end) {
        (Some(start), Some(end)) => println!("Quiet hours: {:02}:00-{:02}:00", start, end),
        _ => println!("Quiet hours: off"),
    }
    Ok(())
}

/// One preference change from the command line. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct PrefsUpdate {
    pub toggle: Option<(Channel, NotificationKind, bool)>,
    pub digest: Option<DigestFrequency>,
    pub quiet_start: Option<i64>,
    pub quiet_end: Option<i64>,
    pub clear_quiet: bool,
}

pub fn prefs_set(db: &Database, session: &Session, update: PrefsUpdate) -> Result<()> {
    let mut prefs = db.get_preferences(session.user_id())?;

    if let Some((channel, kind, enabled)) = update.toggle {
        match prefs.channel_mut(channel).flag_mut(kind) {
            Some(flag) => *flag = enabled,
            None => bail!("Notifications of type '{}' cannot be switched off", kind),
        }
    }
    if let Some(digest) = update.digest {
        prefs.digest_frequency = digest;
    }
    if update.clear_quiet {
        prefs.quiet_hours_start = None;
        prefs.quiet_hours_end = None;
    }
    if let Some(start) = update.quiet_start {
        prefs.quiet_hours_start = Some(notify::validate_quiet_hour(start)?);
    }
    if let Some(end) = update.quiet_end {
        prefs.quiet_hours_end = Some(notify::validate_quiet_hour(end)?);
    }

    db.save_preferences(&prefs)?;
    println!("Notification preferences saved.");
    Ok(())
}
