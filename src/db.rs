use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;

use crate::activity::NewActivityReport;
use crate::error::{Result, TicketError};
use crate::lifecycle::{NewTicket, TicketChange};
use crate::models::{
    ActiveTimer, ActivityReport, ActivityType, Branch, ChannelFlags, Comment, CommentKind,
    DigestFrequency, Notification, NotificationPreferences, OncallShift, Role, Ticket, TimeEntry,
    User, UserPatch,
};
use crate::notify::{self, NotificationDraft};
use crate::timetrack::{self, NewTimeEntry};

const SCHEMA_VERSION: i32 = 1;

const TICKET_COLUMNS: &str = "id, title, description, type, priority, status, reporter_id, assignee_id, branch_id, start_date, end_date, due_at, completed_at, sla_hours, estimated_hours, created_at, updated_at";
const TIME_ENTRY_COLUMNS: &str = "id, ticket_id, user_id, hours, activity_type, is_billable, description, logged_at, started_at, stopped_at";
const REPORT_COLUMNS: &str = "id, user_id, date, start_time, end_time, minutes_worked, activity_type, ticket_id, branch_id, feature_worked, description, accomplishments, blockers, created_at";
const NOTIFICATION_COLUMNS: &str = "id, user_id, type, title, message, ticket_id, related_user_id, is_read, read_at, created_at";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap_or(0);

        if version < SCHEMA_VERSION {
            self.conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS branches (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    role TEXT NOT NULL,
                    branch_id INTEGER,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (branch_id) REFERENCES branches(id)
                );

                CREATE TABLE IF NOT EXISTS tickets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    description TEXT,
                    type TEXT NOT NULL,
                    priority TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'backlog',
                    reporter_id INTEGER NOT NULL,
                    assignee_id INTEGER,
                    branch_id INTEGER,
                    start_date TEXT,
                    end_date TEXT,
                    due_at TEXT,
                    completed_at TEXT,
                    sla_hours REAL,
                    estimated_hours REAL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    FOREIGN KEY (reporter_id) REFERENCES users(id),
                    FOREIGN KEY (assignee_id) REFERENCES users(id),
                    FOREIGN KEY (branch_id) REFERENCES branches(id)
                );

                -- kind is NULL for rows imported before comments were tagged
                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    user_id INTEGER,
                    kind TEXT,
                    body TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS time_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    hours REAL NOT NULL,
                    activity_type TEXT,
                    is_billable INTEGER NOT NULL DEFAULT 1,
                    description TEXT,
                    logged_at TEXT NOT NULL,
                    started_at TEXT,
                    stopped_at TEXT,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE,
                    FOREIGN KEY (user_id) REFERENCES users(id)
                );

                CREATE TABLE IF NOT EXISTS active_timers (
                    user_id INTEGER PRIMARY KEY,
                    ticket_id INTEGER NOT NULL,
                    activity_type TEXT,
                    description TEXT,
                    started_at TEXT NOT NULL,
                    FOREIGN KEY (user_id) REFERENCES users(id),
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS activity_reports (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    date TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    end_time TEXT NOT NULL,
                    minutes_worked INTEGER NOT NULL,
                    activity_type TEXT NOT NULL,
                    ticket_id INTEGER,
                    branch_id INTEGER,
                    feature_worked TEXT,
                    description TEXT NOT NULL,
                    accomplishments TEXT,
                    blockers TEXT,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (user_id) REFERENCES users(id),
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE SET NULL
                );

                CREATE TABLE IF NOT EXISTS notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    type TEXT NOT NULL,
                    title TEXT NOT NULL,
                    message TEXT NOT NULL,
                    ticket_id INTEGER,
                    related_user_id INTEGER,
                    is_read INTEGER NOT NULL DEFAULT 0,
                    read_at TEXT,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (user_id) REFERENCES users(id),
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS notification_preferences (
                    user_id INTEGER PRIMARY KEY,
                    email_ticket_assigned INTEGER NOT NULL DEFAULT 1,
                    email_ticket_updated INTEGER NOT NULL DEFAULT 1,
                    email_ticket_commented INTEGER NOT NULL DEFAULT 1,
                    email_ticket_reopened INTEGER NOT NULL DEFAULT 1,
                    email_due_date_reminder INTEGER NOT NULL DEFAULT 1,
                    email_sla_alert INTEGER NOT NULL DEFAULT 1,
                    app_ticket_assigned INTEGER NOT NULL DEFAULT 1,
                    app_ticket_updated INTEGER NOT NULL DEFAULT 1,
                    app_ticket_commented INTEGER NOT NULL DEFAULT 1,
                    app_ticket_reopened INTEGER NOT NULL DEFAULT 1,
                    app_due_date_reminder INTEGER NOT NULL DEFAULT 1,
                    app_sla_alert INTEGER NOT NULL DEFAULT 1,
                    digest_frequency TEXT NOT NULL DEFAULT 'none',
                    quiet_hours_start INTEGER,
                    quiet_hours_end INTEGER,
                    FOREIGN KEY (user_id) REFERENCES users(id)
                );

                CREATE TABLE IF NOT EXISTS oncall_roster (
                    starts_on TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL,
                    FOREIGN KEY (user_id) REFERENCES users(id)
                );

                CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
                CREATE INDEX IF NOT EXISTS idx_tickets_assignee ON tickets(assignee_id);
                CREATE INDEX IF NOT EXISTS idx_tickets_branch ON tickets(branch_id);
                CREATE INDEX IF NOT EXISTS idx_comments_ticket ON comments(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_time_entries_ticket ON time_entries(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_time_entries_user ON time_entries(user_id);
                CREATE INDEX IF NOT EXISTS idx_reports_user_date ON activity_reports(user_id, date);
                CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, is_read);
                "#,
            )?;

            self.conn
                .execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
        }

        self.conn.execute("PRAGMA foreign_keys = ON", [])?;

        Ok(())
    }

    // Directory
    pub fn create_branch(&self, name: &str) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TicketError::Validation("Branch name cannot be empty".to_string()));
        }
        let existing: Option<i64> = self
            .conn
            .query_row("SELECT id FROM branches WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        if let Some(id) = existing {
            return Err(TicketError::Conflict(format!(
                "Branch '{}' already exists as #{}",
                name, id
            )));
        }
        self.conn
            .execute("INSERT INTO branches (name) VALUES (?1)", [name])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_branch(&self, id: i64) -> Result<Option<Branch>> {
        let branch = self
            .conn
            .query_row("SELECT id, name FROM branches WHERE id = ?1", [id], |row| {
                Ok(Branch {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .optional()?;
        Ok(branch)
    }

    pub fn list_branches(&self) -> Result<Vec<Branch>> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM branches ORDER BY name")?;
        let branches = stmt
            .query_map([], |row| {
                Ok(Branch {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(branches)
    }

    pub fn create_user(&self, name: &str, role: Role, branch_id: Option<i64>) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TicketError::Validation("User name cannot be empty".to_string()));
        }
        if let Some(branch) = branch_id {
            if self.get_branch(branch)?.is_none() {
                return Err(TicketError::not_found("Branch", branch));
            }
        }
        self.conn.execute(
            "INSERT INTO users (name, role, branch_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, role.as_str(), branch_id, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, name, role, branch_id, created_at FROM users WHERE id = ?1",
                [id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn update_user(&self, id: i64, patch: &UserPatch) -> Result<User> {
        let mut user = self.get_user(id)?.ok_or_else(|| TicketError::not_found("User", id))?;
        if let Some(name) = &patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(TicketError::Validation("User name cannot be empty".to_string()));
            }
            user.name = name.to_string();
        }
        if let Some(role) = patch.role {
            user.role = role;
        }
        if let Some(branch) = patch.branch_id {
            if self.get_branch(branch)?.is_none() {
                return Err(TicketError::not_found("Branch", branch));
            }
            user.branch_id = Some(branch);
        }

        self.conn.execute(
            "UPDATE users SET name = ?1, role = ?2, branch_id = ?3 WHERE id = ?4",
            params![user.name, user.role.as_str(), user.branch_id, id],
        )?;
        tracing::info!(user_id = id, role = %user.role, "user updated");
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, role, branch_id, created_at FROM users ORDER BY id")?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    // Tickets
    pub fn create_ticket(&self, new: &NewTicket, reporter_id: i64, now: DateTime<Utc>) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let stamp = now.to_rfc3339();
        tx.execute(
            "INSERT INTO tickets (title, description, type, priority, status, reporter_id, assignee_id, branch_id, start_date, end_date, due_at, sla_hours, estimated_hours, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'backlog', ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                new.title,
                new.description,
                new.ticket_type.as_str(),
                new.priority.as_str(),
                reporter_id,
                new.assignee_id,
                new.branch_id,
                new.start_date.map(|d| d.to_rfc3339()),
                new.end_date.map(|d| d.to_rfc3339()),
                new.due_at.map(|d| d.to_rfc3339()),
                new.sla_hours,
                new.estimated_hours,
                stamp,
            ],
        )?;
        let id = tx.last_insert_rowid();

        if new.assignee_id.is_some() {
            let ticket = query_ticket(&tx, id)?.ok_or_else(|| TicketError::not_found("Ticket", id))?;
            deliver(&tx, &notify::assigned(&ticket, None, Some(reporter_id)), now)?;
        }
        tx.commit()?;
        tracing::info!(ticket_id = id, reporter_id, "ticket created");
        Ok(id)
    }

    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>> {
        query_ticket(&self.conn, id)
    }

    pub fn require_ticket(&self, id: i64) -> Result<Ticket> {
        self.get_ticket(id)?
            .ok_or_else(|| TicketError::not_found("Ticket", id))
    }

    /// Every ticket in id order. Role narrowing happens in `visibility`.
    pub fn list_tickets(&self) -> Result<Vec<Ticket>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM tickets ORDER BY id", TICKET_COLUMNS))?;
        let tickets = stmt
            .query_map([], ticket_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tickets)
    }

    /// Persists a lifecycle change: ticket row, audit comment and
    /// notifications commit together or not at all.
    pub fn apply_change(&self, change: &TicketChange, now: DateTime<Utc>) -> Result<Option<i64>> {
        if !change.changed && change.comment.is_none() {
            return Ok(None);
        }
        let ticket = &change.ticket;
        let tx = self.conn.unchecked_transaction()?;

        if change.changed {
            let rows = tx.execute(
                "UPDATE tickets SET title = ?1, description = ?2, type = ?3, priority = ?4, status = ?5,
                     assignee_id = ?6, branch_id = ?7, start_date = ?8, end_date = ?9, due_at = ?10,
                     completed_at = ?11, sla_hours = ?12, estimated_hours = ?13, updated_at = ?14
                 WHERE id = ?15",
                params![
                    ticket.title,
                    ticket.description,
                    ticket.ticket_type.as_str(),
                    ticket.priority.as_str(),
                    ticket.status.as_str(),
                    ticket.assignee_id,
                    ticket.branch_id,
                    ticket.start_date.map(|d| d.to_rfc3339()),
                    ticket.end_date.map(|d| d.to_rfc3339()),
                    ticket.due_at.map(|d| d.to_rfc3339()),
                    ticket.completed_at.map(|d| d.to_rfc3339()),
                    ticket.sla_hours,
                    ticket.estimated_hours,
                    ticket.updated_at.to_rfc3339(),
                    ticket.id,
                ],
            )?;
            if rows == 0 {
                return Err(TicketError::not_found("Ticket", ticket.id));
            }
        }

        let comment_id = match &change.comment {
            Some(draft) => {
                tx.execute(
                    "INSERT INTO comments (ticket_id, user_id, kind, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        ticket.id,
                        draft.author_id,
                        draft.kind.as_str(),
                        draft.body,
                        now.to_rfc3339()
                    ],
                )?;
                Some(tx.last_insert_rowid())
            }
            None => None,
        };

        let delivered = deliver(&tx, &change.notifications, now)?;
        tx.commit()?;
        tracing::info!(
            ticket_id = ticket.id,
            status = %ticket.status,
            comment = comment_id.is_some(),
            notifications = delivered,
            "ticket change applied"
        );
        Ok(comment_id)
    }

    pub fn get_comments(&self, ticket_id: i64) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, user_id, kind, body, created_at FROM comments WHERE ticket_id = ?1 ORDER BY id",
        )?;
        let comments = stmt
            .query_map([ticket_id], |row| {
                let kind: Option<String> = row.get(3)?;
                let body: String = row.get(4)?;
                Ok(Comment {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    user_id: row.get(2)?,
                    kind: CommentKind::from_stored(kind.as_deref(), &body),
                    body,
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    // Time tracking
    pub fn insert_time_entry(&self, user_id: i64, entry: &NewTimeEntry) -> Result<i64> {
        insert_entry(&self.conn, user_id, entry)
    }

    pub fn get_time_entry(&self, id: i64) -> Result<Option<TimeEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {} FROM time_entries WHERE id = ?1", TIME_ENTRY_COLUMNS),
                [id],
                time_entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Entries newest first, optionally for one ticket and/or one user.
    pub fn list_time_entries(&self, ticket_id: Option<i64>, user_id: Option<i64>) -> Result<Vec<TimeEntry>> {
        let mut sql = format!("SELECT {} FROM time_entries", TIME_ENTRY_COLUMNS);
        let mut conditions = Vec::new();
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ticket) = ticket_id {
            conditions.push("ticket_id = ?");
            params_vec.push(Box::new(ticket));
        }
        if let Some(user) = user_id {
            conditions.push("user_id = ?");
            params_vec.push(Box::new(user));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY logged_at DESC, id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let entries = stmt
            .query_map(params_refs.as_slice(), time_entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn update_time_entry(&self, entry: &TimeEntry) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE time_entries SET hours = ?1, activity_type = ?2, is_billable = ?3, description = ?4 WHERE id = ?5",
            params![
                entry.hours,
                entry.activity_type.map(|a| a.as_str()),
                entry.is_billable,
                entry.description,
                entry.id
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_time_entry(&self, id: i64) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM time_entries WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    pub fn start_timer(
        &self,
        user_id: i64,
        ticket_id: i64,
        activity_type: Option<ActivityType>,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(active) = self.get_active_timer(user_id)? {
            return Err(TicketError::Conflict(format!(
                "Timer already running for ticket #{}",
                active.ticket_id
            )));
        }
        self.conn.execute(
            "INSERT INTO active_timers (user_id, ticket_id, activity_type, description, started_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                ticket_id,
                activity_type.map(|a| a.as_str()),
                description,
                now.to_rfc3339()
            ],
        )?;
        tracing::info!(user_id, ticket_id, "timer started");
        Ok(())
    }

    pub fn get_active_timer(&self, user_id: i64) -> Result<Option<ActiveTimer>> {
        let timer = self
            .conn
            .query_row(
                "SELECT user_id, ticket_id, activity_type, description, started_at FROM active_timers WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(ActiveTimer {
                        user_id: row.get(0)?,
                        ticket_id: row.get(1)?,
                        activity_type: opt_enum_col(row, 2)?,
                        description: row.get(3)?,
                        started_at: parse_datetime(row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(timer)
    }

    /// Turns the user's running timer into a time entry. `None` when nothing is running.
    pub fn stop_timer(
        &self,
        user_id: i64,
        is_billable: bool,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<TimeEntry>> {
        let timer = match self.get_active_timer(user_id)? {
            Some(t) => t,
            None => return Ok(None),
        };
        let entry = NewTimeEntry {
            ticket_id: timer.ticket_id,
            hours: timetrack::stopped_hours(timer.started_at, now),
            activity_type: timer.activity_type,
            is_billable,
            description: description.map(str::to_string).or(timer.description),
            logged_at: now,
            started_at: Some(timer.started_at),
            stopped_at: Some(now),
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM active_timers WHERE user_id = ?1", [user_id])?;
        let id = insert_entry(&tx, user_id, &entry)?;
        tx.commit()?;
        tracing::info!(user_id, ticket_id = entry.ticket_id, hours = entry.hours, "timer stopped");

        self.get_time_entry(id)
    }

    // Activity reports
    pub fn insert_activity_report(
        &self,
        user_id: i64,
        report: &NewActivityReport,
        minutes_worked: i64,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO activity_reports (user_id, date, start_time, end_time, minutes_worked, activity_type, ticket_id, branch_id, feature_worked, description, accomplishments, blockers, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                user_id,
                format_date(report.date),
                format_clock(report.start_time),
                format_clock(report.end_time),
                minutes_worked,
                report.activity_type.as_str(),
                report.ticket_id,
                report.branch_id,
                report.feature_worked,
                report.description,
                report.accomplishments,
                report.blockers,
                now.to_rfc3339(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(report_id = id, user_id, minutes_worked, "activity report filed");
        Ok(id)
    }

    pub fn get_activity_report(&self, id: i64) -> Result<Option<ActivityReport>> {
        let report = self
            .conn
            .query_row(
                &format!("SELECT {} FROM activity_reports WHERE id = ?1", REPORT_COLUMNS),
                [id],
                report_from_row,
            )
            .optional()?;
        Ok(report)
    }

    /// Reports newest day first. Date bounds are inclusive.
    pub fn list_activity_reports(
        &self,
        user_id: Option<i64>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<ActivityReport>> {
        let mut sql = format!("SELECT {} FROM activity_reports", REPORT_COLUMNS);
        let mut conditions = Vec::new();
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(user) = user_id {
            conditions.push("user_id = ?");
            params_vec.push(Box::new(user));
        }
        if let Some(from) = from {
            conditions.push("date >= ?");
            params_vec.push(Box::new(format_date(from)));
        }
        if let Some(to) = to {
            conditions.push("date <= ?");
            params_vec.push(Box::new(format_date(to)));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY date DESC, start_time DESC, id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let reports = stmt
            .query_map(params_refs.as_slice(), report_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(reports)
    }

    pub fn update_activity_report(&self, report: &ActivityReport) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE activity_reports SET date = ?1, start_time = ?2, end_time = ?3, minutes_worked = ?4, activity_type = ?5,
                 ticket_id = ?6, feature_worked = ?7, description = ?8, accomplishments = ?9, blockers = ?10
             WHERE id = ?11",
            params![
                format_date(report.date),
                format_clock(report.start_time),
                format_clock(report.end_time),
                report.minutes_worked,
                report.activity_type.as_str(),
                report.ticket_id,
                report.feature_worked,
                report.description,
                report.accomplishments,
                report.blockers,
                report.id,
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_activity_report(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM activity_reports WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    // Notifications
    /// Stores drafts that pass each recipient's preferences. Returns how many were kept.
    pub fn notify(&self, drafts: &[NotificationDraft], now: DateTime<Utc>) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let delivered = deliver(&tx, drafts, now)?;
        tx.commit()?;
        Ok(delivered)
    }

    pub fn list_notifications(&self, user_id: i64, unread_only: bool) -> Result<Vec<Notification>> {
        let mut sql = format!("SELECT {} FROM notifications WHERE user_id = ?1", NOTIFICATION_COLUMNS);
        if unread_only {
            sql.push_str(" AND is_read = 0");
        }
        sql.push_str(" ORDER BY id DESC");
        let mut stmt = self.conn.prepare(&sql)?;
        let notifications = stmt
            .query_map([user_id], |row| {
                Ok(Notification {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    kind: enum_col(row, 2)?,
                    title: row.get(3)?,
                    message: row.get(4)?,
                    ticket_id: row.get(5)?,
                    related_user_id: row.get(6)?,
                    is_read: row.get(7)?,
                    read_at: row.get::<_, Option<String>>(8)?.map(parse_datetime),
                    created_at: parse_datetime(row.get::<_, String>(9)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    pub fn mark_notification_read(&self, id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE notifications SET is_read = 1, read_at = COALESCE(read_at, ?1) WHERE id = ?2 AND user_id = ?3",
            params![now.to_rfc3339(), id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn mark_all_notifications_read(&self, user_id: i64, now: DateTime<Utc>) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE notifications SET is_read = 1, read_at = ?1 WHERE user_id = ?2 AND is_read = 0",
            params![now.to_rfc3339(), user_id],
        )?;
        Ok(rows)
    }

    pub fn delete_notification(&self, id: i64, user_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn unread_count(&self, user_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Reads preferences, creating the default row on first access.
    pub fn get_preferences(&self, user_id: i64) -> Result<NotificationPreferences> {
        self.conn.execute(
            "INSERT OR IGNORE INTO notification_preferences (user_id) VALUES (?1)",
            [user_id],
        )?;
        Ok(load_preferences(&self.conn, user_id)?
            .unwrap_or_else(|| NotificationPreferences::defaults_for(user_id)))
    }

    pub fn save_preferences(&self, prefs: &NotificationPreferences) -> Result<()> {
        let (e, a) = (&prefs.email, &prefs.app);
        self.conn.execute(
            "INSERT OR REPLACE INTO notification_preferences (
                 user_id,
                 email_ticket_assigned, email_ticket_updated, email_ticket_commented,
                 email_ticket_reopened, email_due_date_reminder, email_sla_alert,
                 app_ticket_assigned, app_ticket_updated, app_ticket_commented,
                 app_ticket_reopened, app_due_date_reminder, app_sla_alert,
                 digest_frequency, quiet_hours_start, quiet_hours_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                prefs.user_id,
                e.ticket_assigned,
                e.ticket_updated,
                e.ticket_commented,
                e.ticket_reopened,
                e.due_date_reminder,
                e.sla_alert,
                a.ticket_assigned,
                a.ticket_updated,
                a.ticket_commented,
                a.ticket_reopened,
                a.due_date_reminder,
                a.sla_alert,
                prefs.digest_frequency.as_str(),
                prefs.quiet_hours_start,
                prefs.quiet_hours_end,
            ],
        )?;
        Ok(())
    }

    // On-call
    pub fn replace_roster(&self, shifts: &[OncallShift]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM oncall_roster", [])?;
        for shift in shifts {
            tx.execute(
                "INSERT INTO oncall_roster (starts_on, user_id) VALUES (?1, ?2)",
                params![format_date(shift.starts_on), shift.user_id],
            )?;
        }
        tx.commit()?;
        tracing::info!(weeks = shifts.len(), "on-call roster replaced");
        Ok(())
    }

    pub fn list_roster(&self) -> Result<Vec<OncallShift>> {
        let mut stmt = self
            .conn
            .prepare("SELECT starts_on, user_id FROM oncall_roster ORDER BY starts_on")?;
        let shifts = stmt
            .query_map([], |row| {
                Ok(OncallShift {
                    starts_on: date_col(row, 0)?,
                    user_id: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(shifts)
    }
}

fn query_ticket(conn: &Connection, id: i64) -> Result<Option<Ticket>> {
    let ticket = conn
        .query_row(
            &format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS),
            [id],
            ticket_from_row,
        )
        .optional()?;
    Ok(ticket)
}

fn insert_entry(conn: &Connection, user_id: i64, entry: &NewTimeEntry) -> Result<i64> {
    conn.execute(
        "INSERT INTO time_entries (ticket_id, user_id, hours, activity_type, is_billable, description, logged_at, started_at, stopped_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.ticket_id,
            user_id,
            entry.hours,
            entry.activity_type.map(|a| a.as_str()),
            entry.is_billable,
            entry.description,
            entry.logged_at.to_rfc3339(),
            entry.started_at.map(|d| d.to_rfc3339()),
            entry.stopped_at.map(|d| d.to_rfc3339()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Inserts the drafts each recipient's app preferences allow.
fn deliver(conn: &Connection, drafts: &[NotificationDraft], now: DateTime<Utc>) -> Result<usize> {
    let mut delivered = 0;
    for draft in drafts {
        let prefs = load_preferences(conn, draft.user_id)?
            .unwrap_or_else(|| NotificationPreferences::defaults_for(draft.user_id));
        if !notify::deliverable(&prefs, draft.kind) {
            tracing::debug!(user_id = draft.user_id, kind = %draft.kind, "notification muted");
            continue;
        }
        conn.execute(
            "INSERT INTO notifications (user_id, type, title, message, ticket_id, related_user_id, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                draft.user_id,
                draft.kind.as_str(),
                draft.title,
                draft.message,
                draft.ticket_id,
                draft.related_user_id,
                now.to_rfc3339(),
            ],
        )?;
        delivered += 1;
    }
    Ok(delivered)
}

fn load_preferences(conn: &Connection, user_id: i64) -> Result<Option<NotificationPreferences>> {
    let prefs = conn
        .query_row(
            "SELECT user_id,
                    email_ticket_assigned, email_ticket_updated, email_ticket_commented,
                    email_ticket_reopened, email_due_date_reminder, email_sla_alert,
                    app_ticket_assigned, app_ticket_updated, app_ticket_commented,
                    app_ticket_reopened, app_due_date_reminder, app_sla_alert,
                    digest_frequency, quiet_hours_start, quiet_hours_end
             FROM notification_preferences WHERE user_id = ?1",
            [user_id],
            |row| {
                let flags = |offset: usize| -> rusqlite::Result<ChannelFlags> {
                    Ok(ChannelFlags {
                        ticket_assigned: row.get(offset)?,
                        ticket_updated: row.get(offset + 1)?,
                        ticket_commented: row.get(offset + 2)?,
                        ticket_reopened: row.get(offset + 3)?,
                        due_date_reminder: row.get(offset + 4)?,
                        sla_alert: row.get(offset + 5)?,
                    })
                };
                Ok(NotificationPreferences {
                    user_id: row.get(0)?,
                    email: flags(1)?,
                    app: flags(7)?,
                    digest_frequency: enum_col::<DigestFrequency>(row, 13)?,
                    quiet_hours_start: row.get(14)?,
                    quiet_hours_end: row.get(15)?,
                })
            },
        )
        .optional()?;
    Ok(prefs)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        role: enum_col(row, 2)?,
        branch_id: row.get(3)?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        ticket_type: enum_col(row, 3)?,
        priority: enum_col(row, 4)?,
        status: enum_col(row, 5)?,
        reporter_id: row.get(6)?,
        assignee_id: row.get(7)?,
        branch_id: row.get(8)?,
        start_date: row.get::<_, Option<String>>(9)?.map(parse_datetime),
        end_date: row.get::<_, Option<String>>(10)?.map(parse_datetime),
        due_at: row.get::<_, Option<String>>(11)?.map(parse_datetime),
        completed_at: row.get::<_, Option<String>>(12)?.map(parse_datetime),
        sla_hours: row.get(13)?,
        estimated_hours: row.get(14)?,
        created_at: parse_datetime(row.get::<_, String>(15)?),
        updated_at: parse_datetime(row.get::<_, String>(16)?),
    })
}

fn time_entry_from_row(row: &Row<'_>) -> rusqlite::Result<TimeEntry> {
    Ok(TimeEntry {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        user_id: row.get(2)?,
        hours: row.get(3)?,
        activity_type: opt_enum_col(row, 4)?,
        is_billable: row.get(5)?,
        description: row.get(6)?,
        logged_at: parse_datetime(row.get::<_, String>(7)?),
        started_at: row.get::<_, Option<String>>(8)?.map(parse_datetime),
        stopped_at: row.get::<_, Option<String>>(9)?.map(parse_datetime),
    })
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<ActivityReport> {
    Ok(ActivityReport {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date: date_col(row, 2)?,
        start_time: clock_col(row, 3)?,
        end_time: clock_col(row, 4)?,
        minutes_worked: row.get(5)?,
        activity_type: enum_col(row, 6)?,
        ticket_id: row.get(7)?,
        branch_id: row.get(8)?,
        feature_worked: row.get(9)?,
        description: row.get(10)?,
        accomplishments: row.get(11)?,
        blockers: row.get(12)?,
        created_at: parse_datetime(row.get::<_, String>(13)?),
    })
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn enum_col<T: FromStr<Err = TicketError>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn opt_enum_col<T: FromStr<Err = TicketError>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

fn clock_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|e| conversion_error(idx, e))
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn format_clock(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{self, Actor};
    use crate::models::{NotificationKind, Priority, Status, SystemEvent, TicketType};
    use crate::test_support::{seed_team, setup_test_db};

    #[test]
    fn test_schema_version_set() {
        let (db, _dir) = setup_test_db();
        let version: i32 = db
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_existing_database() {
        let (db, dir) = setup_test_db();
        db.create_branch("Porto").unwrap();
        drop(db);
        let again = Database::open(&dir.path().join("test.db")).unwrap();
        assert_eq!(again.list_branches().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_branch_conflicts() {
        let (db, _dir) = setup_test_db();
        db.create_branch("Porto").unwrap();
        let err = db.create_branch("Porto").unwrap_err();
        assert!(matches!(err, TicketError::Conflict(_)));
    }

    #[test]
    fn test_user_with_missing_branch() {
        let (db, _dir) = setup_test_db();
        let err = db.create_user("Ana", Role::Dev, Some(77)).unwrap_err();
        assert!(matches!(err, TicketError::NotFound { entity: "Branch", .. }));
    }

    #[test]
    fn test_update_user() {
        let (db, _dir) = setup_test_db();
        let porto = db.create_branch("Porto").unwrap();
        let id = db.create_user("Ana", Role::Requester, None).unwrap();

        let patch = UserPatch {
            name: Some("  Ana Sousa ".to_string()),
            role: Some(Role::Dev),
            branch_id: Some(porto),
        };
        let updated = db.update_user(id, &patch).unwrap();
        assert_eq!(updated.name, "Ana Sousa");
        assert_eq!(db.get_user(id).unwrap(), Some(updated));

        let err = db.update_user(99, &patch).unwrap_err();
        assert!(matches!(err, TicketError::NotFound { entity: "User", .. }));
        let bad_branch = UserPatch {
            branch_id: Some(77),
            ..UserPatch::default()
        };
        assert!(db.update_user(id, &bad_branch).is_err());
        assert_eq!(db.get_user(id).unwrap().unwrap().branch_id, Some(porto));
    }

    #[test]
    fn test_apply_change_writes_comment_and_notification() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let mut new = NewTicket::new("Printer jam", TicketType::Support, Priority::Normal);
        new.assignee_id = Some(team.dev.id);
        let id = db.create_ticket(&new, team.pm.id, Utc::now()).unwrap();
        assert_eq!(db.unread_count(team.dev.id).unwrap(), 1);

        let ticket = db.require_ticket(id).unwrap();
        let change =
            lifecycle::advance(&ticket, Status::InProgress, Actor::User(&team.dev), Utc::now()).unwrap();
        let comment_id = db.apply_change(&change, Utc::now()).unwrap();
        assert!(comment_id.is_some());

        let stored = db.require_ticket(id).unwrap();
        assert_eq!(stored.status, Status::InProgress);
        let comments = db.get_comments(id).unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].kind, CommentKind::System(SystemEvent::StatusChange));
        let pm_inbox = db.list_notifications(team.pm.id, true).unwrap();
        assert_eq!(pm_inbox[0].kind, NotificationKind::TicketStatusChanged);
    }

    #[test]
    fn test_apply_change_on_missing_ticket_rolls_back() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let id = db
            .create_ticket(&NewTicket::new("Ghost", TicketType::Support, Priority::Low), team.pm.id, Utc::now())
            .unwrap();
        let mut ticket = db.require_ticket(id).unwrap();
        ticket.assignee_id = Some(team.dev.id);
        let mut change =
            lifecycle::advance(&ticket, Status::InProgress, Actor::User(&team.dev), Utc::now()).unwrap();
        change.ticket.id = 999;

        assert!(db.apply_change(&change, Utc::now()).is_err());
        assert!(db.get_comments(999).unwrap().is_empty());
        assert_eq!(db.unread_count(team.pm.id).unwrap(), 0);
    }

    #[test]
    fn test_untagged_comments_are_sniffed() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let id = db
            .create_ticket(&NewTicket::new("Legacy", TicketType::Support, Priority::Low), team.pm.id, Utc::now())
            .unwrap();
        db.conn
            .execute(
                "INSERT INTO comments (ticket_id, user_id, kind, body, created_at) VALUES (?1, NULL, NULL, 'TICKET REOPENED by Rui', ?2)",
                params![id, Utc::now().to_rfc3339()],
            )
            .unwrap();
        let comments = db.get_comments(id).unwrap();
        assert_eq!(comments[0].kind, CommentKind::System(SystemEvent::Reopened));
    }

    #[test]
    fn test_timer_conflict_and_stop() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let id = db
            .create_ticket(&NewTicket::new("Slow VPN", TicketType::Support, Priority::High), team.pm.id, Utc::now())
            .unwrap();
        let start = Utc::now() - chrono::Duration::minutes(45);

        db.start_timer(team.dev.id, id, Some(ActivityType::Debugging), Some("tracing"), start)
            .unwrap();
        let err = db.start_timer(team.dev.id, id, None, None, Utc::now()).unwrap_err();
        assert!(matches!(err, TicketError::Conflict(_)));

        let entry = db
            .stop_timer(team.dev.id, true, None, start + chrono::Duration::minutes(45))
            .unwrap()
            .unwrap();
        assert_eq!(entry.hours, 0.75);
        assert_eq!(entry.description.as_deref(), Some("tracing"));
        assert_eq!(entry.activity_type, Some(ActivityType::Debugging));
        assert!(db.get_active_timer(team.dev.id).unwrap().is_none());
        assert!(db.stop_timer(team.dev.id, true, None, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_preferences_upsert_and_mute() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let mut prefs = db.get_preferences(team.dev.id).unwrap();
        assert_eq!(prefs, NotificationPreferences::defaults_for(team.dev.id));

        prefs.app.ticket_assigned = false;
        prefs.quiet_hours_start = Some(22);
        db.save_preferences(&prefs).unwrap();
        assert_eq!(db.get_preferences(team.dev.id).unwrap(), prefs);

        let mut new = NewTicket::new("Muted", TicketType::Feature, Priority::Low);
        new.assignee_id = Some(team.dev.id);
        db.create_ticket(&new, team.pm.id, Utc::now()).unwrap();
        assert_eq!(db.unread_count(team.dev.id).unwrap(), 0);
    }

    #[test]
    fn test_notification_read_flow() {
        let (db, _dir) = setup_test_db();
        let team = seed_team(&db);
        let mut new = NewTicket::new("Inbox", TicketType::Support, Priority::Low);
        new.assignee_id = Some(team.dev.id);
        db.create_ticket(&new, team.pm.id, Utc::now()).unwrap();
        db.create_ticket(&new, team.pm.id, Utc::now()).unwrap();

        let inbox = db.list_notifications(team.dev.id, false).unwrap();
        assert_eq!(inbox.len(), 2);
        assert!(inbox[0].id > inbox[1].id);

        assert!(!db.mark_notification_read(inbox[0].id, team.pm.id, Utc::now()).unwrap());
        assert!(db.mark_notification_read(inbox[0].id, team.dev.id, Utc::now()).unwrap());
        assert_eq!(db.unread_count(team.dev.id).unwrap(), 1);
        assert_eq!(db.mark_all_notifications_read(team.dev.id, Utc::now()).unwrap(), 1);
        assert!(db.delete_notification(inbox[1].id, team.dev.id).unwrap());
    }
}
