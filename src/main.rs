use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use ticketdesk::activity::{ActivityPatch, NewActivityReport};
use ticketdesk::commands::{self, parse_date, parse_day};
use ticketdesk::config::{self, Config};
use ticketdesk::lifecycle::{NewTicket, Schedule, TicketPatch};
use ticketdesk::metrics::parse_clock;
use ticketdesk::models::{ActivityType, Channel, DigestFrequency, NotificationKind, Priority, Role, Status, TicketType, UserPatch};
use ticketdesk::timetrack::{EntryFilter, NewTimeEntry, TimeEntryPatch};
use ticketdesk::visibility::{AssigneeFilter, TicketFilter};

#[derive(Parser)]
#[command(name = "ticketdesk")]
#[command(about = "Role-aware support and feature ticket desk")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to the nearest .ticketdesk above the current directory)
    #[arg(long, global = true, env = "TICKETDESK_DIR")]
    dir: Option<PathBuf>,

    /// Acting user id
    #[arg(long = "as", global = true, env = "TICKETDESK_USER")]
    acting_user: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize ticketdesk in the current directory
    Init {
        /// Create the first project manager with this name
        #[arg(long)]
        admin: Option<String>,
    },

    /// Show who you are acting as
    Whoami,

    /// Dashboard cards for the acting user
    Dashboard {
        #[arg(long)]
        json: bool,
    },

    /// Create a new ticket
    Create {
        /// Ticket title
        title: String,
        /// Ticket description
        #[arg(short, long)]
        description: Option<String>,
        /// Ticket type (support, feature)
        #[arg(short = 't', long = "type", default_value = "support")]
        ticket_type: TicketType,
        /// Priority (critical, high, normal, low)
        #[arg(short, long, default_value = "normal")]
        priority: Priority,
        /// Branch id (defaults to your own)
        #[arg(long)]
        branch: Option<i64>,
        /// Developer to assign right away (project managers only)
        #[arg(long)]
        assignee: Option<i64>,
        #[command(flatten)]
        planning: Planning,
    },

    /// List tickets visible to you
    List {
        /// Assignee filter: all, me, unassigned or a user id
        #[arg(short, long)]
        assignee: Option<AssigneeFilter>,
        #[arg(short, long)]
        status: Option<Status>,
        #[arg(short = 't', long = "type")]
        ticket_type: Option<TicketType>,
        #[arg(short, long)]
        priority: Option<Priority>,
        #[arg(long)]
        branch: Option<i64>,
        #[arg(long)]
        json: bool,
    },

    /// Show ticket details
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },

    /// Edit ticket fields
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short = 't', long = "type")]
        ticket_type: Option<TicketType>,
        #[arg(short, long)]
        priority: Option<Priority>,
        #[command(flatten)]
        planning: Planning,
    },

    /// Move a ticket to the next status (in_progress, review, done)
    Advance {
        id: i64,
        status: Status,
    },

    /// Reopen a completed ticket
    Reopen {
        id: i64,
        /// Why the ticket is not done
        #[arg(short, long)]
        reason: String,
    },

    /// Assign a ticket to a developer
    Assign {
        id: i64,
        /// Developer user id
        assignee: i64,
        /// Planned start (YYYY-MM-DD)
        #[arg(long, value_parser = parse_day)]
        start: Option<DateTime<Utc>>,
        /// Target date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_day)]
        end: Option<DateTime<Utc>>,
    },

    /// Add a comment to a ticket
    Comment {
        id: i64,
        text: String,
    },

    /// Track time with a running timer
    Timer {
        #[command(subcommand)]
        action: TimerCommands,
    },

    /// Log and review time entries
    Time {
        #[command(subcommand)]
        action: TimeCommands,
    },

    /// Daily activity reports
    Activity {
        #[command(subcommand)]
        action: ActivityCommands,
    },

    /// Weekly, SLA and standup reports
    Report {
        #[command(subcommand)]
        action: ReportCommands,
    },

    /// In-app notifications
    Notify {
        #[command(subcommand)]
        action: NotifyCommands,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserCommands,
    },

    /// Manage branches
    Branch {
        #[command(subcommand)]
        action: BranchCommands,
    },

    /// On-call roster
    Oncall {
        #[command(subcommand)]
        action: OncallCommands,
    },
}

#[derive(Args)]
struct Planning {
    /// Planned start (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    start: Option<DateTime<Utc>>,
    /// Target date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    end: Option<DateTime<Utc>>,
    /// Hard due date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    due: Option<DateTime<Utc>>,
    /// SLA budget in hours from creation
    #[arg(long)]
    sla_hours: Option<f64>,
    /// Estimated effort in hours
    #[arg(long)]
    estimate: Option<f64>,
}

#[derive(Subcommand)]
enum TimerCommands {
    /// Start a timer on a ticket
    Start {
        id: i64,
        #[arg(short, long)]
        activity: Option<ActivityType>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Stop the running timer and log the time
    Stop {
        #[arg(long)]
        non_billable: bool,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Show the running timer
    Status,
}

#[derive(Subcommand)]
enum TimeCommands {
    /// Log hours on a ticket
    Log {
        id: i64,
        /// Hours in quarter steps
        hours: f64,
        #[arg(short, long)]
        activity: Option<ActivityType>,
        #[arg(long)]
        non_billable: bool,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Time entries on a ticket
    List {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Your own time entries
    Mine {
        #[arg(long)]
        json: bool,
    },
    /// Edit a time entry
    Edit {
        entry: i64,
        #[arg(long)]
        hours: Option<f64>,
        #[arg(short, long)]
        activity: Option<ActivityType>,
        #[arg(long)]
        billable: Option<bool>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a time entry
    Delete { entry: i64 },
    /// Time statistics for a ticket
    Stats {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Time statistics for a user (yourself by default)
    User {
        id: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Team time summary (project managers only)
    Summary {
        #[arg(long, value_parser = parse_date)]
        from: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date)]
        to: Option<NaiveDate>,
        #[arg(long)]
        ticket: Option<i64>,
        #[arg(long)]
        user: Option<i64>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ActivityCommands {
    /// File an activity report
    Add {
        /// Start time (HH:MM)
        #[arg(value_parser = clock)]
        start: NaiveTime,
        /// End time (HH:MM)
        #[arg(value_parser = clock)]
        end: NaiveTime,
        /// What you worked on
        description: String,
        /// Day of the report (defaults to today)
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        #[arg(short, long, default_value = "coding")]
        activity: ActivityType,
        #[arg(long)]
        ticket: Option<i64>,
        /// Branch id (project managers only; defaults to yours)
        #[arg(long)]
        branch: Option<i64>,
        #[arg(long)]
        feature: Option<String>,
        #[arg(long)]
        accomplishments: Option<String>,
        #[arg(long)]
        blockers: Option<String>,
    },
    /// List activity reports
    List {
        #[arg(long)]
        user: Option<i64>,
        #[arg(long, value_parser = parse_date)]
        from: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date)]
        to: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Show one report
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Edit one of your reports
    Edit {
        id: i64,
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        #[arg(long, value_parser = clock)]
        start: Option<NaiveTime>,
        #[arg(long, value_parser = clock)]
        end: Option<NaiveTime>,
        #[arg(short, long)]
        activity: Option<ActivityType>,
        #[arg(long)]
        ticket: Option<i64>,
        #[arg(long)]
        feature: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        accomplishments: Option<String>,
        #[arg(long)]
        blockers: Option<String>,
    },
    /// Delete one of your reports
    Delete { id: i64 },
    /// Totals over reports
    Summary {
        #[arg(long)]
        user: Option<i64>,
        #[arg(long, value_parser = parse_date)]
        from: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date)]
        to: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ReportCommands {
    /// Weekly throughput (defaults to this week)
    Weekly {
        #[arg(long, value_parser = parse_date)]
        week: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Tickets near or past their due time
    Sla {
        /// Also notify the people responsible
        #[arg(long)]
        notify: bool,
        #[arg(long)]
        json: bool,
    },
    /// Standup digest (yourself by default)
    Standup {
        #[arg(long)]
        user: Option<i64>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum NotifyCommands {
    /// List notifications
    List {
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        json: bool,
    },
    /// Mark a notification as read
    Read { id: i64 },
    /// Mark everything as read
    ReadAll,
    /// Delete a notification
    Delete { id: i64 },
    /// Print the unread count
    Count,
    /// Poll the unread count until interrupted
    Watch {
        /// Seconds between polls (1 to 86400)
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=86_400))]
        interval: u64,
    },
    /// Notification preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsCommands,
    },
}

#[derive(Subcommand)]
enum PrefsCommands {
    /// Show preferences
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Change preferences
    Set {
        /// Channel to toggle (email, app); requires --kind and --enabled
        #[arg(long, requires_all = ["kind", "enabled"])]
        channel: Option<Channel>,
        #[arg(long)]
        kind: Option<NotificationKind>,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        digest: Option<DigestFrequency>,
        #[arg(long)]
        quiet_start: Option<i64>,
        #[arg(long)]
        quiet_end: Option<i64>,
        /// Turn quiet hours off
        #[arg(long, conflicts_with_all = ["quiet_start", "quiet_end"])]
        no_quiet: bool,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Add a user (project managers only)
    Add {
        name: String,
        #[arg(short, long)]
        role: Role,
        #[arg(long)]
        branch: Option<i64>,
    },
    /// Change a user's name, role or branch (project managers only)
    Edit {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        role: Option<Role>,
        #[arg(long)]
        branch: Option<i64>,
    },
    /// List users
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum BranchCommands {
    /// Add a branch (project managers only)
    Add { name: String },
    /// List branches
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum OncallCommands {
    /// Replace the roster with a rotation over these user ids
    Seed {
        #[arg(required = true)]
        users: Vec<i64>,
    },
    /// Who is on call this week
    Current,
    /// List the roster
    Roster {
        #[arg(long)]
        json: bool,
    },
}

fn clock(value: &str) -> std::result::Result<NaiveTime, String> {
    parse_clock(value).map_err(|e| e.to_string())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if config::log_json_enabled() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt).init();
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Init { admin } = &cli.command {
        let root = match &cli.dir {
            Some(dir) => dir.clone(),
            None => env::current_dir()?,
        };
        return commands::init::run(&root, admin.as_deref());
    }

    let config = Config::resolve(cli.dir.as_deref(), cli.acting_user)?;
    let db = config.open_db()?;

    // Directory listings do not need a session.
    match &cli.command {
        Commands::Branch {
            action: BranchCommands::List { json },
        } => return commands::directory::branch_list(&db, *json),
        Commands::Oncall {
            action: OncallCommands::Roster { json },
        } => return commands::oncall::roster(&db, *json),
        Commands::Oncall {
            action: OncallCommands::Current,
        } => return commands::oncall::current(&db),
        Commands::Report {
            action: ReportCommands::Weekly { week, json },
        } => return commands::report::weekly(&db, *week, *json),
        _ => {}
    }

    let session = config.session(&db)?;

    match cli.command {
        Commands::Init { .. } => Ok(()),

        Commands::Whoami => commands::directory::whoami(&db, &session),

        Commands::Dashboard { json } => commands::dashboard::run(&db, &session, json),

        Commands::Create {
            title,
            description,
            ticket_type,
            priority,
            branch,
            assignee,
            planning,
        } => {
            let mut new = NewTicket::new(&title, ticket_type, priority);
            new.description = description;
            new.branch_id = branch;
            new.assignee_id = assignee;
            new.start_date = planning.start;
            new.end_date = planning.end;
            new.due_at = planning.due;
            new.sla_hours = planning.sla_hours;
            new.estimated_hours = planning.estimate;
            commands::create::run(&db, &session, new)
        }

        Commands::List {
            assignee,
            status,
            ticket_type,
            priority,
            branch,
            json,
        } => {
            let filter = TicketFilter {
                assignee,
                branch_id: branch,
                ticket_type,
                priority,
                status,
            };
            commands::list::run(&db, &session, &filter, json)
        }

        Commands::Show { id, json } => commands::show::run(&db, &session, id, json),

        Commands::Update {
            id,
            title,
            description,
            ticket_type,
            priority,
            planning,
        } => {
            let patch = TicketPatch {
                title,
                description,
                ticket_type,
                priority,
                start_date: planning.start,
                end_date: planning.end,
                due_at: planning.due,
                sla_hours: planning.sla_hours,
                estimated_hours: planning.estimate,
            };
            commands::update::run(&db, &session, id, patch)
        }

        Commands::Advance { id, status } => commands::status::advance(&db, &session, id, status),

        Commands::Reopen { id, reason } => commands::status::reopen(&db, &session, id, &reason),

        Commands::Assign {
            id,
            assignee,
            start,
            end,
        } => {
            let schedule = Schedule {
                start_date: start,
                end_date: end,
            };
            commands::assign::run(&db, &session, id, assignee, schedule)
        }

        Commands::Comment { id, text } => commands::comment::run(&db, &session, id, &text),

        Commands::Timer { action } => match action {
            TimerCommands::Start {
                id,
                activity,
                description,
            } => commands::timer::start(&db, &session, id, activity, description.as_deref()),
            TimerCommands::Stop {
                non_billable,
                description,
            } => commands::timer::stop(&db, &session, non_billable, description.as_deref()),
            TimerCommands::Status => commands::timer::status(&db, &session),
        },

        Commands::Time { action } => match action {
            TimeCommands::Log {
                id,
                hours,
                activity,
                non_billable,
                description,
            } => {
                let mut entry = NewTimeEntry::manual(id, hours, Utc::now());
                entry.activity_type = activity;
                entry.is_billable = !non_billable;
                entry.description = description;
                commands::time::log(&db, &session, entry)
            }
            TimeCommands::List { id, json } => commands::time::list(&db, &session, id, json),
            TimeCommands::Mine { json } => commands::time::mine(&db, &session, json),
            TimeCommands::Edit {
                entry,
                hours,
                activity,
                billable,
                description,
            } => {
                let patch = TimeEntryPatch {
                    hours,
                    activity_type: activity,
                    is_billable: billable,
                    description,
                };
                commands::time::edit(&db, &session, entry, patch)
            }
            TimeCommands::Delete { entry } => commands::time::delete(&db, &session, entry),
            TimeCommands::Stats { id, json } => commands::time::stats(&db, &session, id, json),
            TimeCommands::User { id, json } => commands::time::user_stats(&db, &session, id, json),
            TimeCommands::Summary {
                from,
                to,
                ticket,
                user,
                json,
            } => {
                let filter = EntryFilter {
                    from,
                    to,
                    ticket_id: ticket,
                    user_id: user,
                };
                commands::time::summary(&db, &session, &filter, json)
            }
        },

        Commands::Activity { action } => match action {
            ActivityCommands::Add {
                start,
                end,
                description,
                date,
                activity,
                ticket,
                branch,
                feature,
                accomplishments,
                blockers,
            } => {
                let report = NewActivityReport {
                    date: date.unwrap_or_else(|| Utc::now().date_naive()),
                    start_time: start,
                    end_time: end,
                    activity_type: activity,
                    ticket_id: ticket,
                    branch_id: branch,
                    feature_worked: feature,
                    description,
                    accomplishments,
                    blockers,
                };
                commands::activity::add(&db, &session, report)
            }
            ActivityCommands::List { user, from, to, json } => {
                commands::activity::list(&db, &session, user, from, to, json)
            }
            ActivityCommands::Show { id, json } => commands::activity::show(&db, &session, id, json),
            ActivityCommands::Edit {
                id,
                date,
                start,
                end,
                activity,
                ticket,
                feature,
                description,
                accomplishments,
                blockers,
            } => {
                let patch = ActivityPatch {
                    date,
                    start_time: start,
                    end_time: end,
                    activity_type: activity,
                    ticket_id: ticket,
                    feature_worked: feature,
                    description,
                    accomplishments,
                    blockers,
                };
                commands::activity::edit(&db, &session, id, patch)
            }
            ActivityCommands::Delete { id } => commands::activity::delete(&db, &session, id),
            ActivityCommands::Summary { user, from, to, json } => {
                commands::activity::summary(&db, &session, user, from, to, json)
            }
        },

        Commands::Report { action } => match action {
            ReportCommands::Weekly { week, json } => commands::report::weekly(&db, week, json),
            ReportCommands::Sla { notify, json } => commands::report::sla(&db, &session, notify, json),
            ReportCommands::Standup { user, json } => commands::report::standup(&db, &session, user, json),
        },

        Commands::Notify { action } => match action {
            NotifyCommands::List { unread, json } => commands::notify::list(&db, &session, unread, json),
            NotifyCommands::Read { id } => commands::notify::read(&db, &session, id),
            NotifyCommands::ReadAll => commands::notify::read_all(&db, &session),
            NotifyCommands::Delete { id } => commands::notify::delete(&db, &session, id),
            NotifyCommands::Count => commands::notify::count(&db, &session),
            NotifyCommands::Watch { interval } => commands::notify::watch(&db, &session, interval),
            NotifyCommands::Prefs { action } => match action {
                PrefsCommands::Show { json } => commands::notify::prefs_show(&db, &session, json),
                PrefsCommands::Set {
                    channel,
                    kind,
                    enabled,
                    digest,
                    quiet_start,
                    quiet_end,
                    no_quiet,
                } => {
                    let toggle = match (channel, kind, enabled) {
                        (Some(c), Some(k), Some(e)) => Some((c, k, e)),
                        _ => None,
                    };
                    let update = commands::notify::PrefsUpdate {
                        toggle,
                        digest,
                        quiet_start,
                        quiet_end,
                        clear_quiet: no_quiet,
                    };
                    commands::notify::prefs_set(&db, &session, update)
                }
            },
        },

        Commands::User { action } => match action {
            UserCommands::Add { name, role, branch } => {
                commands::directory::user_add(&db, &session, &name, role, branch)
            }
            UserCommands::Edit { id, name, role, branch } => {
                let patch = UserPatch {
                    name,
                    role,
                    branch_id: branch,
                };
                commands::directory::user_edit(&db, &session, id, patch)
            }
            UserCommands::List { json } => commands::directory::user_list(&db, &session, json),
        },

        Commands::Branch { action } => match action {
            BranchCommands::Add { name } => commands::directory::branch_add(&db, &session, &name),
            BranchCommands::List { json } => commands::directory::branch_list(&db, json),
        },

        Commands::Oncall { action } => match action {
            OncallCommands::Seed { users } => commands::oncall::seed(&db, &session, &users),
            OncallCommands::Current => commands::oncall::current(&db),
            OncallCommands::Roster { json } => commands::oncall::roster(&db, json),
        },
    }
}
