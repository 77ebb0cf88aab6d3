use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use uptimed::admin::{Admin, MonitorSummary};
use uptimed::config::Config;
use uptimed::database::models::{DEFAULT_EXPECTED_STATUS, Monitor, MonitorType, TimeFrame};
use uptimed::database::open_database;
use uptimed::monitoring::validation::ValidationError;
use uptimed::monitoring::{MonitoringExecutor, Probe, Status, stats};
use uptimed::notify::{self, DiscordConfig, MailgunConfig, NotifierConfig, SlackConfig};
use uptimed::orchestrator::Orchestrator;

/// Uptime monitoring daemon and its administration commands.
#[derive(Parser)]
#[command(name = "uptimed", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitoring service until interrupted (default).
    Run,
    /// Print the effective configuration.
    Config,
    #[command(flatten)]
    Admin(AdminCommand),
}

/// Commands that open the store directly
#[derive(Subcommand)]
enum AdminCommand {
    /// Add a monitor.
    Add(MonitorArgs),
    /// Change fields of an existing monitor.
    Edit(EditArgs),
    /// Stop checking a monitor without deleting it.
    Pause { name: String },
    /// Resume checking a paused monitor.
    Resume { name: String },
    /// Delete a monitor.
    Remove {
        name: String,
        /// Also delete its status and history.
        #[arg(long)]
        history: bool,
    },
    /// List monitors with their current state.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show recorded results of a monitor, newest first.
    History {
        name: String,
        /// hour, day, week, month, year or all.
        #[arg(short, long, default_value = "day")]
        window: TimeFrame,
        /// Show only the first entry of each run of identical status codes.
        #[arg(long)]
        compact: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show uptime and latency aggregates of a monitor.
    Uptime {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete history recorded before a date (YYYY-MM-DD, UTC).
    Purge {
        name: String,
        #[arg(value_parser = parse_date)]
        before: NaiveDate,
    },
    /// Probe a monitor once and print the result without recording it.
    Check { name: String },
    /// Manage notifiers.
    #[command(subcommand)]
    Notifier(NotifierCommand),
}

#[derive(Args)]
struct MonitorArgs {
    name: String,
    url: String,
    #[arg(short = 't', long = "type", default_value = "http")]
    monitor_type: MonitorType,
    /// Poll period, e.g. 30s or 5m.
    #[arg(short, long, default_value = "1m")]
    frequency: String,
    /// Probe timeout; empty uses the configured default.
    #[arg(long, default_value = "")]
    timeout: String,
    #[arg(short, long, default_value_t = DEFAULT_EXPECTED_STATUS)]
    expected_status: u16,
    /// Notifier to alert, repeatable.
    #[arg(short, long = "notifier")]
    notifiers: Vec<String>,
    /// Create the monitor paused.
    #[arg(long)]
    paused: bool,
}

impl MonitorArgs {
    fn into_monitor(self) -> Monitor {
        Monitor {
            name: self.name,
            url: self.url,
            monitor_type: self.monitor_type,
            frequency: self.frequency,
            timeout: self.timeout,
            expected_status_code: self.expected_status,
            active: !self.paused,
            notifiers: self.notifiers,
        }
    }
}

#[derive(Args)]
struct EditArgs {
    name: String,
    #[arg(long)]
    url: Option<String>,
    #[arg(short = 't', long = "type")]
    monitor_type: Option<MonitorType>,
    #[arg(short, long)]
    frequency: Option<String>,
    #[arg(long)]
    timeout: Option<String>,
    #[arg(short, long)]
    expected_status: Option<u16>,
    /// Replace the notifier list, repeatable.
    #[arg(short, long = "notifier")]
    notifiers: Option<Vec<String>>,
}

impl EditArgs {
    fn apply(self, monitor: &mut Monitor) {
        if let Some(url) = self.url {
            monitor.url = url;
        }
        if let Some(monitor_type) = self.monitor_type {
            monitor.monitor_type = monitor_type;
        }
        if let Some(frequency) = self.frequency {
            monitor.frequency = frequency;
        }
        if let Some(timeout) = self.timeout {
            monitor.timeout = timeout;
        }
        if let Some(expected) = self.expected_status {
            monitor.expected_status_code = expected;
        }
        if let Some(notifiers) = self.notifiers {
            monitor.notifiers = notifiers;
        }
    }
}

#[derive(Subcommand)]
enum NotifierCommand {
    /// Store a new notifier.
    #[command(subcommand)]
    Add(NotifierKind),
    /// List stored notifiers.
    List,
    /// Delete a notifier and detach it from every monitor.
    Remove { name: String },
    /// Send a test message through a notifier.
    Test { name: String },
}

#[derive(Subcommand)]
enum NotifierKind {
    Slack {
        name: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        channel: String,
    },
    Discord {
        name: String,
        /// Webhook URL.
        #[arg(long)]
        url: String,
    },
    Mailgun {
        name: String,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        domain: String,
        /// Recipient address, repeatable.
        #[arg(long = "recipient", required = true)]
        recipients: Vec<String>,
    },
}

impl NotifierKind {
    fn into_config(self) -> (String, NotifierConfig) {
        match self {
            NotifierKind::Slack { name, token, channel } => (name, NotifierConfig::Slack(SlackConfig { token, channel })),
            NotifierKind::Discord { name, url } => (name, NotifierConfig::Discord(DiscordConfig { url })),
            NotifierKind::Mailgun { name, api_key, domain, recipients } => {
                (name, NotifierConfig::Mailgun(MailgunConfig { api_key, domain, recipients }))
            }
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate(s.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref()).context("loading configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            // Flushes the log file on exit.
            let _log_guard = match &config.log.file {
                Some(file) => Some(
                    logger::init_tracing_with_file(file)
                        .with_context(|| format!("opening log file {}", file.display()))?,
                ),
                None => {
                    logger::init_tracing();
                    None
                }
            };
            info!(version = env!("CARGO_PKG_VERSION"), "starting uptimed");
            Orchestrator::start(config).await
        }
        Command::Config => {
            print!("{config}");
            Ok(())
        }
        Command::Admin(command) => {
            logger::init_tracing();
            administer(&config, command).await
        }
    }
}

/// Run one administration command against the store directly.
///
/// The store is single-process, so this fails while the service is running.
async fn administer(config: &Config, command: AdminCommand) -> Result<()> {
    let database = open_database(&config.database.path, config.database.open_attempts, config.database.open_backoff)
        .await
        .with_context(|| format!("failed to open database {}", config.database.path.display()))?;
    let store = database.store().clone();
    let admin = Admin::new(Arc::new(database));

    let result = dispatch(config, &admin, command).await;
    store.flush().context("failed to flush database")?;
    result
}

async fn dispatch(config: &Config, admin: &Admin, command: AdminCommand) -> Result<()> {
    match command {
        AdminCommand::Add(args) => {
            let monitor = args.into_monitor();
            admin.create_monitor(&monitor).await?;
            println!("added monitor {}", monitor.name);
        }
        AdminCommand::Edit(args) => {
            let mut monitor = admin.get_monitor(&args.name).await?;
            args.apply(&mut monitor);
            admin.edit_monitor(&monitor).await?;
            println!("updated monitor {}", monitor.name);
        }
        AdminCommand::Pause { name } => {
            admin.pause_monitor(&name).await?;
            println!("paused monitor {name}");
        }
        AdminCommand::Resume { name } => {
            admin.resume_monitor(&name).await?;
            println!("resumed monitor {name}");
        }
        AdminCommand::Remove { name, history } => {
            admin.delete_monitor(&name, history).await?;
            println!("removed monitor {name}");
        }
        AdminCommand::List { json } => {
            let summaries = admin.list_monitors_for_display().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                print_summaries(&summaries);
            }
        }
        AdminCommand::History { name, window, compact, json } => {
            let mut history = admin.get_history(&name, window).await?;
            if compact {
                // Runs are collapsed oldest first so each run keeps its first entry.
                history.reverse();
                history = stats::compact(&history);
                history.reverse();
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else {
                history.iter().for_each(print_status);
            }
        }
        AdminCommand::Uptime { name, json } => {
            let details = admin.get_uptime_details(&name).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                println!("{} {}", details.monitor.name, details.monitor.url);
                for stats in [&details.day, &details.month] {
                    println!(
                        "  {:<6} {:>7.2}%  avg {}ms  ({} samples)",
                        stats.window, stats.uptime_percent, stats.average_latency_ms, stats.samples
                    );
                }
                details.history.iter().take(10).for_each(print_status);
            }
        }
        AdminCommand::Purge { name, before } => {
            let removed = admin.purge_history(&name, before).await?;
            println!("removed {removed} history entries of {name}");
        }
        AdminCommand::Check { name } => {
            let monitor = admin.get_monitor(&name).await?;
            let executor = MonitoringExecutor::new(config.probe_policy()).context("failed to build HTTP client")?;
            let status = executor.probe(&monitor, &CancellationToken::new()).await;
            print_status(&status);
        }
        AdminCommand::Notifier(NotifierCommand::Add(kind)) => {
            let (name, notifier) = kind.into_config();
            admin.create_notifier(&name, &notifier).await?;
            println!("added {} notifier {name}", notifier.kind());
        }
        AdminCommand::Notifier(NotifierCommand::List) => {
            for (name, notifier) in admin.list_notifiers().await? {
                println!("{name:<24} {}", notifier.kind());
            }
        }
        AdminCommand::Notifier(NotifierCommand::Remove { name }) => {
            admin.delete_notifier(&name).await?;
            println!("removed notifier {name}");
        }
        AdminCommand::Notifier(NotifierCommand::Test { name }) => {
            let client = notify::http_client().context("failed to build notifier client")?;
            admin.test_notifier(&name, &client).await?;
            println!("test message sent through {name}");
        }
    }
    Ok(())
}

fn print_summaries(summaries: &[MonitorSummary]) {
    for summary in summaries {
        let state = match (summary.monitor.active, summary.up) {
            (false, _) => "paused",
            (true, true) => "up",
            (true, false) => "down",
        };
        let last = summary.status.as_ref().map(|s| s.status_text.as_str()).unwrap_or("-");
        println!(
            "{:<24} {:<6} {:>7.2}%  {:<24} {}",
            summary.monitor.name, state, summary.uptime_percent, last, summary.monitor.url
        );
    }
}

fn print_status(status: &Status) {
    println!(
        "{}  {:<24} {:>6}ms  cert {}d",
        status.timestamp.format("%Y-%m-%d %H:%M:%S"),
        status.status_text,
        status.response_latency.as_millis(),
        status.certificate_days_remaining
    );
}
