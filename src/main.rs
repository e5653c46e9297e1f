use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use whatsapp_journey::attendance::CsvAttendance;
use whatsapp_journey::config::AppConfig;
use whatsapp_journey::dispatch::{Clock, SystemClock};
use whatsapp_journey::export::{write_contacts_to_file, ExportFormat};
use whatsapp_journey::ledger::{Ledger, SqliteLedger};
use whatsapp_journey::logging::init_logging;
use whatsapp_journey::messenger::{DryRunMessenger, HttpMessenger, Messenger};
use whatsapp_journey::metrics::MetricsCollector;
use whatsapp_journey::models::MemberStatus;
use whatsapp_journey::scheduler::JobFamily;
use whatsapp_journey::service::{Cadence, JourneyService};
use whatsapp_journey::validation::InputValidator;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file, layered over config/default and config/local
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Record messages instead of delivering them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Serve,
    /// Handle one inbound message
    Inbound {
        /// Provider contact id
        #[arg(short = 'i', long)]
        contact_id: String,

        /// Message text
        #[arg(short, long)]
        text: String,

        /// Receive time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Run one job family once
    Tick {
        /// reminders, sales, tree2, weekly_attendance or weekly_reinvite
        family: String,

        /// Tick time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Record a verified membership status
    Member {
        /// Provider contact id
        #[arg(short = 'i', long)]
        contact_id: String,

        /// prospect, trial or member
        #[arg(short, long)]
        status: String,

        /// Mark the payment as verified (or not)
        #[arg(long)]
        paid: Option<bool>,

        /// Record time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Reconcile attendance against a roster
    Reconcile {
        /// Roster CSV, defaults to the configured one
        #[arg(short, long)]
        roster: Option<PathBuf>,

        /// Reconcile time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Export every contact for the dashboard
    Export {
        /// Output format (csv or json)
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file
        #[arg(short, long, default_value = "./output/contacts.csv")]
        output: PathBuf,
    },
    /// List bookable sessions and their next occurrence
    Slots,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.dry_run {
        config.messenger.dry_run = true;
    }

    // Keep the guard alive so file logs flush on exit
    let _log_guard = init_logging(&config.logging)?;
    MetricsCollector::default().describe();

    info!(dry_run = config.messenger.dry_run, "Starting whatsapp-journey");

    match &cli.command {
        Commands::Serve => serve(&config).await?,
        Commands::Inbound { contact_id, text, at } => inbound(&config, contact_id, text, at.as_deref()).await?,
        Commands::Tick { family, at } => tick(&config, family, at.as_deref(), None).await?,
        Commands::Member { contact_id, status, paid, at } => {
            member(&config, contact_id, status, *paid, at.as_deref()).await?;
        }
        Commands::Reconcile { roster, at } => {
            tick(&config, JobFamily::WeeklyAttendance.as_str(), at.as_deref(), roster.as_deref()).await?;
        }
        Commands::Export { format, output } => export(&config, format, output).await?,
        Commands::Slots => slots(&config)?,
        Commands::Config => show_config(&config)?,
    }

    Ok(())
}

/// Build the service over the configured ledger and messenger
fn build_service(config: &AppConfig, roster: Option<&Path>) -> Result<Arc<JourneyService>> {
    let ledger: Arc<dyn Ledger> = Arc::new(
        SqliteLedger::open(&config.ledger.path)
            .with_context(|| format!("Failed to open ledger at {}", config.ledger.path.display()))?,
    );

    let messenger: Arc<dyn Messenger> = if config.messenger.dry_run {
        warn!("Dry run: messages are recorded, not delivered");
        Arc::new(DryRunMessenger::new())
    } else {
        let api_key = config
            .api_key()
            .context("messenger.api_key (or JOURNEY_API_KEY) is required unless running with --dry-run")?;
        Arc::new(HttpMessenger::new(
            &config.messenger.base_url,
            &api_key,
            Duration::from_secs(config.messenger.timeout_secs),
        )?)
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let roster_path = roster.map_or_else(|| config.scheduler.attendance_roster.clone(), Path::to_path_buf);
    let service = JourneyService::new(config, ledger, messenger, clock)?
        .with_attendance(Arc::new(CsvAttendance::new(roster_path)));

    Ok(Arc::new(service))
}

fn parse_instant(at: Option<&str>) -> Result<DateTime<Utc>> {
    at.map_or_else(
        || Ok(Utc::now()),
        |s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("Invalid timestamp: {s}. Expected RFC 3339, e.g. 2026-10-24T08:00:00Z"))
        },
    )
}

/// Run the scheduler until Ctrl-C
async fn serve(config: &AppConfig) -> Result<()> {
    let service = build_service(config, None)?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    };

    service.serve(Cadence::from_config(config), shutdown).await?;
    info!("Scheduler stopped");
    Ok(())
}

/// Handle one inbound message
async fn inbound(config: &AppConfig, contact_id: &str, text: &str, at: Option<&str>) -> Result<()> {
    let received_at = parse_instant(at)?;
    let service = build_service(config, None)?;

    let result = service.on_inbound_message(contact_id, text, received_at).await?;
    info!(
        contact_id = %result.contact.id,
        outcome = result.outcome.as_str(),
        step = %result.contact.step,
        delivered = result.dispatch.delivered.len(),
        window_expired = result.dispatch.window_expired.len(),
        failed = result.dispatch.failed.len(),
        "Inbound message handled"
    );
    Ok(())
}

/// Record a membership status
async fn member(config: &AppConfig, contact_id: &str, status: &str, paid: Option<bool>, at: Option<&str>) -> Result<()> {
    let status: MemberStatus = status.trim().to_lowercase().parse()?;
    let now = parse_instant(at)?;
    let service = build_service(config, None)?;

    let update = service.record_member_status(contact_id, status, paid, now).await?;
    info!(
        contact_id = %update.contact.id,
        status = update.contact.member.as_str(),
        changed = update.changed,
        welcome_delivered = update.dispatch.delivered.len(),
        window_expired = update.dispatch.window_expired.len(),
        "Member status recorded"
    );
    for failed in &update.dispatch.failed {
        error!(contact_id = %failed.contact_id, kind = %failed.kind, outcome = failed.outcome.as_str(), "Send needs attention");
    }
    Ok(())
}

/// Run one job family once
async fn tick(config: &AppConfig, family: &str, at: Option<&str>, roster: Option<&Path>) -> Result<()> {
    let family: JobFamily = family.parse()?;
    let now = parse_instant(at)?;
    let service = build_service(config, roster)?;

    let report = service.on_tick(family, now).await?;
    if report.errors > 0 {
        warn!(family = %family, errors = report.errors, "Tick finished with contact errors");
    }
    for failed in &report.dispatch.failed {
        error!(contact_id = %failed.contact_id, kind = %failed.kind, outcome = failed.outcome.as_str(), "Send needs attention");
    }
    Ok(())
}

/// Export every contact
async fn export(config: &AppConfig, format: &str, output: &Path) -> Result<()> {
    let format: ExportFormat = format.parse()?;
    InputValidator::validate_file_path(output)?;
    let ledger = SqliteLedger::open(&config.ledger.path)
        .with_context(|| format!("Failed to open ledger at {}", config.ledger.path.display()))?;

    let contacts = ledger.list_contacts().await?;
    write_contacts_to_file(&contacts, format, output)?;
    info!(contacts = contacts.len(), format = %format, path = %output.display(), "Export complete");
    Ok(())
}

/// List bookable sessions
#[allow(clippy::print_stdout)]
fn slots(config: &AppConfig) -> Result<()> {
    let catalog = config.catalog()?;
    let now = Utc::now();
    for code in catalog.codes() {
        let next = catalog.resolve(&code, now)?;
        println!("{code}  {}  next: {}", catalog.display(&code)?, catalog.local_date(next));
    }
    Ok(())
}

/// Print the effective configuration as YAML
#[allow(clippy::print_stdout)]
fn show_config(config: &AppConfig) -> Result<()> {
    let mut shown = config.clone();
    if shown.messenger.api_key.is_some() {
        shown.messenger.api_key = Some("********".to_string());
    }
    print!("{}", serde_yaml::to_string(&shown).context("Failed to render configuration")?);
    Ok(())
}
