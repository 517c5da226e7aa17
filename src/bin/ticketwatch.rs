use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ticketwatch::alerting::{Acknowledgement, AlertState};
use ticketwatch::client::ApiClient;
use ticketwatch::config::MonitorConfig;
use ticketwatch::db::{self, SeaOrmTargetStore, TargetStore};
use ticketwatch::fetch::detector::PhraseSignalDetector;
use ticketwatch::fetch::HttpPageFetcher;
use ticketwatch::monitor::models::{format_last_checked, TargetPatch};
use ticketwatch::monitor::{Monitor, MonitorSettings};
use ticketwatch::notifications::NotificationService;
use ticketwatch::version::VERSION;
use ticketwatch::web::models::{CreateTargetRequest, TargetView};
use ticketwatch::web::create_axum_router;

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "ticketwatch", version = VERSION, about = "Watches ticket pages and alerts when tickets appear")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "ticketwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor daemon and its HTTP API.
    Run,
    #[command(flatten)]
    Client(ClientCommand),
}

/// Commands sent to a running daemon.
#[derive(Subcommand)]
enum ClientCommand {
    /// Add a page to watch.
    Add {
        locator: String,
        /// Check interval in minutes.
        #[arg(short, long)]
        interval: Option<i32>,
        /// Add the target paused.
        #[arg(long)]
        paused: bool,
    },
    /// List watched pages.
    List,
    /// Change a target's locator, interval or event details.
    Edit {
        id: i32,
        #[arg(long)]
        locator: Option<String>,
        #[arg(short, long)]
        interval: Option<i32>,
        /// Event name shown in alerts. Pass "" to clear.
        #[arg(long)]
        name: Option<String>,
        /// Event date shown in alerts. Pass "" to clear.
        #[arg(long)]
        date: Option<String>,
    },
    Enable { id: i32 },
    Disable { id: i32 },
    Remove { id: i32 },
    /// Show a target's check history, newest first.
    History { id: i32 },
    /// Check every active target right away.
    CheckNow,
    /// Silence the running alert.
    Ack {
        #[arg(value_enum, default_value = "dismiss")]
        kind: AckKind,
    },
    /// Fire a sample alert through the configured channels.
    TestAlert,
}

#[derive(Clone, Copy, ValueEnum)]
enum AckKind {
    OpenTarget,
    Dismiss,
    Foreground,
}

impl From<AckKind> for Acknowledgement {
    fn from(kind: AckKind) -> Self {
        match kind {
            AckKind::OpenTarget => Acknowledgement::OpenTarget,
            AckKind::Dismiss => Acknowledgement::Dismiss,
            AckKind::Foreground => Acknowledgement::Foreground,
        }
    }
}

fn init_logging(log_dir: &str) {
    // JSON to a daily rolling file
    let file_appender = rolling::daily(log_dir, "ticketwatch.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

fn init_client_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let config = MonitorConfig::load(Some(&cli.config))?;

    match cli.command {
        Command::Run => run_daemon(config).await,
        Command::Client(command) => {
            init_client_logging();
            run_client(command, &ApiClient::new(&config.api_url)).await
        }
    }
}

async fn run_daemon(config: MonitorConfig) -> Result<(), BoxError> {
    init_logging(&config.log_dir);
    info!(version = VERSION, "Starting ticketwatch...");

    let db = match db::connect(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, database_url = %config.database_url, "Failed to open database. Exiting.");
            return Err(e.into());
        }
    };
    let store: Arc<dyn TargetStore> = Arc::new(SeaOrmTargetStore::new(db));
    let fetcher = Arc::new(HttpPageFetcher::new(config.user_agent.clone())?);
    let notifier = Arc::new(NotificationService::new(
        config.channels.clone(),
        config.alert_repeat_interval(),
        config.alert_max_repeats,
    ));
    info!(channels = config.channels.len(), "Notification channels configured.");

    let monitor = Arc::new(Monitor::new(
        store,
        fetcher,
        Arc::new(PhraseSignalDetector),
        notifier,
        MonitorSettings {
            fetch_timeout: config.fetch_timeout(),
            max_concurrent_checks: config.max_concurrent_checks,
        },
    ));
    let report = monitor.start().await?;
    info!(armed = report.armed, "Monitor started.");

    let listener = tokio::net::TcpListener::bind(&config.listen_address).await?;
    info!(address = %config.listen_address, "HTTP API listening.");
    let serve_result = axum::serve(listener, create_axum_router(monitor.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    monitor.shutdown().await;
    serve_result?;
    info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal.");
        return std::future::pending().await;
    }
    info!("Shutdown signal received.");
}

async fn run_client(command: ClientCommand, client: &ApiClient) -> Result<(), BoxError> {
    match command {
        ClientCommand::Add {
            locator,
            interval,
            paused,
        } => {
            let view = client
                .create_target(&CreateTargetRequest {
                    locator,
                    interval_minutes: interval,
                    active: Some(!paused),
                })
                .await?;
            println!("Added target {}.", view.target.id);
            print_target(&view);
        }
        ClientCommand::List => {
            let targets = client.list_targets().await?;
            if targets.is_empty() {
                println!("No targets yet. Add one with `ticketwatch add <url>`.");
            }
            for view in &targets {
                print_target(view);
            }
        }
        ClientCommand::Edit {
            id,
            locator,
            interval,
            name,
            date,
        } => {
            let patch = TargetPatch {
                locator,
                interval_minutes: interval,
                active: None,
                event_name: name,
                event_date: date,
            };
            print_target(&client.update_target(id, &patch).await?);
        }
        ClientCommand::Enable { id } => set_active(client, id, true).await?,
        ClientCommand::Disable { id } => set_active(client, id, false).await?,
        ClientCommand::Remove { id } => {
            client.delete_target(id).await?;
            println!("Removed target {id}.");
        }
        ClientCommand::History { id } => {
            for entry in client.history(id).await? {
                println!(
                    "{}  {}",
                    format_last_checked(entry.timestamp, &Local),
                    entry.note
                );
            }
        }
        ClientCommand::CheckNow => {
            let summary = client.check_now().await?;
            println!(
                "Checking {} target(s), {} already in progress.",
                summary.enqueued, summary.skipped
            );
        }
        ClientCommand::Ack { kind } => {
            let outcome = client.acknowledge(kind.into()).await?;
            match outcome.previous {
                AlertState::Idle => println!("No alert was sounding."),
                AlertState::Alerting { target_id } => {
                    println!("Alert for target {target_id} stopped.")
                }
            }
            if let Some(link) = outcome.link {
                println!("Open: {link}");
            }
        }
        ClientCommand::TestAlert => {
            client.test_alert().await?;
            println!("Test alert sent.");
        }
    }
    Ok(())
}

async fn set_active(client: &ApiClient, id: i32, active: bool) -> Result<(), BoxError> {
    let patch = TargetPatch {
        active: Some(active),
        ..Default::default()
    };
    print_target(&client.update_target(id, &patch).await?);
    Ok(())
}

fn print_target(view: &TargetView) {
    let target = &view.target;
    let status = match (target.active, view.checking) {
        (false, _) => "paused".to_string(),
        (true, true) => "checking".to_string(),
        (true, false) => match view.next_check_in_seconds {
            Some(secs) => format!("next check in {secs}s"),
            None => "idle".to_string(),
        },
    };
    let signal = if target.signal_active { "  TICKETS AVAILABLE" } else { "" };
    println!(
        "[{}] {} ({}, every {} min)\n    {}\n    Last checked: {}  {}{}",
        target.id,
        target.display_name(),
        target.metadata.category,
        target.interval_minutes,
        target.locator,
        view.last_checked_display,
        status,
        signal,
    );
}
