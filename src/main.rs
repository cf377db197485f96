use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use runbook_scheduler::config::{LogFormat, LoggingConfig, SchedulerConfig};
use runbook_scheduler::scheduler::{CreateSchedule, Frequency, SystemClock};

#[derive(Parser)]
#[command(
    name = "runbook-scheduler",
    about = "Background scheduler that triggers runbook executions on a cadence",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "RUNBOOK_SCHEDULER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + scheduler loop)
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a single evaluation pass and exit
    Tick,

    /// Manage schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List the schedules of a runbook
    List {
        /// Runbook ID
        #[arg(long)]
        runbook: String,
    },

    /// Add a new schedule
    Add {
        /// Runbook ID
        #[arg(long)]
        runbook: String,

        /// Schedule name
        #[arg(long)]
        name: String,

        /// HOURLY, DAILY, WEEKLY, MONTHLY or CRON
        #[arg(long)]
        frequency: Frequency,

        /// Cron expression (5-field), required with CRON
        #[arg(long)]
        cron: Option<String>,

        /// Advisory timezone label
        #[arg(long)]
        timezone: Option<String>,

        /// Deployment environment passed to executions
        #[arg(long)]
        environment: String,

        /// Stop firing after this RFC 3339 timestamp
        #[arg(long)]
        ends_at: Option<DateTime<Utc>>,

        /// Actor recorded as the schedule's creator
        #[arg(long)]
        created_by: Option<String>,
    },

    /// Remove a schedule
    Remove {
        /// Schedule ID
        #[arg(long)]
        id: String,
    },

    /// Pause a schedule
    Pause {
        /// Schedule ID
        #[arg(long)]
        id: String,
    },

    /// Resume a paused schedule
    Resume {
        /// Schedule ID
        #[arg(long)]
        id: String,
    },

    /// Preview the next runs of a schedule
    Preview {
        /// Schedule ID
        #[arg(long)]
        id: String,

        /// Number of runs to show
        #[arg(long, default_value = "5")]
        count: usize,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn fmt_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = SchedulerConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting runbook scheduler daemon");
            runbook_scheduler::serve(&config).await?;
        }
        Commands::Tick => {
            let summary = runbook_scheduler::tick_once(&config).await?;
            println!(
                "Evaluated {} schedule(s): {} triggered, {} failed.",
                summary.evaluated, summary.triggered, summary.failed
            );
        }
        Commands::Schedule { action } => {
            let pool = runbook_scheduler::storage::open_pool(&config.storage.path)?;
            let service = runbook_scheduler::assemble(pool, &config, Arc::new(SystemClock)).service;

            match action {
                ScheduleAction::List { runbook } => {
                    let list = service.list_for_runbook(&runbook).await?;
                    if list.is_empty() {
                        println!("No schedules configured for runbook '{}'.", runbook);
                    } else {
                        println!(
                            "{:<36} | {:<20} | {:<8} | {:<15} | {:<6} | Next run",
                            "ID", "Name", "Freq", "Cron", "Active"
                        );
                        println!("{:-<36}-|-{:-<20}-|-{:-<8}-|-{:-<15}-|-{:-<6}-|-{:-<25}", "", "", "", "", "", "");
                        for s in list {
                            println!(
                                "{:<36} | {:<20} | {:<8} | {:<15} | {:<6} | {}",
                                s.id,
                                s.name,
                                s.frequency,
                                s.cron_expression.as_deref().unwrap_or("-"),
                                s.is_active,
                                fmt_time(s.next_run_at)
                            );
                        }
                    }
                }
                ScheduleAction::Add {
                    runbook,
                    name,
                    frequency,
                    cron,
                    timezone,
                    environment,
                    ends_at,
                    created_by,
                } => {
                    let schedule = service
                        .create(CreateSchedule {
                            runbook_id: runbook,
                            name,
                            frequency,
                            cron_expression: cron,
                            timezone,
                            environment,
                            ends_at,
                            created_by,
                        })
                        .await?;
                    println!(
                        "Schedule '{}' added ({}), next run {}.",
                        schedule.name,
                        schedule.id,
                        fmt_time(schedule.next_run_at)
                    );
                }
                ScheduleAction::Remove { id } => {
                    service.delete(&id).await?;
                    println!("Schedule '{}' removed.", id);
                }
                ScheduleAction::Pause { id } => {
                    let schedule = service.pause(&id).await?;
                    println!("Schedule '{}' paused.", schedule.name);
                }
                ScheduleAction::Resume { id } => {
                    let schedule = service.resume(&id).await?;
                    println!(
                        "Schedule '{}' resumed, next run {}.",
                        schedule.name,
                        fmt_time(schedule.next_run_at)
                    );
                }
                ScheduleAction::Preview { id, count } => {
                    let runs = service.preview(&id, count).await?;
                    if runs.is_empty() {
                        println!("No upcoming runs for schedule '{}'.", id);
                    } else {
                        println!("Upcoming runs for '{}':", id);
                        for t in runs {
                            println!("{}", t.to_rfc3339());
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
