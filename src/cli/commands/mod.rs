//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod access_key;
mod init;
mod maintenance;
mod schedules;
mod serve;
mod tools;
mod user;
mod worker;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};
use crate::repository::UserSpec;

#[derive(Parser)]
#[command(name = "meteodist")]
#[command(about = "Meteorological data distribution backend")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides config file)
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory, databases and scheduler store
    Init,

    /// Start the REST API server
    Serve {
        /// Address to bind, e.g. 0.0.0.0:5000 (defaults to the configured one)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run an extraction worker
    Worker {
        /// Queues to consume (comma separated, defaults to all)
        #[arg(short, long, value_delimiter = ',')]
        queues: Vec<String>,
    },

    /// Run the periodic scheduler
    Beat {
        /// Seconds between scheduler ticks
        #[arg(long, default_value = "5")]
        interval: u64,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage access keys
    AccessKey {
        #[command(subcommand)]
        command: AccessKeyCommands,
    },

    /// Manage recurring extractions
    Schedules {
        #[command(subcommand)]
        command: ScheduleCommands,
    },

    /// Out-of-band maintenance jobs
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommands,
    },

    /// Format pipeline tools
    Tools {
        #[command(subcommand)]
        command: ToolsCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Create {
        /// Login email
        email: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Disk quota in bytes (0 = unlimited)
        #[arg(long, default_value = "0")]
        quota: i64,
        /// Maximum submissions per hour (0 = unlimited)
        #[arg(long, default_value = "0")]
        hourly_limit: i32,
        /// Days after which finished requests expire
        #[arg(long)]
        expiration_days: Option<i32>,
        /// Delete expired requests automatically
        #[arg(long, requires = "expiration_days")]
        auto_delete: bool,
    },
    /// Grant a user access to a dataset
    Grant {
        /// Login email
        email: String,
        /// Dataset name
        dataset: String,
    },
}

#[derive(Subcommand)]
enum AccessKeyCommands {
    /// Issue a new key for a user, invalidating the previous one
    Regenerate {
        /// Login email
        email: String,
        /// Days until the key expires (never, if omitted)
        #[arg(long)]
        expires_days: Option<i64>,
        /// Free-form key scope
        #[arg(long)]
        scope: Option<String>,
    },
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// Resolve schedules left pending by an interrupted registration
    Reconcile,
}

#[derive(Subcommand)]
enum MaintenanceCommands {
    /// Fail requests stuck in a non-terminal state
    ReconcilePending {
        /// Run continuously
        #[arg(long)]
        daemon: bool,
        /// Seconds between runs in daemon mode
        #[arg(long, default_value = "3600")]
        interval: u64,
    },
    /// Remove output files without a ledger row and rows without a file
    SweepOrphans {
        /// Run continuously
        #[arg(long)]
        daemon: bool,
        /// Seconds between runs in daemon mode
        #[arg(long, default_value = "3600")]
        interval: u64,
    },
    /// Delete expired requests of users with automatic deletion
    ExpireRequests {
        /// Run continuously
        #[arg(long)]
        daemon: bool,
        /// Seconds between runs in daemon mode
        #[arg(long, default_value = "86400")]
        interval: u64,
    },
    /// Delete old rows from the aggregation store
    PruneAggregations {
        /// Retention in days (defaults to the configured one)
        #[arg(long)]
        days: Option<i64>,
        /// Run continuously
        #[arg(long)]
        daemon: bool,
        /// Seconds between runs in daemon mode
        #[arg(long, default_value = "86400")]
        interval: u64,
    },
}

#[derive(Subcommand)]
enum ToolsCommands {
    /// Convert between BUFR and JSON lines
    Convert {
        /// Input file
        input: PathBuf,
        /// Target format: json or bufr
        #[arg(short, long)]
        format: String,
        /// Output file (defaults to <stem>.<format> next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check the structure of an uploaded zip archive
    ValidateArchive {
        /// Archive path
        path: PathBuf,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        data: cli.data,
    };
    let (settings, _config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.bind.clone());
            serve::cmd_serve(settings, &bind).await
        }
        Commands::Worker { queues } => worker::cmd_worker(settings, queues).await,
        Commands::Beat { interval } => schedules::cmd_beat(&settings, interval).await,
        Commands::User { command } => match command {
            UserCommands::Create {
                email,
                name,
                quota,
                hourly_limit,
                expiration_days,
                auto_delete,
            } => {
                let mut spec = UserSpec::new(&email, name.as_deref().unwrap_or(&email));
                spec.disk_quota = quota;
                spec.max_requests_per_hour = hourly_limit;
                spec.request_expiration_days = expiration_days;
                spec.auto_delete = auto_delete;
                user::cmd_user_create(&settings, &spec).await
            }
            UserCommands::Grant { email, dataset } => {
                user::cmd_user_grant(&settings, &email, &dataset).await
            }
        },
        Commands::AccessKey { command } => match command {
            AccessKeyCommands::Regenerate {
                email,
                expires_days,
                scope,
            } => access_key::cmd_regenerate(&settings, &email, expires_days, scope).await,
        },
        Commands::Schedules { command } => match command {
            ScheduleCommands::Reconcile => schedules::cmd_reconcile(&settings).await,
        },
        Commands::Maintenance { command } => match command {
            MaintenanceCommands::ReconcilePending { daemon, interval } => {
                maintenance::cmd_reconcile_pending(&settings, daemon, interval).await
            }
            MaintenanceCommands::SweepOrphans { daemon, interval } => {
                maintenance::cmd_sweep_orphans(&settings, daemon, interval).await
            }
            MaintenanceCommands::ExpireRequests { daemon, interval } => {
                maintenance::cmd_expire_requests(&settings, daemon, interval).await
            }
            MaintenanceCommands::PruneAggregations {
                days,
                daemon,
                interval,
            } => maintenance::cmd_prune_aggregations(&settings, days, daemon, interval).await,
        },
        Commands::Tools { command } => match command {
            ToolsCommands::Convert {
                input,
                format,
                output,
            } => tools::cmd_convert(&settings, &input, &format, output.as_deref()),
            ToolsCommands::ValidateArchive { path } => tools::cmd_validate_archive(&path),
        },
    }
}
