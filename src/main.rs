use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod cli;
mod core;
mod daemon;

#[derive(Parser)]
#[command(name = "smol-monitor")]
#[command(author, version, about = "Keeps an eye on Smol subscriptions and holiday mode")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling daemon
    Daemon,

    /// Show holiday mode and upcoming charges
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Only this account
        #[arg(long)]
        account: Option<String>,
    },

    /// Ask the running daemon to refresh now
    Refresh {
        /// Only this account
        #[arg(long)]
        account: Option<String>,
    },

    /// Start or end holiday mode
    Holiday {
        #[command(subcommand)]
        action: HolidayAction,
    },

    /// Move a subscription's next charge date
    ChargeDate {
        /// Subscription id, as shown by `status`
        #[arg(long)]
        subscription: String,

        /// New charge date (YYYY-MM-DD), at least tomorrow
        #[arg(long)]
        date: NaiveDate,

        #[arg(long)]
        account: Option<String>,
    },

    /// Verify the configured credentials
    Check {
        #[arg(long)]
        account: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum HolidayAction {
    /// Pause deliveries until a date
    Start {
        /// Last day of the holiday (YYYY-MM-DD)
        #[arg(long)]
        until: NaiveDate,

        #[arg(long)]
        account: Option<String>,
    },

    /// End holiday mode early
    End {
        #[arg(long)]
        account: Option<String>,
    },
}

fn init_logging(debug: bool, journald: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let journald_layer = if journald {
        tracing_journald::layer().ok()
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(journald_layer)
        .init();
}

/// Debug flag from the config file, if it can be read. Errors surface later
/// when the command loads settings for real.
fn debug_enabled() -> bool {
    crate::core::settings::Settings::load().map(|s| s.debug).unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon => {
            let settings = crate::core::settings::Settings::load()?;
            init_logging(settings.debug, true);
            daemon::run(settings).await
        }
        Commands::Status { json, account } => {
            init_logging(debug_enabled(), false);
            cli::status::run(json, account).await
        }
        Commands::Refresh { account } => {
            init_logging(debug_enabled(), false);
            cli::refresh::run(account).await
        }
        Commands::Holiday { action } => {
            init_logging(debug_enabled(), false);
            match action {
                HolidayAction::Start { until, account } => cli::holiday::start(until, account).await,
                HolidayAction::End { account } => cli::holiday::end(account).await,
            }
        }
        Commands::ChargeDate {
            subscription,
            date,
            account,
        } => {
            init_logging(debug_enabled(), false);
            cli::charge_date::run(subscription, date, account).await
        }
        Commands::Check { account } => {
            init_logging(debug_enabled(), false);
            cli::check::run(account).await
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}
