mod collector;
mod config;
mod daemon;
mod gap;
mod mailer;
mod models;
mod notifier;
mod provider;
mod storage;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::collector::Collector;
use crate::config::AppConfig;
use crate::daemon::Daemon;
use crate::mailer::SmtpMailer;
use crate::notifier::Notifier;
use crate::provider::WeatherComProvider;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "weather-monitor", about = "Weather observation collector and digest notifier", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run both jobs on their schedules until terminated
    Run,

    /// One collector pass: fetch and store the missing days, then exit
    Collect,

    /// One notifier pass: send a digest and advance the watermark, then exit
    Notify,

    /// Show database statistics
    Stats,

    /// Apply schema migrations without collecting data
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "weather_monitor=info,warn",
        1 => "weather_monitor=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run => {
            Daemon::new(config).run().await?;
        }

        Command::Collect => {
            let repo = Repository::open(&config.storage.db_path)?;
            if config.storage.run_migrations {
                repo.run_migrations()?;
            }

            let collector = Collector::new(
                WeatherComProvider::new(&config.provider)?,
                config.fallback_start_date,
                config.provider.window_days,
            );
            let stats = collector.run(&repo).await?;
            info!(
                "Done: {} windows, {} rows inserted, {} skipped, {} dropped",
                stats.windows_fetched, stats.rows_inserted, stats.rows_skipped, stats.rows_dropped
            );
        }

        Command::Notify => {
            let repo = Repository::open(&config.storage.db_path)?;
            if config.storage.run_migrations {
                repo.run_migrations()?;
            }

            let notifier = Notifier::new(
                SmtpMailer::new(&config.mail)?,
                config.notifier.thresholds(),
                config.fallback_start_date,
                config.mail.subject.clone(),
            );
            let stats = notifier.run(&repo).await?;
            info!(
                "Done: {} matched, {} dates marked emailed",
                stats.rows_matched, stats.dates_marked
            );
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let total = repo.observation_count()?;
            let emailed = repo.emailed_count()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  Weather Monitor — Database");
            println!("─────────────────────────────────");
            println!("  Observations : {}", total);
            println!("  Emailed      : {}", emailed);
            println!("  Pending      : {}", total - emailed);
            println!("  From         : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To           : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
