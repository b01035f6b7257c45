//! Long-running scheduler: ties collector → storage ← notifier together.
//!
//! One cooperative loop services two interval tickers. Each tick runs its
//! job to completion before another tick is handled, and each job also
//! carries its own busy guard, so a run never overlaps a previous run of
//! the same job. The loop only ends on the single fatal condition: the
//! collector exhausting its upstream retry budget, which must stop the
//! process rather than leave a silent hole in the stored history.

use crate::collector::{Collector, is_retries_exhausted};
use crate::config::AppConfig;
use crate::mailer::SmtpMailer;
use crate::notifier::Notifier;
use crate::provider::WeatherComProvider;
use crate::storage::Repository;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

pub struct Daemon {
    config: AppConfig,
}

impl Daemon {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<()> {
        let repo = Repository::open(&self.config.storage.db_path)
            .context("Failed to open DuckDB")?;

        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let collector = Collector::new(
            WeatherComProvider::new(&self.config.provider)
                .context("Failed to build weather provider")?,
            self.config.fallback_start_date,
            self.config.provider.window_days,
        );

        let notifier = Notifier::new(
            SmtpMailer::new(&self.config.mail).context("Failed to build SMTP mailer")?,
            self.config.notifier.thresholds(),
            self.config.fallback_start_date,
            self.config.mail.subject.clone(),
        );

        let mut collect_tick =
            time::interval(Duration::from_secs(self.config.collector.interval_secs));
        let mut notify_tick =
            time::interval(Duration::from_secs(self.config.notifier.interval_secs));
        collect_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        notify_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Scheduler started: collector every {}s, notifier every {}s",
            self.config.collector.interval_secs, self.config.notifier.interval_secs
        );

        loop {
            tokio::select! {
                _ = collect_tick.tick() => {
                    match collector.run(&repo).await {
                        Ok(stats) => info!(
                            "Collector tick: {} windows, {} rows inserted",
                            stats.windows_fetched, stats.rows_inserted
                        ),
                        Err(e) if is_retries_exhausted(&e) => {
                            error!("Collector exhausted upstream retries: {:#}", e);
                            return Err(e).context("Collector retry budget exhausted, exiting");
                        }
                        Err(e) => error!("Collector run failed: {:#}", e),
                    }
                }
                _ = notify_tick.tick() => {
                    // Failed digests are retried on the next tick; the
                    // watermark is only advanced after a confirmed send.
                    match notifier.run(&repo).await {
                        Ok(stats) => info!(
                            "Notifier tick: {} matched, {} dates marked, sent: {}",
                            stats.rows_matched, stats.dates_marked, stats.digest_sent
                        ),
                        Err(e) => error!("Notifier run failed: {:#}", e),
                    }
                }
            }
        }
    }
}
