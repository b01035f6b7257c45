//! Collector job: fills the gap between the most recent stored observation
//! and today.
//!
//! Each run reads the stored watermark (max stored date), computes the
//! remaining fetch range, and walks it in upstream-sized windows. A window
//! is fully persisted before the next one is requested, so an interrupted
//! run resumes from the last durable row instead of refetching everything.
//! A window whose fetch survives the bounded retry loop is never skipped:
//! skipping would commit a permanent hole, so the run aborts instead.

use crate::gap::{self, DateRange};
use crate::models::{DailyFigures, Observation};
use crate::provider::{ProviderError, WeatherDataSource};
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct Collector<S> {
    source: S,
    fallback_start_date: NaiveDate,
    window_days: u32,
    busy: Mutex<()>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CollectorStats {
    pub windows_fetched: usize,
    pub rows_inserted: usize,
    /// Dates already stored, the idempotent re-run path.
    pub rows_skipped: usize,
    /// Dates lost to data errors: unusable upstream slots or rejected inserts.
    pub rows_dropped: usize,
}

impl<S: WeatherDataSource> Collector<S> {
    pub fn new(source: S, fallback_start_date: NaiveDate, window_days: u32) -> Self {
        Self {
            source,
            fallback_start_date,
            window_days,
            busy: Mutex::new(()),
        }
    }

    pub async fn run(&self, repo: &Repository) -> Result<CollectorStats> {
        self.run_as_of(repo, Utc::now().date_naive()).await
    }

    /// One collection pass with an explicit "today" boundary.
    pub async fn run_as_of(&self, repo: &Repository, today: NaiveDate) -> Result<CollectorStats> {
        let Ok(_guard) = self.busy.try_lock() else {
            warn!("Collector run already in flight, skipping this tick");
            return Ok(CollectorStats::default());
        };

        let mut stats = CollectorStats::default();

        let last_stored = repo.max_stored_date()?;
        let Some(range) = gap::next_range(last_stored, self.fallback_start_date, today) else {
            info!("Store is current through {:?}, nothing to fetch", last_stored);
            return Ok(stats);
        };

        info!("Fetch gap: {} ({} days)", range, range.len_days());
        let run_id = repo.begin_job_run("collector").unwrap_or(0);

        let outcome = self.fetch_range(repo, range, &mut stats).await;
        repo.finish_job_run(
            run_id,
            stats.rows_inserted,
            outcome.as_ref().err().map(|e| format!("{:#}", e)).as_deref(),
        )
        .ok();

        info!(
            "Collector pass done: {} windows, {} inserted, {} skipped, {} dropped",
            stats.windows_fetched, stats.rows_inserted, stats.rows_skipped, stats.rows_dropped
        );
        outcome.map(|()| stats)
    }

    async fn fetch_range(
        &self,
        repo: &Repository,
        range: DateRange,
        stats: &mut CollectorStats,
    ) -> Result<()> {
        for window in range.windows(self.window_days) {
            let figures = self
                .source
                .fetch_daily(window)
                .await
                .with_context(|| format!("Upstream fetch failed for {}", window))?;

            if (figures.len() as u64) < window.len_days() {
                warn!(
                    "Upstream returned {} of {} slots for {}",
                    figures.len(),
                    window.len_days(),
                    window
                );
            }

            let rows = map_window(window, &figures);
            let unusable = window.len_days() as usize - rows.len();

            let inserted = repo.insert_observations(&rows)?;
            stats.windows_fetched += 1;
            stats.rows_inserted += inserted.inserted;
            stats.rows_skipped += inserted.skipped;
            stats.rows_dropped += inserted.failed + unusable;

            info!(
                "Window {}: {} inserted, {} already stored",
                window, inserted.inserted, inserted.skipped
            );
        }
        Ok(())
    }
}

/// Map per-offset provider slots onto consecutive dates from the window
/// start. Slots missing either figure are logged and dropped.
fn map_window(window: DateRange, figures: &[DailyFigures]) -> Vec<Observation> {
    window
        .days()
        .zip(figures.iter())
        .filter_map(|(date, slot)| match (slot.temperature_mean, slot.precipitation_probability) {
            (Some(temperature), Some(precipitation)) => {
                Some(Observation::new(date, temperature, precipitation))
            }
            _ => {
                warn!("No usable figures for {}, skipping", date);
                None
            }
        })
        .collect()
}

/// True when `err` carries the one condition that must take the process
/// down: the upstream retry budget ran out mid-gap.
pub fn is_retries_exhausted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ProviderError>()
            .is_some_and(|p| matches!(p, ProviderError::RetriesExhausted { .. }))
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
