//! Notifier job: digests the gap between the most recent emailed observation
//! and the most recent stored one.
//!
//! Each run scans the stored rows past the emailed watermark, mails one
//! digest of the days matching the alert thresholds, and only after the
//! send is confirmed advances the watermark over *every* scanned date,
//! matched or not, so a non-matching day is never re-evaluated. Marks are
//! applied strictly in ascending date order; if one fails, the advance stops
//! there and the emailed dates remain a chronological prefix of the stored
//! dates.

use crate::gap;
use crate::mailer::Mailer;
use crate::models::{Observation, Thresholds};
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub struct Notifier<M> {
    mailer: M,
    thresholds: Thresholds,
    fallback_start_date: NaiveDate,
    subject: String,
    busy: Mutex<()>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NotifierStats {
    pub rows_matched: usize,
    pub dates_marked: usize,
    pub digest_sent: bool,
}

impl<M: Mailer> Notifier<M> {
    pub fn new(
        mailer: M,
        thresholds: Thresholds,
        fallback_start_date: NaiveDate,
        subject: String,
    ) -> Self {
        Self {
            mailer,
            thresholds,
            fallback_start_date,
            subject,
            busy: Mutex::new(()),
        }
    }

    pub async fn run(&self, repo: &Repository) -> Result<NotifierStats> {
        let Ok(_guard) = self.busy.try_lock() else {
            warn!("Notifier run already in flight, skipping this tick");
            return Ok(NotifierStats::default());
        };

        let mut stats = NotifierStats::default();

        let floor = repo.max_emailed_date()?.unwrap_or(self.fallback_start_date);
        // The scan ceiling is read before the candidate select so rows the
        // collector lands mid-run are never marked without being scanned.
        let ceiling = repo.max_stored_date()?;

        let mut candidates = repo.unemailed_since(floor, &self.thresholds)?;
        if let Some(ceiling) = ceiling {
            candidates.retain(|obs| obs.date <= ceiling);
        }

        info!(
            "Scanned ({} .. {:?}]: {} day(s) match the thresholds",
            floor,
            ceiling,
            candidates.len()
        );

        let run_id = repo.begin_job_run("notifier").unwrap_or(0);

        let body = digest_body(&self.thresholds, &candidates);
        if let Err(e) = self.mailer.send(&self.subject, &body).await {
            repo.finish_job_run(run_id, 0, Some(&format!("{:#}", e))).ok();
            return Err(e).context("Digest send failed; watermark left unchanged");
        }
        stats.digest_sent = true;
        stats.rows_matched = candidates.len();

        let Some(ceiling) = ceiling else {
            repo.finish_job_run(run_id, 0, None).ok();
            return Ok(stats);
        };

        // Advance over every scanned date, strictly ascending.
        if let Some(mark_range) = gap::next_range(Some(floor), self.fallback_start_date, ceiling) {
            for date in mark_range.days() {
                match repo.mark_emailed(date) {
                    Ok(true) => stats.dates_marked += 1,
                    Ok(false) => debug!("No stored row for {}, nothing to mark", date),
                    Err(e) => {
                        error!("Watermark advance stopped at {}: {:#}", date, e);
                        repo.finish_job_run(
                            run_id,
                            stats.dates_marked,
                            Some(&format!("{:#}", e)),
                        )
                        .ok();
                        return Err(e).with_context(|| {
                            format!("Could not mark {} as emailed", date)
                        });
                    }
                }
            }
        }

        repo.finish_job_run(run_id, stats.dates_marked, None).ok();
        info!(
            "Digest cycle done: {} matched, {} dates marked emailed",
            stats.rows_matched, stats.dates_marked
        );
        Ok(stats)
    }
}

/// One line per qualifying day, ascending; an explicit no-results line keeps
/// an empty cycle distinguishable from a failed one.
pub fn digest_body(thresholds: &Thresholds, rows: &[Observation]) -> String {
    let mut body = format!(
        "Days with mean temperature between {}°C and {}°C or precipitation probability of at least {}%:\n\n",
        thresholds.temperature_min,
        thresholds.temperature_max,
        thresholds.precipitation_probability_min,
    );

    if rows.is_empty() {
        body.push_str("No results for this period.\n");
    } else {
        for obs in rows {
            body.push_str(&format!(
                "{} — temperature {:.1}°C, precipitation {:.0}%\n",
                obs.date, obs.temperature_mean, obs.precipitation_probability
            ));
        }
    }

    body
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            temperature_min: 15.0,
            temperature_max: 20.0,
            precipitation_probability_min: 50.0,
        }
    }

    fn insert(repo: &Repository, y: i32, m: u32, d: u32, temp: f64, precip: f64) {
        let stats = repo
            .insert_observations(&[Observation::new(date(y, m, d), temp, precip)])
            .unwrap();
        assert_eq!(stats.inserted, 1);
    }

    struct RecordingMailer {
        sent: StdMutex<Vec<(String, String)>>,
    }

    impl RecordingMailer {
        fn new() -> Self {
            Self { sent: StdMutex::new(Vec::new()) }
        }

        fn bodies(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
        }
    }

    #[async_trait::async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, subject: &str, body: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    struct FailingMailer;

    #[async_trait::async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _subject: &str, _body: &str) -> Result<()> {
            anyhow::bail!("smtp unreachable")
        }
    }

    fn notifier<M: Mailer>(mailer: M) -> Notifier<M> {
        // Fallback a day before the first stored row so nothing is excluded
        // by the strict `date >` floor.
        Notifier::new(mailer, thresholds(), date(2021, 12, 31), "Weather digest".to_string())
    }

    /// No unemailed row may precede an emailed one.
    fn assert_emailed_prefix(repo: &Repository, through: NaiveDate) {
        let max_emailed = repo.max_emailed_date().unwrap();
        for day in gap::DateRange::new(date(2022, 1, 1), through).unwrap().days() {
            if let Some(obs) = repo.observation(day).unwrap() {
                match max_emailed {
                    Some(watermark) => assert_eq!(obs.emailed, obs.date <= watermark),
                    None => assert!(!obs.emailed),
                }
            }
        }
    }

    #[tokio::test]
    async fn digest_lists_matching_days_ascending_and_marks_everything() {
        let repo = repo();
        insert(&repo, 2022, 1, 1, 17.5, 0.0); // matches: in band
        insert(&repo, 2022, 1, 2, 30.0, 80.0); // matches: precipitation
        insert(&repo, 2022, 1, 3, 25.0, 10.0); // no match
        insert(&repo, 2022, 1, 4, 16.0, 0.0); // matches: in band

        let notifier = notifier(RecordingMailer::new());
        let stats = notifier.run(&repo).await.unwrap();

        assert!(stats.digest_sent);
        assert_eq!(stats.rows_matched, 3);
        assert_eq!(stats.dates_marked, 4);

        let bodies = notifier.mailer.bodies();
        assert_eq!(bodies.len(), 1);
        let body = &bodies[0];
        assert!(body.contains("2022-01-01 — temperature 17.5°C, precipitation 0%"));
        assert!(body.contains("2022-01-02 — temperature 30.0°C, precipitation 80%"));
        assert!(body.contains("2022-01-04 — temperature 16.0°C, precipitation 0%"));
        assert!(!body.contains("2022-01-03"));
        assert!(
            body.find("2022-01-01").unwrap() < body.find("2022-01-02").unwrap()
                && body.find("2022-01-02").unwrap() < body.find("2022-01-04").unwrap()
        );

        // Scanned-but-unmatched days are marked too.
        assert!(repo.observation(date(2022, 1, 3)).unwrap().unwrap().emailed);
        assert_eq!(repo.max_emailed_date().unwrap(), Some(date(2022, 1, 4)));
        assert_emailed_prefix(&repo, date(2022, 1, 4));
    }

    #[tokio::test]
    async fn unmatched_day_is_absent_from_digest_but_marked() {
        // Thresholds (15, 20, 50); a stored 25°C/10% day matches nothing,
        // yet is emailed=true after the cycle.
        let repo = repo();
        insert(&repo, 2022, 2, 1, 25.0, 10.0);

        let notifier = notifier(RecordingMailer::new());
        let stats = notifier.run(&repo).await.unwrap();

        assert_eq!(stats.rows_matched, 0);
        assert_eq!(stats.dates_marked, 1);

        let bodies = notifier.mailer.bodies();
        assert!(!bodies[0].contains("2022-02-01 —"));
        assert!(bodies[0].contains("No results for this period."));
        assert!(repo.observation(date(2022, 2, 1)).unwrap().unwrap().emailed);
    }

    #[tokio::test]
    async fn empty_table_still_sends_a_no_results_digest() {
        let repo = repo();
        let notifier = notifier(RecordingMailer::new());

        let stats = notifier.run(&repo).await.unwrap();

        assert!(stats.digest_sent);
        assert_eq!(stats.dates_marked, 0);
        assert!(notifier.mailer.bodies()[0].contains("No results for this period."));
    }

    #[tokio::test]
    async fn failed_send_leaves_the_watermark_unchanged() {
        let repo = repo();
        insert(&repo, 2022, 1, 1, 17.5, 0.0);
        insert(&repo, 2022, 1, 2, 18.0, 0.0);

        let failing = notifier(FailingMailer);
        let err = failing.run(&repo).await.unwrap_err();
        assert!(format!("{:#}", err).contains("watermark left unchanged"));

        assert_eq!(repo.max_emailed_date().unwrap(), None);
        assert_eq!(repo.emailed_count().unwrap(), 0);

        // The retried cycle reproduces the identical candidate set.
        let retry = notifier(RecordingMailer::new());
        retry.run(&repo).await.unwrap();
        let body = &retry.mailer.bodies()[0];
        assert!(body.contains("2022-01-01"));
        assert!(body.contains("2022-01-02"));
        assert_eq!(repo.max_emailed_date().unwrap(), Some(date(2022, 1, 2)));
    }

    #[tokio::test]
    async fn successive_cycles_only_scan_past_the_watermark() {
        let repo = repo();
        insert(&repo, 2022, 1, 1, 17.5, 0.0);
        insert(&repo, 2022, 1, 2, 25.0, 10.0);

        let notifier = notifier(RecordingMailer::new());
        notifier.run(&repo).await.unwrap();
        assert_eq!(repo.max_emailed_date().unwrap(), Some(date(2022, 1, 2)));

        // New days arrive; the next cycle digests only those.
        insert(&repo, 2022, 1, 3, 16.0, 0.0);
        insert(&repo, 2022, 1, 4, 30.0, 90.0);
        let stats = notifier.run(&repo).await.unwrap();

        assert_eq!(stats.rows_matched, 2);
        assert_eq!(stats.dates_marked, 2);
        let second_body = &notifier.mailer.bodies()[1];
        assert!(!second_body.contains("2022-01-01"));
        assert!(second_body.contains("2022-01-03"));
        assert!(second_body.contains("2022-01-04"));
        assert_emailed_prefix(&repo, date(2022, 1, 4));
    }

    #[tokio::test]
    async fn zero_match_cycle_advances_through_all_scanned_dates() {
        let repo = repo();
        insert(&repo, 2022, 1, 1, 25.0, 10.0);
        insert(&repo, 2022, 1, 2, 26.0, 5.0);
        insert(&repo, 2022, 1, 3, 27.0, 0.0);

        let notifier = notifier(RecordingMailer::new());
        let stats = notifier.run(&repo).await.unwrap();

        assert_eq!(stats.rows_matched, 0);
        assert_eq!(stats.dates_marked, 3);
        assert_eq!(repo.max_emailed_date().unwrap(), Some(date(2022, 1, 3)));

        // The same gap is not re-scanned forever: the next cycle is empty.
        let stats = notifier.run(&repo).await.unwrap();
        assert_eq!(stats.dates_marked, 0);
        assert!(notifier.mailer.bodies()[1].contains("No results for this period."));
    }

    #[tokio::test]
    async fn concurrent_tick_is_skipped_while_busy() {
        let repo = repo();
        insert(&repo, 2022, 1, 1, 17.5, 0.0);

        let notifier = notifier(RecordingMailer::new());
        let _in_flight = notifier.busy.try_lock().unwrap();

        let stats = notifier.run(&repo).await.unwrap();
        assert!(!stats.digest_sent);
        assert!(notifier.mailer.bodies().is_empty());
        assert_eq!(repo.emailed_count().unwrap(), 0);
    }

    #[test]
    fn digest_body_format() {
        let rows = vec![
            Observation::new(date(2022, 1, 1), 17.5, 0.0),
            Observation::new(date(2022, 1, 2), 19.25, 62.0),
        ];
        let body = digest_body(&thresholds(), &rows);

        assert!(body.starts_with(
            "Days with mean temperature between 15°C and 20°C or precipitation probability of at least 50%:"
        ));
        assert!(body.contains("2022-01-01 — temperature 17.5°C, precipitation 0%\n"));
        assert!(body.contains("2022-01-02 — temperature 19.2°C, precipitation 62%\n"));
        assert!(!body.contains("No results"));
    }
}
