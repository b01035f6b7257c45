use crate::models::{Observation, Thresholds};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use tracing::{info, warn};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS weather (
    date                        DATE     PRIMARY KEY,
    temperature_mean            DOUBLE   NOT NULL,
    precipitation_probability   DOUBLE   NOT NULL,
    emailed                     BOOLEAN  NOT NULL DEFAULT false
);

CREATE SEQUENCE IF NOT EXISTS job_runs_id_seq;

CREATE TABLE IF NOT EXISTS job_runs (
    id              INTEGER PRIMARY KEY DEFAULT nextval('job_runs_id_seq'),
    job             VARCHAR NOT NULL,
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    rows_affected   INTEGER DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_weather_emailed ON weather (emailed);
"#;

// ── Insert outcome ────────────────────────────────────────────────────────────

/// Per-batch insert accounting: `skipped` are dates already stored (the
/// idempotent re-run path), `failed` are rows rejected for any other reason.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InsertStats {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Observations ──────────────────────────────────────────────────────────

    /// Insert new rows, one statement per row so a single bad row never
    /// aborts the batch. Already-stored dates are skipped, never overwritten;
    /// re-running on the same data inserts nothing.
    pub fn insert_observations(&self, observations: &[Observation]) -> Result<InsertStats> {
        let mut stats = InsertStats::default();
        if observations.is_empty() {
            return Ok(stats);
        }

        let sql = r#"
            INSERT INTO weather (date, temperature_mean, precipitation_probability, emailed)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (date) DO NOTHING
        "#;

        for obs in observations {
            match self.conn.execute(
                sql,
                params![
                    obs.date,
                    obs.temperature_mean,
                    obs.precipitation_probability,
                    obs.emailed,
                ],
            ) {
                Ok(0) => stats.skipped += 1,
                Ok(_) => stats.inserted += 1,
                Err(e) => {
                    warn!("Insert failed for {}: {:#}", obs.date, e);
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }

    pub fn observation(&self, date: NaiveDate) -> Result<Option<Observation>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT date, temperature_mean, precipitation_probability, emailed
               FROM weather WHERE date = ?"#,
        )?;
        let mut rows = stmt.query_map(params![date], |r| {
            Ok(Observation {
                date: r.get(0)?,
                temperature_mean: r.get(1)?,
                precipitation_probability: r.get(2)?,
                emailed: r.get(3)?,
            })
        })?;
        rows.next().transpose().context("row decode failed")
    }

    // ── Watermarks ────────────────────────────────────────────────────────────

    /// Most recent stored date, the collector's watermark.
    pub fn max_stored_date(&self) -> Result<Option<NaiveDate>> {
        let mut stmt = self.conn.prepare("SELECT MAX(date) FROM weather")?;
        let date: Option<NaiveDate> = stmt.query_row([], |r| r.get(0))?;
        Ok(date)
    }

    /// Most recent date already covered by a digest, the notifier's watermark.
    pub fn max_emailed_date(&self) -> Result<Option<NaiveDate>> {
        let mut stmt = self
            .conn
            .prepare("SELECT MAX(date) FROM weather WHERE emailed")?;
        let date: Option<NaiveDate> = stmt.query_row([], |r| r.get(0))?;
        Ok(date)
    }

    // ── Digest candidates ─────────────────────────────────────────────────────

    /// Unemailed rows after `floor` matching the alert band, ascending by date.
    pub fn unemailed_since(
        &self,
        floor: NaiveDate,
        thresholds: &Thresholds,
    ) -> Result<Vec<Observation>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT date, temperature_mean, precipitation_probability, emailed
               FROM weather
               WHERE NOT emailed
                 AND date > ?
                 AND ((temperature_mean >= ? AND temperature_mean <= ?)
                      OR precipitation_probability >= ?)
               ORDER BY date"#,
        )?;
        let rows = stmt
            .query_map(
                params![
                    floor,
                    thresholds.temperature_min,
                    thresholds.temperature_max,
                    thresholds.precipitation_probability_min,
                ],
                |r| {
                    Ok(Observation {
                        date: r.get(0)?,
                        temperature_mean: r.get(1)?,
                        precipitation_probability: r.get(2)?,
                        emailed: r.get(3)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("candidate row decode failed")?;
        Ok(rows)
    }

    /// Flip a single date to emailed. The flag only ever moves false → true.
    /// Returns whether a row was actually updated.
    pub fn mark_emailed(&self, date: NaiveDate) -> Result<bool> {
        let updated = self
            .conn
            .execute("UPDATE weather SET emailed = true WHERE date = ?", params![date])
            .with_context(|| format!("mark emailed {}", date))?;
        Ok(updated > 0)
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn observation_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM weather")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn emailed_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM weather WHERE emailed")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let mut s = self.conn.prepare("SELECT MIN(date), MAX(date) FROM weather")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Job run log ───────────────────────────────────────────────────────────

    pub fn begin_job_run(&self, job: &str) -> Result<i64> {
        let mut stmt = self.conn.prepare(
            r#"INSERT INTO job_runs (job, started_at, status)
               VALUES (?, ?, 'running')
               RETURNING id"#,
        )?;
        let id: i64 = stmt.query_row(params![job, Utc::now().naive_utc()], |r| r.get(0))?;
        Ok(id)
    }

    pub fn finish_job_run(&self, run_id: i64, rows: usize, error: Option<&str>) -> Result<()> {
        self.conn.execute(
            r#"UPDATE job_runs SET
               finished_at = ?, status = ?, rows_affected = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                rows as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn duplicate_dates_are_skipped_not_overwritten() {
        let repo = repo();
        let first = Observation::new(date(2022, 1, 1), 18.0, 10.0);
        let stats = repo.insert_observations(&[first.clone()]).unwrap();
        assert_eq!(stats.inserted, 1);

        // Same date with different figures must not replace the stored row.
        let replay = Observation::new(date(2022, 1, 1), 99.0, 99.0);
        let stats = repo.insert_observations(&[replay]).unwrap();
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.skipped, 1);

        let stored = repo.observation(date(2022, 1, 1)).unwrap().unwrap();
        assert_eq!(stored, first);
        assert_eq!(repo.observation_count().unwrap(), 1);
    }

    #[test]
    fn watermarks_track_stored_and_emailed_maxima() {
        let repo = repo();
        assert_eq!(repo.max_stored_date().unwrap(), None);
        assert_eq!(repo.max_emailed_date().unwrap(), None);

        repo.insert_observations(&[
            Observation::new(date(2022, 1, 1), 16.0, 0.0),
            Observation::new(date(2022, 1, 2), 16.0, 0.0),
            Observation::new(date(2022, 1, 3), 16.0, 0.0),
        ])
        .unwrap();

        assert_eq!(repo.max_stored_date().unwrap(), Some(date(2022, 1, 3)));
        assert_eq!(repo.max_emailed_date().unwrap(), None);

        assert!(repo.mark_emailed(date(2022, 1, 1)).unwrap());
        assert_eq!(repo.max_emailed_date().unwrap(), Some(date(2022, 1, 1)));
        assert_eq!(repo.max_stored_date().unwrap(), Some(date(2022, 1, 3)));
    }

    #[test]
    fn marking_a_missing_date_updates_nothing() {
        let repo = repo();
        assert!(!repo.mark_emailed(date(2022, 1, 1)).unwrap());
    }

    #[test]
    fn candidate_select_applies_band_or_precipitation() {
        let repo = repo();
        repo.insert_observations(&[
            // In the temperature band.
            Observation::new(date(2022, 1, 2), 17.5, 0.0),
            // Over the precipitation threshold.
            Observation::new(date(2022, 1, 3), 30.0, 80.0),
            // Matches neither arm.
            Observation::new(date(2022, 1, 4), 25.0, 10.0),
            // Band boundaries are inclusive.
            Observation::new(date(2022, 1, 5), 15.0, 0.0),
            Observation::new(date(2022, 1, 6), 20.0, 0.0),
        ])
        .unwrap();

        let rows = repo.unemailed_since(date(2022, 1, 1), &thresholds()).unwrap();
        let dates: Vec<NaiveDate> = rows.iter().map(|o| o.date).collect();
        assert_eq!(
            dates,
            vec![date(2022, 1, 2), date(2022, 1, 3), date(2022, 1, 5), date(2022, 1, 6)]
        );
    }

    #[test]
    fn candidate_select_excludes_floor_and_emailed_rows() {
        let repo = repo();
        repo.insert_observations(&[
            Observation::new(date(2022, 1, 1), 17.0, 0.0),
            Observation::new(date(2022, 1, 2), 17.0, 0.0),
            Observation::new(date(2022, 1, 3), 17.0, 0.0),
        ])
        .unwrap();
        repo.mark_emailed(date(2022, 1, 2)).unwrap();

        // date > floor, so the floor row itself is out; emailed rows are out.
        let rows = repo.unemailed_since(date(2022, 1, 1), &thresholds()).unwrap();
        let dates: Vec<NaiveDate> = rows.iter().map(|o| o.date).collect();
        assert_eq!(dates, vec![date(2022, 1, 3)]);
    }

    #[test]
    fn candidates_come_back_in_ascending_date_order() {
        let repo = repo();
        // Inserted out of order on purpose.
        repo.insert_observations(&[
            Observation::new(date(2022, 1, 9), 17.0, 0.0),
            Observation::new(date(2022, 1, 3), 17.0, 0.0),
            Observation::new(date(2022, 1, 6), 17.0, 0.0),
        ])
        .unwrap();

        let rows = repo.unemailed_since(date(2022, 1, 1), &thresholds()).unwrap();
        let dates: Vec<NaiveDate> = rows.iter().map(|o| o.date).collect();
        assert_eq!(dates, vec![date(2022, 1, 3), date(2022, 1, 6), date(2022, 1, 9)]);
    }

    #[test]
    fn job_run_log_round_trip() {
        let repo = repo();
        let id = repo.begin_job_run("collector").unwrap();
        repo.finish_job_run(id, 42, None).unwrap();
        let id2 = repo.begin_job_run("notifier").unwrap();
        assert!(id2 > id);
        repo.finish_job_run(id2, 0, Some("smtp unreachable")).unwrap();
    }
}
