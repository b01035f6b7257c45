use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Observation ───────────────────────────────────────────────────────────────

/// One stored row per calendar date. `emailed` only ever moves false → true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub temperature_mean: f64,
    pub precipitation_probability: f64,
    pub emailed: bool,
}

impl Observation {
    /// A freshly collected row, not yet part of any digest.
    pub fn new(date: NaiveDate, temperature_mean: f64, precipitation_probability: f64) -> Self {
        Self {
            date,
            temperature_mean,
            precipitation_probability,
            emailed: false,
        }
    }
}

// ── Provider slot ─────────────────────────────────────────────────────────────

/// One per-day slot as returned by the upstream provider, aligned by offset
/// to consecutive dates from the requested window start. Either field may be
/// absent in the upstream payload.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailyFigures {
    pub temperature_mean: Option<f64>,
    pub precipitation_probability: Option<f64>,
}

// ── Alert thresholds ──────────────────────────────────────────────────────────

/// A row qualifies for the digest when its mean temperature falls inside
/// [temperature_min, temperature_max] OR its precipitation probability is at
/// least precipitation_probability_min.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub precipitation_probability_min: f64,
}
