//! Request/response codec for the weather.com `redux-dal` almanac API.
//!
//! One POST carries a list of named request configs; the response is keyed
//! first by config name, then by the serialized parameter string, with the
//! per-day arrays under `data`. Only the daily-almanac config is used here.

use crate::gap::DateRange;
use crate::models::DailyFigures;
use crate::provider::ProviderError;
use chrono::Datelike;
use serde::Deserialize;
use serde_json::{Value, json};

const ALMANAC_CONFIG: &str = "getSunV3DailyAlmanacUrlConfig";

// ── Request ───────────────────────────────────────────────────────────────────

/// The almanac payload for one window. `days` is the window length;
/// `startDay`/`startMonth` pin the window start, and the provider returns
/// one array slot per day from there.
pub fn almanac_request(geocode: &str, range: DateRange) -> Value {
    json!([
        {
            "name": ALMANAC_CONFIG,
            "params": {
                "geocode": geocode,
                "units": "m",
                "days": range.len_days().to_string(),
                "startDay": range.start.day(),
                "startMonth": range.start.month(),
                "language": "en-US",
            }
        }
    ])
}

// ── Response ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AlmanacData {
    #[serde(rename = "temperatureMean", default)]
    temperature_mean: Vec<Option<f64>>,
    #[serde(rename = "precipitationAverage", default)]
    precipitation_average: Vec<Option<f64>>,
}

/// Extract per-day figures for `range` from a raw response. Slots missing
/// from either array come back as `None` fields for the caller to skip.
pub fn parse_almanac_response(
    raw: &Value,
    range: DateRange,
) -> Result<Vec<DailyFigures>, ProviderError> {
    let by_params = raw
        .get("dal")
        .and_then(|dal| dal.get(ALMANAC_CONFIG))
        .and_then(Value::as_object)
        .ok_or_else(|| ProviderError::Payload(format!("missing dal.{}", ALMANAC_CONFIG)))?;

    // The response echoes the request's parameter string as the key; with a
    // single request config there is exactly one entry.
    let entry = by_params
        .values()
        .next()
        .ok_or_else(|| ProviderError::Payload(format!("empty dal.{}", ALMANAC_CONFIG)))?;

    let data: AlmanacData = serde_json::from_value(
        entry
            .get("data")
            .cloned()
            .ok_or_else(|| ProviderError::Payload("missing data block".to_string()))?,
    )
    .map_err(|e| ProviderError::Payload(format!("malformed data block: {}", e)))?;

    let figures = (0..range.len_days() as usize)
        .map(|offset| DailyFigures {
            temperature_mean: data.temperature_mean.get(offset).copied().flatten(),
            precipitation_probability: data.precipitation_average.get(offset).copied().flatten(),
        })
        .collect();

    Ok(figures)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
