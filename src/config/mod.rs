use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::Thresholds;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// First date ever worth fetching or digesting, used when a watermark
    /// does not exist yet.
    #[serde(default = "default_fallback_start_date")]
    pub fallback_start_date: NaiveDate,

    pub provider: ProviderConfig,
    pub storage: StorageConfig,
    pub collector: CollectorConfig,
    pub notifier: NotifierConfig,
    pub mail: MailConfig,
}

/// Upstream weather provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// "latitude,longitude" as the provider expects it.
    #[serde(default = "default_geocode")]
    pub geocode: String,

    /// Upstream bounds how many days one request may return.
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Collector job configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    #[serde(default = "default_collector_interval_secs")]
    pub interval_secs: u64,
}

/// Notifier job configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifierConfig {
    #[serde(default = "default_temperature_min")]
    pub temperature_min: f64,

    #[serde(default = "default_temperature_max")]
    pub temperature_max: f64,

    #[serde(default = "default_precipitation_probability_min")]
    pub precipitation_probability_min: f64,

    #[serde(default = "default_notifier_interval_secs")]
    pub interval_secs: u64,
}

impl NotifierConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            temperature_min: self.temperature_min,
            temperature_max: self.temperature_max,
            precipitation_probability_min: self.precipitation_probability_min,
        }
    }
}

/// Mail transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailConfig {
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub sender: String,

    #[serde(default)]
    pub receiver: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_subject")]
    pub subject: String,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_fallback_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 1).expect("static date")
}
fn default_endpoint() -> String {
    "https://weather.com/api/v1/p/redux-dal".to_string()
}
fn default_geocode() -> String {
    // São Paulo
    "-23.55,-46.63".to_string()
}
fn default_window_days() -> u32 {
    45
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    1500
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_base_delay_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/109.0.0.0 Safari/537.36".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/weather.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_collector_interval_secs() -> u64 {
    3600
}
fn default_temperature_min() -> f64 {
    15.0
}
fn default_temperature_max() -> f64 {
    20.0
}
fn default_precipitation_probability_min() -> f64 {
    50.0
}
fn default_notifier_interval_secs() -> u64 {
    86_400
}
fn default_smtp_server() -> String {
    "smtp-mail.outlook.com".to_string()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_subject() -> String {
    "Weather monitoring digest".to_string()
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("WEATHER").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fallback_start_date: default_fallback_start_date(),
            provider: ProviderConfig {
                endpoint: default_endpoint(),
                geocode: default_geocode(),
                window_days: default_window_days(),
                timeout_secs: default_timeout_secs(),
                request_delay_ms: default_request_delay_ms(),
                jitter_ms: default_jitter_ms(),
                max_retries: default_max_retries(),
                retry_base_delay_secs: default_retry_base_delay_secs(),
                user_agent: default_user_agent(),
            },
            storage: StorageConfig {
                db_path: default_db_path(),
                run_migrations: true,
            },
            collector: CollectorConfig {
                interval_secs: default_collector_interval_secs(),
            },
            notifier: NotifierConfig {
                temperature_min: default_temperature_min(),
                temperature_max: default_temperature_max(),
                precipitation_probability_min: default_precipitation_probability_min(),
                interval_secs: default_notifier_interval_secs(),
            },
            mail: MailConfig {
                smtp_server: default_smtp_server(),
                smtp_port: default_smtp_port(),
                sender: String::new(),
                receiver: String::new(),
                password: String::new(),
                subject: default_subject(),
            },
        }
    }
}
