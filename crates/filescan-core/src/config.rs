//! Configuration module
//!
//! Runtime settings for the upload API, the scan worker pool and its collaborators.
//! Everything comes from environment variables (optionally seeded from a `.env`
//! file); every setting has a default so a bare `cargo run` starts an in-memory
//! instance.

use std::env;
use std::time::Duration;

const SERVER_PORT: u16 = 8000;
const MAX_CONNECTIONS: u32 = 10;
const MAX_UPLOAD_SIZE_MB: usize = 5;
const DEFAULT_ALLOWED_EXTENSIONS: &str = "pdf,docx,jpg,jpeg,png";
const SCAN_WORKERS: usize = 2;
const SCAN_MAX_ATTEMPTS: i32 = 3;
const SCAN_BACKOFF_BASE_MS: u64 = 1000;
const SCAN_LEASE_SECS: u64 = 60;
const SCAN_POLL_INTERVAL_MS: u64 = 1000;
const JOB_RETAIN_COMPLETED: usize = 100;
const JOB_RETAIN_FAILED: usize = 100;
const WEBHOOK_TIMEOUT_SECS: u64 = 10;
const CLAMAV_PORT: u16 = 3310;

/// Which inspection capability the worker pool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectorKind {
    Keyword,
    ClamAv,
}

impl std::str::FromStr for InspectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keyword" | "keywords" => Ok(InspectorKind::Keyword),
            "clamav" => Ok(InspectorKind::ClamAv),
            other => Err(anyhow::anyhow!(
                "INSPECTOR must be 'keyword' or 'clamav', got '{}'",
                other
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub environment: String,
    pub cors_origins: Vec<String>,
    /// Absent means the metadata store and job queue live in process memory.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub upload_dir: String,
    pub max_upload_size_bytes: usize,
    /// Lowercase, without the leading dot.
    pub allowed_extensions: Vec<String>,
    pub scan_workers: usize,
    pub scan_max_attempts: i32,
    pub scan_backoff_base_ms: u64,
    pub scan_lease_secs: u64,
    pub scan_poll_interval_ms: u64,
    pub job_retain_completed: usize,
    pub job_retain_failed: usize,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_timeout_secs: u64,
    pub inspector: InspectorKind,
    pub clamav_host: String,
    pub clamav_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: SERVER_PORT,
            environment: "development".to_string(),
            cors_origins: vec!["*".to_string()],
            database_url: None,
            db_max_connections: MAX_CONNECTIONS,
            upload_dir: "./uploads".to_string(),
            max_upload_size_bytes: MAX_UPLOAD_SIZE_MB * 1024 * 1024,
            allowed_extensions: split_list(DEFAULT_ALLOWED_EXTENSIONS),
            scan_workers: SCAN_WORKERS,
            scan_max_attempts: SCAN_MAX_ATTEMPTS,
            scan_backoff_base_ms: SCAN_BACKOFF_BASE_MS,
            scan_lease_secs: SCAN_LEASE_SECS,
            scan_poll_interval_ms: SCAN_POLL_INTERVAL_MS,
            job_retain_completed: JOB_RETAIN_COMPLETED,
            job_retain_failed: JOB_RETAIN_FAILED,
            webhook_url: None,
            webhook_secret: None,
            webhook_timeout_secs: WEBHOOK_TIMEOUT_SECS,
            inspector: InspectorKind::Keyword,
            clamav_host: "localhost".to_string(),
            clamav_port: CLAMAV_PORT,
        }
    }
}

impl Config {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset or empty values fall back
    /// to defaults; values that are set but malformed are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let environment = get("ENVIRONMENT")
            .or_else(|| get("APP_ENV"))
            .unwrap_or(defaults.environment);

        let cors_origins = get("CORS_ORIGINS")
            .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
            .unwrap_or(defaults.cors_origins);

        let allowed_extensions = get("ALLOWED_EXTENSIONS")
            .map(|s| split_list(&s))
            .unwrap_or(defaults.allowed_extensions);

        let max_upload_size_mb: usize = parse_or("MAX_UPLOAD_SIZE_MB", get("MAX_UPLOAD_SIZE_MB"), MAX_UPLOAD_SIZE_MB)?;

        let inspector = match get("INSPECTOR") {
            Some(s) => s.parse()?,
            None => defaults.inspector,
        };

        let config = Config {
            server_port: parse_or("PORT", get("PORT"), SERVER_PORT)?,
            environment,
            cors_origins,
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", get("DB_MAX_CONNECTIONS"), MAX_CONNECTIONS)?,
            upload_dir: get("UPLOAD_DIR").unwrap_or(defaults.upload_dir),
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            allowed_extensions,
            scan_workers: parse_or("SCAN_WORKERS", get("SCAN_WORKERS"), SCAN_WORKERS)?,
            scan_max_attempts: parse_or("SCAN_MAX_ATTEMPTS", get("SCAN_MAX_ATTEMPTS"), SCAN_MAX_ATTEMPTS)?,
            scan_backoff_base_ms: parse_or(
                "SCAN_BACKOFF_BASE_MS",
                get("SCAN_BACKOFF_BASE_MS"),
                SCAN_BACKOFF_BASE_MS,
            )?,
            scan_lease_secs: parse_or("SCAN_LEASE_SECS", get("SCAN_LEASE_SECS"), SCAN_LEASE_SECS)?,
            scan_poll_interval_ms: parse_or(
                "SCAN_POLL_INTERVAL_MS",
                get("SCAN_POLL_INTERVAL_MS"),
                SCAN_POLL_INTERVAL_MS,
            )?,
            job_retain_completed: parse_or(
                "JOB_RETAIN_COMPLETED",
                get("JOB_RETAIN_COMPLETED"),
                JOB_RETAIN_COMPLETED,
            )?,
            job_retain_failed: parse_or("JOB_RETAIN_FAILED", get("JOB_RETAIN_FAILED"), JOB_RETAIN_FAILED)?,
            webhook_url: get("WEBHOOK_URL"),
            webhook_secret: get("WEBHOOK_SECRET"),
            webhook_timeout_secs: parse_or(
                "WEBHOOK_TIMEOUT_SECS",
                get("WEBHOOK_TIMEOUT_SECS"),
                WEBHOOK_TIMEOUT_SECS,
            )?,
            inspector,
            clamav_host: get("CLAMAV_HOST").unwrap_or(defaults.clamav_host),
            clamav_port: parse_or("CLAMAV_PORT", get("CLAMAV_PORT"), CLAMAV_PORT)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.is_production() && self.cors_origins.iter().any(|o| o == "*") {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        if self.max_upload_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be greater than 0"));
        }

        if self.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("ALLOWED_EXTENSIONS must list at least one extension"));
        }

        if self.scan_workers == 0 {
            return Err(anyhow::anyhow!("SCAN_WORKERS must be at least 1"));
        }

        if self.scan_max_attempts < 1 {
            return Err(anyhow::anyhow!("SCAN_MAX_ATTEMPTS must be at least 1"));
        }

        if self.scan_lease_secs == 0 {
            return Err(anyhow::anyhow!("SCAN_LEASE_SECS must be greater than 0"));
        }

        if let Some(url) = &self.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!("WEBHOOK_URL must be an http(s) URL"));
            }
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn scan_backoff_base(&self) -> Duration {
        Duration::from_millis(self.scan_backoff_base_ms)
    }

    pub fn scan_lease_duration(&self) -> Duration {
        Duration::from_secs(self.scan_lease_secs)
    }

    pub fn scan_poll_interval(&self) -> Duration {
        Duration::from_millis(self.scan_poll_interval_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Case-insensitive check against the allowed extension list.
    pub fn is_extension_allowed(&self, extension: &str) -> bool {
        let ext = extension.trim_start_matches('.').to_lowercase();
        self.allowed_extensions.iter().any(|allowed| *allowed == ext)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    raw: Option<String>,
    default: T,
) -> Result<T, anyhow::Error> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number, got '{}'", key, value)),
        None => Ok(default),
    }
}
