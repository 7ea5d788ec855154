use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
///
/// Passed explicitly into the processor, worker pool and service; nothing
/// in the crate reads settings from global state.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub data_dir: PathBuf,
    pub database_path: PathBuf,

    // Web Server
    pub web_host: String,
    pub web_port: u16,
    pub static_dir: Option<PathBuf>,

    // Workers / Queue
    pub worker_concurrency: usize,
    pub per_domain_concurrency: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub max_attempts: u32,

    // Safety / ops
    pub max_jobs_per_minute: u32,
    pub allow_delete: bool,

    // Page capture
    pub chrome_path: Option<String>,
    pub page_timeout: Duration,
    pub max_scrolls: u32,

    // Video capture
    pub yt_dlp_path: String,
    pub ffmpeg_path: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = PathBuf::from(env_or_default("ARCHIVER_DATA_DIR", "./data"));
        let database_path = optional_env("ARCHIVER_DATABASE_PATH")
            .map_or_else(|| data_dir.join("archiver.sqlite"), PathBuf::from);

        Ok(Self {
            data_dir,
            database_path,

            web_host: env_or_default("ARCHIVER_WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("ARCHIVER_WEB_PORT", 8080)?,
            static_dir: optional_env("ARCHIVER_STATIC_DIR").map(PathBuf::from),

            worker_concurrency: parse_env_usize("ARCHIVER_WORKER_CONCURRENCY", 2)?,
            per_domain_concurrency: parse_env_usize("ARCHIVER_PER_DOMAIN_CONCURRENCY", 1)?,
            poll_interval: Duration::from_secs(parse_env_u64("ARCHIVER_POLL_INTERVAL_SECS", 5)?),
            job_timeout: Duration::from_secs(parse_env_u64("ARCHIVER_JOB_TIMEOUT_SECS", 2 * 60 * 60)?),
            max_attempts: parse_env_u32("ARCHIVER_MAX_ATTEMPTS", 1)?,

            max_jobs_per_minute: parse_env_u32("ARCHIVER_MAX_JOBS_PER_MINUTE", 30)?,
            allow_delete: parse_env_bool("ARCHIVER_ALLOW_DELETE", true)?,

            chrome_path: optional_env("ARCHIVER_CHROME_PATH"),
            page_timeout: Duration::from_secs(parse_env_u64("ARCHIVER_PAGE_TIMEOUT_SECS", 60)?),
            max_scrolls: parse_env_u32("ARCHIVER_MAX_SCROLLS", 30)?,

            yt_dlp_path: env_or_default("ARCHIVER_YT_DLP_PATH", "yt-dlp"),
            ffmpeg_path: env_or_default("ARCHIVER_FFMPEG_PATH", "ffmpeg"),
        })
    }

    /// Configuration rooted at `data_dir` with defaults, independent of the
    /// process environment.
    #[must_use]
    pub fn for_testing(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            database_path: data_dir.join("archiver.sqlite"),
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
            static_dir: None,
            worker_concurrency: 2,
            per_domain_concurrency: 1,
            poll_interval: Duration::from_millis(50),
            job_timeout: Duration::from_secs(60),
            max_attempts: 1,
            max_jobs_per_minute: 0,
            allow_delete: true,
            chrome_path: None,
            page_timeout: Duration::from_secs(30),
            max_scrolls: 0,
            yt_dlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ARCHIVER_WORKER_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.per_domain_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ARCHIVER_PER_DOMAIN_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ARCHIVER_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.job_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "ARCHIVER_JOB_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "ARCHIVER_DATA_DIR".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Root directory holding one artifact directory per archive id.
    #[must_use]
    pub fn archives_dir(&self) -> PathBuf {
        self.data_dir.join("archives")
    }

    /// Artifact directory reserved for a single archive.
    #[must_use]
    pub fn out_dir_for(&self, archive_id: &str) -> PathBuf {
        self.archives_dir().join(archive_id)
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}
