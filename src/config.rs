//! TOML configuration for checkinpilot.
//!
//! A layered model with sensible defaults: every section deserializes with
//! `#[serde(default)]`, so a partial `config.toml` only needs the keys that
//! differ from the defaults. Filesystem paths for run data are derived from
//! the config file's own directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration, loaded once per run and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IANA timezone name used for timestamps, the daily email gate, and
    /// schedule previews.
    pub timezone: String,
    pub schedule: ScheduleConfig,
    pub notify: NotifyConfig,
    pub run: RunConfig,
    pub selectors: SelectorConfig,
    pub site: SiteConfig,
    pub browser: BrowserConfig,
    pub logging: LoggingConfig,
    /// Derived from the config file location, not read from TOML.
    #[serde(skip)]
    pub paths: DataPaths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: "Europe/Helsinki".to_string(),
            schedule: ScheduleConfig::default(),
            notify: NotifyConfig::default(),
            run: RunConfig::default(),
            selectors: SelectorConfig::default(),
            site: SiteConfig::default(),
            browser: BrowserConfig::default(),
            logging: LoggingConfig::default(),
            paths: DataPaths::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file at `path` and derive data paths
    /// from its parent directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        let root = path
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        config.paths = DataPaths::rooted(&root);

        if config.site.checkin_url.is_empty() {
            config.site.checkin_url = config.site.base_url.clone();
        }

        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse the configured timezone name.
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow!("unknown timezone '{}': {e}", self.timezone))
    }

    /// Log file path resolved against the config root when relative.
    pub fn resolved_log_file(&self) -> PathBuf {
        if self.logging.log_file.is_absolute() {
            self.logging.log_file.clone()
        } else {
            self.paths.root.join(&self.logging.log_file)
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Local times at which the external scheduler (cron, systemd timers) is
/// expected to fire `checkinpilot run`. Informational for `schedule`
/// previews; this process never schedules itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// `HH:MM` entries in the configured timezone.
    pub times: Vec<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            times: vec!["08:30".into(), "12:30".into(), "20:30".into()],
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Master switch; without it (or without `[notify.smtp]`) no mail is sent.
    pub enable_email: bool,
    /// Gate success mail to at most one per calendar day.
    pub success_email_once_per_day: bool,
    /// Send a failure mail on every failed run.
    pub email_on_failure_always: bool,
    pub smtp: Option<SmtpConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enable_email: false,
            success_email_once_per_day: true,
            email_on_failure_always: true,
            smtp: None,
        }
    }
}

/// SMTP relay settings. `use_ssl` selects an implicit-TLS connection,
/// `use_starttls` upgrades a plaintext one; with neither the connection
/// stays plaintext (local relays only).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
    pub use_starttls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "from")]
    pub sender: Option<String>,
    #[serde(rename = "to")]
    pub recipients: Vec<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 465,
            use_ssl: true,
            use_starttls: false,
            username: None,
            password: None,
            sender: None,
            recipients: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Run the browser headless on the first attempt.
    pub headless_preferred: bool,
    /// Force a headed browser on retry attempts.
    pub fallback_to_headed_on_retry: bool,
    pub nav_timeout_ms: u64,
    pub action_timeout_ms: u64,
    pub max_retries: u32,
    /// Seconds to sleep before retry N, indexed by attempt number and
    /// clamped to the last entry.
    pub retry_backoff_seconds: Vec<f64>,
    /// Maximum data rows kept in the history CSV.
    pub history_limit: usize,
    pub screenshot_on_failure: bool,
    /// Also dump the failing page's HTML source next to the screenshot.
    pub trace_on_failure: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            headless_preferred: true,
            fallback_to_headed_on_retry: true,
            nav_timeout_ms: 20_000,
            action_timeout_ms: 15_000,
            max_retries: 3,
            retry_backoff_seconds: vec![1.0, 4.0, 9.0],
            history_limit: 1000,
            screenshot_on_failure: true,
            trace_on_failure: false,
        }
    }
}

impl RunConfig {
    pub fn nav_timeout(&self) -> Duration {
        Duration::from_millis(self.nav_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// Ordered CSS selector lists per probe purpose. Order is a priority list:
/// the first selector to match wins and the rest are untried.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Visible ⇒ the session needs manual re-authorization.
    pub login_required: Vec<String>,
    /// When non-empty, at least one must become visible to proceed.
    pub login_confirmed: Vec<String>,
    /// Candidates for the check-in button itself.
    pub checkin_triggers: Vec<String>,
    /// Visible after the click ⇒ the check-in succeeded.
    pub success_indicators: Vec<String>,
    /// Visible ⇒ today's check-in already happened.
    pub already_checked: Vec<String>,
}

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Landing page used by the manual authorize flow.
    pub base_url: String,
    /// Page carrying the check-in trigger; falls back to `base_url`.
    pub checkin_url: String,
}

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// chromedriver binary (name resolved via `$PATH`, or an absolute path).
    pub webdriver_bin: String,
    /// Port the spawned chromedriver listens on.
    pub webdriver_port: u16,
    /// Use an externally managed WebDriver endpoint instead of spawning one.
    pub webdriver_url: Option<String>,
    /// Extra Chrome command-line switches.
    pub chrome_args: Vec<String>,
    /// Browser UI locale, passed as `--lang`.
    pub locale: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_bin: "chromedriver".to_string(),
            webdriver_port: 9515,
            webdriver_url: None,
            chrome_args: Vec::new(),
            locale: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`);
    /// `RUST_LOG` overrides it.
    pub level: String,
    /// Append-only JSON-lines log, relative to the config root.
    pub log_file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: PathBuf::from("data/logs/checkin.jsonl"),
        }
    }
}

// ---------------------------------------------------------------------------
// Derived paths
// ---------------------------------------------------------------------------

/// Filesystem layout under the config root.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub history_file: PathBuf,
    pub screenshots_dir: PathBuf,
    /// Persistent Chrome profile holding the login session.
    pub userdata_dir: PathBuf,
    pub meta_dir: PathBuf,
    pub auth_state_file: PathBuf,
}

impl DataPaths {
    pub fn rooted(root: &Path) -> Self {
        let data_dir = root.join("data");
        Self {
            root: root.to_path_buf(),
            history_file: data_dir.join("history.csv"),
            screenshots_dir: root.join("screenshots"),
            userdata_dir: data_dir.join("userdata"),
            meta_dir: data_dir.join("meta"),
            auth_state_file: data_dir.join("auth_state.json"),
            data_dir,
        }
    }

    /// Create the whole on-disk tree. Idempotent.
    pub fn ensure_data_tree(&self) -> Result<()> {
        for dir in [
            &self.data_dir,
            &self.screenshots_dir,
            &self.userdata_dir,
            &self.meta_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::rooted(Path::new("."))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
