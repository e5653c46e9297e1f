use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::RetryPolicy;
use crate::scheduler::SchedulerPolicy;
use crate::timeslot::TimeslotCatalog;
use crate::validation::InputGrammar;
use crate::window::WindowPolicy;

/// Longest accepted reminder tolerance (12 hours)
pub const MAX_REMINDER_TOLERANCE_SECS: u64 = 12 * 3600;
/// Longest accepted Tree2 grace period (one week)
pub const MAX_TREE2_GRACE_MINUTES: u64 = 7 * 24 * 60;
/// Longest accepted Tree2 cadence (one day)
pub const MAX_TREE2_CADENCE_SECS: u64 = 24 * 3600;

/// Application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub ledger: LedgerConfig,
    pub messenger: MessengerConfig,
    pub catalog: CatalogConfig,
    pub window: WindowConfig,
    pub conversation: ConversationConfig,
    pub scheduler: SchedulerConfig,
    pub links: LinksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<PathBuf>,
    pub format: String, // "json" or "text"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file_path: None, format: "text".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("data/journey.db") }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    /// Record messages instead of delivering them
    pub dry_run: bool,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.respond.io/v2".to_string(),
            api_key: None,
            timeout_secs: 30,
            max_attempts: 3,
            base_backoff_ms: 500,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Offset of the booking timezone from UTC, in whole hours
    pub utc_offset_hours: i32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { utc_offset_hours: 7 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub facebook_ads_hours: u32,
    pub website_hours: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { facebook_ads_hours: 72, website_hours: 24 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Phrase that marks a lead as coming from the website form
    pub trigger_phrase: String,
    pub thumbs_up_tokens: Vec<String>,
    pub rebook_keywords: Vec<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            trigger_phrase: "free Zoom preview link".to_string(),
            thumbs_up_tokens: vec!["👍".to_string(), "YES".to_string(), "OK".to_string()],
            rebook_keywords: vec!["CHANGE".to_string(), "REBOOK".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cadence of the reminder and sales ticks
    pub reminder_cadence_secs: u64,
    pub tree2_cadence_secs: u64,
    pub reminder_tolerance_secs: u64,
    pub tree2_grace_minutes: u64,
    /// Contacts processed concurrently within one tick
    pub workers: usize,
    pub reinvites_enabled: bool,
    /// CSV roster read by the Monday attendance batch
    pub attendance_roster: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reminder_cadence_secs: 300,
            tree2_cadence_secs: 3600,
            reminder_tolerance_secs: 600,
            tree2_grace_minutes: 120,
            workers: 8,
            reinvites_enabled: true,
            attendance_roster: PathBuf::from("data/attendance.csv"),
        }
    }
}

/// Links and names substituted into message templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    pub host_name: String,
    pub preview_link: String,
    pub zoom_download_link: String,
    pub membership_link: String,
    pub trial_link: String,
    pub registration_link: String,
    /// Weekly Zoom link sent to new members
    pub member_zoom_link: String,
    pub recordings_link: String,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            host_name: "Coach".to_string(),
            preview_link: "https://zoom.us/j/preview".to_string(),
            zoom_download_link: "https://zoom.us/download".to_string(),
            membership_link: "https://example.com/membership".to_string(),
            trial_link: "https://example.com/trial".to_string(),
            registration_link: "https://example.com/register".to_string(),
            member_zoom_link: "https://zoom.us/j/members".to_string(),
            recordings_link: "https://example.com/recordings".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// defaults, `config/default`, `config/local`, `explicit`, then `JOURNEY__*` variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&Self::default())
            .map_err(|e| anyhow::anyhow!("Failed to serialize default configuration: {}", e))?;

        let mut builder = Config::builder()
            .add_source(defaults)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(Environment::with_prefix("JOURNEY").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        if self.messenger.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("messenger.base_url must not be empty"));
        }
        if self.messenger.timeout_secs == 0 {
            return Err(anyhow::anyhow!("messenger.timeout_secs must be greater than 0"));
        }
        if self.messenger.max_attempts == 0 {
            return Err(anyhow::anyhow!("messenger.max_attempts must be greater than 0"));
        }

        if !(-12..=14).contains(&self.catalog.utc_offset_hours) {
            return Err(anyhow::anyhow!(
                "catalog.utc_offset_hours must be between -12 and 14, got {}",
                self.catalog.utc_offset_hours
            ));
        }

        if self.window.facebook_ads_hours == 0 || self.window.website_hours == 0 {
            return Err(anyhow::anyhow!("window hours must be greater than 0"));
        }

        if self.conversation.trigger_phrase.trim().is_empty() {
            return Err(anyhow::anyhow!("conversation.trigger_phrase must not be empty"));
        }

        if self.scheduler.reminder_cadence_secs == 0 || self.scheduler.tree2_cadence_secs == 0 {
            return Err(anyhow::anyhow!("scheduler cadences must be greater than 0"));
        }
        if self.scheduler.reminder_tolerance_secs < self.scheduler.reminder_cadence_secs {
            return Err(anyhow::anyhow!(
                "scheduler.reminder_tolerance_secs ({}) must be at least scheduler.reminder_cadence_secs ({}), \
                 otherwise reminders can fall between ticks",
                self.scheduler.reminder_tolerance_secs,
                self.scheduler.reminder_cadence_secs
            ));
        }
        if self.scheduler.reminder_tolerance_secs > MAX_REMINDER_TOLERANCE_SECS {
            return Err(anyhow::anyhow!(
                "scheduler.reminder_tolerance_secs must be at most {MAX_REMINDER_TOLERANCE_SECS}, got {}",
                self.scheduler.reminder_tolerance_secs
            ));
        }
        if self.scheduler.tree2_cadence_secs > MAX_TREE2_CADENCE_SECS {
            return Err(anyhow::anyhow!(
                "scheduler.tree2_cadence_secs must be at most {MAX_TREE2_CADENCE_SECS}, got {}",
                self.scheduler.tree2_cadence_secs
            ));
        }
        if self.scheduler.tree2_grace_minutes > MAX_TREE2_GRACE_MINUTES {
            return Err(anyhow::anyhow!(
                "scheduler.tree2_grace_minutes must be at most {MAX_TREE2_GRACE_MINUTES}, got {}",
                self.scheduler.tree2_grace_minutes
            ));
        }
        if self.scheduler.workers == 0 {
            return Err(anyhow::anyhow!("scheduler.workers must be greater than 0"));
        }

        Ok(())
    }

    /// Booking catalog for the configured timezone
    pub fn catalog(&self) -> Result<TimeslotCatalog> {
        Ok(TimeslotCatalog::standard(self.catalog.utc_offset_hours)?)
    }

    /// Input grammar for the configured trigger phrase and keywords
    pub fn grammar(&self) -> Result<InputGrammar> {
        Ok(InputGrammar::new(
            &self.conversation.trigger_phrase,
            &self.conversation.thumbs_up_tokens,
            &self.conversation.rebook_keywords,
        )?)
    }

    #[must_use]
    pub fn window_policy(&self) -> WindowPolicy {
        WindowPolicy::from_hours(self.window.facebook_ads_hours, self.window.website_hours)
    }

    /// Scheduler tunables; fails on durations chrono cannot represent
    pub fn scheduler_policy(&self) -> Result<SchedulerPolicy> {
        let reminder_tolerance = i64::try_from(self.scheduler.reminder_tolerance_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "scheduler.reminder_tolerance_secs out of range: {}",
                    self.scheduler.reminder_tolerance_secs
                )
            })?;
        let tree2_grace = i64::try_from(self.scheduler.tree2_grace_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .ok_or_else(|| {
                anyhow::anyhow!("scheduler.tree2_grace_minutes out of range: {}", self.scheduler.tree2_grace_minutes)
            })?;

        Ok(SchedulerPolicy {
            reminder_tolerance,
            tree2_grace,
            reinvites_enabled: self.scheduler.reinvites_enabled,
            local_offset: self.catalog()?.offset(),
        })
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.messenger.max_attempts,
            base_backoff: Duration::from_millis(self.messenger.base_backoff_ms),
            timeout: Duration::from_secs(self.messenger.timeout_secs),
        }
    }

    #[must_use]
    pub const fn reminder_cadence(&self) -> Duration {
        Duration::from_secs(self.scheduler.reminder_cadence_secs)
    }

    #[must_use]
    pub const fn tree2_cadence(&self) -> Duration {
        Duration::from_secs(self.scheduler.tree2_cadence_secs)
    }

    /// API key from config, else the `JOURNEY_API_KEY` environment variable
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        self.messenger
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("JOURNEY_API_KEY").ok())
    }

    /// Log level from `RUST_LOG` or config
    #[must_use]
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.catalog.utc_offset_hours, 7);
        assert_eq!(config.window.facebook_ads_hours, 72);
        assert_eq!(config.scheduler.tree2_grace_minutes, 120);
    }

    #[test]
    fn test_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AppConfig::default();
        config.scheduler.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policies_follow_config() {
        let mut config = AppConfig::default();
        config.scheduler.reminder_tolerance_secs = 900;
        config.messenger.max_attempts = 5;
        assert_eq!(config.scheduler_policy().unwrap().reminder_tolerance, chrono::Duration::minutes(15));
        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.reminder_cadence(), Duration::from_secs(300));
    }
}
