//! Comprehensive unit tests for config.rs module

use std::io::Write;

use tempfile::Builder;
use whatsapp_journey::config::AppConfig;
use whatsapp_journey::models::LeadSource;

fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_default_config_values() {
    let config = AppConfig::default();

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, "text");
    assert_eq!(config.logging.file_path, None);
    assert_eq!(config.messenger.timeout_secs, 30);
    assert_eq!(config.messenger.max_attempts, 3);
    assert!(!config.messenger.dry_run);
}

#[test]
fn test_default_journey_values() {
    let config = AppConfig::default();

    assert_eq!(config.catalog.utc_offset_hours, 7);
    assert_eq!(config.window.facebook_ads_hours, 72);
    assert_eq!(config.window.website_hours, 24);
    assert_eq!(config.conversation.trigger_phrase, "free Zoom preview link");
    assert_eq!(config.scheduler.reminder_cadence_secs, 300);
    assert_eq!(config.scheduler.tree2_cadence_secs, 3600);
    assert_eq!(config.scheduler.tree2_grace_minutes, 120);
    assert!(config.scheduler.reinvites_enabled);
}

#[test]
fn test_default_config_is_valid() {
    assert!(AppConfig::default().validate().is_ok());
}

#[test]
fn test_invalid_log_level() {
    let mut config = AppConfig::default();
    config.logging.level = "loud".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_log_format() {
    let mut config = AppConfig::default();
    config.logging.format = "xml".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_offset() {
    let mut config = AppConfig::default();
    config.catalog.utc_offset_hours = 15;
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_window_is_invalid() {
    let mut config = AppConfig::default();
    config.window.website_hours = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_empty_trigger_phrase_is_invalid() {
    let mut config = AppConfig::default();
    config.conversation.trigger_phrase = "  ".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_attempts_is_invalid() {
    let mut config = AppConfig::default();
    config.messenger.max_attempts = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_load_layers_file_over_defaults() {
    let file = yaml_file(
        "catalog:\n  utc_offset_hours: 8\nwindow:\n  website_hours: 12\nlinks:\n  host_name: Mia\n",
    );

    let config = AppConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.catalog.utc_offset_hours, 8);
    assert_eq!(config.window.website_hours, 12);
    assert_eq!(config.window.facebook_ads_hours, 72);
    assert_eq!(config.links.host_name, "Mia");
    assert_eq!(config.scheduler.workers, AppConfig::default().scheduler.workers);
}

#[test]
fn test_load_rejects_invalid_file_values() {
    let file = yaml_file("logging:\n  level: loud\n");
    assert!(AppConfig::load(Some(file.path())).is_err());
}

#[test]
fn test_load_requires_explicit_file_to_exist() {
    assert!(AppConfig::load(Some(std::path::Path::new("/nonexistent/journey.yaml"))).is_err());
}

#[test]
fn test_derived_policies() {
    let mut config = AppConfig::default();
    config.window.website_hours = 12;
    config.messenger.base_backoff_ms = 250;

    let window = config.window_policy();
    assert_eq!(window.duration(Some(LeadSource::Website)), chrono::Duration::hours(12));
    assert_eq!(window.duration(Some(LeadSource::FacebookAds)), chrono::Duration::hours(72));
    assert_eq!(config.retry_policy().base_backoff, std::time::Duration::from_millis(250));
    assert_eq!(config.catalog().unwrap().codes(), vec!["SA", "SB", "UA", "UB"]);
    assert!(config.grammar().unwrap().is_thumbs_up("👍"));
}

#[test]
fn test_reminder_tolerance_below_cadence_is_invalid() {
    let mut config = AppConfig::default();
    config.scheduler.reminder_tolerance_secs = 0;
    assert!(config.validate().is_err());

    config.scheduler.reminder_tolerance_secs = config.scheduler.reminder_cadence_secs - 1;
    assert!(config.validate().is_err());

    config.scheduler.reminder_tolerance_secs = config.scheduler.reminder_cadence_secs;
    assert!(config.validate().is_ok());
}

#[test]
fn test_zero_tolerance_would_never_fire_a_reminder() {
    use chrono::{Duration, TimeZone, Utc};
    use whatsapp_journey::models::{Booking, Contact};
    use whatsapp_journey::scheduler::{JobFamily, Scheduler};

    let mut config = AppConfig::default();
    config.scheduler.reminder_tolerance_secs = 0;
    let scheduler = Scheduler::new(config.scheduler_policy().unwrap());

    let session = Utc.with_ymd_and_hms(2026, 10, 24, 8, 30, 0).unwrap();
    let mut contact = Contact::new("c1", None, session - Duration::days(3));
    contact.book(Booking { timeslot: "SA".to_string(), session_at: session }, session - Duration::days(3));

    // Ticks offset from the stage instants
    let start = session - Duration::hours(13) + Duration::seconds(17);
    let fired = (0..156)
        .map(|i| start + Duration::minutes(5 * i))
        .filter(|now| !scheduler.decide(JobFamily::Reminders, &contact, *now).is_empty())
        .count();
    assert_eq!(fired, 0);
}

#[test]
fn test_oversized_scheduler_values_are_invalid() {
    let mut config = AppConfig::default();
    config.scheduler.tree2_grace_minutes = 1_000_000_000_000_000;
    assert!(config.validate().is_err());
    assert!(config.scheduler_policy().is_err());

    let mut config = AppConfig::default();
    config.scheduler.reminder_tolerance_secs = u64::MAX;
    assert!(config.validate().is_err());
    assert!(config.scheduler_policy().is_err());

    let mut config = AppConfig::default();
    config.scheduler.tree2_cadence_secs = 8 * 24 * 3600;
    assert!(config.validate().is_err());
}

#[test]
fn test_scheduler_policy_uses_booking_timezone() {
    let mut config = AppConfig::default();
    config.catalog.utc_offset_hours = 8;
    let policy = config.scheduler_policy().unwrap();
    assert_eq!(policy.local_offset.local_minus_utc(), 8 * 3600);
    assert_eq!(policy.tree2_grace, chrono::Duration::minutes(120));
}

#[test]
fn test_load_rejects_tolerance_below_cadence() {
    let file = yaml_file("scheduler:\n  reminder_cadence_secs: 300\n  reminder_tolerance_secs: 60\n");
    assert!(AppConfig::load(Some(file.path())).is_err());
}
