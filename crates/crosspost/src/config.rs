//! Engine settings shared by every subcommand.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use clap::Args;
use miette::Result;

use crosspost_scheduler::{MediaRef, PlatformId, Repeat, SchedulerConfig};

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
pub fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

/// Parse an RFC 3339 timestamp, or a naive `YYYY-MM-DDTHH:MM[:SS]` taken as UTC.
pub fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    if s.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid time '{}', expected RFC 3339", s))
}

pub fn parse_platform(s: &str) -> Result<PlatformId, String> {
    PlatformId::from_str(&s.trim().to_lowercase())
}

pub fn parse_repeat(s: &str) -> Result<Repeat, String> {
    Repeat::from_str(&s.trim().to_lowercase())
}

/// Weekday as 0 (Sunday) to 6 (Saturday), or a three-letter English name.
pub fn parse_weekday(s: &str) -> Result<u8, String> {
    const NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];
    let lower = s.trim().to_lowercase();
    if let Some(index) = NAMES.iter().position(|name| lower.starts_with(name)) {
        return Ok(index as u8);
    }
    match lower.parse::<u8>() {
        Ok(day) if day <= 6 => Ok(day),
        _ => Err(format!("invalid weekday '{}', expected 0-6 or sun..sat", s)),
    }
}

/// Attachment as `PATH` or `PATH=ALT TEXT`.
pub fn parse_media(s: &str) -> Result<MediaRef, String> {
    let (path, alt) = match s.split_once('=') {
        Some((path, alt)) => (path, alt),
        None => (s, ""),
    };
    if path.trim().is_empty() {
        return Err(format!("invalid media '{}', expected PATH[=ALT]", s));
    }
    Ok(MediaRef::new(path.trim()).with_alt_text(alt.trim()))
}

/// Thread attachment as `SEGMENT:PATH[=ALT]`, segments counted from 1.
pub fn parse_segment_media(s: &str) -> Result<(usize, MediaRef), String> {
    let invalid = || format!("invalid media '{}', expected SEGMENT:PATH[=ALT]", s);
    let (segment, media) = s.split_once(':').ok_or_else(invalid)?;
    let segment: usize = segment.trim().parse().map_err(|_| invalid())?;
    if segment == 0 {
        return Err(invalid());
    }
    Ok((segment, parse_media(media)?))
}

/// Settings for the store and the dispatch engine.
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// SQLite database path [default: <data dir>/crosspost/crosspost.db]
    #[arg(long, env = "CROSSPOST_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// Concurrent deliveries per scan
    #[arg(long, env = "CROSSPOST_WORKER_COUNT", default_value = "4", global = true)]
    pub worker_count: usize,

    /// Maximum due posts or threads picked up per scan
    #[arg(long, env = "CROSSPOST_BATCH_SIZE", default_value = "10", global = true)]
    pub batch_size: usize,

    /// First retry delay in seconds
    #[arg(
        long,
        env = "CROSSPOST_RETRY_BASE_DELAY_SECS",
        default_value = "60",
        global = true
    )]
    pub retry_base_delay_secs: u64,

    /// Retry delay ceiling in seconds
    #[arg(
        long,
        env = "CROSSPOST_RETRY_MAX_DELAY_SECS",
        default_value = "3600",
        global = true
    )]
    pub retry_max_delay_secs: u64,

    /// Minutes a post may be overdue at startup before it needs manual review
    #[arg(
        long,
        env = "CROSSPOST_GRACE_WINDOW_MINUTES",
        default_value = "10",
        global = true
    )]
    pub grace_window_minutes: u64,

    /// Random offset bound in minutes for recurring posts (max 120)
    #[arg(long, env = "CROSSPOST_JITTER_MINUTES", default_value = "0", global = true)]
    pub jitter_minutes: u32,

    /// Simulate deliveries without contacting any platform.
    /// Accepts "1", "true", "yes" or "on".
    #[arg(
        long,
        env = "CROSSPOST_DISCARD_MODE",
        value_parser = parse_bool_env,
        default_value = "false",
        global = true
    )]
    pub discard_mode: bool,

    /// Seconds between scheduler ticks
    #[arg(
        long,
        env = "CROSSPOST_TICK_INTERVAL_SECS",
        default_value = "60",
        global = true
    )]
    pub tick_interval_secs: u64,
}

impl EngineArgs {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            worker_count: self.worker_count.max(1),
            batch_size: self.batch_size.max(1),
            retry_base_delay: Duration::from_secs(self.retry_base_delay_secs),
            retry_max_delay: Duration::from_secs(self.retry_max_delay_secs),
            grace_window: Duration::from_secs(self.grace_window_minutes * 60),
            jitter_minutes: 0,
            discard_mode: self.discard_mode,
            tick_interval: Duration::from_secs(self.tick_interval_secs.max(1)),
        }
        .with_jitter_minutes(self.jitter_minutes)
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("crosspost").join("crosspost.db"))
            .ok_or_else(|| {
                miette::miette!("could not determine a data directory, pass --database")
            })
    }
}
