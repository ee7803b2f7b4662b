//! Process configuration, read from `HEALTHQUEST_*` environment variables.

use std::env;
use std::str::FromStr;

use chrono::FixedOffset;

use crate::error::{Result, TrackerError};
use crate::period::Zone;
use crate::tracker::DEFAULT_LEADERBOARD_SIZE;

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DB_PATH: &str = "sqlite:healthquest.db?mode=rwc";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Zone for period bucketing. The host's local zone unless a fixed offset is configured.
    pub zone: Zone,
    pub leaderboard_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: DEFAULT_DB_PATH.to_string(),
            zone: Zone::Local,
            leaderboard_size: DEFAULT_LEADERBOARD_SIZE,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their default; malformed values are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let port = parse_var(&lookup, "HEALTHQUEST_PORT")?.unwrap_or(defaults.port);
        let database_url = lookup("HEALTHQUEST_DATABASE_URL").unwrap_or(defaults.database_url);

        let zone = match parse_var::<i32>(&lookup, "HEALTHQUEST_UTC_OFFSET_MINUTES")? {
            Some(minutes) => {
                let offset = minutes
                    .checked_mul(60)
                    .and_then(FixedOffset::east_opt)
                    .ok_or_else(|| {
                        TrackerError::Config(format!(
                            "HEALTHQUEST_UTC_OFFSET_MINUTES out of range: {minutes}"
                        ))
                    })?;
                Zone::Fixed(offset)
            }
            None => defaults.zone,
        };

        let leaderboard_size = parse_var(&lookup, "HEALTHQUEST_LEADERBOARD_SIZE")?
            .unwrap_or(defaults.leaderboard_size);
        if leaderboard_size == 0 {
            return Err(TrackerError::Config(
                "HEALTHQUEST_LEADERBOARD_SIZE must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            port,
            database_url,
            zone,
            leaderboard_size,
        })
    }
}

fn parse_var<T: FromStr>(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TrackerError::Config(format!("invalid {key}: '{raw}'"))),
    }
}
