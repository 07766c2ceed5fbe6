//! Configuration module - environment variable parsing

use std::env;
use std::str::FromStr;
use uuid::Uuid;

use crate::race::rules::RulesConfig;
use crate::race::wind::WindConfig;
use crate::util::rate_limit::INPUT_RATE_LIMIT;
use crate::util::time::{DEFAULT_MAX_TICK_DT, DEFAULT_TICK_RATE};

/// Everything one host loop needs to run a race
#[derive(Clone, Debug)]
pub struct RaceConfig {
    /// Seed for the wind stream; `None` draws one per race
    pub seed: Option<u64>,
    pub tick_rate: u32,
    /// Largest dt fed to a single tick (seconds)
    pub max_tick_dt: f32,
    /// Race clock limit after the gun before the timeout hook fires
    pub race_duration_secs: f32,
    pub laps: u32,
    /// Distance from the start line to the windward mark (metres)
    pub beat_length: f32,
    pub countdown_secs: f32,
    pub fixed_wind: bool,
    pub wind: WindConfig,
    pub rules: RulesConfig,
    /// Consecutive failed ticks before the loop halts
    pub max_tick_failures: u32,
    /// Inputs per second accepted from one boat
    pub input_rate_limit: u32,
    /// Seconds between frame history samples
    pub history_interval_secs: f32,
    /// Frame history capacity
    pub history_len: usize,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            seed: None,
            tick_rate: DEFAULT_TICK_RATE,
            max_tick_dt: DEFAULT_MAX_TICK_DT,
            race_duration_secs: 900.0,
            laps: 2,
            beat_length: 400.0,
            countdown_secs: 30.0,
            fixed_wind: false,
            wind: WindConfig::default(),
            rules: RulesConfig::default(),
            max_tick_failures: 10,
            input_rate_limit: INPUT_RATE_LIMIT,
            history_interval_secs: 1.0,
            history_len: 600,
        }
    }
}

/// Presence and promotion timing for one client
#[derive(Clone, Debug)]
pub struct ElectionConfig {
    pub client_id: Uuid,
    pub heartbeat_ms: u64,
    /// A host heartbeat older than this is stale
    pub host_stale_ms: u64,
    /// How long a joining client waits for an existing host
    pub discovery_timeout_ms: u64,
    /// Upper bound of the random delay before self-promotion
    pub promotion_jitter_ms: u64,
    /// Watch only: never sails a boat, never hosts
    pub spectator: bool,
}

impl ElectionConfig {
    pub fn for_client(client_id: Uuid) -> Self {
        Self {
            client_id,
            ..Self::default()
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            client_id: Uuid::new_v4(),
            heartbeat_ms: 1000,
            host_stale_ms: 4000,
            discovery_timeout_ms: 2500,
            promotion_jitter_ms: 750,
            spectator: false,
        }
    }
}

/// Race joined when `RACE_ID` is unset; clients agree on it without coordination
pub const DEFAULT_RACE_ID: Uuid = Uuid::nil();

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Shared by every client sailing the same race
    pub race_id: Uuid,
    pub race: RaceConfig,
    pub election: ElectionConfig,
    /// Bot boats joined by the local client once it is host
    pub bots: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let race_defaults = RaceConfig::default();
        let election_defaults = ElectionConfig::default();

        let wind = WindConfig {
            direction_deg: parse_or("WIND_DIRECTION_DEG", race_defaults.wind.direction_deg)?,
            speed_kts: parse_or("WIND_SPEED_KTS", race_defaults.wind.speed_kts)?,
            ..race_defaults.wind
        };
        let rules = RulesConfig {
            cooldown_secs: parse_or("RULE_COOLDOWN_SECS", race_defaults.rules.cooldown_secs)?,
            ..race_defaults.rules
        };

        let race = RaceConfig {
            seed: parse_opt("RACE_SEED")?,
            tick_rate: parse_or("TICK_RATE", race_defaults.tick_rate)?,
            max_tick_dt: parse_or("MAX_TICK_DT", race_defaults.max_tick_dt)?,
            race_duration_secs: parse_or("RACE_DURATION_SECS", race_defaults.race_duration_secs)?,
            laps: parse_or("LAPS", race_defaults.laps)?,
            countdown_secs: parse_or("COUNTDOWN_SECS", race_defaults.countdown_secs)?,
            fixed_wind: parse_or("FIXED_WIND", race_defaults.fixed_wind)?,
            wind,
            rules,
            max_tick_failures: parse_or("MAX_TICK_FAILURES", race_defaults.max_tick_failures)?,
            input_rate_limit: parse_or("INPUT_RATE_LIMIT", race_defaults.input_rate_limit)?,
            ..race_defaults
        };
        if race.tick_rate == 0 {
            return Err(ConfigError::Invalid {
                key: "TICK_RATE",
                value: "0".to_string(),
            });
        }

        let election = ElectionConfig {
            client_id: parse_opt("CLIENT_ID")?.unwrap_or(election_defaults.client_id),
            heartbeat_ms: parse_or("HEARTBEAT_MS", election_defaults.heartbeat_ms)?,
            host_stale_ms: parse_or("HOST_STALE_MS", election_defaults.host_stale_ms)?,
            discovery_timeout_ms: parse_or("DISCOVERY_TIMEOUT_MS", election_defaults.discovery_timeout_ms)?,
            promotion_jitter_ms: parse_or("PROMOTION_JITTER_MS", election_defaults.promotion_jitter_ms)?,
            spectator: parse_or("SPECTATOR", election_defaults.spectator)?,
        };

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            race_id: parse_or("RACE_ID", DEFAULT_RACE_ID)?,
            race,
            election,
            bots: parse_or("BOTS", 3usize)?,
        })
    }
}

fn parse_opt<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw).map(Some),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::Invalid {
            key,
            value: "<non-unicode>".to_string(),
        }),
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    Ok(parse_opt(key)?.unwrap_or(default))
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
