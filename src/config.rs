use chrono::FixedOffset;
use config::ConfigError;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::settlement::{SettlementConfig, SettlementScheduleConfig};

/// Accepted range for SETTLEMENT_INTERVAL_SECS: one minute up to one week
const MIN_SETTLEMENT_INTERVAL_SECS: u64 = 60;
const MAX_SETTLEMENT_INTERVAL_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub settlement_interval_secs: u64,
    pub platform_rate: Decimal,
    pub schedule_utc_offset_minutes: i32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::NotFound("DATABASE_URL".to_string()))?;

        Ok(Self {
            database_url,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
            settlement_interval_secs: validate_interval(parse_var(
                "SETTLEMENT_INTERVAL_SECS",
                3 * 3600,
            )?)?,
            platform_rate: parse_platform_rate(
                &std::env::var("PLATFORM_RATE").unwrap_or_else(|_| "0.10".to_string()),
            )?,
            schedule_utc_offset_minutes: parse_var("SCHEDULE_UTC_OFFSET_MINUTES", 0)?,
        })
    }

    pub fn settlement(&self) -> Result<SettlementConfig, ConfigError> {
        let schedule_offset = FixedOffset::east_opt(self.schedule_utc_offset_minutes * 60)
            .ok_or_else(|| {
                ConfigError::Message(format!(
                    "SCHEDULE_UTC_OFFSET_MINUTES out of range: {}",
                    self.schedule_utc_offset_minutes
                ))
            })?;

        Ok(SettlementConfig {
            platform_rate: self.platform_rate,
            schedule_offset,
        })
    }

    pub fn schedule(&self) -> SettlementScheduleConfig {
        SettlementScheduleConfig {
            interval: Duration::from_secs(self.settlement_interval_secs),
            ..SettlementScheduleConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Message(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

/// Platform cut as a fraction; must be within [0, 1)
fn parse_platform_rate(raw: &str) -> Result<Decimal, ConfigError> {
    let rate = Decimal::from_str(raw.trim())
        .map_err(|_| ConfigError::Message(format!("PLATFORM_RATE is not a decimal: {}", raw)))?;

    if rate < Decimal::ZERO || rate >= Decimal::ONE {
        return Err(ConfigError::Message(format!(
            "PLATFORM_RATE must be in [0, 1), got {}",
            rate
        )));
    }

    Ok(rate)
}

fn validate_interval(secs: u64) -> Result<u64, ConfigError> {
    if !(MIN_SETTLEMENT_INTERVAL_SECS..=MAX_SETTLEMENT_INTERVAL_SECS).contains(&secs) {
        return Err(ConfigError::Message(format!(
            "SETTLEMENT_INTERVAL_SECS must be in [{}, {}], got {}",
            MIN_SETTLEMENT_INTERVAL_SECS, MAX_SETTLEMENT_INTERVAL_SECS, secs
        )));
    }

    Ok(secs)
}
