use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::risk::RiskLimits;
use crate::infrastructure::core::connection_pool::ConnectionPoolConfig;
use crate::infrastructure::core::retry::RetryConfig as EngineRetryConfig;
use crate::infrastructure::core::service_runtime::ServiceConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error(transparent)]
    RiskLimits(#[from] crate::domain::risk::RiskLimitsError),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Raw, serde-deserializable configuration shape. Field names match the
/// "recognized options" this crate exposes over env vars / TOML files.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub starting_equity: Decimal,
    pub max_position_size: Decimal,
    pub max_portfolio_exposure: f64,
    pub max_sector_exposure: f64,
    pub max_single_stock_weight: f64,
    pub min_confidence_threshold: f64,
    pub max_signals_per_hour: u32,
    pub max_concurrent_signals: u32,
    pub max_daily_trades: u32,
    pub min_model_performance_score: f64,
    pub max_daily_loss: Decimal,
    pub max_position_loss: Decimal,
    pub stop_loss_threshold: f64,
    pub max_correlation_exposure: f64,
    pub max_strategy_allocation: f64,

    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_pool_size")]
    pub connection_pool_size: usize,
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: usize,
    #[serde(default = "default_circuit_timeout_secs")]
    pub circuit_timeout_secs: u64,
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_execution_timeout_secs() -> u64 {
    60
}
fn default_pool_size() -> usize {
    5
}
fn default_circuit_failure_threshold() -> usize {
    5
}
fn default_circuit_timeout_secs() -> u64 {
    60
}

/// Validated runtime configuration, built from [`ConfigFile`].
#[derive(Debug, Clone)]
pub struct Config {
    pub starting_equity: Decimal,
    pub risk_limits: RiskLimits,
    pub execution_timeout: Duration,
    pub service: ServiceConfig,
    pub log_level: String,
}

impl Config {
    pub fn from_file(raw: ConfigFile) -> Result<Self, ConfigError> {
        let risk_limits = RiskLimits {
            max_position_size: raw.max_position_size,
            max_portfolio_exposure: raw.max_portfolio_exposure,
            max_sector_exposure: raw.max_sector_exposure,
            max_single_stock_weight: raw.max_single_stock_weight,
            min_confidence_threshold: raw.min_confidence_threshold,
            max_signals_per_hour: raw.max_signals_per_hour,
            max_concurrent_signals: raw.max_concurrent_signals,
            max_daily_trades: raw.max_daily_trades,
            min_model_performance_score: raw.min_model_performance_score,
            max_daily_loss: raw.max_daily_loss,
            max_position_loss: raw.max_position_loss,
            stop_loss_threshold: raw.stop_loss_threshold,
            max_correlation_exposure: raw.max_correlation_exposure,
            max_strategy_allocation: raw.max_strategy_allocation,
        };
        risk_limits.validate()?;

        if raw.starting_equity <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue {
                field: "starting_equity",
                reason: "must be positive".into(),
            });
        }

        let service = ServiceConfig {
            retry: EngineRetryConfig::connection(),
            circuit_failure_threshold: raw.circuit_failure_threshold,
            circuit_success_threshold: 2,
            circuit_timeout: Duration::from_secs(raw.circuit_timeout_secs),
            pool: ConnectionPoolConfig {
                max_connections: raw.connection_pool_size,
                ..ConnectionPoolConfig::default()
            },
        };

        Ok(Self {
            starting_equity: raw.starting_equity,
            risk_limits,
            execution_timeout: Duration::from_secs(raw.execution_timeout_secs),
            service,
            log_level: raw.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Reads configuration from a TOML file.
    pub fn from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let raw: ConfigFile = toml::from_str(&contents)?;
        Self::from_file(raw)
    }

    /// Reads configuration from environment variables with a
    /// `MIDPLANE_`-prefixed naming scheme, falling back to defaults for
    /// the ambient tuning knobs.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        fn env_required(key: &'static str) -> Result<String, ConfigError> {
            std::env::var(key).map_err(|_| ConfigError::MissingField(key))
        }
        fn parse_field<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                field: key,
                reason: format!("could not parse {value:?}"),
            })
        }

        let raw = ConfigFile {
            starting_equity: parse_field("MIDPLANE_STARTING_EQUITY", &env_required("MIDPLANE_STARTING_EQUITY")?)?,
            max_position_size: parse_field("MIDPLANE_MAX_POSITION_SIZE", &env_required("MIDPLANE_MAX_POSITION_SIZE")?)?,
            max_portfolio_exposure: parse_field("MIDPLANE_MAX_PORTFOLIO_EXPOSURE", &env_required("MIDPLANE_MAX_PORTFOLIO_EXPOSURE")?)?,
            max_sector_exposure: parse_field("MIDPLANE_MAX_SECTOR_EXPOSURE", &env_required("MIDPLANE_MAX_SECTOR_EXPOSURE")?)?,
            max_single_stock_weight: parse_field("MIDPLANE_MAX_SINGLE_STOCK_WEIGHT", &env_required("MIDPLANE_MAX_SINGLE_STOCK_WEIGHT")?)?,
            min_confidence_threshold: parse_field("MIDPLANE_MIN_CONFIDENCE_THRESHOLD", &env_required("MIDPLANE_MIN_CONFIDENCE_THRESHOLD")?)?,
            max_signals_per_hour: parse_field("MIDPLANE_MAX_SIGNALS_PER_HOUR", &env_required("MIDPLANE_MAX_SIGNALS_PER_HOUR")?)?,
            max_concurrent_signals: parse_field("MIDPLANE_MAX_CONCURRENT_SIGNALS", &env_required("MIDPLANE_MAX_CONCURRENT_SIGNALS")?)?,
            max_daily_trades: std::env::var("MIDPLANE_MAX_DAILY_TRADES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            min_model_performance_score: parse_field("MIDPLANE_MIN_MODEL_PERFORMANCE_SCORE", &env_required("MIDPLANE_MIN_MODEL_PERFORMANCE_SCORE")?)?,
            max_daily_loss: parse_field("MIDPLANE_MAX_DAILY_LOSS", &env_required("MIDPLANE_MAX_DAILY_LOSS")?)?,
            max_position_loss: parse_field("MIDPLANE_MAX_POSITION_LOSS", &env_required("MIDPLANE_MAX_POSITION_LOSS")?)?,
            stop_loss_threshold: parse_field("MIDPLANE_STOP_LOSS_THRESHOLD", &env_required("MIDPLANE_STOP_LOSS_THRESHOLD")?)?,
            max_correlation_exposure: parse_field("MIDPLANE_MAX_CORRELATION_EXPOSURE", &env_required("MIDPLANE_MAX_CORRELATION_EXPOSURE")?)?,
            max_strategy_allocation: parse_field("MIDPLANE_MAX_STRATEGY_ALLOCATION", &env_required("MIDPLANE_MAX_STRATEGY_ALLOCATION")?)?,
            execution_timeout_secs: std::env::var("MIDPLANE_EXECUTION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_execution_timeout_secs),
            connection_pool_size: std::env::var("MIDPLANE_CONNECTION_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_pool_size),
            circuit_failure_threshold: std::env::var("MIDPLANE_CIRCUIT_FAILURE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_circuit_failure_threshold),
            circuit_timeout_secs: std::env::var("MIDPLANE_CIRCUIT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_circuit_timeout_secs),
            log_level: std::env::var("MIDPLANE_LOG_LEVEL").ok(),
        };

        Self::from_file(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_raw() -> ConfigFile {
        ConfigFile {
            starting_equity: dec!(100000),
            max_position_size: dec!(10000),
            max_portfolio_exposure: 0.8,
            max_sector_exposure: 0.3,
            max_single_stock_weight: 0.1,
            min_confidence_threshold: 0.6,
            max_signals_per_hour: 20,
            max_concurrent_signals: 5,
            max_daily_trades: 50,
            min_model_performance_score: 0.5,
            max_daily_loss: dec!(500),
            max_position_loss: dec!(200),
            stop_loss_threshold: 0.05,
            max_correlation_exposure: 0.6,
            max_strategy_allocation: 0.4,
            execution_timeout_secs: 60,
            connection_pool_size: 5,
            circuit_failure_threshold: 5,
            circuit_timeout_secs: 60,
            log_level: None,
        }
    }

    #[test]
    fn builds_from_valid_raw_config() {
        let config = Config::from_file(sample_raw()).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.risk_limits.max_signals_per_hour, 20);
    }

    #[test]
    fn rejects_non_positive_starting_equity() {
        let mut raw = sample_raw();
        raw.starting_equity = dec!(0);
        assert!(matches!(Config::from_file(raw), Err(ConfigError::InvalidValue { field: "starting_equity", .. })));
    }

    #[test]
    fn rejects_invalid_risk_limits() {
        let mut raw = sample_raw();
        raw.min_confidence_threshold = 0.0;
        assert!(matches!(Config::from_file(raw), Err(ConfigError::RiskLimits(_))));
    }
}
