//! Application configuration.
//!
//! One TOML document with a section per concern. Every field has a
//! default so a partial file works; API credentials come exclusively
//! from the environment and are never written to disk.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use steuergrid_mm::{GridCenter, GridConfig, RegimeRouterConfig, SkewConfig, SpacingConfig};
use steuergrid_risk::RiskConfig;
use steuergrid_tax::TaxAgentConfig;

use crate::error::{AppError, Result};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "STEUERGRID_CONFIG";

/// API credentials, environment-only.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
}

impl ApiCredentials {
    /// Read `STEUERGRID_API_KEY` / `STEUERGRID_API_SECRET`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("STEUERGRID_API_KEY")
            .map_err(|_| AppError::ExchangeAuth("STEUERGRID_API_KEY not set".into()))?;
        let secret = std::env::var("STEUERGRID_API_SECRET")
            .map_err(|_| AppError::ExchangeAuth("STEUERGRID_API_SECRET not set".into()))?;
        Ok(Self { key, secret })
    }
}

/// Rate limiter settings (venue tier dependent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_counter")]
    pub max_counter: f64,
    #[serde(default = "default_decay_per_sec")]
    pub decay_per_sec: f64,
    #[serde(default = "default_headroom_pct")]
    pub headroom_pct: f64,
}

fn default_max_counter() -> f64 {
    180.0
}
fn default_decay_per_sec() -> f64 {
    3.75
}
fn default_headroom_pct() -> f64 {
    0.80
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_counter: default_max_counter(),
            decay_per_sec: default_decay_per_sec(),
            headroom_pct: default_headroom_pct(),
        }
    }
}

/// Heartbeat / dead-man's-switch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_sec: u64,
    #[serde(default = "default_cancel_after_timeout")]
    pub cancel_after_timeout_sec: u32,
}

fn default_heartbeat_interval() -> u64 {
    20
}
fn default_cancel_after_timeout() -> u32 {
    60
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_sec: default_heartbeat_interval(),
            cancel_after_timeout_sec: default_cancel_after_timeout(),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Trading pair symbol.
    #[serde(default = "default_pair")]
    pub pair: String,
    /// FIFO ledger file.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Reports and auxiliary data.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Optional Prometheus port; the exporter itself is external.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,

    /// USD balance at engine start (reconciled against the venue).
    #[serde(default = "default_initial_usd")]
    pub initial_usd: Decimal,
    /// Fallback EUR/USD rate when the rate service has no entry.
    #[serde(default = "default_eur_usd_fallback")]
    pub eur_usd_rate_fallback: Decimal,
    /// 30-day volume seed for the fee tier before the venue reports.
    #[serde(default)]
    pub volume_30d_usd: u64,

    /// Idle fallback tick interval.
    #[serde(default = "default_idle_tick_ms")]
    pub idle_tick_ms: u64,
    /// Grid slots per side (the slot table is fixed for the process).
    #[serde(default = "default_max_levels_per_side")]
    pub max_levels_per_side: u32,
    /// Reference price for the grid center.
    #[serde(default)]
    pub grid_center: GridCenter,

    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub spacing: SpacingConfig,
    #[serde(default)]
    pub skew: SkewConfig,
    #[serde(default)]
    pub regime: RegimeRouterConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub tax: TaxAgentConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

fn default_pair() -> String {
    "XBT/USD".to_string()
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger.json")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_initial_usd() -> Decimal {
    dec!(5000)
}
fn default_eur_usd_fallback() -> Decimal {
    dec!(1.08)
}
fn default_idle_tick_ms() -> u64 {
    1000
}
fn default_max_levels_per_side() -> u32 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pair: default_pair(),
            ledger_path: default_ledger_path(),
            data_dir: default_data_dir(),
            metrics_port: None,
            initial_usd: default_initial_usd(),
            eur_usd_rate_fallback: default_eur_usd_fallback(),
            volume_30d_usd: 0,
            idle_tick_ms: default_idle_tick_ms(),
            max_levels_per_side: default_max_levels_per_side(),
            grid_center: GridCenter::default(),
            grid: GridConfig::default(),
            spacing: SpacingConfig::default(),
            skew: SkewConfig::default(),
            regime: RegimeRouterConfig::default(),
            risk: RiskConfig::default(),
            tax: TaxAgentConfig::default(),
            rate_limit: RateLimitConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit path, the `STEUERGRID_CONFIG` env var, or
    /// defaults when neither names an existing file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));

        let config = match path {
            Some(p) if p.exists() => Self::from_file(&p)?,
            Some(p) => {
                return Err(AppError::Config(format!(
                    "config file not found: {}",
                    p.display()
                )))
            }
            None => {
                tracing::warn!("No config file, using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("failed to read config: {e}")))?;
        toml::from_str(&content).map_err(|e| AppError::Config(format!("failed to parse config: {e}")))
    }

    /// Reject configurations the engine cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        if self.grid.order_size_usd <= Decimal::ZERO {
            return Err(AppError::Config("grid.order_size_usd must be positive".into()));
        }
        if self.max_levels_per_side == 0 {
            return Err(AppError::Config("max_levels_per_side must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.rate_limit.headroom_pct) {
            return Err(AppError::Config("rate_limit.headroom_pct must be in [0, 1]".into()));
        }
        if self.spacing.min_spacing_bps > self.spacing.max_spacing_bps {
            return Err(AppError::Config(
                "spacing.min_spacing_bps exceeds max_spacing_bps".into(),
            ));
        }
        if self.eur_usd_rate_fallback <= Decimal::ZERO {
            return Err(AppError::Config("eur_usd_rate_fallback must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pair, "XBT/USD");
        assert_eq!(config.max_levels_per_side, 5);
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
initial_usd = "10000"

[grid]
order_size_usd = "250"

[tax]
near_threshold_days = 300
"#,
        )
        .unwrap();
        assert_eq!(config.initial_usd, dec!(10000));
        assert_eq!(config.grid.order_size_usd, dec!(250));
        assert_eq!(config.tax.near_threshold_days, 300);
        // Untouched sections keep defaults.
        assert_eq!(config.heartbeat.interval_sec, 20);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AppConfig::default();
        config.grid.order_size_usd = Decimal::ZERO;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = AppConfig::default();
        config.rate_limit.headroom_pct = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.pair, config.pair);
        assert_eq!(back.grid.order_size_usd, config.grid.order_size_usd);
    }
}
