//! Configuration for the orchestration engine, loaded from environment
//! variables (`.env` supported via dotenvy in main). Defaults mirror the
//! operational reference config; every knob is overridable.

use crate::application::orchestrator::OrchestratorConfig;
use crate::application::safety::{
    CircuitBreakerConfig, RateLimiterConfig, RugShieldConfig, StopLossConfig,
};
use crate::domain::decision::CategoryWeights;
use crate::domain::signal::BotCategory;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Exchange backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Mock,
    Rest,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "rest" => Ok(Mode::Rest),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'mock' or 'rest'", s),
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: '{}' ({})", key, raw, e)),
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    }
}

/// Parses `NAME:weight,...` pairs into a weight table. Unknown category
/// names are a configuration error.
pub fn parse_category_weights(raw: &str) -> Result<CategoryWeights> {
    let mut weights = CategoryWeights::default();
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (name, value) = pair
            .split_once(':')
            .with_context(|| format!("Malformed weight entry '{}'", pair))?;
        let category: BotCategory = name
            .trim()
            .parse()
            .with_context(|| format!("Unknown category in CATEGORY_WEIGHTS: '{}'", name))?;
        let weight: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("Bad weight for {}: '{}'", name, value))?;
        if !(0.0..=1.0).contains(&weight) {
            anyhow::bail!("Weight for {} must be in [0, 1], got {}", name, weight);
        }
        weights.0.insert(category, weight);
    }
    Ok(weights)
}

#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub enabled: bool,
    pub pairs: Vec<String>,
    pub cycle_interval_s: u64,
    pub cycle_jitter: bool,
    pub trade_quantity: Decimal,
}

impl TradingConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: env_parse("TRADING_ENABLED", false)?,
            pairs: env_list("TRADING_PAIRS", &["BTC/USDT", "ETH/USDT", "SOL/USDT"]),
            cycle_interval_s: env_parse("CYCLE_INTERVAL_S", 60)?,
            cycle_jitter: env_parse("CYCLE_JITTER", false)?,
            trade_quantity: env_parse("TRADE_QUANTITY", Decimal::new(1, 2))?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SafetyEnvConfig {
    pub rate_limit_per_minute: u32,
    pub rate_limit_per_second: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_s: u64,
    pub call_timeout_s: u64,
    pub rate_limit_backoff_s: u64,
}

impl SafetyEnvConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", 50)?,
            rate_limit_per_second: env_parse("RATE_LIMIT_PER_SECOND", 10)?,
            failure_threshold: env_parse("FAILURE_THRESHOLD", 5)?,
            success_threshold: env_parse("SUCCESS_THRESHOLD", 1)?,
            recovery_timeout_s: env_parse("RECOVERY_TIMEOUT_S", 60)?,
            call_timeout_s: env_parse("CALL_TIMEOUT_S", 10)?,
            rate_limit_backoff_s: env_parse("RATE_LIMIT_BACKOFF_S", 5)?,
        })
    }

    pub fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            max_per_minute: self.rate_limit_per_minute,
            max_per_second: self.rate_limit_per_second,
        }
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorEnvConfig {
    pub decision_threshold: f64,
    pub dissent_gate: f64,
    pub category_weights: CategoryWeights,
    pub bot_timeout_ms: u64,
}

impl OrchestratorEnvConfig {
    fn from_env() -> Result<Self> {
        let category_weights = match env::var("CATEGORY_WEIGHTS") {
            Err(_) => CategoryWeights::default(),
            Ok(raw) => parse_category_weights(&raw)?,
        };
        Ok(Self {
            decision_threshold: env_parse("DECISION_THRESHOLD", 0.15)?,
            dissent_gate: env_parse("DISSENT_GATE", 0.4)?,
            category_weights,
            bot_timeout_ms: env_parse("BOT_TIMEOUT_MS", 2_000)?,
        })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            decision_threshold: self.decision_threshold,
            dissent_gate: self.dissent_gate,
            weights: self.category_weights.clone(),
            bot_timeout: Duration::from_millis(self.bot_timeout_ms),
            ..OrchestratorConfig::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct RugShieldEnvConfig {
    pub min_liquidity_usd: f64,
    pub min_volume_24h_usd: f64,
    pub max_spread_pct: f64,
    pub blacklist: Vec<String>,
}

impl RugShieldEnvConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            min_liquidity_usd: env_parse("RUG_MIN_LIQUIDITY_USD", 1_000_000.0)?,
            min_volume_24h_usd: env_parse("RUG_MIN_VOLUME_24H_USD", 100_000.0)?,
            max_spread_pct: env_parse("RUG_MAX_SPREAD_PCT", 1.0)?,
            blacklist: env_list("RUG_BLACKLIST", &[]),
        })
    }

    pub fn rug_shield(&self) -> RugShieldConfig {
        RugShieldConfig {
            min_liquidity_usd: self.min_liquidity_usd,
            min_volume_24h_usd: self.min_volume_24h_usd,
            max_spread_pct: self.max_spread_pct,
            blacklist: self.blacklist.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StopLossEnvConfig {
    pub base_pct: f64,
    pub atr_multiplier: f64,
    pub min_pct: f64,
    pub max_pct: f64,
    pub atr_period: usize,
}

impl StopLossEnvConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            base_pct: env_parse("STOP_BASE_PCT", 2.0)?,
            atr_multiplier: env_parse("STOP_ATR_MULTIPLIER", 1.5)?,
            min_pct: env_parse("STOP_MIN_PCT", 0.5)?,
            max_pct: env_parse("STOP_MAX_PCT", 5.0)?,
            atr_period: env_parse("STOP_ATR_PERIOD", 14)?,
        })
    }

    pub fn stop_loss(&self) -> StopLossConfig {
        StopLossConfig {
            base_pct: Decimal::from_f64(self.base_pct).unwrap_or(Decimal::TWO),
            atr_multiplier: Decimal::from_f64(self.atr_multiplier)
                .unwrap_or(Decimal::new(15, 1)),
            min_pct: Decimal::from_f64(self.min_pct).unwrap_or(Decimal::new(5, 1)),
            max_pct: Decimal::from_f64(self.max_pct).unwrap_or(Decimal::new(5, 0)),
            atr_period: self.atr_period,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeliosEnvConfig {
    pub monitoring_interval_s: u64,
    pub stable_version_retention: i64,
    pub snapshot_dir: String,
    pub restore_target: String,
}

impl HeliosEnvConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            monitoring_interval_s: env_parse("HELIOS_MONITORING_INTERVAL_S", 30)?,
            stable_version_retention: env_parse("HELIOS_STABLE_RETENTION", 10)?,
            snapshot_dir: env_string("HELIOS_SNAPSHOT_DIR", "data/helios/snapshots"),
            restore_target: env_string("HELIOS_RESTORE_TARGET", "data/helios/live"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RestEnvConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl RestEnvConfig {
    fn from_env() -> Self {
        Self {
            base_url: env_string("EXCHANGE_BASE_URL", "https://api.exchange.example"),
            api_key: env_string("EXCHANGE_API_KEY", ""),
            api_secret: env_string("EXCHANGE_API_SECRET", ""),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    pub interval_s: u64,
}

impl ObservabilityEnvConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: env_parse("OBSERVABILITY_ENABLED", true)?,
            interval_s: env_parse("OBSERVABILITY_INTERVAL", 60)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub database_url: String,
    pub trading: TradingConfig,
    pub safety: SafetyEnvConfig,
    pub orchestrator: OrchestratorEnvConfig,
    pub rug_shield: RugShieldEnvConfig,
    pub stop_loss: StopLossEnvConfig,
    pub helios: HeliosEnvConfig,
    pub rest: RestEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mode_str = env::var("MODE").unwrap_or_else(|_| "mock".to_string());
        let mode = Mode::from_str(&mode_str)?;

        let config = Self {
            mode,
            database_url: env_string("DATABASE_URL", "sqlite://data/quorum.db"),
            trading: TradingConfig::from_env().context("Failed to load trading config")?,
            safety: SafetyEnvConfig::from_env().context("Failed to load safety config")?,
            orchestrator: OrchestratorEnvConfig::from_env()
                .context("Failed to load orchestrator config")?,
            rug_shield: RugShieldEnvConfig::from_env()
                .context("Failed to load rug shield config")?,
            stop_loss: StopLossEnvConfig::from_env()
                .context("Failed to load stop loss config")?,
            helios: HeliosEnvConfig::from_env().context("Failed to load helios config")?,
            rest: RestEnvConfig::from_env(),
            observability: ObservabilityEnvConfig::from_env()
                .context("Failed to load observability config")?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.trading.pairs.is_empty() {
            anyhow::bail!("TRADING_PAIRS must name at least one symbol");
        }
        for pair in &self.trading.pairs {
            crate::domain::market::validate_symbol(pair)
                .map_err(|_| anyhow::anyhow!("Invalid trading pair: '{}'", pair))?;
        }
        if self.trading.cycle_interval_s == 0 {
            anyhow::bail!("CYCLE_INTERVAL_S must be positive");
        }
        if !(0.0..=1.0).contains(&self.orchestrator.decision_threshold) {
            anyhow::bail!(
                "DECISION_THRESHOLD must be in [0, 1], got {}",
                self.orchestrator.decision_threshold
            );
        }
        if self.mode == Mode::Rest && self.rest.api_key.is_empty() {
            anyhow::bail!("EXCHANGE_API_KEY is required when MODE=rest");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_config() {
        let config = Config::from_env().expect("defaults should parse");

        assert_eq!(config.mode, Mode::Mock);
        assert!(!config.trading.enabled);
        assert_eq!(
            config.trading.pairs,
            vec!["BTC/USDT", "ETH/USDT", "SOL/USDT"]
        );
        assert_eq!(config.trading.cycle_interval_s, 60);
        assert_eq!(config.safety.rate_limit_per_minute, 50);
        assert_eq!(config.safety.failure_threshold, 5);
        assert_eq!(config.safety.recovery_timeout_s, 60);
        assert_eq!(config.orchestrator.decision_threshold, 0.15);
        assert_eq!(config.orchestrator.dissent_gate, 0.4);
        assert_eq!(config.rug_shield.min_liquidity_usd, 1_000_000.0);
        assert_eq!(config.rug_shield.max_spread_pct, 1.0);
        assert_eq!(config.stop_loss.base_pct, 2.0);
        assert_eq!(config.stop_loss.atr_period, 14);
        assert_eq!(config.helios.monitoring_interval_s, 30);
        assert_eq!(config.helios.stable_version_retention, 10);
    }

    #[test]
    fn test_mode_parsing() {
        assert!(matches!(Mode::from_str("mock").unwrap(), Mode::Mock));
        assert!(matches!(Mode::from_str("REST").unwrap(), Mode::Rest));
        assert!(Mode::from_str("paper").is_err());
    }

    #[test]
    fn test_category_weight_overrides() {
        let weights = parse_category_weights("AI_ML:0.4,STRATEGY:0.1").unwrap();
        assert_eq!(weights.get(BotCategory::AiMl), 0.4);
        assert_eq!(weights.get(BotCategory::Strategy), 0.1);
        // Untouched entries keep their defaults
        assert_eq!(weights.get(BotCategory::Risk), 0.20);
    }

    #[test]
    fn test_unknown_weight_category_rejected() {
        assert!(parse_category_weights("ORACLE:0.5").is_err());
        assert!(parse_category_weights("AI_ML=0.5").is_err());
        assert!(parse_category_weights("AI_ML:1.5").is_err());
    }

    #[test]
    fn test_stop_loss_conversion_to_decimal() {
        let config = StopLossEnvConfig {
            base_pct: 2.0,
            atr_multiplier: 1.5,
            min_pct: 0.5,
            max_pct: 5.0,
            atr_period: 14,
        };
        let stop = config.stop_loss();
        assert_eq!(stop.base_pct, Decimal::TWO);
        assert_eq!(stop.max_pct, Decimal::from(5));
    }
}
