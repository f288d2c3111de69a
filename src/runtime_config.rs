// =============================================================================
// Runtime Configuration: engine settings with atomic save
// =============================================================================
//
// Every tunable of the confluence engine lives here. The configuration is an
// immutable value handed to each component at construction; per-symbol
// decision parameters can later be replaced through the decision engine.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::signals::ModuleKind;

/// Lower bound for the package freshness window.
pub const MIN_PACKAGE_AGE_SECS: i64 = 60;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "EURUSD".to_string(),
        "GBPUSD".to_string(),
        "XAUUSD".to_string(),
    ]
}

fn default_evaluation_interval_secs() -> u64 {
    5
}

fn default_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_buy_threshold() -> f64 {
    65.0
}

fn default_sell_threshold() -> f64 {
    65.0
}

fn default_close_threshold() -> f64 {
    60.0
}

fn default_close_all_threshold() -> f64 {
    20.0
}

fn default_cooldown_minutes() -> u32 {
    15
}

fn default_max_positions() -> u32 {
    1
}

fn default_risk_percent() -> f64 {
    1.0
}

fn default_min_risk_reward() -> f64 {
    1.5
}

fn default_max_package_age_secs() -> i64 {
    300
}

fn default_execution_id_base() -> u64 {
    770_000
}

fn default_module_weights() -> BTreeMap<ModuleKind, f64> {
    let mut weights = BTreeMap::new();
    weights.insert(ModuleKind::MultiTimeframe, 25.0);
    weights.insert(ModuleKind::PointOfInterest, 20.0);
    weights.insert(ModuleKind::Volume, 15.0);
    weights.insert(ModuleKind::Rsi, 15.0);
    weights.insert(ModuleKind::Macd, 15.0);
    weights.insert(ModuleKind::Pattern, 10.0);
    weights
}

fn default_min_components() -> usize {
    3
}

fn default_min_confidence() -> f64 {
    50.0
}

fn default_min_update_interval_secs() -> i64 {
    60
}

fn default_history_capacity() -> usize {
    100
}

fn default_volatility_threshold() -> f64 {
    0.125
}

fn default_degradation_threshold() -> f64 {
    0.15
}

fn default_short_periods() -> usize {
    5
}

fn default_long_periods() -> usize {
    20
}

fn default_trend_lookback() -> usize {
    10
}

fn default_account_balance() -> f64 {
    10_000.0
}

fn default_max_daily_loss_pct() -> f64 {
    5.0
}

fn default_max_drawdown_pct() -> f64 {
    10.0
}

fn default_setup_stop_fraction() -> f64 {
    0.005
}

fn default_setup_reward_multiple() -> f64 {
    2.0
}

fn default_session_end_hour() -> u32 {
    24
}

// =============================================================================
// DecisionParams
// =============================================================================

/// Per-symbol decision thresholds. Confidence thresholds are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionParams {
    /// Minimum confidence to open a long.
    #[serde(default = "default_buy_threshold")]
    pub buy_threshold: f64,

    /// Minimum confidence to open a short.
    #[serde(default = "default_sell_threshold")]
    pub sell_threshold: f64,

    /// Base threshold for closing a conflicting position, scaled by profit.
    #[serde(default = "default_close_threshold")]
    pub close_threshold: f64,

    /// Below this confidence every position is closed.
    #[serde(default = "default_close_all_threshold")]
    pub close_all_threshold: f64,

    /// Minimum gap between same-direction actions.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,

    /// Maximum positions per direction when multiple positions are allowed.
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,

    /// Account percentage risked per trade.
    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,

    /// Minimum reward:risk of a trade setup.
    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: f64,
}

impl Default for DecisionParams {
    fn default() -> Self {
        Self {
            buy_threshold: default_buy_threshold(),
            sell_threshold: default_sell_threshold(),
            close_threshold: default_close_threshold(),
            close_all_threshold: default_close_all_threshold(),
            cooldown_minutes: default_cooldown_minutes(),
            max_positions: default_max_positions(),
            risk_percent: default_risk_percent(),
            min_risk_reward: default_min_risk_reward(),
        }
    }
}

impl DecisionParams {
    /// Cooldown window in seconds.
    pub fn cooldown_secs(&self) -> i64 {
        i64::from(self.cooldown_minutes) * 60
    }
}

// =============================================================================
// EngineSettings
// =============================================================================

/// Switches that apply to every symbol handled by the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Allow more than one open position per symbol.
    #[serde(default)]
    pub allow_multiple_positions: bool,

    #[serde(default = "default_true")]
    pub enforce_cooldown: bool,

    #[serde(default = "default_true")]
    pub use_risk_management: bool,

    /// Packages older than this are not acted upon. Never below 60.
    #[serde(default = "default_max_package_age_secs")]
    pub max_package_age_secs: i64,

    /// Base from which per-symbol execution identifiers are derived.
    #[serde(default = "default_execution_id_base")]
    pub execution_id_base: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            allow_multiple_positions: false,
            enforce_cooldown: true,
            use_risk_management: true,
            max_package_age_secs: default_max_package_age_secs(),
            execution_id_base: default_execution_id_base(),
        }
    }
}

// =============================================================================
// AggregatorSettings
// =============================================================================

/// Analyzer weighting and package validity rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorSettings {
    /// Weight per analyzer module in percent; normalised to 100 on use.
    #[serde(default = "default_module_weights")]
    pub weights: BTreeMap<ModuleKind, f64>,

    /// Minimum number of modules that must report for a valid package.
    #[serde(default = "default_min_components")]
    pub min_components: usize,

    /// Minimum overall confidence for a valid package.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Cached packages are reused until this many seconds have elapsed.
    #[serde(default = "default_min_update_interval_secs")]
    pub min_update_interval_secs: i64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            weights: default_module_weights(),
            min_components: default_min_components(),
            min_confidence: default_min_confidence(),
            min_update_interval_secs: default_min_update_interval_secs(),
        }
    }
}

// =============================================================================
// TrendSettings
// =============================================================================

/// Confidence trend tracker tuning. Scores are on a 0..1 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSettings {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,

    /// Standard deviation above which the trend is VOLATILE.
    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold: f64,

    /// Relative drop of the short average that counts as degradation.
    #[serde(default = "default_degradation_threshold")]
    pub degradation_threshold: f64,

    #[serde(default = "default_short_periods")]
    pub short_periods: usize,

    #[serde(default = "default_long_periods")]
    pub long_periods: usize,

    #[serde(default = "default_trend_lookback")]
    pub trend_lookback: usize,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            volatility_threshold: default_volatility_threshold(),
            degradation_threshold: default_degradation_threshold(),
            short_periods: default_short_periods(),
            long_periods: default_long_periods(),
            trend_lookback: default_trend_lookback(),
        }
    }
}

// =============================================================================
// RiskSettings / SessionSettings
// =============================================================================

/// Account-level limits consulted when risk management is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    #[serde(default = "default_account_balance")]
    pub account_balance: f64,

    /// Maximum realised loss per day, percent of balance.
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,

    /// Maximum drawdown from peak equity, percent.
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    /// Stop distance of generated trade setups, fraction of the mark.
    #[serde(default = "default_setup_stop_fraction")]
    pub setup_stop_fraction: f64,

    /// Target distance of generated trade setups, in stop distances.
    #[serde(default = "default_setup_reward_multiple")]
    pub setup_reward_multiple: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            account_balance: default_account_balance(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_drawdown_pct: default_max_drawdown_pct(),
            setup_stop_fraction: default_setup_stop_fraction(),
            setup_reward_multiple: default_setup_reward_multiple(),
        }
    }
}

/// UTC trading hours, `[start_hour, end_hour)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub start_hour_utc: u32,

    #[serde(default = "default_session_end_hour")]
    pub end_hour_utc: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            start_hour_utc: 0,
            end_hour_utc: default_session_end_hour(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the confluence engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Symbols registered at startup.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Seconds between scheduler ticks.
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,

    /// Address of the diagnostics API.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub engine: EngineSettings,

    /// Parameters given to symbols registered without explicit ones.
    #[serde(default)]
    pub default_params: DecisionParams,

    #[serde(default)]
    pub aggregator: AggregatorSettings,

    #[serde(default)]
    pub trend: TrendSettings,

    #[serde(default)]
    pub risk: RiskSettings,

    #[serde(default)]
    pub session: SessionSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            evaluation_interval_secs: default_evaluation_interval_secs(),
            bind_addr: default_bind_addr(),
            engine: EngineSettings::default(),
            default_params: DecisionParams::default(),
            aggregator: AggregatorSettings::default(),
            trend: TrendSettings::default(),
            risk: RiskSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        let config = config.sanitized();

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            max_package_age_secs = config.engine.max_package_age_secs,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Clamp values that would break engine invariants.
    pub fn sanitized(mut self) -> Self {
        if self.engine.max_package_age_secs < MIN_PACKAGE_AGE_SECS {
            warn!(
                configured = self.engine.max_package_age_secs,
                minimum = MIN_PACKAGE_AGE_SECS,
                "max_package_age_secs below minimum, clamping"
            );
            self.engine.max_package_age_secs = MIN_PACKAGE_AGE_SECS;
        }
        if self.aggregator.min_components == 0 {
            self.aggregator.min_components = 1;
        }
        if self.trend.capacity == 0 {
            self.trend.capacity = default_history_capacity();
        }
        if !(self.risk.setup_stop_fraction > 0.0 && self.risk.setup_stop_fraction < 1.0) {
            self.risk.setup_stop_fraction = default_setup_stop_fraction();
        }
        self.trend.short_periods = self.trend.short_periods.max(1);
        self.trend.long_periods = self.trend.long_periods.max(1);
        self.trend.trend_lookback = self.trend.trend_lookback.max(1);
        if self.session.end_hour_utc > 24 {
            self.session.end_hour_utc = 24;
        }
        self
    }
}
