use rayon::ThreadPoolBuilder;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

// ──────────────────────────────────────────────────────────────────────────────
// Risk Aggregation Defaults
// ──────────────────────────────────────────────────────────────────────────────

/// Total portfolio value is clamped to ±this amount.
pub const MAX_REASONABLE_PROFIT: f64 = 1e12;
/// Upper bound of the blended ROI factor (10000x = 1,000,000%).
pub const MAX_REASONABLE_ROI_FACTOR: f64 = 10_000.0;
/// A portfolio cannot lose more than everything.
pub const MIN_ROI_FACTOR: f64 = -1.0;

/// Below this many return observations an asset falls back to conservative defaults (~3 months).
pub const MIN_RETURNS_DATA_POINTS: usize = 60;
pub const DEFAULT_CONSERVATIVE_DAILY_MEAN: f64 = 0.0001;
pub const DEFAULT_CONSERVATIVE_DAILY_VOL: f64 = 0.01;
pub const DEFAULT_CONSERVATIVE_MAX_DRAWDOWN: f64 = -0.10;

/// Annual trading days for annualization.
pub const TRADING_DAYS: f64 = 252.0;

pub const BULL_RETURN_FACTOR: f64 = 1.1;
pub const BEAR_RETURN_FACTOR: f64 = 0.9;

// Risk score = baseline + (vol / max_vol) * vol_weight - (drawdown / max_drawdown) * drawdown_weight
pub const RISK_SCORE_BASELINE: f64 = 2.5;
pub const RISK_SCORE_MAX_VOLATILITY: f64 = 0.8;
pub const RISK_SCORE_VOLATILITY_WEIGHT: f64 = 4.0;
pub const RISK_SCORE_MAX_DRAWDOWN: f64 = 0.5;
pub const RISK_SCORE_DRAWDOWN_WEIGHT: f64 = 2.0;
pub const RISK_SCORE_BULL_OFFSET: f64 = -1.0;
pub const RISK_SCORE_BEAR_OFFSET: f64 = 0.6;

/// Index used to classify the overall market trend.
pub const TREND_INDEX_TICKER: &str = "^GSPC";
pub const TREND_SHORT_WINDOW: usize = 50;
pub const TREND_LONG_WINDOW: usize = 200;

// ──────────────────────────────────────────────────────────────────────────────
// Optimizer Defaults
// ──────────────────────────────────────────────────────────────────────────────

/// Independent restarts of the security-level optimizer.
pub const OPTIMIZER_RESTARTS: usize = 100;
pub const SOLVER_MAX_ITERATIONS: usize = 1_000;
pub const SOLVER_X_TOL: f64 = 1e-9;
pub const SOLVER_F_TOL: f64 = 1e-10;
/// Floor for every asset class weight in the coarse optimizer.
pub const ASSET_CLASS_MIN_WEIGHT: f64 = 0.05;
/// Tolerance on user allocations summing to one.
pub const ALLOCATION_SUM_TOLERANCE: f64 = 0.01;

/// Risk-free annual rate used in the suggestion metrics.
pub const RISK_FREE_RATE: f64 = 0.05;

// ──────────────────────────────────────────────────────────────────────────────
// Simulation Defaults
// ──────────────────────────────────────────────────────────────────────────────

pub const SIMULATION_PATHS: usize = 1_000;
pub const GBM_STEPS_PER_YEAR: usize = 252;

/// Asset classes in the order the coarse optimizer sees them.
pub const ASSET_CLASSES: &[&str] = &["stocks", "bonds", "real_estate", "commodities"];

/// Stock universe for the security-level optimizer (largest US listings by market cap).
pub const TOP_STOCK_TICKERS: &[&str] = &[
    "AAPL", "MSFT", "NVDA", "GOOGL", "AMZN", "META", "BRK-B", "TSLA", "AVGO", "LLY",
    "JPM", "V", "UNH", "XOM", "MA", "JNJ", "PG", "HD", "COST", "MRK",
    "ABBV", "CVX", "CRM", "BAC", "NFLX", "KO", "PEP", "AMD", "TMO", "WMT",
    "ADBE", "LIN", "MCD", "CSCO", "ACN", "ABT", "ORCL", "DHR", "INTC", "WFC",
    "DIS", "TXN", "VZ", "PM", "CAT", "AMGN", "IBM", "QCOM", "NKE", "GE",
];

/// Parameters of the risk aggregation pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskConfig {
    pub max_reasonable_profit: f64,
    pub max_reasonable_roi_factor: f64,
    pub min_return_points: usize,
    pub default_daily_mean: f64,
    pub default_daily_vol: f64,
    pub default_max_drawdown: f64,
    pub trading_periods_per_year: f64,
    pub bull_return_factor: f64,
    pub bear_return_factor: f64,
    pub score_baseline: f64,
    pub score_max_volatility: f64,
    pub score_volatility_weight: f64,
    pub score_max_drawdown: f64,
    pub score_drawdown_weight: f64,
    pub score_bull_offset: f64,
    pub score_bear_offset: f64,
    pub trend_ticker: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_reasonable_profit: MAX_REASONABLE_PROFIT,
            max_reasonable_roi_factor: MAX_REASONABLE_ROI_FACTOR,
            min_return_points: MIN_RETURNS_DATA_POINTS,
            default_daily_mean: DEFAULT_CONSERVATIVE_DAILY_MEAN,
            default_daily_vol: DEFAULT_CONSERVATIVE_DAILY_VOL,
            default_max_drawdown: DEFAULT_CONSERVATIVE_MAX_DRAWDOWN,
            trading_periods_per_year: TRADING_DAYS,
            bull_return_factor: BULL_RETURN_FACTOR,
            bear_return_factor: BEAR_RETURN_FACTOR,
            score_baseline: RISK_SCORE_BASELINE,
            score_max_volatility: RISK_SCORE_MAX_VOLATILITY,
            score_volatility_weight: RISK_SCORE_VOLATILITY_WEIGHT,
            score_max_drawdown: RISK_SCORE_MAX_DRAWDOWN,
            score_drawdown_weight: RISK_SCORE_DRAWDOWN_WEIGHT,
            score_bull_offset: RISK_SCORE_BULL_OFFSET,
            score_bear_offset: RISK_SCORE_BEAR_OFFSET,
            trend_ticker: TREND_INDEX_TICKER.to_string(),
        }
    }
}

impl RiskConfig {
    /// Defaults overridden by `RISKPILOT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            max_reasonable_profit: parse_or(&lookup, "RISKPILOT_MAX_PROFIT", d.max_reasonable_profit),
            max_reasonable_roi_factor: parse_or(&lookup, "RISKPILOT_MAX_ROI_FACTOR", d.max_reasonable_roi_factor),
            min_return_points: parse_or(&lookup, "RISKPILOT_MIN_RETURN_POINTS", d.min_return_points),
            default_daily_mean: d.default_daily_mean,
            default_daily_vol: d.default_daily_vol,
            default_max_drawdown: d.default_max_drawdown,
            trading_periods_per_year: parse_or(&lookup, "RISKPILOT_PERIODS_PER_YEAR", d.trading_periods_per_year),
            bull_return_factor: d.bull_return_factor,
            bear_return_factor: d.bear_return_factor,
            score_baseline: parse_or(&lookup, "RISKPILOT_SCORE_BASELINE", d.score_baseline),
            score_max_volatility: parse_or(&lookup, "RISKPILOT_SCORE_MAX_VOLATILITY", d.score_max_volatility),
            score_volatility_weight: d.score_volatility_weight,
            score_max_drawdown: parse_or(&lookup, "RISKPILOT_SCORE_MAX_DRAWDOWN", d.score_max_drawdown),
            score_drawdown_weight: d.score_drawdown_weight,
            score_bull_offset: d.score_bull_offset,
            score_bear_offset: d.score_bear_offset,
            trend_ticker: lookup("RISKPILOT_TREND_TICKER")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(d.trend_ticker),
        }
    }
}

/// Parameters of the local solver and the restart search.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerConfig {
    pub restarts: usize,
    pub max_iterations: usize,
    pub x_tol: f64,
    pub f_tol: f64,
    pub asset_class_min_weight: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            restarts: OPTIMIZER_RESTARTS,
            max_iterations: SOLVER_MAX_ITERATIONS,
            x_tol: SOLVER_X_TOL,
            f_tol: SOLVER_F_TOL,
            asset_class_min_weight: ASSET_CLASS_MIN_WEIGHT,
        }
    }
}

impl OptimizerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            restarts: parse_or(&lookup, "RISKPILOT_RESTARTS", d.restarts).max(1),
            max_iterations: parse_or(&lookup, "RISKPILOT_SOLVER_MAX_ITER", d.max_iterations),
            x_tol: d.x_tol,
            f_tol: d.f_tol,
            asset_class_min_weight: d.asset_class_min_weight,
        }
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            warn!("Unparsable {}={}; keeping default", key, raw.trim());
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_risk_config_defaults() {
        let cfg = RiskConfig::default();
        assert_eq!(cfg.max_reasonable_profit, 1e12);
        assert_eq!(cfg.min_return_points, 60);
        assert_eq!(cfg.score_baseline, 2.5);
        assert_eq!(cfg.trend_ticker, "^GSPC");
    }

    #[test]
    fn test_risk_config_env_overrides() {
        let cfg = RiskConfig::from_lookup(lookup_from(&[
            ("RISKPILOT_PERIODS_PER_YEAR", "12"),
            ("RISKPILOT_SCORE_MAX_VOLATILITY", " 0.6 "),
            ("RISKPILOT_TREND_TICKER", "SPY"),
        ]));
        assert_eq!(cfg.trading_periods_per_year, 12.0);
        assert_eq!(cfg.score_max_volatility, 0.6);
        assert_eq!(cfg.trend_ticker, "SPY");
    }

    #[test]
    fn test_unparsable_override_keeps_default() {
        let cfg = OptimizerConfig::from_lookup(lookup_from(&[("RISKPILOT_RESTARTS", "lots")]));
        assert_eq!(cfg.restarts, OPTIMIZER_RESTARTS);

        let cfg = OptimizerConfig::from_lookup(lookup_from(&[("RISKPILOT_RESTARTS", "0")]));
        assert_eq!(cfg.restarts, 1, "Restart count is floored at one");
    }
}
