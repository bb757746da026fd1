//! Forward risk assessment of a user allocation across the four asset classes.

use crate::config::{ASSET_CLASSES, MIN_ROI_FACTOR, RiskConfig};
use crate::data::PriceSource;
use crate::error::{Result, RiskError};
use crate::sanitize::{Sanitize, Value, round_to};
use crate::simulation::Simulator;
use crate::stats::AssetStatistics;
use crate::trend::{MarketTrend, TrendClassifier};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RiskRequest {
    pub investment_amount: f64,
    /// Horizon in whole years, 1 to 30.
    pub duration: u32,
    /// 0 (cautious) to 100 (aggressive); inflates volatility proportionally.
    pub risk_appetite: f64,
    pub stocks: f64,
    pub bonds: f64,
    pub real_estate: f64,
    pub commodities: f64,
}

impl RiskRequest {
    /// Allocation percentages keyed by asset class, in canonical order.
    pub fn allocations(&self) -> [(&'static str, f64); 4] {
        [
            (ASSET_CLASSES[0], self.stocks),
            (ASSET_CLASSES[1], self.bonds),
            (ASSET_CLASSES[2], self.real_estate),
            (ASSET_CLASSES[3], self.commodities),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.investment_amount.is_finite() && self.investment_amount > 0.0) {
            return Err(RiskError::validation("investment amount must be positive"));
        }
        if !(1..=30).contains(&self.duration) {
            return Err(RiskError::validation("duration must be between 1 and 30 years"));
        }
        if !(0.0..=100.0).contains(&self.risk_appetite) {
            return Err(RiskError::validation("risk appetite must be between 0 and 100"));
        }
        for (asset, pct) in self.allocations() {
            if !(0.0..=100.0).contains(&pct) {
                return Err(RiskError::validation(format!(
                    "{} allocation must be between 0 and 100",
                    asset
                )));
            }
        }
        Ok(())
    }
}

/// Scorecard for one assessment. Serializes through the [`Value`] sanitizer
/// under its display keys; the market trend is not part of the payload.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskMetrics {
    pub total_profit: Option<f64>,
    pub roi_pct: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
    pub volatility_score: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub risk_score: Option<f64>,
    pub yearly_monte_carlo: Vec<Option<f64>>,
    pub yearly_gbm: Vec<Option<f64>>,
    pub market_trend: MarketTrend,
}

impl From<&RiskMetrics> for Value {
    fn from(m: &RiskMetrics) -> Self {
        let entries = [
            ("Total Profit", Value::from(m.total_profit)),
            ("ROI (%)", Value::from(m.roi_pct)),
            ("Max Drawdown (%)", Value::from(m.max_drawdown_pct)),
            ("Volatility Score", Value::from(m.volatility_score)),
            ("Reward to Risk Ratio (Sharpe Ratio)", Value::from(m.sharpe_ratio)),
            ("Risk Score", Value::from(m.risk_score)),
            ("Yearly Monte Carlo Values", Value::from(m.yearly_monte_carlo.clone())),
            ("Yearly GBM Values", Value::from(m.yearly_gbm.clone())),
        ];
        Value::Map(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

impl Serialize for RiskMetrics {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        Value::from(self).sanitize().serialize(serializer)
    }
}

/// Runs both simulators over every allocated asset class and blends the results.
pub struct RiskAggregator<'a> {
    prices: &'a dyn PriceSource,
    trend: &'a dyn TrendClassifier,
    monte_carlo: &'a dyn Simulator,
    gbm: &'a dyn Simulator,
    config: RiskConfig,
}

/// Adjusted inputs and simulation output for one asset class.
struct AssetRun {
    volatility: f64,
    max_drawdown: f64,
    mc_final: f64,
    gbm_final: f64,
    mc_return: f64,
    gbm_return: f64,
    mc_yearly: Vec<f64>,
    gbm_yearly: Vec<f64>,
}

impl<'a> RiskAggregator<'a> {
    pub fn new(
        prices: &'a dyn PriceSource,
        trend: &'a dyn TrendClassifier,
        monte_carlo: &'a dyn Simulator,
        gbm: &'a dyn Simulator,
        config: RiskConfig,
    ) -> Self {
        Self {
            prices,
            trend,
            monte_carlo,
            gbm,
            config,
        }
    }

    pub fn assess(&self, request: &RiskRequest) -> Result<RiskMetrics> {
        request.validate()?;
        let allocated: Vec<(&str, f64)> = request
            .allocations()
            .into_iter()
            .filter(|(_, pct)| *pct > 0.0)
            .collect();
        if allocated.is_empty() {
            return Err(RiskError::validation(
                "At least one asset must have an allocation greater than 0.",
            ));
        }

        let trend = self.trend.classify(&self.config.trend_ticker);
        info!(
            "Assessing {} asset classes over {} years (trend: {})",
            allocated.len(),
            request.duration,
            trend
        );

        let runs = allocated
            .iter()
            .map(|(asset, pct)| self.run_asset(asset, *pct, request, trend))
            .collect::<Result<Vec<_>>>()?;

        Ok(self.aggregate(&runs, trend))
    }

    fn run_asset(&self, asset: &str, pct: f64, request: &RiskRequest, trend: MarketTrend) -> Result<AssetRun> {
        let cfg = &self.config;
        let series = self.prices.load_prices(asset)?;
        let stats = AssetStatistics::from_prices(&series.closes);
        debug!(
            "{}: {}% allocated, {} returns, mean {:.6}, vol {:.6}, drawdown {:.4}",
            asset, pct, stats.observations, stats.mean_return, stats.volatility, stats.max_drawdown
        );

        let (mut mean_return, mut volatility, max_drawdown) = if stats.observations < cfg.min_return_points {
            warn!(
                "{} has only {} return points (less than {}); using conservative defaults",
                asset, stats.observations, cfg.min_return_points
            );
            (cfg.default_daily_mean, cfg.default_daily_vol, cfg.default_max_drawdown)
        } else {
            (stats.mean_return, stats.volatility, stats.max_drawdown)
        };

        mean_return *= trend.return_factor(cfg);
        volatility *= 1.0 + request.risk_appetite / 100.0;

        let annual_mean = mean_return * cfg.trading_periods_per_year;
        let annual_vol = volatility * cfg.trading_periods_per_year.sqrt();
        let investment = request.investment_amount * pct / 100.0;
        let years = request.duration as usize;

        let mc = self.monte_carlo.simulate(investment, annual_mean, annual_vol, years);
        let gbm = self.gbm.simulate(investment, annual_mean, annual_vol, years);
        debug!(
            "{}: invested {:.2}, Monte Carlo {:.2}, GBM {:.2}",
            asset, investment, mc.final_value, gbm.final_value
        );

        Ok(AssetRun {
            volatility,
            max_drawdown,
            mc_final: mc.final_value,
            gbm_final: gbm.final_value,
            mc_return: mc.final_value / investment - 1.0,
            gbm_return: gbm.final_value / investment - 1.0,
            mc_yearly: mc.yearly_values,
            gbm_yearly: gbm.yearly_values,
        })
    }

    fn aggregate(&self, runs: &[AssetRun], trend: MarketTrend) -> RiskMetrics {
        let cfg = &self.config;
        let n = runs.len() as f64;

        let total_mc: f64 = runs.iter().map(|r| r.mc_final).sum();
        let total_gbm: f64 = runs.iter().map(|r| r.gbm_final).sum();
        let avg_mc_return = runs.iter().map(|r| r.mc_return).sum::<f64>() / n;
        let avg_gbm_return = runs.iter().map(|r| r.gbm_return).sum::<f64>() / n;

        let mut total_value = (total_mc + total_gbm) / 2.0;
        let mut roi = (avg_mc_return + avg_gbm_return) / 2.0;

        if total_value > cfg.max_reasonable_profit {
            warn!("Capping total value from {} to {}", total_value, cfg.max_reasonable_profit);
            total_value = cfg.max_reasonable_profit;
        } else if total_value < -cfg.max_reasonable_profit {
            warn!("Capping total value from {} to {}", total_value, -cfg.max_reasonable_profit);
            total_value = -cfg.max_reasonable_profit;
        }
        if roi > cfg.max_reasonable_roi_factor {
            warn!("Capping ROI factor from {} to {}", roi, cfg.max_reasonable_roi_factor);
            roi = cfg.max_reasonable_roi_factor;
        } else if roi < MIN_ROI_FACTOR {
            warn!("Capping ROI factor from {} to {}", roi, MIN_ROI_FACTOR);
            roi = MIN_ROI_FACTOR;
        }

        let avg_volatility = runs.iter().map(|r| r.volatility).sum::<f64>() / n;
        let avg_drawdown = runs.iter().map(|r| r.max_drawdown).sum::<f64>() / n;
        // Zero volatility leaves the ratio undefined.
        let sharpe = if avg_volatility > 0.0 {
            roi / avg_volatility
        } else {
            f64::NAN
        };

        let risk_score = (cfg.score_baseline
            + (avg_volatility / cfg.score_max_volatility) * cfg.score_volatility_weight
            - (avg_drawdown / cfg.score_max_drawdown) * cfg.score_drawdown_weight
            + trend.score_offset(cfg))
        .clamp(0.0, 10.0);

        let mc_paths: Vec<&[f64]> = runs.iter().map(|r| r.mc_yearly.as_slice()).collect();
        let gbm_paths: Vec<&[f64]> = runs.iter().map(|r| r.gbm_yearly.as_slice()).collect();

        RiskMetrics {
            total_profit: round_to(total_value.sanitize(), 2),
            roi_pct: round_to((roi * 100.0).sanitize(), 2),
            max_drawdown_pct: round_to((avg_drawdown * 100.0).sanitize(), 2),
            volatility_score: round_to((avg_volatility * 100.0).sanitize(), 2),
            sharpe_ratio: round_to(sharpe.sanitize(), 2),
            risk_score: round_to(risk_score.sanitize(), 1),
            yearly_monte_carlo: elementwise_mean(&mc_paths).sanitize(),
            yearly_gbm: elementwise_mean(&gbm_paths).sanitize(),
            market_trend: trend,
        }
    }
}

/// Mean across trajectories at each index, truncated to the shortest one.
fn elementwise_mean(paths: &[&[f64]]) -> Vec<f64> {
    let len = paths.iter().map(|p| p.len()).min().unwrap_or(0);
    (0..len)
        .map(|i| paths.iter().map(|p| p[i]).sum::<f64>() / paths.len() as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PriceSeries, StaticPriceSource};
    use crate::simulation::{MonteCarloSimulator, SimulationOutcome};
    use crate::trend::FixedTrend;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NEUTRAL: FixedTrend = FixedTrend(MarketTrend::Neutral);
    const BULL: FixedTrend = FixedTrend(MarketTrend::Bull);
    const BEAR: FixedTrend = FixedTrend(MarketTrend::Bear);

    /// Returns `initial * factor` and records every call.
    struct ScalingSimulator {
        factor: f64,
        calls: Mutex<Vec<(f64, f64, f64, usize)>>,
    }

    impl ScalingSimulator {
        fn new(factor: f64) -> Self {
            Self {
                factor,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Simulator for ScalingSimulator {
        fn simulate(&self, initial: f64, annual_mean: f64, annual_vol: f64, years: usize) -> SimulationOutcome {
            self.calls.lock().unwrap().push((initial, annual_mean, annual_vol, years));
            let final_value = initial * self.factor;
            let yearly_values = (0..=years)
                .map(|y| initial + (final_value - initial) * y as f64 / years as f64)
                .collect();
            SimulationOutcome {
                final_value,
                yearly_values,
            }
        }
    }

    struct CountingSource {
        inner: StaticPriceSource,
        calls: AtomicUsize,
    }

    impl PriceSource for CountingSource {
        fn load_prices(&self, id: &str) -> Result<PriceSeries> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.load_prices(id)
        }
    }

    struct CountingTrend(AtomicUsize);

    impl TrendClassifier for CountingTrend {
        fn classify(&self, _ticker: &str) -> MarketTrend {
            self.0.fetch_add(1, Ordering::SeqCst);
            MarketTrend::Neutral
        }
    }

    fn request(stocks: f64, bonds: f64) -> RiskRequest {
        RiskRequest {
            investment_amount: 1_000_000.0,
            duration: 5,
            risk_appetite: 0.0,
            stocks,
            bonds,
            real_estate: 0.0,
            commodities: 0.0,
        }
    }

    fn trending_prices(days: usize) -> Vec<f64> {
        (0..days)
            .map(|i| 100.0 * (1.0 + 0.001 * i as f64) + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect()
    }

    fn prices() -> StaticPriceSource {
        StaticPriceSource::new()
            .with_series("stocks", trending_prices(120))
            .with_series("bonds", trending_prices(120))
    }

    #[test]
    fn test_total_profit_is_capped() {
        let source = prices();
        let sim = ScalingSimulator::new(2e6);
        let agg = RiskAggregator::new(&source, &NEUTRAL, &sim, &sim, RiskConfig::default());

        let metrics = agg.assess(&request(100.0, 0.0)).unwrap();
        assert_eq!(metrics.total_profit, Some(1e12), "raw 2e12 should be capped");
        assert_eq!(metrics.roi_pct, Some(1_000_000.0), "ROI factor should be capped at 10000");
    }

    #[test]
    fn test_roi_is_floored_at_total_loss() {
        let source = prices();
        let sim = ScalingSimulator::new(-1.0);
        let agg = RiskAggregator::new(&source, &NEUTRAL, &sim, &sim, RiskConfig::default());

        let metrics = agg.assess(&request(60.0, 40.0)).unwrap();
        assert_eq!(metrics.roi_pct, Some(-100.0));
        assert_eq!(metrics.total_profit, Some(-1_000_000.0));
    }

    #[test]
    fn test_zero_allocation_rejected_before_any_collaborator() {
        let source = CountingSource {
            inner: prices(),
            calls: AtomicUsize::new(0),
        };
        let trend = CountingTrend(AtomicUsize::new(0));
        let sim = ScalingSimulator::new(1.0);
        let agg = RiskAggregator::new(&source, &trend, &sim, &sim, RiskConfig::default());

        let err = agg.assess(&request(0.0, 0.0)).unwrap_err();
        assert!(matches!(err, RiskError::Validation { .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(trend.0.load(Ordering::SeqCst), 0);
        assert_eq!(sim.call_count(), 0);
    }

    #[test]
    fn test_constant_history_has_undefined_sharpe() {
        let source = StaticPriceSource::new().with_series("stocks", vec![100.0; 61]);
        let sim = ScalingSimulator::new(1.0);
        let agg = RiskAggregator::new(&source, &NEUTRAL, &sim, &sim, RiskConfig::default());

        let metrics = agg.assess(&request(100.0, 0.0)).unwrap();
        assert_eq!(metrics.sharpe_ratio, None);
        assert_eq!(metrics.volatility_score, Some(0.0));
        assert_eq!(metrics.risk_score, Some(2.5));
        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json["Reward to Risk Ratio (Sharpe Ratio)"].is_null());
    }

    #[test]
    fn test_metrics_payload_passes_through_value_sanitizer() {
        let metrics = RiskMetrics {
            total_profit: Some(f64::INFINITY),
            roi_pct: Some(12.5),
            max_drawdown_pct: Some(-8.0),
            volatility_score: Some(20.0),
            sharpe_ratio: Some(f64::NAN),
            risk_score: Some(6.2),
            yearly_monte_carlo: vec![Some(100.0), Some(f64::NAN), None],
            yearly_gbm: vec![Some(100.0), Some(110.0)],
            market_trend: MarketTrend::Bear,
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Total Profit": null,
                "ROI (%)": 12.5,
                "Max Drawdown (%)": -8.0,
                "Volatility Score": 20.0,
                "Reward to Risk Ratio (Sharpe Ratio)": null,
                "Risk Score": 6.2,
                "Yearly Monte Carlo Values": [100.0, null, null],
                "Yearly GBM Values": [100.0, 110.0],
            })
        );
    }

    #[test]
    fn test_short_history_uses_conservative_defaults() {
        let source = StaticPriceSource::new().with_series("stocks", trending_prices(30));
        let sim = ScalingSimulator::new(1.0);
        let agg = RiskAggregator::new(&source, &NEUTRAL, &sim, &sim, RiskConfig::default());

        let metrics = agg.assess(&request(100.0, 0.0)).unwrap();
        assert_eq!(metrics.max_drawdown_pct, Some(-10.0));
        assert_eq!(metrics.volatility_score, Some(1.0));

        let calls = sim.calls.lock().unwrap();
        let (initial, mean, vol, years) = calls[0];
        assert_eq!(initial, 1_000_000.0);
        assert!((mean - 0.0001 * 252.0).abs() < 1e-12);
        assert!((vol - 0.01 * 252f64.sqrt()).abs() < 1e-12);
        assert_eq!(years, 5);
    }

    #[test]
    fn test_trend_shifts_mean_and_risk_score() {
        let source = StaticPriceSource::new().with_series("stocks", vec![100.0; 61]);
        let cfg = RiskConfig::default();

        let sim = ScalingSimulator::new(1.0);
        let bull = RiskAggregator::new(&source, &BULL, &sim, &sim, cfg.clone())
            .assess(&request(100.0, 0.0))
            .unwrap();
        assert_eq!(bull.risk_score, Some(1.5));
        assert_eq!(bull.market_trend, MarketTrend::Bull);

        let bear = RiskAggregator::new(&source, &BEAR, &sim, &sim, cfg)
            .assess(&request(100.0, 0.0))
            .unwrap();
        assert_eq!(bear.risk_score, Some(3.1));
    }

    #[test]
    fn test_risk_appetite_inflates_volatility() {
        let source = StaticPriceSource::new().with_series("stocks", trending_prices(30));
        let sim = ScalingSimulator::new(1.0);
        let agg = RiskAggregator::new(&source, &NEUTRAL, &sim, &sim, RiskConfig::default());

        let mut req = request(100.0, 0.0);
        req.risk_appetite = 50.0;
        let metrics = agg.assess(&req).unwrap();
        assert_eq!(metrics.volatility_score, Some(1.5));
    }

    #[test]
    fn test_investment_split_and_yearly_average() {
        let source = prices();
        let sim = ScalingSimulator::new(2.0);
        let agg = RiskAggregator::new(&source, &NEUTRAL, &sim, &sim, RiskConfig::default());

        let metrics = agg.assess(&request(75.0, 25.0)).unwrap();
        let invested: Vec<f64> = sim.calls.lock().unwrap().iter().map(|c| c.0).collect();
        assert_eq!(invested, vec![750_000.0, 750_000.0, 250_000.0, 250_000.0]);

        assert_eq!(metrics.total_profit, Some(2_000_000.0));
        assert_eq!(metrics.roi_pct, Some(100.0));
        assert_eq!(metrics.yearly_monte_carlo.len(), 6);
        assert_eq!(metrics.yearly_monte_carlo[0], Some(500_000.0));
        assert_eq!(metrics.yearly_monte_carlo[5], Some(1_000_000.0));
    }

    #[test]
    fn test_invalid_request_fields() {
        let mut req = request(100.0, 0.0);
        req.duration = 0;
        assert!(matches!(req.validate(), Err(RiskError::Validation { .. })));
        req.duration = 5;
        req.bonds = 120.0;
        assert!(matches!(req.validate(), Err(RiskError::Validation { .. })));
        req.bonds = 0.0;
        req.investment_amount = -5.0;
        assert!(matches!(req.validate(), Err(RiskError::Validation { .. })));
    }

    #[test]
    fn test_missing_asset_data_propagates() {
        let source = StaticPriceSource::new().with_series("stocks", trending_prices(120));
        let sim = ScalingSimulator::new(1.0);
        let agg = RiskAggregator::new(&source, &NEUTRAL, &sim, &sim, RiskConfig::default());
        let err = agg.assess(&request(50.0, 50.0)).unwrap_err();
        assert!(matches!(err, RiskError::DataUnavailable { .. }));
    }

    #[test]
    fn test_end_to_end_with_monte_carlo() {
        let source = prices();
        let mc = MonteCarloSimulator { paths: 200, seed: Some(11) };
        let agg = RiskAggregator::new(&source, &BULL, &mc, &mc, RiskConfig::default());
        let metrics = agg.assess(&request(50.0, 50.0)).unwrap();

        assert!(metrics.total_profit.is_some());
        assert!(metrics.sharpe_ratio.is_some());
        let score = metrics.risk_score.unwrap();
        assert!((0.0..=10.0).contains(&score), "risk score {} out of range", score);
        assert_eq!(metrics.yearly_gbm.len(), 6);
    }
}
