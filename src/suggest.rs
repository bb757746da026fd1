//! Portfolio suggestions: refine the asset-class split, then pick stocks for the equity bucket.

use crate::config::{ASSET_CLASSES, OptimizerConfig, RISK_FREE_RATE, TOP_STOCK_TICKERS, TRADING_DAYS};
use crate::data::PriceSource;
use crate::error::{Result, RiskError};
use crate::optimizer::{AllocationVector, optimize_asset_class_allocation, optimize_security_allocation};
use crate::sanitize::{Sanitize, round_f64, round_to};
use crate::stats::{ReturnStatistics, align_tail};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Display labels for the asset classes, aligned with [`ASSET_CLASSES`].
pub const ASSET_CLASS_LABELS: [&str; 4] = ["Stocks", "Bonds", "Real_Estate", "Commodities"];

const LOW_RETURN_THRESHOLD: f64 = 7.0;
const HIGH_VOLATILITY_THRESHOLD: f64 = 25.0;
const LOW_SHARPE_THRESHOLD: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SuggestionRequest {
    pub investment: f64,
    pub duration: u32,
    /// 0.01 (cautious) to 1.0 (aggressive).
    pub risk_tolerance: f64,
    pub stocks: f64,
    pub bonds: f64,
    pub real_estate: f64,
    pub commodities: f64,
}

impl SuggestionRequest {
    /// Starting allocation as fractions, in [`ASSET_CLASSES`] order.
    pub fn user_allocation(&self) -> [f64; 4] {
        [
            self.stocks / 100.0,
            self.bonds / 100.0,
            self.real_estate / 100.0,
            self.commodities / 100.0,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.investment.is_finite() && self.investment > 0.0) {
            return Err(RiskError::validation("investment must be positive"));
        }
        if !(1..=30).contains(&self.duration) {
            return Err(RiskError::validation("duration must be between 1 and 30 years"));
        }
        if !(0.01..=1.0).contains(&self.risk_tolerance) {
            return Err(RiskError::validation("risk tolerance must be between 0.01 and 1"));
        }
        let pcts = [self.stocks, self.bonds, self.real_estate, self.commodities];
        if pcts.iter().any(|p| !(0.0..=100.0).contains(p)) {
            return Err(RiskError::validation("each allocation must be between 0 and 100"));
        }
        let total: f64 = self.user_allocation().iter().sum();
        if !(0.99..=1.01).contains(&total) {
            return Err(RiskError::validation("Allocations must sum to 100%."));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PortfolioMetrics {
    #[serde(rename = "Expected Return (%)")]
    pub expected_return_pct: Option<f64>,
    #[serde(rename = "Volatility (%)")]
    pub volatility_pct: Option<f64>,
    #[serde(rename = "Sharpe Ratio")]
    pub sharpe_ratio: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Insight {
    pub title: String,
    pub content: String,
}

impl Insight {
    fn new(title: &str, content: &str) -> Self {
        Self {
            title: title.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PortfolioSuggestion {
    pub optimized_allocation: AllocationVector,
    pub investment_breakdown: AllocationVector,
    pub optimized_stock_allocation: AllocationVector,
    pub stock_allocation_investment: AllocationVector,
    pub portfolio_metrics: PortfolioMetrics,
    pub insights: Vec<Insight>,
}

/// Rule-based recommendations from unrounded annualized metrics.
pub fn build_insights(expected_return_pct: f64, volatility_pct: f64, sharpe: f64) -> Vec<Insight> {
    let mut insights = Vec::new();
    if expected_return_pct < LOW_RETURN_THRESHOLD {
        insights.push(Insight::new(
            "Boost Expected Returns",
            "Your expected return (<7%) is below market average. Consider heavier equities or higher-growth sectors.",
        ));
    }
    if volatility_pct > HIGH_VOLATILITY_THRESHOLD {
        insights.push(Insight::new(
            "Reduce Portfolio Risk",
            "Volatility is high (>25%). Increase bond or defensive allocations to smooth returns.",
        ));
    }
    if sharpe < LOW_SHARPE_THRESHOLD {
        insights.push(Insight::new(
            "Improve Risk-Adjusted Returns",
            "Sharpe Ratio <1 indicates low reward per unit risk. Consider rebalancing towards assets with better risk/reward.",
        ));
    }
    insights
}

pub struct SuggestionService<'a> {
    prices: &'a dyn PriceSource,
    config: OptimizerConfig,
    tickers: Vec<String>,
}

impl<'a> SuggestionService<'a> {
    pub fn new(prices: &'a dyn PriceSource, config: OptimizerConfig) -> Self {
        Self {
            prices,
            config,
            tickers: TOP_STOCK_TICKERS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Replaces the default top-N stock universe.
    pub fn with_tickers(mut self, tickers: Vec<String>) -> Self {
        self.tickers = tickers;
        self
    }

    pub fn suggest(&self, request: &SuggestionRequest, rng: &mut impl rand::Rng) -> Result<PortfolioSuggestion> {
        request.validate()?;

        let mut columns = Vec::with_capacity(ASSET_CLASSES.len());
        for (asset, label) in ASSET_CLASSES.iter().zip(ASSET_CLASS_LABELS) {
            columns.push((label.to_string(), self.prices.load_prices(asset)?.closes));
        }

        let allocation = optimize_asset_class_allocation(
            &columns,
            &request.user_allocation(),
            request.risk_tolerance,
            &self.config,
        )?;
        let rounded_allocation = allocation.map_weights(|pct| round_f64(pct, 4));
        let investment_breakdown =
            rounded_allocation.map_weights(|pct| round_f64(pct / 100.0 * request.investment, 2));

        let stock_assets = self.load_stock_universe()?;

        let weights: Vec<f64> = allocation
            .iter()
            .map(|(_, pct)| pct.map_or(f64::NAN, |p| p / 100.0))
            .collect();
        let (expected_return, volatility, sharpe) = annualized_metrics(&columns, &weights)?;
        info!(
            "Portfolio metrics: return {:.2}%, volatility {:.2}%, sharpe {:.2}",
            expected_return, volatility, sharpe
        );

        let started = Instant::now();
        let stock_allocation = optimize_security_allocation(
            &stock_assets,
            request.risk_tolerance,
            request.duration as f64,
            &self.config,
            rng,
        )?;
        info!("Stock optimization took {:.1}s", started.elapsed().as_secs_f64());

        let stock_bucket = investment_breakdown.get(ASSET_CLASS_LABELS[0]).unwrap_or(0.0);
        let stock_allocation_investment =
            stock_allocation.map_weights(|pct| round_f64(pct / 100.0 * stock_bucket, 2));

        Ok(PortfolioSuggestion {
            optimized_allocation: rounded_allocation,
            investment_breakdown,
            optimized_stock_allocation: stock_allocation,
            stock_allocation_investment,
            portfolio_metrics: PortfolioMetrics {
                expected_return_pct: round_to(expected_return.sanitize(), 2),
                volatility_pct: round_to(volatility.sanitize(), 2),
                sharpe_ratio: round_to(sharpe.sanitize(), 2),
            },
            insights: build_insights(expected_return, volatility, sharpe),
        })
    }

    /// Loads every ticker in the universe, skipping the ones that fail.
    fn load_stock_universe(&self) -> Result<Vec<(String, Vec<f64>)>> {
        let started = Instant::now();
        let mut loaded = Vec::with_capacity(self.tickers.len());
        for ticker in &self.tickers {
            match self.prices.load_prices(ticker) {
                Ok(series) => loaded.push((series.symbol, series.closes)),
                Err(e) => warn!("Skipped {}: {}", ticker, e),
            }
        }
        info!(
            "Loaded {}/{} in {:.1}s",
            loaded.len(),
            self.tickers.len(),
            started.elapsed().as_secs_f64()
        );
        if loaded.is_empty() {
            return Err(RiskError::data_unavailable(
                "stock universe",
                "No individual stock data available.",
            ));
        }
        Ok(loaded)
    }
}

/// Annualized expected return (%), volatility (%) and Sharpe ratio of `weights`.
fn annualized_metrics(columns: &[(String, Vec<f64>)], weights: &[f64]) -> Result<(f64, f64, f64)> {
    let slices: Vec<&[f64]> = columns.iter().map(|(_, p)| p.as_slice()).collect();
    let stats = ReturnStatistics::from_prices(&align_tail(&slices))?;

    let expected_return = stats.portfolio_return(weights) * TRADING_DAYS * 100.0;
    let volatility = stats.portfolio_volatility(weights) * TRADING_DAYS.sqrt() * 100.0;
    let sharpe = if volatility > 0.0 {
        (expected_return - RISK_FREE_RATE * 100.0) / volatility
    } else {
        0.0
    };
    Ok((expected_return, volatility, sharpe))
}
