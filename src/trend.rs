use crate::config::{RiskConfig, TREND_LONG_WINDOW, TREND_SHORT_WINDOW};
use crate::data::PriceSource;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketTrend {
    Bull,
    Bear,
    Neutral,
}

impl MarketTrend {
    /// Multiplier applied to per-period mean returns.
    pub fn return_factor(self, cfg: &RiskConfig) -> f64 {
        match self {
            MarketTrend::Bull => cfg.bull_return_factor,
            MarketTrend::Bear => cfg.bear_return_factor,
            MarketTrend::Neutral => 1.0,
        }
    }

    /// Additive adjustment to the raw risk score.
    pub fn score_offset(self, cfg: &RiskConfig) -> f64 {
        match self {
            MarketTrend::Bull => cfg.score_bull_offset,
            MarketTrend::Bear => cfg.score_bear_offset,
            MarketTrend::Neutral => 0.0,
        }
    }
}

impl fmt::Display for MarketTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MarketTrend::Bull => "bull",
            MarketTrend::Bear => "bear",
            MarketTrend::Neutral => "neutral",
        };
        f.write_str(label)
    }
}

/// Classifies the market regime of an index. Never fails.
pub trait TrendClassifier {
    fn classify(&self, ticker: &str) -> MarketTrend;
}

/// Always reports the same trend.
#[derive(Clone, Copy, Debug)]
pub struct FixedTrend(pub MarketTrend);

impl TrendClassifier for FixedTrend {
    fn classify(&self, _ticker: &str) -> MarketTrend {
        self.0
    }
}

/// Golden-cross style classifier: bull while the short SMA sits above the long SMA.
pub struct MovingAverageTrend<S> {
    source: S,
    short_window: usize,
    long_window: usize,
}

impl<S: PriceSource> MovingAverageTrend<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            short_window: TREND_SHORT_WINDOW,
            long_window: TREND_LONG_WINDOW,
        }
    }

    pub fn with_windows(mut self, short_window: usize, long_window: usize) -> Self {
        self.short_window = short_window.max(1);
        self.long_window = long_window.max(self.short_window);
        self
    }
}

/// Mean of the last `window` values.
fn trailing_sma(values: &[f64], window: usize) -> f64 {
    let tail = &values[values.len() - window..];
    tail.iter().sum::<f64>() / window as f64
}

impl<S: PriceSource> TrendClassifier for MovingAverageTrend<S> {
    fn classify(&self, ticker: &str) -> MarketTrend {
        let series = match self.source.load_prices(ticker) {
            Ok(series) => series,
            Err(e) => {
                warn!("Trend data for {} unavailable ({}); assuming neutral", ticker, e);
                return MarketTrend::Neutral;
            }
        };
        if series.len() < self.long_window {
            warn!(
                "Only {} points for {}, need {}; assuming neutral",
                series.len(),
                ticker,
                self.long_window
            );
            return MarketTrend::Neutral;
        }

        let short = trailing_sma(&series.closes, self.short_window);
        let long = trailing_sma(&series.closes, self.long_window);
        if !short.is_finite() || !long.is_finite() {
            return MarketTrend::Neutral;
        }

        let trend = if short > long {
            MarketTrend::Bull
        } else {
            MarketTrend::Bear
        };
        info!(
            "Market trend for {}: {} (SMA{} {:.2} vs SMA{} {:.2})",
            ticker, trend, self.short_window, short, self.long_window, long
        );
        trend
    }
}
