use crate::error::{Result, RiskError};

// ──────────────────────────────────────────────────────────────────────────────
// Single-Series Statistics
// ──────────────────────────────────────────────────────────────────────────────

/// Period-over-period fractional changes. Length is `prices.len() - 1`.
pub fn pct_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator); NaN below two observations.
pub fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    variance.sqrt()
}

/// Worst decline from a running peak, as a non-positive fraction.
pub fn max_drawdown(prices: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &price in prices {
        if price > peak {
            peak = price;
        }
        let drawdown = price / peak - 1.0;
        if drawdown < worst {
            worst = drawdown;
        }
    }
    worst
}

/// Per-asset summary used by the risk aggregator.
#[derive(Clone, Debug, PartialEq)]
pub struct AssetStatistics {
    /// Mean per-period return.
    pub mean_return: f64,
    /// Sample std of per-period returns.
    pub volatility: f64,
    pub max_drawdown: f64,
    /// Number of return observations.
    pub observations: usize,
}

impl AssetStatistics {
    pub fn from_prices(prices: &[f64]) -> Self {
        let returns = pct_returns(prices);
        Self {
            mean_return: mean(&returns),
            volatility: sample_std(&returns),
            max_drawdown: max_drawdown(prices),
            observations: returns.len(),
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Joint Statistics
// ──────────────────────────────────────────────────────────────────────────────

/// Trims every series to the most recent common length.
pub fn align_tail(series: &[&[f64]]) -> Vec<Vec<f64>> {
    let len = series.iter().map(|s| s.len()).min().unwrap_or(0);
    series
        .iter()
        .map(|s| s[s.len() - len..].to_vec())
        .collect()
}

/// Mean returns and sample covariance over jointly observed assets.
#[derive(Clone, Debug)]
pub struct ReturnStatistics {
    pub means: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    pub observations: usize,
}

impl ReturnStatistics {
    /// Builds statistics from aligned price columns (one column per asset).
    pub fn from_prices(columns: &[Vec<f64>]) -> Result<Self> {
        let returns: Vec<Vec<f64>> = columns.iter().map(|c| pct_returns(c)).collect();
        Self::from_returns(&returns)
    }

    /// Builds statistics from equal-length return columns.
    pub fn from_returns(returns: &[Vec<f64>]) -> Result<Self> {
        let n = returns.len();
        if n == 0 {
            return Err(RiskError::data_validation("no assets to compute statistics for"));
        }
        let num_obs = returns[0].len();
        if returns.iter().any(|r| r.len() != num_obs) {
            return Err(RiskError::data_validation("return series have different lengths"));
        }
        if num_obs < 2 {
            return Err(RiskError::data_validation(format!(
                "need at least 2 return observations, got {}",
                num_obs
            )));
        }

        let means: Vec<f64> = returns.iter().map(|r| mean(r)).collect();

        let mut cov = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i..n {
                let mut sum = 0.0;
                for k in 0..num_obs {
                    let di = returns[i][k] - means[i];
                    let dj = returns[j][k] - means[j];
                    sum += di * dj;
                }
                let covariance = sum / (num_obs as f64 - 1.0);
                cov[i][j] = covariance;
                cov[j][i] = covariance;
            }
        }

        Ok(Self {
            means,
            covariance: cov,
            observations: num_obs,
        })
    }

    pub fn num_assets(&self) -> usize {
        self.means.len()
    }

    pub fn volatilities(&self) -> Vec<f64> {
        (0..self.num_assets())
            .map(|i| self.covariance[i][i].sqrt())
            .collect()
    }

    pub fn portfolio_return(&self, weights: &[f64]) -> f64 {
        weights.iter().zip(self.means.iter()).map(|(w, r)| w * r).sum()
    }

    pub fn portfolio_variance(&self, weights: &[f64]) -> f64 {
        let n = weights.len();
        let mut var = 0.0;
        for i in 0..n {
            for j in 0..n {
                var += weights[i] * weights[j] * self.covariance[i][j];
            }
        }
        var
    }

    pub fn portfolio_volatility(&self, weights: &[f64]) -> f64 {
        self.portfolio_variance(weights).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pct_returns_length_and_values() {
        let returns = pct_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.10).abs() < 1e-12);
        assert!((returns[1] + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_max_drawdown_tracks_running_peak() {
        let dd = max_drawdown(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        assert!((dd - (90.0 / 120.0 - 1.0)).abs() < 1e-12, "got {}", dd);
        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_sample_std_of_constant_series_is_zero() {
        assert_eq!(sample_std(&[0.0, 0.0, 0.0]), 0.0);
        assert!(sample_std(&[1.0]).is_nan());
    }

    #[test]
    fn test_covariance_matrix_symmetry() {
        let returns = vec![
            vec![0.010, -0.003, 0.007, 0.004, -0.002],
            vec![0.004, 0.006, -0.001, 0.003, 0.005],
            vec![-0.002, 0.001, 0.002, -0.004, 0.003],
        ];
        let stats = ReturnStatistics::from_returns(&returns).unwrap();

        assert_eq!(stats.means.len(), 3);
        for i in 0..3 {
            for j in 0..3 {
                assert!(
                    (stats.covariance[i][j] - stats.covariance[j][i]).abs() < 1e-15,
                    "Covariance matrix should be symmetric"
                );
            }
            assert!(stats.covariance[i][i] > 0.0, "Variance should be positive");
            assert!((stats.volatilities()[i] - sample_std(&returns[i])).abs() < 1e-12);
        }

        let equal_w = vec![1.0 / 3.0; 3];
        assert!(stats.portfolio_variance(&equal_w) >= 0.0);
    }

    #[test]
    fn test_from_returns_rejects_ragged_input() {
        let err = ReturnStatistics::from_returns(&[vec![0.1, 0.2, 0.3], vec![0.1, 0.2]]).unwrap_err();
        assert!(matches!(err, RiskError::DataValidation { .. }));
    }

    #[test]
    fn test_align_tail_keeps_most_recent_values() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [9.0, 8.0];
        let aligned = align_tail(&[&a, &b]);
        assert_eq!(aligned[0], vec![3.0, 4.0]);
        assert_eq!(aligned[1], vec![9.0, 8.0]);
    }
}
