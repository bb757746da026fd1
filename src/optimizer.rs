use crate::config::{OptimizerConfig, ALLOCATION_SUM_TOLERANCE};
use crate::error::{Result, RiskError};
use crate::sanitize::{round_to, Sanitize};
use crate::stats::{align_tail, ReturnStatistics};
use rayon::prelude::*;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Allocation Vector
// ──────────────────────────────────────────────────────────────────────────────

/// Ordered mapping from asset identifier to weight. Serializes as a JSON object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AllocationVector {
    entries: Vec<(String, Option<f64>)>,
}

impl AllocationVector {
    pub fn new(entries: Vec<(String, Option<f64>)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, id: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(name, _)| name == id)
            .and_then(|(_, w)| *w)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.entries.iter().map(|(name, w)| (name.as_str(), *w))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all defined weights.
    pub fn total(&self) -> f64 {
        self.entries.iter().filter_map(|(_, w)| *w).sum()
    }

    /// Applies `f` to every defined weight, keeping order and identifiers.
    pub fn map_weights(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(name, w)| (name.clone(), w.map(&f)))
                .collect(),
        }
    }
}

impl Serialize for AllocationVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, weight) in &self.entries {
            map.serialize_entry(name, weight)?;
        }
        map.end()
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Local Constrained Solver
// ──────────────────────────────────────────────────────────────────────────────

const ARMIJO_SIGMA: f64 = 1e-4;
const INITIAL_STEP: f64 = 1.0;
const MAX_STEP: f64 = 1e6;
const MIN_STEP: f64 = 1e-14;
const GRADIENT_EPS: f64 = 1e-7;

/// Per-weight box constraint shared by every asset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// Whether `{sum(w) = 1, lower <= w <= upper}` is non-empty for `n` assets.
    pub fn feasible_for(&self, n: usize) -> bool {
        let n = n as f64;
        self.lower <= self.upper && n * self.lower <= 1.0 + 1e-12 && n * self.upper >= 1.0 - 1e-12
    }
}

/// A function minimized over the bounded simplex.
pub trait Objective: Sync {
    fn value(&self, weights: &[f64]) -> f64;

    /// Central-difference gradient unless overridden.
    fn gradient(&self, weights: &[f64]) -> Vec<f64> {
        let mut probe = weights.to_vec();
        (0..weights.len())
            .map(|i| {
                let orig = probe[i];
                probe[i] = orig + GRADIENT_EPS;
                let up = self.value(&probe);
                probe[i] = orig - GRADIENT_EPS;
                let down = self.value(&probe);
                probe[i] = orig;
                (up - down) / (2.0 * GRADIENT_EPS)
            })
            .collect()
    }
}

/// Outcome of one local solve.
#[derive(Clone, Debug)]
pub struct LocalResult {
    pub weights: Vec<f64>,
    pub objective: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Euclidean projection onto `{sum(w) = 1, lower <= w <= upper}`.
///
/// Bisects the shift `theta` so that `sum(clamp(v - theta, lower, upper)) = 1`.
/// Bounds must be feasible for `v.len()`.
pub fn project_bounded_simplex(v: &[f64], bounds: Bounds) -> Vec<f64> {
    if v.is_empty() {
        return Vec::new();
    }
    let v: Vec<f64> = v
        .iter()
        .map(|x| if x.is_finite() { *x } else { bounds.lower })
        .collect();
    let shifted_sum =
        |theta: f64| -> f64 { v.iter().map(|x| (x - theta).clamp(bounds.lower, bounds.upper)).sum() };

    let max_v = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_v = v.iter().cloned().fold(f64::INFINITY, f64::min);
    let mut lo = min_v - bounds.upper;
    let mut hi = max_v - bounds.lower;
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if shifted_sum(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-16 {
            break;
        }
    }
    let theta = 0.5 * (lo + hi);
    v.iter()
        .map(|x| (x - theta).clamp(bounds.lower, bounds.upper))
        .collect()
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f64>()
}

/// Projected-gradient descent with Armijo backtracking over the bounded simplex.
///
/// Non-finite objective values are never accepted by the line search; a
/// non-finite value at the (projected) start yields an unconverged result.
pub fn minimize(
    objective: &dyn Objective,
    start: &[f64],
    bounds: Bounds,
    cfg: &OptimizerConfig,
) -> LocalResult {
    let mut x = project_bounded_simplex(start, bounds);
    let mut fx = objective.value(&x);
    if !fx.is_finite() {
        return LocalResult {
            weights: x,
            objective: fx,
            converged: false,
            iterations: 0,
        };
    }

    let mut step = INITIAL_STEP;
    for iter in 1..=cfg.max_iterations {
        let grad = objective.gradient(&x);
        if grad.iter().any(|g| !g.is_finite()) {
            return LocalResult {
                weights: x,
                objective: fx,
                converged: false,
                iterations: iter,
            };
        }

        let mut t = step;
        let mut accepted = None;
        let mut blocked_by_non_finite = false;
        while t >= MIN_STEP {
            let trial: Vec<f64> = x.iter().zip(&grad).map(|(xi, gi)| xi - t * gi).collect();
            let candidate = project_bounded_simplex(&trial, bounds);
            let fc = objective.value(&candidate);
            let decrease: f64 = grad
                .iter()
                .zip(x.iter().zip(&candidate))
                .map(|(g, (xi, ci))| g * (xi - ci))
                .sum();
            if fc.is_finite() {
                blocked_by_non_finite = false;
                if fc <= fx - ARMIJO_SIGMA * decrease {
                    accepted = Some((candidate, fc, t));
                    break;
                }
            } else {
                blocked_by_non_finite = true;
            }
            t *= 0.5;
        }

        let Some((candidate, fc, t)) = accepted else {
            // No descent step at any scale: stationary up to numerical noise.
            return LocalResult {
                weights: x,
                objective: fx,
                converged: !blocked_by_non_finite,
                iterations: iter,
            };
        };

        let moved = squared_distance(&candidate, &x).sqrt();
        let improvement = fx - fc;
        let scale = 1.0 + fx.abs();
        x = candidate;
        fx = fc;
        if moved < cfg.x_tol || improvement < cfg.f_tol * scale {
            return LocalResult {
                weights: x,
                objective: fx,
                converged: true,
                iterations: iter,
            };
        }
        step = (t * 2.0).min(MAX_STEP);
    }

    LocalResult {
        weights: x,
        objective: fx,
        converged: false,
        iterations: cfg.max_iterations,
    }
}

/// Converged restart with the lowest objective, if any.
pub fn best_of(results: impl IntoIterator<Item = LocalResult>) -> Option<LocalResult> {
    results
        .into_iter()
        .filter(|r| r.converged && r.objective.is_finite())
        .min_by(|a, b| a.objective.total_cmp(&b.objective))
}

/// Uniform Dirichlet sample: normalized i.i.d. Exp(1) draws.
pub fn generate_random_weights(n: usize, rng: &mut impl rand::Rng) -> Vec<f64> {
    use rand_distr::{Distribution, Exp1};
    let raw: Vec<f64> = (0..n).map(|_| Exp1.sample(rng)).collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|v| v / sum).collect()
}

/// Renormalizes to sum to one, scales to percent and sanitizes each weight.
fn to_percent_allocation(ids: &[String], weights: &[f64], decimals: Option<i32>) -> AllocationVector {
    let sum: f64 = weights.iter().sum();
    let entries = ids
        .iter()
        .zip(weights)
        .map(|(id, w)| {
            let pct = (w / sum * 100.0).sanitize();
            let pct = match decimals {
                Some(d) => round_to(pct, d),
                None => pct,
            };
            (id.clone(), pct)
        })
        .collect();
    AllocationVector::new(entries)
}

fn validate_prices(assets: &[(String, Vec<f64>)]) -> Result<()> {
    if assets.is_empty() {
        return Err(RiskError::data_validation("no assets supplied"));
    }
    for (id, prices) in assets {
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(RiskError::data_validation(format!(
                "price data for {} contains non-finite values",
                id
            )));
        }
    }
    Ok(())
}

fn joint_statistics(assets: &[(String, Vec<f64>)]) -> Result<ReturnStatistics> {
    let lengths: Vec<usize> = assets.iter().map(|(_, p)| p.len()).collect();
    if lengths.iter().any(|&l| l != lengths[0]) {
        warn!("Price histories differ in length {:?}; aligning on the common tail", lengths);
    }
    let slices: Vec<&[f64]> = assets.iter().map(|(_, p)| p.as_slice()).collect();
    ReturnStatistics::from_prices(&align_tail(&slices))
}

// ──────────────────────────────────────────────────────────────────────────────
// Security-Level Optimizer: Multi-Restart Utility Maximization
// ──────────────────────────────────────────────────────────────────────────────

/// `-(w·mu - risk_aversion * sqrt(w'Σw))`
struct NegativeUtility<'a> {
    stats: &'a ReturnStatistics,
    risk_aversion: f64,
}

impl Objective for NegativeUtility<'_> {
    fn value(&self, weights: &[f64]) -> f64 {
        let ret = self.stats.portfolio_return(weights);
        let vol = self.stats.portfolio_volatility(weights);
        -(ret - self.risk_aversion * vol)
    }

    fn gradient(&self, weights: &[f64]) -> Vec<f64> {
        let cov = &self.stats.covariance;
        let sigma_w: Vec<f64> = cov
            .iter()
            .map(|row| row.iter().zip(weights).map(|(c, w)| c * w).sum::<f64>())
            .collect();
        let vol = self.stats.portfolio_volatility(weights).max(1e-12);
        self.stats
            .means
            .iter()
            .zip(&sigma_w)
            .map(|(mu, sw)| -(mu - self.risk_aversion * sw / vol))
            .collect()
    }
}

/// Optimizes weights across individual securities.
///
/// Each restart starts from an independent uniform Dirichlet draw taken from
/// `rng`; restarts run in parallel and the converged one with the lowest
/// negated utility wins. Output is percent per asset, rounded to 2 decimals.
pub fn optimize_security_allocation(
    assets: &[(String, Vec<f64>)],
    risk_tolerance: f64,
    duration_years: f64,
    cfg: &OptimizerConfig,
    rng: &mut impl rand::Rng,
) -> Result<AllocationVector> {
    info!("Starting security allocation for {} assets.", assets.len());
    validate_prices(assets)?;
    if !(duration_years > 0.0) {
        return Err(RiskError::data_validation("duration must be positive"));
    }

    let stats = joint_statistics(assets)?;
    for ((id, _), vol) in assets.iter().zip(stats.volatilities()) {
        if !(vol > 0.0) {
            return Err(RiskError::data_validation(format!(
                "{} has zero volatility",
                id
            )));
        }
    }

    let n = assets.len();
    let risk_aversion = (1.0 - risk_tolerance) * (1.0 / duration_years);
    let objective = NegativeUtility {
        stats: &stats,
        risk_aversion,
    };
    let bounds = Bounds::new(0.0, 1.0);

    let starts: Vec<Vec<f64>> = (0..cfg.restarts)
        .map(|_| generate_random_weights(n, rng))
        .collect();
    let results: Vec<LocalResult> = starts
        .par_iter()
        .map(|start| minimize(&objective, start, bounds, cfg))
        .collect();

    let converged = results.iter().filter(|r| r.converged).count();
    debug!("{}/{} restarts converged", converged, results.len());

    let best = best_of(results).ok_or_else(|| {
        RiskError::optimization_failure(format!(
            "none of {} restarts converged",
            cfg.restarts
        ))
    })?;

    let ids: Vec<String> = assets.iter().map(|(id, _)| id.clone()).collect();
    info!(
        "Security allocation completed for {} assets (objective {:.6}).",
        n, best.objective
    );
    Ok(to_percent_allocation(&ids, &best.weights, Some(2)))
}

// ──────────────────────────────────────────────────────────────────────────────
// Asset-Class Optimizer: Risk-Tolerance Sharpe
// ──────────────────────────────────────────────────────────────────────────────

/// `-((w·mu)^risk_tolerance / sqrt(w'Σw))`
struct NegativeTolerantSharpe<'a> {
    stats: &'a ReturnStatistics,
    risk_tolerance: f64,
}

impl Objective for NegativeTolerantSharpe<'_> {
    fn value(&self, weights: &[f64]) -> f64 {
        let ret = self.stats.portfolio_return(weights);
        let vol = self.stats.portfolio_volatility(weights);
        -(ret.powf(self.risk_tolerance) / vol)
    }
}

/// Refines a user allocation over asset classes with one local pass.
///
/// `initial` holds fractions in the same order as `columns` and must sum to
/// one within tolerance. Output is percent per asset class (unrounded).
///
/// The pass starts at the projected user allocation. If the objective
/// is non-finite there (a negative portfolio return under a fractional
/// `risk_tolerance`), the solver stops at iteration 0 and this returns
/// `OptimizationFailure`, even when other feasible allocations would score.
pub fn optimize_asset_class_allocation(
    columns: &[(String, Vec<f64>)],
    initial: &[f64],
    risk_tolerance: f64,
    cfg: &OptimizerConfig,
) -> Result<AllocationVector> {
    validate_prices(columns)?;
    if initial.len() != columns.len() {
        return Err(RiskError::validation(format!(
            "expected {} initial weights, got {}",
            columns.len(),
            initial.len()
        )));
    }
    let total: f64 = initial.iter().sum();
    if (total - 1.0).abs() > ALLOCATION_SUM_TOLERANCE {
        return Err(RiskError::validation(format!(
            "initial allocation must sum to 1, got {:.4}",
            total
        )));
    }

    let bounds = Bounds::new(cfg.asset_class_min_weight, 1.0);
    if !bounds.feasible_for(columns.len()) {
        return Err(RiskError::data_validation(format!(
            "minimum weight {} is infeasible for {} asset classes",
            cfg.asset_class_min_weight,
            columns.len()
        )));
    }

    let stats = joint_statistics(columns)?;
    let objective = NegativeTolerantSharpe {
        stats: &stats,
        risk_tolerance,
    };
    let result = minimize(&objective, initial, bounds, cfg);
    if !result.converged {
        warn!(
            "Asset class optimization did not converge after {} iterations (objective {})",
            result.iterations, result.objective
        );
        return Err(RiskError::optimization_failure(
            "asset class optimization did not converge",
        ));
    }

    let ids: Vec<String> = columns.iter().map(|(id, _)| id.clone()).collect();
    Ok(to_percent_allocation(&ids, &result.weights, None))
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
