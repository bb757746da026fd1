//! Forward simulators for a single asset-class position.
//!
//! Both simulators average many independent paths. Each path draws from its own
//! `StdRng` seeded from a per-call seed plus the path index, so a seeded simulator
//! gives identical output regardless of the rayon pool size. The per-call seed
//! mixes the position's inputs into the base seed, so asset classes sharing a
//! seeded simulator do not receive the same shocks.

use crate::config::{GBM_STEPS_PER_YEAR, SIMULATION_PATHS};
use rand::prelude::*;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub struct SimulationOutcome {
    pub final_value: f64,
    /// Mean value at the start of each year, `years + 1` entries beginning with the initial value.
    pub yearly_values: Vec<f64>,
}

pub trait Simulator: Sync {
    fn simulate(&self, initial: f64, annual_mean: f64, annual_vol: f64, years: usize) -> SimulationOutcome;
}

fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Base seed (random when unset) mixed with the simulation inputs.
fn call_seed(seed: Option<u64>, initial: f64, annual_mean: f64, annual_vol: f64) -> u64 {
    let base = seed.unwrap_or_else(rand::random::<u64>);
    [initial, annual_mean, annual_vol]
        .iter()
        .fold(base, |acc, v| splitmix64(acc ^ v.to_bits()))
}

/// Runs `paths` path generators in parallel and averages them element-wise.
fn average_paths<F>(paths: usize, seed: u64, years: usize, path_fn: F) -> SimulationOutcome
where
    F: Fn(&mut StdRng) -> Vec<f64> + Sync,
{
    let paths = paths.max(1);
    let trajectories: Vec<Vec<f64>> = (0..paths)
        .into_par_iter()
        .map(|idx| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(idx as u64));
            path_fn(&mut rng)
        })
        .collect();

    let mut yearly_values = vec![0.0; years + 1];
    for trajectory in &trajectories {
        for (acc, v) in yearly_values.iter_mut().zip(trajectory) {
            *acc += v;
        }
    }
    for acc in yearly_values.iter_mut() {
        *acc /= paths as f64;
    }

    let final_value = yearly_values[years];
    SimulationOutcome {
        final_value,
        yearly_values,
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Monte Carlo
// ──────────────────────────────────────────────────────────────────────────────

/// Compounds one normally distributed arithmetic return per year.
#[derive(Clone, Debug)]
pub struct MonteCarloSimulator {
    pub paths: usize,
    pub seed: Option<u64>,
}

impl Default for MonteCarloSimulator {
    fn default() -> Self {
        Self {
            paths: SIMULATION_PATHS,
            seed: None,
        }
    }
}

impl MonteCarloSimulator {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}

impl Simulator for MonteCarloSimulator {
    fn simulate(&self, initial: f64, annual_mean: f64, annual_vol: f64, years: usize) -> SimulationOutcome {
        let seed = call_seed(self.seed, initial, annual_mean, annual_vol);
        debug!(
            "Monte Carlo: {} paths, {} years, mu {:.4}, sigma {:.4}",
            self.paths, years, annual_mean, annual_vol
        );
        average_paths(self.paths, seed, years, |rng| {
            let mut value = initial;
            let mut path = Vec::with_capacity(years + 1);
            path.push(value);
            for _ in 0..years {
                let z: f64 = rng.sample(StandardNormal);
                value *= 1.0 + annual_mean + annual_vol * z;
                path.push(value);
            }
            path
        })
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Geometric Brownian Motion
// ──────────────────────────────────────────────────────────────────────────────

/// Log-normal daily steps with drift `mu - sigma^2 / 2`.
#[derive(Clone, Debug)]
pub struct GbmSimulator {
    pub paths: usize,
    pub steps_per_year: usize,
    pub seed: Option<u64>,
}

impl Default for GbmSimulator {
    fn default() -> Self {
        Self {
            paths: SIMULATION_PATHS,
            steps_per_year: GBM_STEPS_PER_YEAR,
            seed: None,
        }
    }
}

impl GbmSimulator {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}

impl Simulator for GbmSimulator {
    fn simulate(&self, initial: f64, annual_mean: f64, annual_vol: f64, years: usize) -> SimulationOutcome {
        // Offset keeps GBM draws independent of a Monte Carlo run sharing the seed.
        let seed =
            call_seed(self.seed, initial, annual_mean, annual_vol).wrapping_add(0x9E37_79B9_7F4A_7C15);
        let steps = self.steps_per_year.max(1);
        let dt = 1.0 / steps as f64;
        let drift = (annual_mean - 0.5 * annual_vol * annual_vol) * dt;
        let diffusion = annual_vol * dt.sqrt();
        debug!(
            "GBM: {} paths, {} years x {} steps, mu {:.4}, sigma {:.4}",
            self.paths, years, steps, annual_mean, annual_vol
        );

        average_paths(self.paths, seed, years, |rng| {
            let mut log_value = 0.0_f64;
            let mut path = Vec::with_capacity(years + 1);
            path.push(initial);
            for _ in 0..years {
                for _ in 0..steps {
                    let z: f64 = rng.sample(StandardNormal);
                    log_value += drift + diffusion * z;
                }
                path.push(initial * log_value.exp());
            }
            path
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trajectory_has_one_entry_per_year_plus_start() {
        let mc = MonteCarloSimulator { paths: 50, seed: Some(7) };
        let out = mc.simulate(1_000.0, 0.05, 0.1, 10);
        assert_eq!(out.yearly_values.len(), 11);
        assert_eq!(out.yearly_values[0], 1_000.0);
        assert_eq!(out.final_value, out.yearly_values[10]);

        let gbm = GbmSimulator { paths: 20, steps_per_year: 12, seed: Some(7) };
        let out = gbm.simulate(1_000.0, 0.05, 0.1, 3);
        assert_eq!(out.yearly_values.len(), 4);
        assert_eq!(out.yearly_values[0], 1_000.0);
    }

    #[test]
    fn test_zero_volatility_is_deterministic_growth() {
        let mc = MonteCarloSimulator { paths: 10, seed: Some(1) };
        let out = mc.simulate(100.0, 0.10, 0.0, 2);
        assert!((out.final_value - 121.0).abs() < 1e-9, "got {}", out.final_value);

        let gbm = GbmSimulator { paths: 10, steps_per_year: 252, seed: Some(1) };
        let out = gbm.simulate(100.0, 0.10, 0.0, 1);
        assert!((out.final_value - 100.0 * 0.10_f64.exp()).abs() < 1e-6, "got {}", out.final_value);
    }

    #[test]
    fn test_seeded_simulation_is_reproducible() {
        let a = GbmSimulator::seeded(42).simulate(500.0, 0.07, 0.2, 5);
        let b = GbmSimulator::seeded(42).simulate(500.0, 0.07, 0.2, 5);
        assert_eq!(a, b);

        let c = MonteCarloSimulator::seeded(42).simulate(500.0, 0.07, 0.2, 5);
        let d = MonteCarloSimulator::seeded(42).simulate(500.0, 0.07, 0.2, 5);
        assert_eq!(c, d);
    }

    #[test]
    fn test_seeded_positions_draw_independent_shocks() {
        let mc = MonteCarloSimulator { paths: 20, seed: Some(4) };
        let small = mc.simulate(1_000.0, 0.06, 0.2, 3);
        let large = mc.simulate(2_000.0, 0.06, 0.2, 3);
        assert_ne!(small.final_value / 1_000.0, large.final_value / 2_000.0);
        assert_eq!(large, mc.simulate(2_000.0, 0.06, 0.2, 3));

        let gbm = GbmSimulator { paths: 20, steps_per_year: 12, seed: Some(4) };
        let stocks = gbm.simulate(1_000.0, 0.06, 0.2, 3);
        let bonds = gbm.simulate(1_000.0, 0.03, 0.2, 3);
        let drift_gap = (0.03 * 3.0_f64).exp();
        assert!((stocks.final_value / bonds.final_value - drift_gap).abs() > 1e-9);
    }

    #[test]
    fn test_mean_growth_tracks_drift() {
        let out = MonteCarloSimulator::seeded(3).simulate(1_000.0, 0.08, 0.15, 5);
        let expected = 1_000.0 * 1.08_f64.powi(5);
        let rel_err = (out.final_value - expected).abs() / expected;
        assert!(rel_err < 0.05, "expected ~{}, got {}", expected, out.final_value);
    }

    #[test]
    fn test_zero_years_returns_initial() {
        let out = MonteCarloSimulator::seeded(9).simulate(250.0, 0.05, 0.3, 0);
        assert_eq!(out.yearly_values, vec![250.0]);
        assert_eq!(out.final_value, 250.0);
    }
}
