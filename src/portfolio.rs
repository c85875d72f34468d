use crate::error::SimulationError;
use crate::stats::ReturnStatistics;
use rand::Rng;
use rand_distr::{Distribution, Exp1};
use rayon::prelude::*;
use tracing::{debug, info};

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// One random portfolio and its score.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioSample {
    /// Simplex point, one weight per symbol.
    pub weights: Vec<f64>,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

/// Indices of the selected samples within a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub max_sharpe: usize,
    pub min_volatility: usize,
}

/// Complete outcome of a simulation run.
#[derive(Clone, Debug)]
pub struct StudyResult {
    pub symbols: Vec<String>,
    pub samples: Vec<PortfolioSample>,
    pub selection: Selection,
}

impl StudyResult {
    pub fn max_sharpe(&self) -> &PortfolioSample {
        &self.samples[self.selection.max_sharpe]
    }

    pub fn min_volatility(&self) -> &PortfolioSample {
        &self.samples[self.selection.min_volatility]
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Portfolio Return / Variance Helpers
// ──────────────────────────────────────────────────────────────────────────────

pub fn portfolio_return(weights: &[f64], means: &[f64]) -> f64 {
    weights.iter().zip(means.iter()).map(|(w, r)| w * r).sum()
}

/// The quadratic form wᵀΣw.
pub fn portfolio_variance(weights: &[f64], cov: &[Vec<f64>]) -> f64 {
    let n = weights.len();
    let mut var = 0.0;
    for i in 0..n {
        let mut row = 0.0;
        for j in 0..n {
            row += cov[i][j] * weights[j];
        }
        var += weights[i] * row;
    }
    var
}

/// Draws a weight vector uniformly from the probability simplex.
///
/// Normalizing i.i.d. Exp(1) draws yields Dirichlet(1, …, 1), and unlike
/// `rand_distr::Dirichlet` it also covers the single-asset case.
pub fn generate_random_weights<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<f64> {
    let raw: Vec<f64> = (0..n).map(|_| Exp1.sample(rng)).collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|v| v / sum).collect()
}

// ──────────────────────────────────────────────────────────────────────────────
// Simulator
// ──────────────────────────────────────────────────────────────────────────────

/// Scores random portfolios against fixed return statistics.
#[derive(Clone, Debug)]
pub struct Simulator<'a> {
    mean_returns: &'a [f64],
    covariance: &'a [Vec<f64>],
    risk_free_rate: f64,
}

impl<'a> Simulator<'a> {
    pub fn new(mean_returns: &'a [f64], covariance: &'a [Vec<f64>]) -> Result<Self, SimulationError> {
        let n = mean_returns.len();
        if n == 0 {
            return Err(SimulationError::NoAssets);
        }
        if covariance.len() != n || covariance.iter().any(|row| row.len() != n) {
            return Err(SimulationError::DimensionMismatch {
                means: n,
                rows: covariance.len(),
                cols: covariance.iter().map(|r| r.len()).find(|&l| l != n).unwrap_or(n),
            });
        }
        Ok(Self {
            mean_returns,
            covariance,
            risk_free_rate: 0.0,
        })
    }

    /// Subtracted from the expected return before dividing by volatility.
    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn num_assets(&self) -> usize {
        self.mean_returns.len()
    }

    /// Scores one weight vector. A zero volatility gives an IEEE infinite or
    /// NaN Sharpe ratio.
    pub fn score(&self, weights: Vec<f64>) -> PortfolioSample {
        let expected_return = portfolio_return(&weights, self.mean_returns);
        let variance = portfolio_variance(&weights, self.covariance);
        // Clamp tiny negative rounding noise from a PSD matrix; NaN passes through.
        let volatility = if variance < 0.0 { 0.0 } else { variance.sqrt() };
        let sharpe_ratio = (expected_return - self.risk_free_rate) / volatility;
        PortfolioSample {
            weights,
            expected_return,
            volatility,
            sharpe_ratio,
        }
    }

    /// Draws `num_samples` simplex-uniform portfolios and scores them.
    ///
    /// Weights are drawn sequentially so the batch depends only on the RNG
    /// state; scoring runs on the rayon pool and keeps draw order.
    pub fn run<R: Rng + ?Sized>(
        &self,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<Vec<PortfolioSample>, SimulationError> {
        if num_samples == 0 {
            return Err(SimulationError::NoSamples);
        }
        let n = self.num_assets();
        let weights: Vec<Vec<f64>> = (0..num_samples)
            .map(|_| generate_random_weights(n, rng))
            .collect();

        Ok(weights.into_par_iter().map(|w| self.score(w)).collect())
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Selector
// ──────────────────────────────────────────────────────────────────────────────

/// Index of the first extreme value under `better`, skipping NaN.
/// Falls back to index 0 when every value is NaN.
fn first_extreme(values: impl Iterator<Item = f64>, better: impl Fn(f64, f64) -> bool) -> usize {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if !better(v, b) => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i).unwrap_or(0)
}

/// Picks the maximum-Sharpe and minimum-volatility samples, ties going to the
/// first occurrence.
pub fn select(samples: &[PortfolioSample]) -> Result<Selection, SimulationError> {
    if samples.is_empty() {
        return Err(SimulationError::EmptyBatch);
    }
    Ok(Selection {
        max_sharpe: first_extreme(samples.iter().map(|s| s.sharpe_ratio), |v, b| v > b),
        min_volatility: first_extreme(samples.iter().map(|s| s.volatility), |v, b| v < b),
    })
}

/// Simulates `num_portfolios` random portfolios and selects the two of interest.
pub fn run_simulation<R: Rng + ?Sized>(
    stats: &ReturnStatistics,
    num_portfolios: usize,
    risk_free_rate: f64,
    rng: &mut R,
) -> Result<StudyResult, SimulationError> {
    info!(
        "Simulating {} random portfolios over {} assets...",
        num_portfolios,
        stats.symbols.len()
    );

    let simulator = Simulator::new(&stats.mean_returns, &stats.covariance)?
        .with_risk_free_rate(risk_free_rate);
    let samples = simulator.run(num_portfolios, rng)?;
    let selection = select(&samples)?;

    let best = &samples[selection.max_sharpe];
    let safest = &samples[selection.min_volatility];
    debug!(
        "Max Sharpe #{}: E[r]={:.4}, σ={:.4}, Sharpe={:.4}",
        selection.max_sharpe, best.expected_return, best.volatility, best.sharpe_ratio
    );
    debug!(
        "Min volatility #{}: E[r]={:.4}, σ={:.4}, Sharpe={:.4}",
        selection.min_volatility, safest.expected_return, safest.volatility, safest.sharpe_ratio
    );

    Ok(StudyResult {
        symbols: stats.symbols.clone(),
        samples,
        selection,
    })
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn identity(n: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect()
    }

    /// A·Aᵀ for a random A: always positive-semidefinite.
    fn random_psd(n: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
        let a: Vec<Vec<f64>> = (0..n)
            .map(|_| (0..n).map(|_| rng.gen_range(-0.5..0.5)).collect())
            .collect();
        (0..n)
            .map(|i| (0..n).map(|j| (0..n).map(|k| a[i][k] * a[j][k]).sum()).collect())
            .collect()
    }

    fn sample(sharpe_ratio: f64, volatility: f64) -> PortfolioSample {
        PortfolioSample {
            weights: vec![1.0],
            expected_return: sharpe_ratio * volatility,
            volatility,
            sharpe_ratio,
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let w = generate_random_weights(5, &mut rng);
            let sum: f64 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "Weights should sum to 1.0, got {}", sum);
            assert!(w.iter().all(|&v| v >= 0.0), "Weights should be non-negative");
        }
    }

    #[test]
    fn test_identity_covariance_volatility_is_euclidean_norm() {
        let means = vec![0.1, 0.2, 0.3];
        let cov = identity(3);
        let simulator = Simulator::new(&means, &cov).unwrap();
        let mut rng = StdRng::seed_from_u64(11);

        let samples = simulator.run(1, &mut rng).unwrap();
        assert_eq!(samples.len(), 1);
        let s = &samples[0];
        let norm = s.weights.iter().map(|w| w * w).sum::<f64>().sqrt();
        assert!((s.volatility - norm).abs() < 1e-12);
    }

    #[test]
    fn test_single_asset_portfolio() {
        let means = vec![0.08];
        let cov = vec![vec![0.04]];
        let simulator = Simulator::new(&means, &cov).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        for s in simulator.run(20, &mut rng).unwrap() {
            assert_eq!(s.weights, vec![1.0]);
            assert!((s.expected_return - 0.08).abs() < 1e-15);
            assert!((s.volatility - 0.2).abs() < 1e-15);
            assert!((s.sharpe_ratio - 0.4).abs() < 1e-12);
        }
    }

    #[test]
    fn test_risk_free_rate_shifts_sharpe() {
        let means = vec![0.08];
        let cov = vec![vec![0.04]];
        let simulator = Simulator::new(&means, &cov).unwrap().with_risk_free_rate(0.02);
        let s = simulator.score(vec![1.0]);
        assert!((s.sharpe_ratio - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_zero_volatility_is_not_trapped() {
        let means = vec![0.05, 0.05];
        let cov = vec![vec![0.0, 0.0], vec![0.0, 0.0]];
        let s = Simulator::new(&means, &cov).unwrap().score(vec![0.5, 0.5]);
        assert_eq!(s.volatility, 0.0);
        assert_eq!(s.sharpe_ratio, f64::INFINITY);
    }

    #[test]
    fn test_negative_rounding_noise_clamps_to_zero_volatility() {
        let means = vec![0.05];
        let cov = vec![vec![-1e-18]];
        let s = Simulator::new(&means, &cov).unwrap().score(vec![1.0]);
        assert_eq!(s.volatility, 0.0);
    }

    #[test]
    fn test_nan_covariance_yields_nan_volatility() {
        let means = vec![0.05, 0.07];
        let cov = vec![vec![0.04, f64::NAN], vec![f64::NAN, 0.09]];
        let s = Simulator::new(&means, &cov).unwrap().score(vec![0.5, 0.5]);
        assert!(s.volatility.is_nan());
        assert!(s.sharpe_ratio.is_nan());
    }

    #[test]
    fn test_seeded_runs_are_deterministic() {
        let means = vec![0.1, 0.05, 0.12, 0.07];
        let mut rng = StdRng::seed_from_u64(99);
        let cov = random_psd(4, &mut rng);
        let simulator = Simulator::new(&means, &cov).unwrap();

        let a = simulator.run(500, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = simulator.run(500, &mut StdRng::seed_from_u64(42)).unwrap();
        let c = simulator.run(500, &mut StdRng::seed_from_u64(43)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_simulator_rejects_bad_inputs() {
        let means = vec![0.1, 0.2];
        let cov = vec![vec![1.0, 0.0]];
        assert!(matches!(
            Simulator::new(&means, &cov),
            Err(SimulationError::DimensionMismatch { means: 2, rows: 1, .. })
        ));

        let ragged = vec![vec![1.0, 0.0], vec![0.0]];
        assert!(matches!(
            Simulator::new(&means, &ragged),
            Err(SimulationError::DimensionMismatch { cols: 1, .. })
        ));

        assert_eq!(Simulator::new(&[], &[]).unwrap_err(), SimulationError::NoAssets);

        let cov = identity(2);
        let simulator = Simulator::new(&means, &cov).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(simulator.run(0, &mut rng).unwrap_err(), SimulationError::NoSamples);
    }

    #[test]
    fn test_select_breaks_ties_by_first_occurrence() {
        let samples = vec![
            sample(0.5, 0.3),
            sample(1.2, 0.1),
            sample(1.2, 0.2),
            sample(0.9, 0.1),
        ];
        let selection = select(&samples).unwrap();
        assert_eq!(selection, Selection { max_sharpe: 1, min_volatility: 1 });
    }

    #[test]
    fn test_select_skips_nan() {
        let samples = vec![sample(f64::NAN, 0.0), sample(0.4, 0.2), sample(0.7, 0.3)];
        let selection = select(&samples).unwrap();
        assert_eq!(selection.max_sharpe, 2);
        assert_eq!(selection.min_volatility, 0);

        let all_nan = vec![sample(f64::NAN, 0.1), sample(f64::NAN, 0.05)];
        assert_eq!(select(&all_nan).unwrap().max_sharpe, 0);
    }

    #[test]
    fn test_select_empty_batch() {
        assert_eq!(select(&[]).unwrap_err(), SimulationError::EmptyBatch);
    }

    #[test]
    fn test_run_simulation_reports_selected_samples() {
        let stats = ReturnStatistics {
            symbols: vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()],
            mean_returns: vec![0.15, 0.05, 0.10],
            covariance: vec![
                vec![0.09, 0.01, 0.02],
                vec![0.01, 0.01, 0.00],
                vec![0.02, 0.00, 0.04],
            ],
        };
        let mut rng = StdRng::seed_from_u64(2024);
        let result = run_simulation(&stats, 2_000, 0.0, &mut rng).unwrap();

        assert_eq!(result.samples.len(), 2_000);
        assert_eq!(result.symbols, stats.symbols);
        // The low-variance asset dominates the minimum-volatility portfolio.
        let safest = result.min_volatility();
        assert!(safest.weights[1] > safest.weights[0]);
        assert!(result.max_sharpe().sharpe_ratio >= safest.sharpe_ratio);
    }

    proptest! {
        #[test]
        fn prop_weights_lie_on_simplex(n in 1usize..12, seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let w = generate_random_weights(n, &mut rng);
            prop_assert_eq!(w.len(), n);
            prop_assert!(w.iter().all(|&v| v >= 0.0));
            prop_assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }

        #[test]
        fn prop_batch_invariants(n in 1usize..8, k in 1usize..300, seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let means: Vec<f64> = (0..n).map(|_| rng.gen_range(-0.2..0.4)).collect();
            let cov = random_psd(n, &mut rng);
            let simulator = Simulator::new(&means, &cov).unwrap();
            let samples = simulator.run(k, &mut rng).unwrap();
            let selection = select(&samples).unwrap();

            prop_assert_eq!(samples.len(), k);
            prop_assert!(samples.iter().all(|s| s.volatility >= 0.0));

            let best = samples[selection.max_sharpe].sharpe_ratio;
            let safest = samples[selection.min_volatility].volatility;
            for s in &samples {
                if !s.sharpe_ratio.is_nan() {
                    prop_assert!(best >= s.sharpe_ratio);
                }
                prop_assert!(safest <= s.volatility);
            }
        }
    }
}
