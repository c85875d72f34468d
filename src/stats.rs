use crate::config::TRADING_DAYS;
use crate::data::PriceSeries;
use crate::error::StatsError;

/// Daily log returns: one row per price row after the first.
#[derive(Clone, Debug)]
pub struct ReturnMatrix {
    pub symbols: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

/// Annualized return statistics over a set of symbols.
#[derive(Clone, Debug)]
pub struct ReturnStatistics {
    pub symbols: Vec<String>,
    /// Annualized mean log return per symbol.
    pub mean_returns: Vec<f64>,
    /// Annualized sample covariance of daily log returns, symmetric n×n.
    pub covariance: Vec<Vec<f64>>,
}

impl PriceSeries {
    /// `ln(p[t] / p[t-1])` per symbol; the first date has no return.
    pub fn log_returns(&self) -> ReturnMatrix {
        ReturnMatrix {
            symbols: self.symbols().to_vec(),
            rows: self
                .rows()
                .windows(2)
                .map(|w| {
                    w[1].iter()
                        .zip(w[0].iter())
                        .map(|(curr, prev)| (curr / prev).ln())
                        .collect()
                })
                .collect(),
        }
    }
}

fn check_prices(prices: &PriceSeries) -> Result<(), StatsError> {
    for (date, row) in prices.dates().iter().zip(prices.rows()) {
        for (symbol, &price) in prices.symbols().iter().zip(row) {
            if !price.is_finite() || price <= 0.0 {
                return Err(StatsError::InvalidPrice {
                    symbol: symbol.clone(),
                    date: date.to_string(),
                    price,
                });
            }
        }
    }
    Ok(())
}

/// Computes the column means and the sample covariance (n−1 denominator)
/// of a return matrix. Returns (means [N], covariance [N×N]).
fn compute_return_statistics(returns: &[Vec<f64>], n: usize) -> (Vec<f64>, Vec<Vec<f64>>) {
    let num_obs = returns.len() as f64;

    let mut means = vec![0.0; n];
    for row in returns {
        for (m, r) in means.iter_mut().zip(row) {
            *m += r;
        }
    }
    means.iter_mut().for_each(|m| *m /= num_obs);

    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let sum: f64 = returns
                .iter()
                .map(|row| (row[i] - means[i]) * (row[j] - means[j]))
                .sum();
            let covariance = sum / (num_obs - 1.0);
            cov[i][j] = covariance;
            cov[j][i] = covariance;
        }
    }

    (means, cov)
}

/// Estimates annualized mean returns and covariance from a price series.
///
/// Fails on fewer than three price rows, on non-positive prices, and on any
/// symbol whose returns have zero variance.
pub fn estimate(prices: &PriceSeries) -> Result<ReturnStatistics, StatsError> {
    const MIN_ROWS: usize = 3;
    if prices.len() < MIN_ROWS {
        return Err(StatsError::InsufficientData {
            required: MIN_ROWS,
            available: prices.len(),
        });
    }
    check_prices(prices)?;

    let returns = prices.log_returns();
    let n = returns.symbols.len();
    let (daily_means, daily_cov) = compute_return_statistics(&returns.rows, n);

    for (i, symbol) in returns.symbols.iter().enumerate() {
        if daily_cov[i][i] <= 0.0 {
            return Err(StatsError::DegenerateCovariance {
                symbol: symbol.clone(),
            });
        }
    }

    Ok(ReturnStatistics {
        symbols: returns.symbols,
        mean_returns: daily_means.iter().map(|m| m * TRADING_DAYS).collect(),
        covariance: daily_cov
            .iter()
            .map(|row| row.iter().map(|c| c * TRADING_DAYS).collect())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StockData;
    use chrono::NaiveDate;

    fn series(symbols: &[&str], rows: Vec<Vec<f64>>) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let dates = (0..rows.len())
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect();
        PriceSeries::new(symbols.iter().map(|s| s.to_string()).collect(), dates, rows)
    }

    #[test]
    fn test_log_returns_shape_and_values() {
        let prices = series(&["AAA", "BBB"], vec![vec![100.0, 50.0], vec![110.0, 25.0], vec![99.0, 50.0]]);
        let returns = prices.log_returns();

        assert_eq!(returns.rows.len(), 2);
        assert_eq!(returns.symbols, prices.symbols().to_vec());
        assert!((returns.rows[0][0] - (1.1f64).ln()).abs() < 1e-12);
        assert!((returns.rows[0][1] - (0.5f64).ln()).abs() < 1e-12);
        assert!((returns.rows[1][0] - (0.9f64).ln()).abs() < 1e-12);
        assert!((returns.rows[1][1] - (2.0f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_annualizes_mean_and_sample_covariance() {
        // Log returns are exactly [a, b, a] for AAA and [b, a, b] for BBB.
        let a = 0.01f64;
        let b = -0.02f64;
        let mut p = vec![vec![100.0, 100.0]];
        for (ra, rb) in [(a, b), (b, a), (a, b)] {
            let last = p.last().unwrap().clone();
            p.push(vec![last[0] * ra.exp(), last[1] * rb.exp()]);
        }
        let stats = estimate(&series(&["AAA", "BBB"], p)).unwrap();

        let mean_a = (2.0 * a + b) / 3.0;
        let mean_b = (a + 2.0 * b) / 3.0;
        assert!((stats.mean_returns[0] - mean_a * 252.0).abs() < 1e-12);
        assert!((stats.mean_returns[1] - mean_b * 252.0).abs() < 1e-12);

        let var_a = ((a - mean_a).powi(2) * 2.0 + (b - mean_a).powi(2)) / 2.0;
        let cov_ab = ((a - mean_a) * (b - mean_b) * 2.0 + (b - mean_a) * (a - mean_b)) / 2.0;
        assert!((stats.covariance[0][0] - var_a * 252.0).abs() < 1e-12);
        assert!((stats.covariance[0][1] - cov_ab * 252.0).abs() < 1e-12);
        assert_eq!(stats.covariance[0][1], stats.covariance[1][0]);
    }

    #[test]
    fn test_covariance_matrix_symmetry() {
        let histories: Vec<StockData> = ["AAA", "BBB", "CCC"]
            .iter()
            .enumerate()
            .map(|(i, s)| StockData::new_mock(s, 200, i as u64))
            .collect();
        let stats = estimate(&PriceSeries::align(&histories).unwrap()).unwrap();

        assert_eq!(stats.mean_returns.len(), 3);
        for i in 0..3 {
            assert!(stats.covariance[i][i] > 0.0, "Variance should be positive");
            for j in 0..3 {
                assert!(
                    (stats.covariance[i][j] - stats.covariance[j][i]).abs() < 1e-12,
                    "Covariance matrix should be symmetric"
                );
            }
        }
    }

    #[test]
    fn test_estimate_rejects_short_series() {
        let err = estimate(&series(&["AAA"], vec![vec![1.0], vec![2.0]])).unwrap_err();
        assert!(matches!(err, StatsError::InsufficientData { required: 3, available: 2 }));
    }

    #[test]
    fn test_estimate_rejects_non_positive_price() {
        let err = estimate(&series(&["AAA"], vec![vec![1.0], vec![0.0], vec![2.0]])).unwrap_err();
        assert!(matches!(err, StatsError::InvalidPrice { price, .. } if price == 0.0));
    }

    #[test]
    fn test_estimate_rejects_constant_series() {
        let prices = series(&["AAA", "FLAT"], vec![vec![1.0, 5.0], vec![1.1, 5.0], vec![1.2, 5.0]]);
        let err = estimate(&prices).unwrap_err();
        assert!(matches!(err, StatsError::DegenerateCovariance { ref symbol } if symbol == "FLAT"));
    }
}
