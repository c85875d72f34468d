use crate::data::PriceSeries;
use crate::portfolio::{PortfolioSample, StudyResult};
use crate::stats::ReturnStatistics;
use std::path::Path;

const RULE: &str = "════════════════════════════════════════════════════════════";

/// Prints the first `rows` dates of the price series.
pub fn print_price_head(prices: &PriceSeries, rows: usize) {
    print!("\n{:<12}", "Date");
    for symbol in prices.symbols() {
        print!("{:>12}", symbol);
    }
    println!();
    for (date, row) in prices.dates().iter().zip(prices.rows()).take(rows) {
        print!("{:<12}", date.to_string());
        for price in row {
            print!("{:>12.4}", price);
        }
        println!();
    }
    println!("[{} rows x {} symbols]", prices.len(), prices.symbols().len());
}

pub fn print_statistics(stats: &ReturnStatistics) {
    println!("\nAnnualized Returns:");
    for (symbol, mean) in stats.symbols.iter().zip(&stats.mean_returns) {
        println!("  {:<10} {:>10.6}", symbol, mean);
    }

    println!("\nCovariance Matrix:");
    print!("  {:<10}", "");
    for symbol in &stats.symbols {
        print!("{:>11}", symbol);
    }
    println!();
    for (symbol, row) in stats.symbols.iter().zip(&stats.covariance) {
        print!("  {:<10}", symbol);
        for c in row {
            print!("{:>11.6}", c);
        }
        println!();
    }
}

/// `SYMBOL  12.3457%` lines, largest weight first.
fn weight_lines(symbols: &[String], sample: &PortfolioSample) -> Vec<String> {
    let mut pairs: Vec<(&String, f64)> = symbols.iter().zip(sample.weights.iter().copied()).collect();
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
    pairs
        .into_iter()
        .map(|(symbol, w)| format!("{:<10} {:>9.4}%", symbol, w * 100.0))
        .collect()
}

fn print_portfolio(title: &str, symbols: &[String], sample: &PortfolioSample) {
    println!("╔{}╗", RULE);
    println!("  {}", title);
    println!("╠{}╣", RULE);
    println!("  Expected Annual Return : {:>+9.2}%", sample.expected_return * 100.0);
    println!("  Annual Volatility      : {:>9.2}%", sample.volatility * 100.0);
    println!("  Sharpe Ratio           : {:>9.4}", sample.sharpe_ratio);
    println!("╠{}╣", RULE);
    for line in weight_lines(symbols, sample) {
        println!("  {}", line);
    }
    println!("╚{}╝", RULE);
}

pub fn print_study(result: &StudyResult) {
    println!();
    print_portfolio("Maximum Sharpe Ratio Portfolio", &result.symbols, result.max_sharpe());
    print_portfolio("Minimum Volatility Portfolio", &result.symbols, result.min_volatility());
}

pub fn print_completion(workbook: &Path, plot: Option<&Path>) {
    match plot {
        Some(plot) => println!(
            "\nPortfolio optimization complete. Results saved to {} and figure saved to {}.",
            workbook.display(),
            plot.display()
        ),
        None => println!(
            "\nPortfolio optimization complete. Results saved to {}.",
            workbook.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_lines_sorted_descending() {
        let symbols = vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()];
        let sample = PortfolioSample {
            weights: vec![0.2, 0.5, 0.3],
            expected_return: 0.1,
            volatility: 0.2,
            sharpe_ratio: 0.5,
        };
        let lines = weight_lines(&symbols, &sample);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("BBB"));
        assert!(lines[0].ends_with("50.0000%"));
        assert!(lines[2].starts_with("AAA"));
    }
}
