mod config;
mod data;
mod error;
mod export;
mod portfolio;
mod report;
mod stats;

use anyhow::{Context, Result};
use clap::Parser;
use config::StudyConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Monte Carlo portfolio allocation: random long-only weightings scored by Sharpe ratio",
    after_help = "EXAMPLES:
    # Default ASX universe, 2020-01-01 to 2024-01-01
    cargo run --release

    # Custom universe and a reproducible run
    cargo run --release -- --symbols NVDA,MSFT,AAPL --start 2019-01-01 --end 2024-01-01 --seed 7

    # More samples, 4% risk-free rate, workbook only
    cargo run --release -- --portfolios 50000 --risk-free-rate 0.04 --no-plot"
)]
struct Args {
    /// Comma-separated ticker symbols
    #[arg(long, default_value = "CBA.AX,MQG.AX,NAB.AX,XRO.AX,BHP.AX")]
    symbols: String,

    /// First date of the price window (YYYY-MM-DD, inclusive)
    #[arg(long, default_value = config::DEFAULT_START_DATE)]
    start: String,

    /// End of the price window (YYYY-MM-DD, exclusive)
    #[arg(long, default_value = config::DEFAULT_END_DATE)]
    end: String,

    /// Number of random portfolios to simulate
    #[arg(long, default_value_t = config::DEFAULT_NUM_PORTFOLIOS)]
    portfolios: usize,

    /// Seed for the portfolio sampler; omit for a non-deterministic run
    #[arg(long)]
    seed: Option<u64>,

    /// Annual risk-free rate subtracted in the Sharpe ratio
    #[arg(long, default_value_t = 0.0)]
    risk_free_rate: f64,

    /// Workbook output path
    #[arg(long, default_value = config::DEFAULT_OUTPUT_XLSX)]
    output_xlsx: PathBuf,

    /// Scatter plot output path
    #[arg(long, default_value = config::DEFAULT_OUTPUT_PNG)]
    output_png: PathBuf,

    /// Directory for cached provider responses
    #[arg(long, default_value = config::DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,

    /// Skip rendering the scatter plot
    #[arg(long)]
    no_plot: bool,
}

impl Args {
    fn into_config(self) -> Result<StudyConfig> {
        let config = StudyConfig {
            symbols: config::parse_symbols(&self.symbols),
            start: config::parse_date(&self.start)?,
            end: config::parse_date(&self.end)?,
            num_portfolios: self.portfolios,
            seed: self.seed,
            risk_free_rate: self.risk_free_rate,
            output_xlsx: self.output_xlsx,
            output_png: self.output_png,
            write_plot: !self.no_plot,
            cache_dir: self.cache_dir,
            cache_ttl_secs: config::cache_ttl_secs(),
            fetch_delay_ms: config::fetch_delay_ms(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Full pipeline: fetch prices → statistics → simulate → select → export.
async fn run_study(config: &StudyConfig) -> Result<()> {
    info!(
        "=== Monte Carlo Portfolio Study ===\n  Assets: {:?}\n  Window: {} to {}\n  Portfolios: {}\n  Seed: {}",
        config.symbols,
        config.start,
        config.end,
        config.num_portfolios,
        config
            .seed
            .map(|s| s.to_string())
            .unwrap_or_else(|| "entropy".to_string())
    );

    let prices = data::fetch_price_series(config)
        .await
        .context("price data unavailable")?;
    report::print_price_head(&prices, config::PRICE_HEAD_ROWS);

    let stats = stats::estimate(&prices).context("return statistics could not be estimated")?;
    report::print_statistics(&stats);

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let result = portfolio::run_simulation(
        &stats,
        config.num_portfolios,
        config.risk_free_rate,
        &mut rng,
    )?;
    report::print_study(&result);

    export::write_workbook(&result, &config.output_xlsx)
        .with_context(|| format!("writing {}", config.output_xlsx.display()))?;

    let plot = if config.write_plot {
        export::write_plot(&result, &config.output_png)
            .with_context(|| format!("writing {}", config.output_png.display()))?;
        Some(config.output_png.as_path())
    } else {
        None
    };

    report::print_completion(&config.output_xlsx, plot);
    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();
    config::init_cpu_parallelism();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("montefolio=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let outcome = match args.into_config() {
        Ok(config) => run_study(&config).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => {
            info!("Portfolio study completed.");
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Portfolio study failed: {:#}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
