use crate::error::ConfigError;
use chrono::NaiveDate;
use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

/// Annual trading days for annualization.
pub const TRADING_DAYS: f64 = 252.0;

/// Number of random portfolios sampled when none is specified.
pub const DEFAULT_NUM_PORTFOLIOS: usize = 10_000;

/// Default study universe (ASX large caps).
pub const DEFAULT_SYMBOLS: &[&str] = &["CBA.AX", "MQG.AX", "NAB.AX", "XRO.AX", "BHP.AX"];

pub const DEFAULT_START_DATE: &str = "2020-01-01";
/// Exclusive.
pub const DEFAULT_END_DATE: &str = "2024-01-01";

pub const DEFAULT_OUTPUT_XLSX: &str = "Portfolio_Optimization_Results.xlsx";
pub const DEFAULT_OUTPUT_PNG: &str = "Portfolio_Optimization_Plot.png";
pub const DEFAULT_CACHE_DIR: &str = ".cache";

/// Rows of the price series echoed to the console.
pub const PRICE_HEAD_ROWS: usize = 5;

/// Retry budget for a single provider request.
pub const FETCH_MAX_ATTEMPTS: usize = 3;
pub const FETCH_RETRY_PAUSE_SECS: u64 = 2;

pub fn cache_ttl_secs() -> u64 {
    std::env::var("MONTEFOLIO_CACHE_TTL_SECS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(86_400)
}

pub fn fetch_delay_ms() -> u64 {
    std::env::var("MONTEFOLIO_FETCH_DELAY_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|v| v.clamp(0, 5_000))
        .unwrap_or(350)
}

/// Everything one run of the study needs to know.
#[derive(Clone, Debug)]
pub struct StudyConfig {
    pub symbols: Vec<String>,
    pub start: NaiveDate,
    /// Exclusive upper bound of the price window.
    pub end: NaiveDate,
    pub num_portfolios: usize,
    /// `None` seeds the generator from OS entropy.
    pub seed: Option<u64>,
    pub risk_free_rate: f64,
    pub output_xlsx: PathBuf,
    pub output_png: PathBuf,
    pub write_plot: bool,
    pub cache_dir: PathBuf,
    pub cache_ttl_secs: u64,
    pub fetch_delay_ms: u64,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            num_portfolios: DEFAULT_NUM_PORTFOLIOS,
            seed: None,
            risk_free_rate: 0.0,
            output_xlsx: PathBuf::from(DEFAULT_OUTPUT_XLSX),
            output_png: PathBuf::from(DEFAULT_OUTPUT_PNG),
            write_plot: true,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_ttl_secs: 86_400,
            fetch_delay_ms: 350,
        }
    }
}

impl StudyConfig {
    /// Checks the cross-field invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        if self.start >= self.end {
            return Err(ConfigError::InvalidDateRange {
                start: self.start.to_string(),
                end: self.end.to_string(),
            });
        }
        if self.num_portfolios == 0 {
            return Err(ConfigError::ZeroPortfolios);
        }
        if !self.risk_free_rate.is_finite() {
            return Err(ConfigError::InvalidRiskFreeRate(self.risk_free_rate));
        }
        Ok(())
    }
}

/// Splits a comma-separated ticker list, upper-casing and de-duplicating while
/// keeping first-seen order.
pub fn parse_symbols(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| ConfigError::InvalidDate {
        value: raw.to_string(),
    })
}
