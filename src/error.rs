use thiserror::Error;

/// Errors raised while loading study parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No symbols configured")]
    NoSymbols,

    #[error("Invalid date {value:?}: expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("Start date {start} must be before end date {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("Portfolio count must be at least 1")]
    ZeroPortfolios,

    #[error("Risk-free rate must be finite, got {0}")]
    InvalidRiskFreeRate(f64),
}

/// Errors raised by the price data loader.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Empty symbol in symbol list")]
    EmptySymbol,

    #[error("Request for {symbol} failed after {attempts} attempts: {reason}")]
    RequestFailed {
        symbol: String,
        attempts: usize,
        reason: String,
    },

    #[error("Provider returned no data for {symbol}: {reason}")]
    NoData { symbol: String, reason: String },

    #[error("Malformed response for {symbol}: {reason}")]
    Parse { symbol: String, reason: String },

    #[error("No trading dates shared by all of {symbols:?}")]
    NoOverlap { symbols: Vec<String> },

    #[error("Cache I/O error: {0}")]
    Cache(#[from] std::io::Error),

    #[error("Cache JSON error: {0}")]
    CacheJson(#[from] serde_json::Error),
}

/// Errors raised while estimating return statistics.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Insufficient data: need at least {required} price rows, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Invalid price {price} for {symbol} on {date}")]
    InvalidPrice {
        symbol: String,
        date: String,
        price: f64,
    },

    #[error("Degenerate covariance: {symbol} has zero return variance")]
    DegenerateCovariance { symbol: String },
}

/// Errors raised by the simulator and selector.
#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error("Dimension mismatch: {means} mean returns but covariance is {rows}x{cols}")]
    DimensionMismatch {
        means: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Cannot simulate a portfolio over zero assets")]
    NoAssets,

    #[error("Sample count must be at least 1")]
    NoSamples,

    #[error("Cannot select from an empty batch")]
    EmptyBatch,
}

/// Errors raised while writing the workbook or the plot.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Workbook error: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    #[error("Plot error: {0}")]
    Plot(String),
}
