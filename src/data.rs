use crate::config::{StudyConfig, FETCH_MAX_ATTEMPTS, FETCH_RETRY_PAUSE_SECS};
use crate::error::DataError;
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One daily closing price.
#[derive(Clone, Debug, PartialEq)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub close: f64,
}

/// Historical closes for a single symbol, ordered by date.
#[derive(Clone, Debug)]
pub struct StockData {
    pub symbol: String,
    pub history: Vec<DailyClose>,
}

/// Closing prices for several symbols on the trading dates they all share.
///
/// Rows are ordered by date with no duplicates and every row carries one price
/// per symbol, in the order of [`PriceSeries::symbols`].
#[derive(Clone, Debug)]
pub struct PriceSeries {
    symbols: Vec<String>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
}

impl PriceSeries {
    pub fn new(symbols: Vec<String>, dates: Vec<NaiveDate>, rows: Vec<Vec<f64>>) -> Self {
        debug_assert_eq!(dates.len(), rows.len());
        debug_assert!(rows.iter().all(|r| r.len() == symbols.len()));
        debug_assert!(dates.windows(2).all(|w| w[0] < w[1]));
        Self { symbols, dates, rows }
    }

    /// Inner-joins per-symbol histories on date.
    pub fn align(histories: &[StockData]) -> Result<Self, DataError> {
        let symbols: Vec<String> = histories.iter().map(|h| h.symbol.clone()).collect();
        let by_symbol: Vec<BTreeMap<NaiveDate, f64>> = histories
            .iter()
            .map(|h| h.history.iter().map(|c| (c.date, c.close)).collect())
            .collect();

        let all_dates: BTreeSet<NaiveDate> =
            by_symbol.iter().flat_map(|m| m.keys().copied()).collect();

        let mut dates = Vec::with_capacity(all_dates.len());
        let mut rows = Vec::with_capacity(all_dates.len());
        for date in &all_dates {
            let row: Option<Vec<f64>> = by_symbol.iter().map(|m| m.get(date).copied()).collect();
            if let Some(row) = row {
                dates.push(*date);
                rows.push(row);
            }
        }

        if rows.is_empty() {
            return Err(DataError::NoOverlap { symbols });
        }

        let dropped = all_dates.len() - rows.len();
        if dropped > 0 {
            warn!(
                "Dropped {} of {} trading dates not covered by every symbol",
                dropped,
                all_dates.len()
            );
        }

        Ok(Self::new(symbols, dates, rows))
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[cfg(test)]
    pub fn price(&self, date: NaiveDate, symbol: &str) -> Option<f64> {
        let row = self.dates.binary_search(&date).ok()?;
        let col = self.symbols.iter().position(|s| s == symbol)?;
        Some(self.rows[row][col])
    }
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooError {
    code: String,
    description: Option<String>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooResult {
    meta: YahooMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooMeta {
    #[serde(rename = "exchangeTimezoneName")]
    exchange_timezone_name: Option<String>,
    gmtoffset: Option<i64>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
    adjclose: Option<Vec<YahooAdjClose>>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Maps a bar timestamp onto the exchange-local trading date.
fn exchange_date(timestamp: i64, meta: &YahooMeta) -> Option<NaiveDate> {
    let utc = Utc.timestamp_opt(timestamp, 0).single()?;
    let tz = meta
        .exchange_timezone_name
        .as_deref()
        .and_then(|name| name.parse::<Tz>().ok());
    match tz {
        Some(tz) => Some(utc.with_timezone(&tz).date_naive()),
        None => Some((utc + Duration::seconds(meta.gmtoffset.unwrap_or(0))).date_naive()),
    }
}

/// Converts a chart response into a close series restricted to `[start, end)`.
///
/// Prefers adjusted closes when the response carries them.
fn parse_chart(
    symbol: &str,
    response: &YahooChartResponse,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<StockData, DataError> {
    if let Some(err) = &response.chart.error {
        return Err(DataError::NoData {
            symbol: symbol.to_string(),
            reason: format!(
                "{}: {}",
                err.code,
                err.description.as_deref().unwrap_or("no description")
            ),
        });
    }

    let result = response
        .chart
        .result
        .as_ref()
        .and_then(|r| r.first())
        .ok_or_else(|| DataError::NoData {
            symbol: symbol.to_string(),
            reason: "empty chart result".to_string(),
        })?;

    let adjusted = result
        .indicators
        .adjclose
        .as_ref()
        .and_then(|a| a.first())
        .map(|a| &a.adjclose)
        .filter(|a| a.len() == result.timestamp.len());

    let closes = match adjusted {
        Some(adj) => adj,
        None => {
            let quote = result.indicators.quote.first().ok_or_else(|| DataError::Parse {
                symbol: symbol.to_string(),
                reason: "missing quote block".to_string(),
            })?;
            if quote.close.len() != result.timestamp.len() {
                return Err(DataError::Parse {
                    symbol: symbol.to_string(),
                    reason: format!(
                        "{} timestamps but {} closes",
                        result.timestamp.len(),
                        quote.close.len()
                    ),
                });
            }
            debug!("{}: no adjusted closes in response, using raw closes", symbol);
            &quote.close
        }
    };

    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (&timestamp, close) in result.timestamp.iter().zip(closes.iter()) {
        let (Some(close), Some(date)) = (*close, exchange_date(timestamp, &result.meta)) else {
            continue;
        };
        if date >= start && date < end {
            by_date.insert(date, close);
        }
    }

    if by_date.is_empty() {
        return Err(DataError::NoData {
            symbol: symbol.to_string(),
            reason: format!("no closing prices between {} and {}", start, end),
        });
    }

    Ok(StockData {
        symbol: symbol.to_string(),
        history: by_date
            .into_iter()
            .map(|(date, close)| DailyClose { date, close })
            .collect(),
    })
}

fn cache_path(cache_dir: &Path, symbol: &str, start: NaiveDate, end: NaiveDate) -> PathBuf {
    cache_dir.join(format!("{}_{}_{}.json", symbol, start, end))
}

/// Returns the cached response if it exists and is younger than `ttl_secs`.
fn read_cache(path: &Path, ttl_secs: u64) -> Result<Option<YahooChartResponse>, DataError> {
    if !path.exists() {
        return Ok(None);
    }
    let modified = std::fs::metadata(path)?.modified()?;
    let age = std::time::SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default();
    if age.as_secs() >= ttl_secs {
        return Ok(None);
    }
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    Ok(Some(serde_json::from_reader(reader)?))
}

fn write_cache(path: &Path, response: &YahooChartResponse) -> Result<(), DataError> {
    let file = std::fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer(writer, response)?;
    Ok(())
}

fn unix_midnight(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// `period1`/`period2` for a `[start, end)` window of exchange-local dates.
///
/// Padded by a day on each side: exchanges east of UTC stamp their bars before
/// UTC midnight of the local date. `parse_chart` trims back to the window.
fn request_period(start: NaiveDate, end: NaiveDate) -> (i64, i64) {
    (
        unix_midnight(start - Duration::days(1)),
        unix_midnight(end + Duration::days(1)),
    )
}

fn chart_url(symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
    let (period1, period2) = request_period(start, end);
    format!(
        "https://query1.finance.yahoo.com/v8/finance/chart/{}?period1={}&period2={}&interval=1d&includeAdjustedClose=true",
        symbol, period1, period2
    )
}

async fn fetch_from_api(
    client: &reqwest::Client,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<YahooChartResponse, DataError> {
    let url = chart_url(symbol, start, end);

    let mut attempts = 0;
    loop {
        attempts += 1;
        let outcome = match client
            .get(&url)
            .header("User-Agent", "Mozilla/5.0")
            .send()
            .await
        {
            Ok(resp) => resp.json::<YahooChartResponse>().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) => return Ok(response),
            Err(e) if attempts >= FETCH_MAX_ATTEMPTS => {
                return Err(DataError::RequestFailed {
                    symbol: symbol.to_string(),
                    attempts,
                    reason: e.to_string(),
                });
            }
            Err(e) => warn!(
                "Failed to fetch data for {} (attempt {}/{}): {}",
                symbol, attempts, FETCH_MAX_ATTEMPTS, e
            ),
        }

        tokio::time::sleep(std::time::Duration::from_secs(FETCH_RETRY_PAUSE_SECS)).await;
    }
}

/// Fetches one symbol's closes, going through the on-disk cache.
async fn fetch_symbol(
    client: &reqwest::Client,
    symbol: &str,
    config: &StudyConfig,
) -> Result<StockData, DataError> {
    let path = cache_path(&config.cache_dir, symbol, config.start, config.end);

    let response = match read_cache(&path, config.cache_ttl_secs)? {
        Some(response) => {
            info!("Loading {} from cache...", symbol);
            response
        }
        None => {
            info!("Cache miss for {}, fetching...", symbol);
            let response = fetch_from_api(client, symbol, config.start, config.end).await?;
            // Provider errors are not cached so the next run retries them.
            if response.chart.error.is_none() {
                write_cache(&path, &response)?;
            }
            response
        }
    };

    parse_chart(symbol, &response, config.start, config.end)
}

/// Loads the aligned price series for every configured symbol.
///
/// Any symbol that cannot be fetched fails the whole load.
pub async fn fetch_price_series(config: &StudyConfig) -> Result<PriceSeries, DataError> {
    if config.symbols.iter().any(|s| s.trim().is_empty()) {
        return Err(DataError::EmptySymbol);
    }
    std::fs::create_dir_all(&config.cache_dir)?;

    let client = reqwest::Client::new();
    let mut histories = Vec::with_capacity(config.symbols.len());

    for (idx, symbol) in config.symbols.iter().enumerate() {
        let data = fetch_symbol(&client, symbol, config).await?;
        info!(
            "{}: {} closes from {} to {}",
            symbol,
            data.history.len(),
            data.history.first().map(|c| c.date.to_string()).unwrap_or_default(),
            data.history.last().map(|c| c.date.to_string()).unwrap_or_default()
        );
        histories.push(data);

        if idx + 1 < config.symbols.len() && config.fetch_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(config.fetch_delay_ms)).await;
        }
    }

    PriceSeries::align(&histories)
}

#[cfg(test)]
impl StockData {
    /// Random-walk closes on consecutive calendar days.
    pub fn new_mock(symbol: &str, days: usize, seed: u64) -> Self {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut current_price: f64 = 100.0;
        let mut current_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let mut history = Vec::with_capacity(days);

        for _ in 0..days {
            history.push(DailyClose {
                date: current_date,
                close: current_price,
            });
            let change_pct: f64 = rng.gen_range(-0.02..0.02);
            current_price *= 1.0 + change_pct;
            current_date += Duration::days(1);
        }

        Self {
            symbol: symbol.to_string(),
            history,
        }
    }
}
