use crate::error::{Result, RiskError};
use chrono::{Local, NaiveDate};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Ordered closing prices for one asset.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSeries {
    pub symbol: String,
    pub closes: Vec<f64>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, closes: Vec<f64>) -> Self {
        Self {
            symbol: symbol.into(),
            closes,
        }
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}

/// Supplies historical prices by asset class name or ticker.
pub trait PriceSource {
    /// Fails with `DataUnavailable` for unknown identifiers or empty results.
    fn load_prices(&self, id: &str) -> Result<PriceSeries>;
}

impl<T: PriceSource + ?Sized> PriceSource for &T {
    fn load_prices(&self, id: &str) -> Result<PriceSeries> {
        (**self).load_prices(id)
    }
}

/// Adapts a closure into a [`PriceSource`].
pub struct FnSource<F>(pub F);

impl<F> PriceSource for FnSource<F>
where
    F: Fn(&str) -> Result<PriceSeries>,
{
    fn load_prices(&self, id: &str) -> Result<PriceSeries> {
        (self.0)(id)
    }
}

/// Fixed in-memory price table.
#[derive(Clone, Debug, Default)]
pub struct StaticPriceSource {
    series: HashMap<String, Vec<f64>>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, id: &str, closes: Vec<f64>) -> Self {
        self.series.insert(id.to_string(), closes);
        self
    }
}

impl PriceSource for StaticPriceSource {
    fn load_prices(&self, id: &str) -> Result<PriceSeries> {
        match self.series.get(id) {
            Some(closes) if !closes.is_empty() => Ok(PriceSeries::new(id, closes.clone())),
            Some(_) => Err(RiskError::data_unavailable(id, "no rows")),
            None => Err(RiskError::data_unavailable(id, "unknown asset")),
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// CSV Files
// ──────────────────────────────────────────────────────────────────────────────

/// Combined per-ticker history with a `Ticker` column.
pub const STOCK_UNIVERSE_FILE: &str = "stock_data.csv";

/// Loads `Close` columns from CSV files under a data directory.
///
/// `<dir>/<id>.csv` is used when present; otherwise the id is looked up as a
/// ticker in [`STOCK_UNIVERSE_FILE`].
#[derive(Clone, Debug)]
pub struct CsvPriceSource {
    data_dir: PathBuf,
}

impl CsvPriceSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn read_closes(&self, id: &str, path: &Path, ticker: Option<&str>) -> Result<Vec<f64>> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| RiskError::data_unavailable(id, format!("{}: {}", path.display(), e)))?;
        let headers = reader
            .headers()
            .map_err(|e| RiskError::data_unavailable(id, e.to_string()))?
            .clone();
        let close_idx = headers
            .iter()
            .position(|h| h.trim() == "Close")
            .ok_or_else(|| RiskError::data_unavailable(id, "missing 'Close' column"))?;
        let ticker_idx = match ticker {
            Some(_) => Some(
                headers
                    .iter()
                    .position(|h| h.trim() == "Ticker")
                    .ok_or_else(|| RiskError::data_unavailable(id, "missing 'Ticker' column"))?,
            ),
            None => None,
        };

        let mut closes = Vec::new();
        let mut skipped = 0usize;
        for record in reader.records() {
            let record = record.map_err(|e| RiskError::data_unavailable(id, e.to_string()))?;
            if let (Some(idx), Some(want)) = (ticker_idx, ticker) {
                if record.get(idx).map(str::trim) != Some(want) {
                    continue;
                }
            }
            match record.get(close_idx).and_then(|v| v.trim().parse::<f64>().ok()) {
                Some(close) => closes.push(close),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!("{}: skipped {} rows without a parsable close", id, skipped);
        }
        Ok(closes)
    }
}

impl PriceSource for CsvPriceSource {
    fn load_prices(&self, id: &str) -> Result<PriceSeries> {
        let direct = self.data_dir.join(format!("{}.csv", id));
        let closes = if direct.is_file() {
            info!("Loading data from: {}", direct.display());
            self.read_closes(id, &direct, None)?
        } else {
            let universe = self.data_dir.join(STOCK_UNIVERSE_FILE);
            if !universe.is_file() {
                return Err(RiskError::data_unavailable(id, "no data file found"));
            }
            self.read_closes(id, &universe, Some(id))?
        };

        if closes.is_empty() {
            return Err(RiskError::data_unavailable(id, "no rows"));
        }
        Ok(PriceSeries::new(id, closes))
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Daily Cache
// ──────────────────────────────────────────────────────────────────────────────

pub trait Clock {
    fn today(&self) -> NaiveDate;
}

/// Local calendar date.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn today(&self) -> NaiveDate {
        (**self).today()
    }
}

/// Caches series from an inner source; entries stay fresh for the calendar day they were fetched.
pub struct PriceCache<S, C = SystemClock> {
    source: S,
    clock: C,
    entries: Mutex<HashMap<String, (PriceSeries, NaiveDate)>>,
}

impl<S: PriceSource> PriceCache<S, SystemClock> {
    pub fn new(source: S) -> Self {
        Self::with_clock(source, SystemClock)
    }
}

impl<S: PriceSource, C: Clock> PriceCache<S, C> {
    pub fn with_clock(source: S, clock: C) -> Self {
        Self {
            source,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: PriceSource, C: Clock> PriceSource for PriceCache<S, C> {
    fn load_prices(&self, id: &str) -> Result<PriceSeries> {
        let today = self.clock.today();
        {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((series, fetched)) = entries.get(id) {
                if *fetched == today {
                    debug!("Using cached data for {}", id);
                    return Ok(series.clone());
                }
            }
        }

        let series = self.source.load_prices(id)?;
        if series.is_empty() {
            warn!("Source returned an empty series for {}", id);
            return Err(RiskError::data_unavailable(id, "no rows"));
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), (series.clone(), today));
        debug!("Cached {} closes for {}", series.len(), series.symbol);
        Ok(series)
    }
}
