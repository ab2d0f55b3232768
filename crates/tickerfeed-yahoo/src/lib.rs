#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/tickerfeed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Yahoo Finance data provider.
//!
//! This crate provides a Yahoo Finance data provider that implements the
//! [`DataProvider`], [`PriceDataProvider`], [`FundamentalDataProvider`] and
//! [`ReferenceDataProvider`] traits from `tickerfeed-core`.
//!
//! # Features
//!
//! - Cookie/crumb session with two handshake strategies and a single
//!   strategy-switch retry per request
//! - Price history with dividends, splits and capital gains aligned onto the
//!   bars, forward or back adjusted
//! - Income, balance sheet and cash flow statements as wide tables
//! - Raw quote-summary modules and the screener
//! - Optional request pacing
//!
//! # Example
//!
//! ```no_run
//! use tickerfeed_yahoo::YahooProvider;
//! use tickerfeed_core::{HistoryRequest, Interval, Period, PriceDataProvider, Symbol};
//!
//! # async fn example() -> tickerfeed_core::Result<()> {
//! let provider = YahooProvider::new();
//! let request = HistoryRequest::period(Period::Years(1), Interval::Daily);
//!
//! let history = provider.fetch_history(&Symbol::new("AAPL"), &request).await?;
//! println!("Fetched {} rows", history.data.height());
//! # Ok(())
//! # }
//! ```

pub mod adjust;
pub mod align;
pub mod chart;
pub mod config;
mod envelope;
pub mod executor;
pub mod field;
pub mod fundamentals;
pub mod session;
#[cfg(test)]
mod testing;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use polars::prelude::*;
use serde_json::{Map, Value};
use tickerfeed_core::{
    DataError, DataProvider, EventKind, FundamentalDataProvider, HistoryRequest,
    HistorySpan, Interval, PriceDataProvider, PriceHistory, ReferenceDataProvider, Result,
    Statement, StatementFrequency, Symbol,
};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

pub use chart::ChartData;
pub use config::SessionConfig;
pub use executor::{PROVIDER_NAME, RequestDescriptor, RequestExecutor};
pub use session::{Credentials, Session, Strategy};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

use crate::adjust::float_values;
use crate::chart::{PRICE_COLUMNS, VOLUME};

/// Yahoo Finance chart API base URL.
const CHART_API_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance quote summary API base URL.
const QUOTE_SUMMARY_URL: &str = "https://query2.finance.yahoo.com/v10/finance/quoteSummary";

/// Fundamentals timeseries API base URL.
const TIMESERIES_URL: &str =
    "https://query2.finance.yahoo.com/ws/fundamentals-timeseries/v1/finance/timeseries";

/// Screener API URL.
const SCREENER_URL: &str = "https://query2.finance.yahoo.com/v1/finance/screener";

/// Default rate limit delay in milliseconds.
const DEFAULT_RATE_LIMIT_MS: u64 = 1000;

/// Earliest period end requested from the timeseries API.
const FUNDAMENTALS_START: (i32, u32, u32) = (2016, 12, 31);

type StatementKey = (Symbol, Statement, StatementFrequency);

/// Yahoo Finance data provider.
///
/// Implements [`DataProvider`], [`PriceDataProvider`],
/// [`FundamentalDataProvider`] and [`ReferenceDataProvider`].
///
/// Providers built from the same [`Session`] share its cookies, crumb and
/// strategy. The trait methods run until completion or until
/// [`YahooProvider::shutdown`]; the inherent methods take a
/// [`CancellationToken`] for finer control.
#[derive(Debug)]
pub struct YahooProvider {
    executor: RequestExecutor,
    shutdown: CancellationToken,
    rate_limit_ms: u64,
    last_request_time: AtomicU64,
    statements: RwLock<HashMap<StatementKey, DataFrame>>,
}

impl YahooProvider {
    /// Create a new Yahoo Finance provider with default settings.
    ///
    /// Uses its own session and paces requests to one per second.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate_limit(Duration::from_millis(DEFAULT_RATE_LIMIT_MS))
    }

    /// Create a provider on top of an existing session, without pacing.
    #[must_use]
    pub fn with_session(session: Arc<Session>) -> Self {
        Self {
            executor: RequestExecutor::new(session),
            shutdown: CancellationToken::new(),
            rate_limit_ms: 0,
            last_request_time: AtomicU64::new(0),
            statements: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new Yahoo Finance provider with custom rate limiting.
    #[must_use]
    pub fn with_rate_limit(rate_limit: Duration) -> Self {
        Self::with_session(Arc::new(Session::default())).rate_limited(rate_limit)
    }

    /// Sets the minimum spacing between requests; zero disables pacing.
    #[must_use]
    pub fn rate_limited(mut self, rate_limit: Duration) -> Self {
        self.rate_limit_ms = u64::try_from(rate_limit.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The session this provider authenticates with.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        self.executor.session()
    }

    /// Cancels every in-flight and future trait-method call.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Apply rate limiting before making a request.
    async fn apply_rate_limit(&self, cancel: &CancellationToken) -> Result<()> {
        if self.rate_limit_ms == 0 {
            return Ok(());
        }

        let now = now_millis();
        let last = self.last_request_time.load(Ordering::Relaxed);
        let elapsed = now.saturating_sub(last);

        if elapsed < self.rate_limit_ms {
            let wait_time = self.rate_limit_ms - elapsed;
            debug!("Rate limiting: waiting {}ms", wait_time);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DataError::Cancelled),
                () = sleep(Duration::from_millis(wait_time)) => {}
            }
        }

        self.last_request_time.store(now_millis(), Ordering::Relaxed);
        Ok(())
    }

    async fn execute(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        self.apply_rate_limit(cancel).await?;
        self.executor.execute(descriptor, cancel).await
    }

    /// Fetches the parsed chart of `symbol` without shaping it.
    ///
    /// # Errors
    ///
    /// Request errors from [`RequestExecutor::execute`];
    /// [`DataError::SymbolNotFound`] for unknown symbols;
    /// [`DataError::Shape`] for unparseable payloads.
    #[instrument(skip(self, symbol, request, cancel), fields(symbol = %symbol))]
    pub async fn chart(
        &self,
        symbol: &Symbol,
        request: &HistoryRequest,
        cancel: &CancellationToken,
    ) -> Result<ChartData> {
        let descriptor = chart_request(symbol, request)?;
        let response = self.execute(&descriptor, cancel).await?;
        match envelope::first_result(&response.body, "chart") {
            Ok(result) => chart::parse_chart(&result),
            Err(DataError::NoData(reason)) => {
                debug!(%reason, "no chart data");
                Ok(ChartData::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Fetches and shapes the price history of `symbol`.
    ///
    /// # Errors
    ///
    /// See [`YahooProvider::chart`].
    pub async fn history(
        &self,
        symbol: &Symbol,
        request: &HistoryRequest,
        cancel: &CancellationToken,
    ) -> Result<PriceHistory> {
        let chart = self.chart(symbol, request, cancel).await?;
        shape_history(chart, request)
    }

    /// Fetches one financial statement, memoised per symbol, statement and
    /// frequency for the life of the provider.
    ///
    /// # Errors
    ///
    /// [`DataError::InvalidParameter`] for a balance sheet at trailing
    /// frequency; otherwise request and shape errors.
    #[instrument(skip(self, symbol, cancel), fields(symbol = %symbol))]
    pub async fn statement(
        &self,
        symbol: &Symbol,
        statement: Statement,
        frequency: StatementFrequency,
        cancel: &CancellationToken,
    ) -> Result<DataFrame> {
        if !statement.supports(frequency) {
            return Err(DataError::InvalidParameter(format!(
                "{statement} has no {} series",
                frequency.prefix()
            )));
        }

        let key = (symbol.clone(), statement, frequency);
        if let Some(table) = self.statements.read().await.get(&key) {
            return Ok(table.clone());
        }

        let descriptor = fundamentals_request(symbol, statement, frequency)?;
        let response = self.execute(&descriptor, cancel).await?;
        let table = match envelope::results(&response.body, "timeseries")
            .and_then(|results| fundamentals::parse_statement(&results, statement, frequency))
        {
            Ok(table) => table,
            Err(DataError::NoData(reason)) => {
                debug!(%reason, "no fundamentals");
                DataFrame::empty()
            }
            Err(e) => return Err(e),
        };

        self.statements.write().await.insert(key, table.clone());
        Ok(table)
    }

    /// Fetches raw quote-summary modules.
    ///
    /// # Errors
    ///
    /// Request errors, or [`DataError::Shape`] if the result is not an object.
    pub async fn modules(
        &self,
        symbol: &Symbol,
        modules: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Map<String, Value>> {
        if modules.is_empty() {
            return Err(DataError::InvalidParameter("no modules requested".to_string()));
        }
        let descriptor = RequestDescriptor::get(format!("{QUOTE_SUMMARY_URL}/{symbol}"))
            .param("modules", modules.join(","));
        let response = self.execute(&descriptor, cancel).await?;
        object_result(&response.body, "quoteSummary")
    }

    /// Runs a screener query.
    ///
    /// # Errors
    ///
    /// Request errors, or [`DataError::Shape`] if the result is not an object.
    pub async fn screen(&self, query: Value, cancel: &CancellationToken) -> Result<Map<String, Value>> {
        let descriptor = RequestDescriptor::post(SCREENER_URL, query);
        let response = self.execute(&descriptor, cancel).await?;
        object_result(&response.body, "finance")
    }
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProvider for YahooProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn description(&self) -> &str {
        "Yahoo Finance price history, fundamentals and quote summaries"
    }

    fn supported_intervals(&self) -> &[Interval] {
        &Interval::ALL
    }
}

#[async_trait]
impl PriceDataProvider for YahooProvider {
    async fn fetch_history(&self, symbol: &Symbol, request: &HistoryRequest) -> Result<PriceHistory> {
        self.history(symbol, request, &self.shutdown.child_token()).await
    }
}

#[async_trait]
impl FundamentalDataProvider for YahooProvider {
    async fn fetch_statement(
        &self,
        symbol: &Symbol,
        statement: Statement,
        frequency: StatementFrequency,
    ) -> Result<DataFrame> {
        self.statement(symbol, statement, frequency, &self.shutdown.child_token())
            .await
    }
}

#[async_trait]
impl ReferenceDataProvider for YahooProvider {
    async fn quote_summary(&self, symbol: &Symbol, modules: &[&str]) -> Result<Map<String, Value>> {
        self.modules(symbol, modules, &self.shutdown.child_token())
            .await
    }
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Chart request for a symbol and history request.
fn chart_request(symbol: &Symbol, request: &HistoryRequest) -> Result<RequestDescriptor> {
    let descriptor = RequestDescriptor::get(format!("{CHART_API_URL}/{symbol}"))
        .param("interval", request.interval.as_str())
        .param("includePrePost", request.prepost.to_string())
        .param("events", "div,splits,capitalGains")
        .param("includeAdjustedClose", "true");

    Ok(match &request.span {
        HistorySpan::Period(period) => descriptor.param("range", period.to_string()),
        HistorySpan::Range { start, end } => {
            if start >= end {
                return Err(DataError::InvalidParameter(format!(
                    "start {start} is not before end {end}"
                )));
            }
            descriptor
                .param("period1", start.timestamp().to_string())
                .param("period2", end.timestamp().to_string())
        }
    })
}

/// Timeseries request covering every canonical metric of `statement`.
fn fundamentals_request(
    symbol: &Symbol,
    statement: Statement,
    frequency: StatementFrequency,
) -> Result<RequestDescriptor> {
    let (year, month, day) = FUNDAMENTALS_START;
    let start = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
        .ok_or_else(|| DataError::InvalidParameter("invalid fundamentals start date".to_string()))?;

    Ok(RequestDescriptor::get(format!("{TIMESERIES_URL}/{symbol}"))
        .param("symbol", symbol.as_str())
        .param("type", fundamentals::type_param(statement, frequency))
        .param("period1", start.to_string())
        .param("period2", Utc::now().timestamp().to_string()))
}

fn object_result(body: &str, domain: &str) -> Result<Map<String, Value>> {
    match envelope::first_result(body, domain) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DataError::Shape(format!("{domain} result is not an object"))),
        Err(DataError::NoData(reason)) => {
            debug!(%reason, "empty result");
            Ok(Map::new())
        }
        Err(e) => Err(e),
    }
}

/// Turns a parsed chart into the price table a history request asks for.
///
/// Events are merged onto the bars and missing event columns are
/// zero-filled. Then prices are adjusted, float columns are rounded to two
/// decimals if `rounding`, event columns are dropped unless `actions`, and
/// rows with no non-zero number left are dropped unless `keep_na`.
///
/// # Errors
///
/// Propagates merge and table errors as [`DataError::Shape`].
pub fn shape_history(chart: ChartData, request: &HistoryRequest) -> Result<PriceHistory> {
    if chart.bars.is_empty() {
        return Ok(PriceHistory::empty(chart.meta));
    }

    let mut data = chart::bars_to_frame(&chart.bars)?;
    for kind in EventKind::ALL {
        let actions = chart.events(kind);
        if actions.is_empty() {
            continue;
        }
        let events = chart::events_to_frame(kind, actions)?;
        data = align::merge_events(&data, &events, request.interval)?;
    }

    for kind in EventKind::ALL {
        let filled: Vec<f64> = match data.column(kind.column_name()) {
            Ok(_) => float_values(&data, kind.column_name())?
                .into_iter()
                .map(|v| v.unwrap_or(0.0))
                .collect(),
            Err(_) => vec![0.0; data.height()],
        };
        data.with_column(Column::new(kind.column_name().into(), filled))?;
    }

    data = adjust::adjust(&data, request.adjustment)?;

    if request.rounding {
        round_floats(&mut data)?;
    }
    if !request.actions {
        for kind in EventKind::ALL {
            data = data.drop(kind.column_name())?;
        }
    }
    if !request.keep_na {
        data = drop_empty_rows(&data)?;
    }

    Ok(PriceHistory {
        data,
        meta: chart.meta,
    })
}

/// Drops rows whose numeric cells are all null, NaN or zero.
fn drop_empty_rows(df: &DataFrame) -> Result<DataFrame> {
    let columns = PRICE_COLUMNS
        .into_iter()
        .chain([chart::ADJUSTED_CLOSE, VOLUME])
        .chain(EventKind::ALL.map(|k| k.column_name()))
        .filter(|name| df.column(name).is_ok())
        .map(|name| float_values(df, name))
        .collect::<Result<Vec<_>>>()?;

    let keep: Vec<bool> = (0..df.height())
        .map(|row| {
            columns
                .iter()
                .any(|c| c[row].is_some_and(|v| v != 0.0 && !v.is_nan()))
        })
        .collect();
    let dropped = keep.iter().filter(|k| !**k).count();
    if dropped > 0 {
        debug!(dropped, "dropped empty rows");
    }

    Ok(df.filter(&BooleanChunked::from_slice("keep".into(), &keep))?)
}

/// Rounds every float column to two decimals.
fn round_floats(df: &mut DataFrame) -> Result<()> {
    let names: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|c| c.dtype().is_float())
        .map(|c| c.name().to_string())
        .collect();
    for name in &names {
        let rounded: Vec<Option<f64>> = float_values(df, name)?
            .into_iter()
            .map(|v| v.map(|v| (v * 100.0).round() / 100.0))
            .collect();
        df.with_column(Column::new(name.as_str().into(), rounded))?;
    }
    Ok(())
}
