//! Provider traits for fetching market data.
//!
//! This module defines the core provider traits:
//!
//! - [`DataProvider`] - Base trait for all data providers
//! - [`PriceDataProvider`] - Price bars with corporate actions
//! - [`FundamentalDataProvider`] - Financial statements as wide tables
//! - [`ReferenceDataProvider`] - Raw quote-summary modules

use async_trait::async_trait;
use polars::prelude::DataFrame;
use serde_json::{Map, Value};
use std::fmt::Debug;

use crate::{
    error::Result,
    frequency::{Interval, StatementFrequency},
    types::{HistoryRequest, PriceHistory, Statement, Symbol},
};

/// Base trait for all data providers.
///
/// All data providers must implement this trait to provide basic metadata
/// about the provider and its capabilities.
pub trait DataProvider: Send + Sync + Debug {
    /// Returns the name of this provider (e.g., "Yahoo Finance").
    fn name(&self) -> &str;

    /// Returns a description of this provider.
    fn description(&self) -> &str;

    /// Returns the bar intervals supported by this provider.
    fn supported_intervals(&self) -> &[Interval];
}

/// Provider for price history.
#[async_trait]
pub trait PriceDataProvider: DataProvider {
    /// Fetches, aligns and adjusts the price history of one symbol.
    ///
    /// A symbol with no bars in the requested window yields an empty
    /// [`PriceHistory`], not an error.
    async fn fetch_history(&self, symbol: &Symbol, request: &HistoryRequest)
    -> Result<PriceHistory>;
}

/// Provider for fundamental financial data.
#[async_trait]
pub trait FundamentalDataProvider: DataProvider {
    /// Fetches one financial statement as a wide table.
    ///
    /// The table has a `metric` column followed by one column per period end
    /// date (`YYYY-MM-DD`), most recent first. Trailing series carry exactly
    /// one date column.
    async fn fetch_statement(
        &self,
        symbol: &Symbol,
        statement: Statement,
        frequency: StatementFrequency,
    ) -> Result<DataFrame>;
}

/// Provider for reference/metadata.
#[async_trait]
pub trait ReferenceDataProvider: DataProvider {
    /// Fetches the named quote-summary modules for a symbol.
    ///
    /// Returns an empty map when the upstream has nothing for the symbol.
    async fn quote_summary(&self, symbol: &Symbol, modules: &[&str]) -> Result<Map<String, Value>>;
}
