#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/tickerfeed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for tickerfeed providers.
//!
//! This crate provides the provider-independent vocabulary:
//!
//! - [`DataProvider`](provider::DataProvider) - Base trait for all providers
//! - [`PriceDataProvider`](provider::PriceDataProvider) - Aligned, adjusted price history
//! - [`FundamentalDataProvider`](provider::FundamentalDataProvider) - Wide statement tables
//! - [`ReferenceDataProvider`](provider::ReferenceDataProvider) - Quote-summary modules
//! - [`DataError`](error::DataError) - The typed failure taxonomy

/// Error types for data operations.
pub mod error;
/// Interval, period and statement frequency definitions.
pub mod frequency;
/// Provider traits for fetching market data.
pub mod provider;
/// Core data types (Symbol, PriceBar, CorporateAction, etc.).
pub mod types;

// Re-export commonly used items at crate root
pub use error::{DataError, Result};
pub use frequency::{Interval, Period, StatementFrequency};
pub use provider::{
    DataProvider, FundamentalDataProvider, PriceDataProvider, ReferenceDataProvider,
};
pub use types::{
    Adjustment, CorporateAction, EventKind, FundamentalsObservation, HistoryMeta, HistoryRequest,
    HistorySpan, PriceBar, PriceHistory, Statement, Symbol,
};
