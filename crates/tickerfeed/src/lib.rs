#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/tickerfeed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Unified entry point for tickerfeed.
//!
//! This crate re-exports the core types and traits and, with the `yahoo`
//! feature (on by default), the Yahoo Finance provider together with a
//! process-wide [`Session`].
//!
//! # Features
//!
//! - `yahoo` - Yahoo Finance provider for prices, fundamentals and reference data

// Core types and traits
pub use tickerfeed_core::*;

// Providers
#[cfg(feature = "yahoo")]
pub use tickerfeed_yahoo::{
    RequestExecutor, Session, SessionConfig, Strategy, YahooProvider, adjust, align, chart,
    fundamentals,
};

#[cfg(feature = "yahoo")]
use std::sync::{Arc, OnceLock};

/// The session shared by every provider built with [`yahoo`].
///
/// Created with the default configuration on first use. Callers that need a
/// proxy or another timeout build their own [`Session`] and pass it to
/// [`YahooProvider::with_session`].
#[cfg(feature = "yahoo")]
#[must_use]
pub fn shared_session() -> Arc<Session> {
    static SESSION: OnceLock<Arc<Session>> = OnceLock::new();
    Arc::clone(SESSION.get_or_init(|| Arc::new(Session::default())))
}

/// A Yahoo Finance provider on the shared session.
#[cfg(feature = "yahoo")]
#[must_use]
pub fn yahoo() -> YahooProvider {
    YahooProvider::with_session(shared_session())
}
