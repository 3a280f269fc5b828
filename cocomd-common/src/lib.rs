//! # CocoMD Common Library
//!
//! Shared code for the CocoMD operator client including:
//! - Domain types (operating mode, link state, upload kinds)
//! - Maturity counts and the count aggregator
//! - Wire types exchanged with the inference server
//! - Event types (ClientEvent enum) and the event bus
//! - Configuration loading

pub mod api;
pub mod config;
pub mod counts;
pub mod error;
pub mod events;

pub use counts::{CountAggregator, MaturityCategory, MaturityCounts};
pub use error::{Error, Result};
