//! Gator - A command-line RSS feed aggregator
//!
//! Users register, add and follow feeds, and an aggregation loop fetches the
//! least recently fetched feed on a fixed interval, storing new posts for
//! later browsing.

pub mod aggregator;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;

pub use error::{Error, Result};
