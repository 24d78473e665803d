//! tally: multi-institution account balance aggregator.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod core;
pub mod providers;
pub mod secrets;
pub mod store;
pub mod types;
