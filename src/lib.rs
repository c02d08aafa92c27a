//! Match Authority Library
//!
//! Single-writer coordination for a small peer-to-peer match: one peer holds
//! authority over the stats ledger, the match clock and the fill-agent
//! population, replicates them to followers, and hands them over through a
//! recovery procedure when authority moves.
//!
//! # Features
//!
//! - `metrics_server` - HTTP endpoint for Prometheus/JSON metrics in the binary (enabled by default)

pub mod authority;
pub mod config;
pub mod game;
pub mod metrics;
pub mod net;
