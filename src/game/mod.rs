pub mod constants;
pub mod dedup;
pub mod ledger;
pub mod lifecycle;
pub mod match_result;
pub mod message_log;
pub mod population;
pub mod schedule;
pub mod scoring;
pub mod state;
