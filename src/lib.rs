pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod execution;
pub mod ledger;
pub mod middleware;
pub mod queue;
pub mod risk;
pub mod server;
pub mod settlement;

#[cfg(test)]
pub mod test_utils;
