pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod freshness;
pub mod occupancy;
pub mod ranking;
pub mod routing;
pub mod state;
pub mod store;
