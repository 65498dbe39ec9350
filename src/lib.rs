// Library for tests to access modules

pub mod aggregator;
pub mod alerts;
pub mod buffer;
pub mod config;
pub mod error;
pub mod lifecycle_store;
pub mod metrics_repo;
pub mod models;
pub mod processor;
pub mod rollup_worker;
pub mod routes;
pub mod snapshot_store;
pub mod version;
