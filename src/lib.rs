//! This crate provides an air quality aggregation server. It asks a sample producer, such as a
//! satellite data API, for geo-tagged observations within a bounding box and date range, and
//! reduces them to per-location statistics or a daily time series. Results are cached against a
//! canonical encoding of the request so that repeated requests avoid the producer entirely.
//!
//! The server is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team, on top of the [hyper] HTTP library.
//! * [Serde](serde) performs (de)serialisation of JSON request and response data.
//! * [reqwest] fetches samples from HTTP producers.
//! * [ndarray] provides the statistics used by the aggregations.
//! * [Rayon](tokio_rayon) optionally runs aggregations on a separate thread pool.

pub mod app;
pub mod app_state;
pub mod cache;
pub mod cli;
pub mod error;
pub mod metrics;
pub mod models;
pub mod operation;
pub mod operations;
pub mod producer;
pub mod producer_http;
pub mod producer_synthetic;
pub mod resource_manager;
pub mod server;
pub mod service;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod validated_json;
