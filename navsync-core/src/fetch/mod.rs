//! Upstream fetching: sources, circuit breaker and the batch fetcher.

pub mod batch;
pub mod circuit_breaker;
pub mod csv_source;
pub mod http;
pub mod source;
pub mod synthetic;

pub use batch::{BatchFetchResult, BatchFetcher};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use csv_source::CsvSource;
pub use http::HttpSource;
pub use source::{DataSource, FetchProgress};
pub use synthetic::SyntheticSource;
