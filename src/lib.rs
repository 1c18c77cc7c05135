//! Mock Elasticsearch
//!
//! A stand-in for the ingest side of an Elasticsearch cluster. It speaks the
//! `_bulk` wire format and answers with simulated per-document outcomes so
//! that client retry and backoff logic can be load tested without a real
//! cluster.
//!
//! # Features
//!
//! - **Bulk API**: newline-delimited `_bulk` bodies, plain or gzip encoded
//! - **Fault Injection**: configurable rates of 409, 429 and 406 per `create`
//!   and 413 per request
//! - **Cluster Identity**: `/` and `/_license` documents for client handshakes
//! - **Latency Simulation**: fixed delay before each request
//! - **Counters**: per-outcome counters, optionally printed as JSON
//!
//! # Example Configuration
//!
//! ```yaml
//! listen: 0.0.0.0:9200
//! faults:
//!   duplicate_percent: 5
//!   too_many_percent: 10
//!   non_index_percent: 1
//!   too_large_percent: 2
//! cluster:
//!   uuid: mock-cluster
//! metrics_interval_secs: 5
//! ```

pub mod bulk;
pub mod config;
pub mod info;
pub mod metrics;
pub mod odds;
pub mod server;

pub use bulk::{BulkError, BulkOutcome, BulkProcessor, BulkResponse};
pub use config::MockEsConfig;
pub use metrics::{Counter, CounterSink, MetricsRegistry};
pub use odds::{ActionOdds, MethodOdds};
pub use server::{create_router, run_server, AppState};
