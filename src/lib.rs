//! mikrocount
//!
//! Polls a MikroTik router's IP accounting table and records per-host
//! upload/download usage in InfluxDB.
//!
//! ```text
//! Scheduler tick --> RouterFetcher --> parse_accounting --> Classifier --> Writer --> InfluxDB
//! ```
//!
//! Each cycle is independent: nothing survives between cycles except the
//! local network definition and the sink's HTTP client.

pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod line_protocol;
pub mod models;
pub mod network;
pub mod parser;
pub mod scheduler;
pub mod stats;

pub use classify::{AnomalyPolicy, Classifier, IntraLanPolicy};
pub use config::{Cli, Config, SinkSettings};
pub use db::{InfluxSink, InfluxV1Sink, InfluxV2Sink, MetricSink, Writer};
pub use fetch::{FlowSource, RouterFetcher};
pub use network::LocalNetwork;
pub use parser::parse_accounting;
pub use scheduler::Scheduler;
