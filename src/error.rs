//! Error taxonomy for the ingestion pipeline.
//!
//! Every variant here is contained within a single cycle; none of them is
//! fatal to the process except `ConfigError`, which only occurs at startup.

use std::net::IpAddr;
use std::time::Duration;

use crate::models::domain::FlowEntry;

/// Failure to retrieve the accounting dump from the router.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("router answered {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("reading body from {url} failed: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// An entry where neither endpoint belongs to the local network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("neither endpoint is local (from {} to {})", fmt_addr(.source_addr), fmt_addr(.destination_addr))]
pub struct ClassificationAnomaly {
    pub source_addr: Option<IpAddr>,
    pub destination_addr: Option<IpAddr>,
}

impl ClassificationAnomaly {
    pub fn from_entry(entry: &FlowEntry) -> Self {
        Self {
            source_addr: entry.source,
            destination_addr: entry.destination,
        }
    }
}

fn fmt_addr(addr: &Option<IpAddr>) -> String {
    match addr {
        Some(ip) => ip.to_string(),
        None => "<invalid>".to_string(),
    }
}

/// A single metric point could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PointError {
    #[error("tag {0:?} has an empty value")]
    EmptyTagValue(String),
    #[error("field {field:?} value {value} does not fit a signed 64-bit integer")]
    IntegerOverflow { field: String, value: u64 },
}

/// The sink rejected a batch or could not be reached.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("sink answered {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("point {index} could not be encoded: {source}")]
    Point {
        index: usize,
        #[source]
        source: PointError,
    },
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
}

/// Invalid startup configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid CIDR {0:?}: expected <address>/<prefix>")]
    InvalidCidr(String),
    #[error("prefix length {prefix} is out of range for {addr}")]
    InvalidPrefix { addr: String, prefix: u8 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("the InfluxDB 2.x API needs {0}")]
    MissingV2Setting(&'static str),
}
