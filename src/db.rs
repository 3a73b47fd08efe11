//! Delivery of usage points to InfluxDB.
//!
//! Two backends sit behind [`MetricSink`]:
//!
//! - [`InfluxV1Sink`] writes each batch atomically through the 1.x `/write`
//!   endpoint. One bad point fails the whole batch.
//! - [`InfluxV2Sink`] streams points to the 2.x `/api/v2/write` endpoint.
//!   Bad points are logged and skipped, their siblings still go out.
//!
//! Either way a failed request is reported once per batch and never retried.

use std::future::Future;
use std::time::Duration;

use futures::stream;
use reqwest::{Body, Client};
use tracing::{info, warn};

use crate::error::WriteError;
use crate::line_protocol::{batch_points, Point, UnsignedEncoding};
use crate::models::domain::Batch;

/// Outcome of a successful write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub written: usize,
    /// Points dropped because they could not be encoded.
    pub point_errors: usize,
}

pub trait MetricSink: Send + Sync + 'static {
    fn write(&self, batch: Batch) -> impl Future<Output = Result<WriteReport, WriteError>> + Send;
}

/// InfluxDB 1.x connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V1Settings {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

/// InfluxDB 2.x connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2Settings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

#[derive(Clone)]
pub struct InfluxV1Sink {
    client: Client,
    settings: V1Settings,
}

impl InfluxV1Sink {
    pub fn new(client: Client, settings: V1Settings) -> Self {
        Self { client, settings }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.url.trim_end_matches('/'), path)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.settings.username.is_empty() {
            request
        } else {
            request.basic_auth(&self.settings.username, Some(&self.settings.password))
        }
    }

    /// Issues `CREATE DATABASE` for the configured database.
    ///
    /// The statement is idempotent on the server side.
    pub async fn ensure_database(&self) -> Result<(), WriteError> {
        let url = self.endpoint("/query");
        let statement = format!("CREATE DATABASE \"{}\"", self.settings.database);
        let request = self.client.post(&url).query(&[("q", statement.as_str())]);
        let response = self
            .with_auth(request)
            .send()
            .await
            .map_err(|source| WriteError::Request { url, source })?;
        check_status(response).await?;
        info!(database = %self.settings.database, "Database ready");
        Ok(())
    }
}

impl MetricSink for InfluxV1Sink {
    async fn write(&self, batch: Batch) -> Result<WriteReport, WriteError> {
        let mut lines = Vec::with_capacity(batch.len());
        for (index, point) in batch_points(&batch).iter().enumerate() {
            let line = point
                .encode(UnsignedEncoding::Signed)
                .map_err(|source| WriteError::Point { index, source })?;
            lines.push(line);
        }

        let url = self.endpoint("/write");
        let request = self
            .client
            .post(&url)
            .query(&[("db", self.settings.database.as_str()), ("precision", "u")])
            .body(lines.join("\n"));
        let response = self
            .with_auth(request)
            .send()
            .await
            .map_err(|source| WriteError::Request { url, source })?;
        check_status(response).await?;

        Ok(WriteReport {
            written: lines.len(),
            point_errors: 0,
        })
    }
}

#[derive(Clone)]
pub struct InfluxV2Sink {
    client: Client,
    settings: V2Settings,
}

impl InfluxV2Sink {
    pub fn new(client: Client, settings: V2Settings) -> Self {
        Self { client, settings }
    }
}

impl InfluxV2Sink {
    /// Streams every encodable point in one request.
    ///
    /// A point that fails to encode is logged and counted in
    /// [`WriteReport::point_errors`]; the rest still go out.
    pub async fn write_points(&self, points: &[Point]) -> Result<WriteReport, WriteError> {
        let (lines, point_errors) = encode_lenient(points);
        let written = lines.len();
        if written == 0 {
            return Ok(WriteReport {
                written,
                point_errors,
            });
        }

        let url = format!(
            "{}/api/v2/write",
            self.settings.url.trim_end_matches('/')
        );
        let body = stream::iter(
            lines
                .into_iter()
                .map(|line| Ok::<_, std::io::Error>(format!("{}\n", line))),
        );
        let response = self
            .client
            .post(&url)
            .query(&[
                ("org", self.settings.org.as_str()),
                ("bucket", self.settings.bucket.as_str()),
                ("precision", "us"),
            ])
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.settings.token),
            )
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::wrap_stream(body))
            .send()
            .await
            .map_err(|source| WriteError::Request { url, source })?;
        check_status(response).await?;

        Ok(WriteReport {
            written,
            point_errors,
        })
    }
}

impl MetricSink for InfluxV2Sink {
    async fn write(&self, batch: Batch) -> Result<WriteReport, WriteError> {
        self.write_points(&batch_points(&batch)).await
    }
}

/// Encodes what it can, returning the lines and the number of rejected points.
fn encode_lenient(points: &[Point]) -> (Vec<String>, usize) {
    let mut lines = Vec::with_capacity(points.len());
    let mut point_errors = 0;
    for (index, point) in points.iter().enumerate() {
        match point.encode(UnsignedEncoding::Native) {
            Ok(line) => lines.push(line),
            Err(e) => {
                warn!(index, error = %e, "Dropping point");
                point_errors += 1;
            }
        }
    }
    (lines, point_errors)
}

/// The sink generation chosen at startup.
#[derive(Clone)]
pub enum InfluxSink {
    V1(InfluxV1Sink),
    V2(InfluxV2Sink),
}

impl InfluxSink {
    pub fn api(&self) -> &'static str {
        match self {
            InfluxSink::V1(_) => "v1",
            InfluxSink::V2(_) => "v2",
        }
    }
}

impl MetricSink for InfluxSink {
    async fn write(&self, batch: Batch) -> Result<WriteReport, WriteError> {
        match self {
            InfluxSink::V1(sink) => sink.write(batch).await,
            InfluxSink::V2(sink) => sink.write(batch).await,
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), WriteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(WriteError::Rejected { status, body })
}

/// Applies the per-write deadline around a sink and skips empty batches.
pub struct Writer<S> {
    sink: S,
    timeout: Duration,
}

impl<S: MetricSink> Writer<S> {
    pub fn new(sink: S, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    pub async fn write(&self, batch: Batch) -> Result<WriteReport, WriteError> {
        if batch.is_empty() {
            return Ok(WriteReport::default());
        }
        match tokio::time::timeout(self.timeout, self.sink.write(batch)).await {
            Ok(result) => result,
            Err(_) => Err(WriteError::Timeout(self.timeout)),
        }
    }
}
