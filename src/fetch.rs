//! Retrieval of the raw accounting dump from the router.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::error::FetchError;

pub const ACCOUNTING_PATH: &str = "/accounting/ip.cgi";

/// Something that yields one accounting dump per call.
pub trait FlowSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Fetches `GET http://<router>/accounting/ip.cgi`.
#[derive(Clone)]
pub struct RouterFetcher {
    client: Client,
    url: String,
    timeout: Duration,
}

impl RouterFetcher {
    /// `router` is a host or `host:port`, without scheme.
    pub fn new(router: &str, timeout: Duration) -> Result<Self, FetchError> {
        let url = format!("http://{}{}", router, ACCOUNTING_PATH);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get(&self) -> Result<String, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| self.request_error(source))?;

        let status = response.status();
        if !status.is_success() {
            // Dropping the response here returns the connection to the pool.
            return Err(FetchError::Status {
                url: self.url.clone(),
                status,
            });
        }

        let body = response.text().await.map_err(|source| {
            if source.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Body {
                    url: self.url.clone(),
                    source,
                }
            }
        })?;
        debug!(url = %self.url, bytes = body.len(), "Fetched accounting data");
        Ok(body)
    }

    fn request_error(&self, source: reqwest::Error) -> FetchError {
        if source.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Request {
                url: self.url.clone(),
                source,
            }
        }
    }
}

impl FlowSource for RouterFetcher {
    async fn fetch(&self) -> Result<String, FetchError> {
        // The client timeout covers the whole exchange; this also bounds
        // time spent waiting on the connection pool.
        match tokio::time::timeout(self.timeout, self.get()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_server::{serve_once, serve_slow};
    use super::*;

    #[tokio::test]
    async fn fetches_body_from_accounting_path() {
        let payload = "192.168.1.5 8.8.8.8 1200 4\n\n";
        let (addr, captured) = serve_once(200, payload).await;

        let fetcher = RouterFetcher::new(&addr.to_string(), Duration::from_secs(5)).unwrap();
        assert_eq!(fetcher.url(), format!("http://{}/accounting/ip.cgi", addr));

        let body = fetcher.fetch().await.unwrap();
        assert_eq!(body, payload);

        let request = captured.await.unwrap();
        assert_eq!(request.method, axum::http::Method::GET);
        assert_eq!(request.path, "/accounting/ip.cgi");
        assert_eq!(request.query, None);
    }

    #[tokio::test]
    async fn non_success_status_is_fetch_error() {
        let (addr, _captured) = serve_once(503, "busy").await;
        let fetcher = RouterFetcher::new(&addr.to_string(), Duration::from_secs(5)).unwrap();

        match fetcher.fetch().await {
            Err(FetchError::Status { status, .. }) => assert_eq!(status.as_u16(), 503),
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_router_is_fetch_error() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let fetcher = RouterFetcher::new(&addr.to_string(), Duration::from_secs(5)).unwrap();
        assert!(matches!(fetcher.fetch().await, Err(FetchError::Request { .. })));
    }

    #[tokio::test]
    async fn silent_router_times_out() {
        let (addr, _captured) = serve_slow(Duration::from_secs(5)).await;

        let fetcher = RouterFetcher::new(&addr.to_string(), Duration::from_millis(200)).unwrap();
        match fetcher.fetch().await {
            Err(FetchError::Timeout(d)) => assert_eq!(d, Duration::from_millis(200)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
