//! Network fetch primitive.
//!
//! The cache subsystem consumes the network through the [`Fetcher`] trait so
//! tests can substitute stubs that count or fail invocations. [`HttpFetcher`]
//! is the production implementation backed by reqwest.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid method `{0}`")]
    Method(String),
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("origin unreachable: {0}")]
    Unreachable(String),
}

/// A fully-buffered upstream response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl FetchedResponse {
    /// Success means a 2xx status; only these are ever written to the store.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound network access.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issue a GET for an absolute URL.
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError>;

    /// Forward an arbitrary request to the origin. Used only by the
    /// passthrough path for traffic the classifier rejects.
    async fn forward(
        &self,
        method: &str,
        url: &str,
        body: Bytes,
    ) -> Result<FetchedResponse, FetchError>;
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(Self::user_agent())
            .build()?;
        Ok(Self { client })
    }

    pub fn user_agent() -> &'static str {
        concat!("dispensa/", env!("CARGO_PKG_VERSION"))
    }

    async fn collect(response: reqwest::Response) -> Result<FetchedResponse, FetchError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|text| (name.to_string(), text.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        Ok(FetchedResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let response = self.client.get(url).send().await?;
        Self::collect(response).await
    }

    async fn forward(
        &self,
        method: &str,
        url: &str,
        body: Bytes,
    ) -> Result<FetchedResponse, FetchError> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| FetchError::Method(method.to_string()))?;
        let response = self.client.request(method, url).body(body).send().await?;
        Self::collect(response).await
    }
}
