//! HTTP fetching behind a trait seam.
//!
//! Every network call the engine makes goes through [`PageFetcher`], so the
//! strategies can be driven by scripted fakes in tests. The production
//! implementation, [`HttpFetcher`], wraps a `reqwest::Client` with a
//! client-side timeout; there is no cooperative cancellation of HTTP calls.
//!
//! Non-2xx statuses are returned as data, never as errors: the failure
//! classifier needs the exact status code to tell a 404 from a 429.

use async_trait::async_trait;
use reqwest::redirect::Policy;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::error::FetchError;

/// A completed HTTP GET.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) || matches!(self.status, 301 | 302)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Abstraction over a plain HTTP GET.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// `reqwest`-backed fetcher with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    /// Bodies larger than this are truncated.
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .redirect(Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: 8 * 1024 * 1024,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let t0 = Instant::now();
        let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

        let resp = match self.client.get(parsed).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let err = FetchError::from(e);
                warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %err, "GET failed");
                return Err(err);
            }
        };

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let mut body = resp.bytes().await.map_err(FetchError::from)?.to_vec();
        body.truncate(self.max_body_bytes);

        debug!(
            status,
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "GET complete"
        );
        Ok(FetchedPage {
            status,
            final_url,
            body,
        })
    }
}
