//! # HTTP Retrieval Utilities
//!
//! Asynchronous API client wrapper around `reqwest` with exponential-backoff
//! retries for transient failures and standardized JSON response handling.
//! Paths are built segment by segment so ids coming off the feed can never
//! escape their segment.

use std::time::Duration;

use anyhow::{anyhow, Context};
use reqwest::{header::{AUTHORIZATION, CONTENT_TYPE}, Method};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::configs::controller_config::HttpOptions;

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body of a 2xx response.
    pub data: Option<T>,
    /// The raw body of a non-2xx response.
    pub error_body: Option<String>,
    pub status: u16,
    pub success: bool,
}

/// A flexible asynchronous HTTP client bound to one base URL.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client for `base_url` using the timeout, retry count and
    /// bearer token from `options`.
    ///
    /// # Errors
    /// Fails when `base_url` is not an absolute http(s) URL or the TLS
    /// backend cannot be initialised.
    pub fn new(base_url: &str, options: &HttpOptions) -> anyhow::Result<Self> {
        let mut url = Url::parse(base_url).with_context(|| format!("invalid API base URL: {base_url}"))?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("API base URL must be absolute http(s): {base_url}"));
        }
        // Joining against "http://host/prefix" would drop "prefix".
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.retries);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token: options.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for the given path segments, each percent-encoded on
    /// its own.
    pub fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| anyhow!("API base URL cannot carry a path"))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    /// Performs a request against an absolute URL, usually one built by
    /// [`ApiClient::endpoint`].
    pub async fn request_at<T, B>(
        &self,
        method: Method,
        url: Url,
        body: Option<B>,
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        log::debug!("{} {}", method, url);
        let mut req = self.inner.request(method, url);

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(b) = body {
            let json_body = serde_json::to_string(&b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
            })
        }
    }
}
