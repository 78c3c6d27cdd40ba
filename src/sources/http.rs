//! HTTP agent metric source
//!
//! Reads metrics from an agent that exposes one endpoint per unit and metric:
//!
//! ```text
//! GET {base_url}/units/{unit}/metrics/{metric}   →   {"value": 42.0}
//! ```
//!
//! Unit and metric ids are percent-encoded as single path segments. The client is built
//! once and reused across fetches. When a token is configured it is
//! sent in the `X-MONITORING-SECRET` header.

use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{instrument, trace};

use crate::MetricValue;
use crate::config::HttpSourceConfig;
use crate::error::FetchError;

use super::MetricSource;

const SECRET_HEADER: &str = "X-MONITORING-SECRET";

#[derive(Debug, Deserialize)]
struct MetricResponse {
    value: MetricValue,
}

/// Metric source polling an HTTP agent
#[derive(Debug, Clone)]
pub struct HttpMetricSource {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpMetricSource {
    pub fn new(config: &HttpSourceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            bail!("agent url {base_url} cannot carry a path");
        }

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    fn url(&self, unit_id: &str, metric: &str) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::Unavailable(format!("agent url {} has no path", self.base_url)))?
            .pop_if_empty()
            .extend(["units", unit_id, "metrics", metric]);
        Ok(url)
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    #[instrument(skip(self, timeout))]
    async fn fetch(
        &self,
        unit_id: &str,
        metric: &str,
        timeout: Duration,
    ) -> Result<MetricValue, FetchError> {
        let url = self.url(unit_id, metric)?;
        trace!("requesting {url}");

        let mut request = self.client.get(url).timeout(timeout);
        if let Some(token) = &self.token {
            request = request.header(SECRET_HEADER, token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Unavailable(format!("failed to send HTTP request: {e}"))
            }
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::UnknownMetric(metric.to_string()));
        }

        if !response.status().is_success() {
            return Err(FetchError::Unavailable(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Unavailable(format!("failed to read response body: {e}")))?;

        let parsed: MetricResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::Unavailable(format!("failed to parse metric JSON: {e}")))?;

        Ok(parsed.value)
    }
}
