use crate::error::AirMetricsError;
use crate::models::{BoundingBox, DateRange, Filters, Sample};
use crate::producer::SampleProducer;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// HTTP sample producer.
///
/// Implements [SampleProducer] against a JSON API serving `GET {base}/samples`, which returns an
/// array of [Sample] objects.
#[derive(Debug)]
pub struct HttpProducer {
    reqwest_client: reqwest::Client,
    base_url: Url,
    samples_url: Url,
    token: Option<String>,
}

impl HttpProducer {
    /// Create a new HTTP producer.
    ///
    /// # Arguments
    ///
    /// * `base_url`: Base URL of the API
    /// * `token`: Optional bearer token sent with every request
    /// * `timeout`: Timeout applied by the HTTP client to each request
    pub fn new(
        base_url: &Url,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AirMetricsError> {
        let reqwest_client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = directory_url(base_url);
        let samples_url = base_url.join("samples")?;
        Ok(Self {
            reqwest_client,
            base_url,
            samples_url,
            token,
        })
    }

    fn authorised(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Ensure the URL path ends with a slash so that relative joins append to it.
fn directory_url(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Query parameters describing a sample request.
fn query_params(
    bounds: &BoundingBox,
    range: &DateRange,
    filters: Option<&Filters>,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("north".to_string(), bounds.north.to_string()),
        ("south".to_string(), bounds.south.to_string()),
        ("east".to_string(), bounds.east.to_string()),
        ("west".to_string(), bounds.west.to_string()),
    ];
    if let Some(start) = range.start {
        params.push((
            "start".to_string(),
            start.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
    }
    if let Some(end) = range.end {
        params.push((
            "end".to_string(),
            end.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
    }
    for (name, value) in filters.into_iter().flatten() {
        let value = match value {
            Value::String(value) => value.clone(),
            other => other.to_string(),
        };
        params.push((name.clone(), value));
    }
    params
}

#[async_trait]
impl SampleProducer for HttpProducer {
    fn name(&self) -> &'static str {
        "http"
    }

    /// Are we authorised to access the API?
    ///
    /// Sends a HEAD request to the base URL. Returns true for a successful status.
    #[tracing::instrument(level = "DEBUG", skip(self), fields(url = %self.base_url))]
    async fn authenticate(&self) -> Result<bool, AirMetricsError> {
        let request = self.authorised(self.reqwest_client.head(self.base_url.clone()));
        let response = request.send().await?;
        Ok(response.status().is_success())
    }

    #[tracing::instrument(level = "DEBUG", skip(self, filters), fields(url = %self.samples_url))]
    async fn produce(
        &self,
        bounds: &BoundingBox,
        range: &DateRange,
        filters: Option<&Filters>,
    ) -> Result<Vec<Sample>, AirMetricsError> {
        let request = self
            .reqwest_client
            .get(self.samples_url.clone())
            .query(&query_params(bounds, range, filters));
        let response = self.authorised(request).send().await?;
        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(AirMetricsError::ProducerAuthentication)
            }
            status if !status.is_success() => Err(AirMetricsError::ProducerStatus {
                status: status.as_u16(),
            }),
            _ => Ok(response.json::<Vec<Sample>>().await?),
        }
    }
}
