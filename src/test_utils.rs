use crate::cache::Clock;
use crate::cli::CommandLineArgs;
use crate::error::AirMetricsError;
use crate::models::*;
use crate::producer::SampleProducer;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clap::Parser;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

/// Create a RequestData object with only required fields set.
pub(crate) fn get_test_request_data() -> RequestData {
    RequestData {
        bounds: BoundingBox::new(-15.0, -16.0, -55.0, -57.0),
        start: None,
        end: None,
        filters: None,
    }
}

/// Create a RequestData object with all fields set.
pub(crate) fn get_test_request_data_optional() -> RequestData {
    let mut filters = Filters::new();
    filters.insert("product".to_string(), "no2".into());
    RequestData {
        bounds: BoundingBox::new(-15.0, -16.0, -55.0, -57.0),
        start: Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
        end: Some(Utc.with_ymd_and_hms(2024, 5, 3, 23, 59, 59).unwrap()),
        filters: Some(filters),
    }
}

/// Create a Sample with a good quality flag from an RFC 3339 timestamp.
pub(crate) fn sample(latitude: f64, longitude: f64, value: f64, timestamp: &str) -> Sample {
    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .unwrap()
        .with_timezone(&Utc);
    Sample::new(latitude, longitude, value, timestamp)
}

/// Command line arguments with every option at its default.
pub(crate) fn get_test_args() -> CommandLineArgs {
    CommandLineArgs::parse_from(["airmetrics"])
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub(crate) struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub(crate) fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// A clock set to 2024-05-03T12:00:00Z.
    pub(crate) fn fixed() -> Self {
        Self::new(
            Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0)
                .unwrap()
                .timestamp_millis(),
        )
    }

    pub(crate) fn advance(&self, duration: Duration) {
        self.now_ms
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// A producer returning a fixed set of samples and counting calls.
#[derive(Debug, Default)]
pub(crate) struct FixedProducer {
    samples: Vec<Sample>,
    calls: AtomicUsize,
}

impl FixedProducer {
    pub(crate) fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SampleProducer for FixedProducer {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn authenticate(&self) -> Result<bool, AirMetricsError> {
        Ok(true)
    }

    async fn produce(
        &self,
        _bounds: &BoundingBox,
        _range: &DateRange,
        _filters: Option<&Filters>,
    ) -> Result<Vec<Sample>, AirMetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.samples.clone())
    }
}

/// A producer that always fails.
#[derive(Debug, Default)]
pub(crate) struct FailingProducer {}

#[async_trait]
impl SampleProducer for FailingProducer {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn authenticate(&self) -> Result<bool, AirMetricsError> {
        Ok(false)
    }

    async fn produce(
        &self,
        _bounds: &BoundingBox,
        _range: &DateRange,
        _filters: Option<&Filters>,
    ) -> Result<Vec<Sample>, AirMetricsError> {
        Err(AirMetricsError::ProducerStatus { status: 503 })
    }
}

/// A producer that never answers within any reasonable timeout.
#[derive(Debug, Default)]
pub(crate) struct StalledProducer {}

#[async_trait]
impl SampleProducer for StalledProducer {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn authenticate(&self) -> Result<bool, AirMetricsError> {
        Ok(true)
    }

    async fn produce(
        &self,
        _bounds: &BoundingBox,
        _range: &DateRange,
        _filters: Option<&Filters>,
    ) -> Result<Vec<Sample>, AirMetricsError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![])
    }
}
