//! Interface to sample producers

use crate::cache::Clock;
use crate::cli::{CommandLineArgs, ProducerKind};
use crate::error::AirMetricsError;
use crate::models::{BoundingBox, DateRange, Filters, Sample};
use crate::producer_http::HttpProducer;
use crate::producer_synthetic::SyntheticProducer;

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// A source of samples for a region and date range.
///
/// Implementations may perform network I/O. Callers bound each call with a timeout, so
/// implementations need not.
#[async_trait]
pub trait SampleProducer: Debug + Send + Sync {
    /// Name of the producer, used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Are we authorised to request samples?
    ///
    /// Returns true if authorised, false otherwise.
    async fn authenticate(&self) -> Result<bool, AirMetricsError>;

    /// Return the samples within `bounds` and `range`.
    ///
    /// # Arguments
    ///
    /// * `bounds`: Region of interest
    /// * `range`: Date range. Missing limits are chosen by the producer.
    /// * `filters`: Extra producer-specific filters
    async fn produce(
        &self,
        bounds: &BoundingBox,
        range: &DateRange,
        filters: Option<&Filters>,
    ) -> Result<Vec<Sample>, AirMetricsError>;
}

/// Build the producer selected on the command line.
pub fn build(
    args: &CommandLineArgs,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SampleProducer>, AirMetricsError> {
    let producer: Arc<dyn SampleProducer> = match args.producer {
        ProducerKind::Synthetic => Arc::new(SyntheticProducer::new(clock, args.synthetic_grid)),
        ProducerKind::Http => {
            let url = args
                .producer_url
                .as_ref()
                .ok_or(AirMetricsError::ProducerUrlMissing)?;
            Arc::new(HttpProducer::new(
                url,
                args.producer_token.clone(),
                Duration::from_millis(args.producer_timeout_ms),
            )?)
        }
    };
    Ok(producer)
}
