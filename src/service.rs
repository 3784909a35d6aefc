//! Access service
//!
//! Answers aggregation requests by consulting the request cache, fetching samples from the
//! producer on a miss and aggregating them. Producer failures never escape this module: the
//! caller receives an empty result marked as degraded, which is not cached.

use crate::app_state::{AppState, SharedAppState};
use crate::cache::{request_key, Clock, RequestCache};
use crate::error::AirMetricsError;
use crate::metrics::{EXCLUDED_SAMPLES, PRODUCER_FAILURES};
use crate::models::{
    BoundingBox, DateRange, Filters, RequestData, Response, Sample, SpatialSummary,
    SubsetRequest, SubsetResponse, TemporalSummary,
};
use crate::operation::Operation;
use crate::operations::{Spatial, Temporal};

use std::error::Error;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Radius used for subset requests that do not give one, in kilometres.
pub const DEFAULT_SUBSET_RADIUS_KM: f64 = 50.0;

/// Mean radius of the Earth in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Length of a degree of latitude in kilometres.
const KM_PER_DEGREE: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;

/// An operation whose results are cached in the application state.
pub trait CachedOperation: Operation + 'static {
    /// The cache holding results of this operation.
    fn cache(state: &AppState) -> &RequestCache<Self::Output>;

    /// Number of malformed samples excluded while producing `output`.
    fn excluded(output: &Self::Output) -> usize;
}

impl CachedOperation for Spatial {
    fn cache(state: &AppState) -> &RequestCache<SpatialSummary> {
        &state.spatial_cache
    }

    fn excluded(output: &SpatialSummary) -> usize {
        output.excluded
    }
}

impl CachedOperation for Temporal {
    fn cache(state: &AppState) -> &RequestCache<TemporalSummary> {
        &state.temporal_cache
    }

    fn excluded(output: &TemporalSummary) -> usize {
        output.excluded
    }
}

/// Per-location statistics for a request.
pub async fn spatial(
    state: &AppState,
    request_data: RequestData,
) -> Result<Response<SpatialSummary>, AirMetricsError> {
    run::<Spatial>(state, request_data).await
}

/// Daily time series for a request.
pub async fn temporal(
    state: &AppState,
    request_data: RequestData,
) -> Result<Response<TemporalSummary>, AirMetricsError> {
    run::<Temporal>(state, request_data).await
}

/// Answer a request for operation `Op`.
///
/// # Arguments
///
/// * `state`: Shared application state
/// * `request_data`: Validated request data
#[tracing::instrument(level = "DEBUG", skip(state))]
pub async fn run<Op: CachedOperation>(
    state: &AppState,
    request_data: RequestData,
) -> Result<Response<Op::Output>, AirMetricsError> {
    let key = request_key(Op::NAME, &request_data)?;
    if let Some(summary) = Op::cache(state).get(&key) {
        tracing::debug!(operation = Op::NAME, key = %key, "cache hit");
        return Ok(Response::cached(summary));
    }

    let range = bounded_range(state, &request_data.range())?;
    let samples = match fetch(
        state,
        &request_data.bounds,
        &range,
        request_data.filters.as_ref(),
    )
    .await
    {
        Ok(samples) => samples,
        Err(error) => {
            degrade(state, Op::NAME, &error);
            return Ok(Response::degraded());
        }
    };

    let summary = aggregate::<Op>(state, request_data, samples).await?;
    let excluded = Op::excluded(&summary);
    if excluded > 0 {
        EXCLUDED_SAMPLES
            .with_label_values(&[Op::NAME])
            .inc_by(u64::try_from(excluded)?);
        tracing::debug!(operation = Op::NAME, excluded, "excluded malformed samples");
    }
    Op::cache(state).set(key, summary.clone());
    Ok(Response::fresh(summary))
}

/// Resolve a requested range against the state clock, rejecting spans that are too long.
///
/// Returns the resolved range so that the producer sees the same limits that were checked.
fn bounded_range(state: &AppState, range: &DateRange) -> Result<DateRange, AirMetricsError> {
    let (start, end) = range.resolve_bounded(state.clock.now())?;
    Ok(DateRange::new(Some(start), Some(end)))
}

/// Request samples from the producer, bounded by the connection limit and the producer timeout.
async fn fetch(
    state: &AppState,
    bounds: &BoundingBox,
    range: &DateRange,
    filters: Option<&Filters>,
) -> Result<Vec<Sample>, AirMetricsError> {
    // Acquire connection permit to be freed via drop when this function returns
    let _conn_permit = state.resource_manager.connection().await?;
    let millis = state.args.producer_timeout_ms;
    tokio::time::timeout(
        Duration::from_millis(millis),
        state.producer.produce(bounds, range, filters),
    )
    .await
    .map_err(|_| AirMetricsError::ProducerTimeout { millis })?
}

/// Record a producer failure.
fn degrade(state: &AppState, operation: &str, error: &AirMetricsError) {
    let producer = state.producer.name();
    PRODUCER_FAILURES
        .with_label_values(&[producer, error.producer_failure_reason()])
        .inc();
    tracing::warn!(
        operation,
        producer,
        "producer failed, returning degraded result: {}",
        error
    );
    let mut current = error.source();
    while let Some(source) = current {
        tracing::warn!("Caused by: {}", source);
        current = source.source();
    }
}

/// Run an aggregation, on the Rayon pool if configured.
async fn aggregate<Op: Operation + 'static>(
    state: &AppState,
    request_data: RequestData,
    samples: Vec<Sample>,
) -> Result<Op::Output, AirMetricsError> {
    // Acquire a task permit to be freed via drop when this function returns
    let _task_permit = state.resource_manager.task().await?;
    let config = state.aggregation;
    if state.args.use_rayon {
        Ok(tokio_rayon::spawn(move || Op::execute(&config, &request_data, &samples)).await)
    } else {
        Ok(Op::execute(&config, &request_data, &samples))
    }
}

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(latitude1: f64, longitude1: f64, latitude2: f64, longitude2: f64) -> f64 {
    let dlat = (latitude2 - latitude1).to_radians();
    let dlon = (longitude2 - longitude1).to_radians();
    let latitude1 = latitude1.to_radians();
    let latitude2 = latitude2.to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + latitude1.cos() * latitude2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Well-formed samples within a radius of a point.
///
/// The producer is asked for a box enclosing the circle; samples are then filtered by
/// great-circle distance. Results are not cached.
#[tracing::instrument(level = "DEBUG", skip(state))]
pub async fn subset(
    state: &AppState,
    request: SubsetRequest,
) -> Result<SubsetResponse, AirMetricsError> {
    let radius_km = request.radius_km.unwrap_or(DEFAULT_SUBSET_RADIUS_KM);
    // A degree of longitude shrinks with latitude; widen the box to cover the circle.
    let cos_latitude = request.latitude.to_radians().cos().max(0.01);
    let radius_deg = radius_km / KM_PER_DEGREE / cos_latitude;
    let bounds = BoundingBox::around(request.latitude, request.longitude, radius_deg);

    let range = bounded_range(state, &request.range())?;
    let samples = match fetch(state, &bounds, &range, None).await {
        Ok(samples) => samples,
        Err(error) => {
            degrade(state, "subset", &error);
            return Ok(SubsetResponse {
                degraded: true,
                ..Default::default()
            });
        }
    };

    let total = samples.len();
    let (valid, malformed): (Vec<Sample>, Vec<Sample>) =
        samples.into_iter().partition(Sample::is_well_formed);
    let samples: Vec<Sample> = valid
        .into_iter()
        .filter(|sample| {
            haversine_km(
                request.latitude,
                request.longitude,
                sample.latitude,
                sample.longitude,
            ) <= radius_km
        })
        .collect();
    tracing::debug!(total, selected = samples.len(), "selected samples in radius");

    Ok(SubsetResponse {
        samples,
        excluded: malformed.len(),
        degraded: false,
    })
}

/// Answer several spatial requests.
///
/// Requests are run concurrently in groups of the configured batch size, with the configured
/// delay between groups. Responses are returned in request order.
#[tracing::instrument(level = "DEBUG", skip_all, fields(requests = requests.len()))]
pub async fn spatial_batch(
    state: &SharedAppState,
    requests: Vec<RequestData>,
) -> Result<Vec<Response<SpatialSummary>>, AirMetricsError> {
    let batch_size = usize::try_from(state.args.batch_size)?.max(1);
    let delay = Duration::from_millis(state.args.batch_delay_ms);

    let mut responses = Vec::with_capacity(requests.len());
    let mut requests = requests.into_iter().peekable();
    let mut first = true;
    while requests.peek().is_some() {
        if !first {
            tokio::time::sleep(delay).await;
        }
        first = false;

        let handles: Vec<JoinHandle<Result<Response<SpatialSummary>, AirMetricsError>>> = requests
            .by_ref()
            .take(batch_size)
            .map(|request_data| {
                let state = state.clone();
                tokio::spawn(async move { spatial(&state, request_data).await })
            })
            .collect();
        // Await the whole group before reporting a failure.
        let mut failure = None;
        for handle in handles {
            match handle.await.map_err(AirMetricsError::from).and_then(|result| result) {
                Ok(response) => responses.push(response),
                Err(error) if failure.is_none() => failure = Some(error),
                Err(error) => tracing::warn!("further batch request failed: {}", error),
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }
    }
    Ok(responses)
}
