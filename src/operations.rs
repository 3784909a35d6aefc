//! Aggregation operations.
//!
//! Each operation is implemented as a struct that implements the
//! [Operation](crate::operation::Operation) trait.

use std::collections::BTreeMap;

use crate::models::{self, LocationStat, Sample, SpatialSummary, TemporalSummary, TimeSeriesPoint};
use crate::operation::{AggregationConfig, Operation};

use chrono::NaiveDate;
use hashbrown::HashMap;
use ndarray::Array1;

/// Round a coordinate to `precision` decimal places.
fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10_f64.powi(precision as i32);
    // Adding zero turns a rounded -0.0 into 0.0 so both share a bucket.
    (value * factor).round() / factor + 0.0
}

/// Returns the bucket key for rounded coordinates.
///
/// # Arguments
///
/// * `latitude`: Rounded latitude
/// * `longitude`: Rounded longitude
/// * `precision`: Number of decimal places
pub fn bucket_key(latitude: f64, longitude: f64, precision: u32) -> String {
    let precision = precision as usize;
    format!("{:.*},{:.*}", precision, latitude, precision, longitude)
}

/// Returns the mean and coefficient of variation of a non-empty set of values.
///
/// The coefficient of variation is the population standard deviation divided by the mean. It is
/// zero for fewer than two values and for a zero mean.
fn mean_and_variability(values: Vec<f64>) -> (f64, f64) {
    let array = Array1::from(values);
    let mean = array.mean().unwrap_or(0.0);
    if array.len() < 2 || mean == 0.0 {
        return (mean, 0.0);
    }
    (mean, array.std(0.0) / mean)
}

/// Split samples into well-formed samples and a count of malformed ones.
fn well_formed(samples: &[Sample]) -> (Vec<&Sample>, usize) {
    let valid: Vec<&Sample> = samples.iter().filter(|s| s.is_well_formed()).collect();
    let excluded = samples.len() - valid.len();
    (valid, excluded)
}

/// Reduce samples to one statistic per rounded location.
pub struct Spatial {}

impl Operation for Spatial {
    const NAME: &'static str = "spatial";
    type Output = SpatialSummary;

    fn execute(
        config: &AggregationConfig,
        _request_data: &models::RequestData,
        samples: &[Sample],
    ) -> SpatialSummary {
        let (valid, excluded) = well_formed(samples);

        let mut groups: HashMap<String, (f64, f64, Vec<f64>)> = HashMap::new();
        for sample in &valid {
            let latitude = round_to(sample.latitude, config.precision);
            let longitude = round_to(sample.longitude, config.precision);
            let key = bucket_key(latitude, longitude, config.precision);
            groups
                .entry(key)
                .or_insert_with(|| (latitude, longitude, Vec::new()))
                .2
                .push(sample.value);
        }

        let buckets: BTreeMap<String, LocationStat> = groups
            .into_iter()
            .map(|(key, (latitude, longitude, values))| {
                let sample_count = values.len();
                let (mean, variability) = mean_and_variability(values);
                let stat = LocationStat {
                    latitude,
                    longitude,
                    mean,
                    variability,
                    quality_tier: config.thresholds.classify(mean),
                    sample_count,
                };
                (key, stat)
            })
            .collect();

        SpatialSummary {
            buckets,
            sample_count: valid.len(),
            excluded,
        }
    }
}

/// Reduce samples inside the requested bounds to a daily time series.
pub struct Temporal {}

impl Operation for Temporal {
    const NAME: &'static str = "temporal";
    type Output = TemporalSummary;

    fn execute(
        _config: &AggregationConfig,
        request_data: &models::RequestData,
        samples: &[Sample],
    ) -> TemporalSummary {
        let (valid, excluded) = well_formed(samples);

        let bounds = &request_data.bounds;
        let mut outside_bounds = 0;
        // BTreeMap keeps the days in ascending order.
        let mut days: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
        for sample in valid {
            if !bounds.contains(sample.latitude, sample.longitude) {
                outside_bounds += 1;
                continue;
            }
            days.entry(sample.timestamp.date_naive())
                .or_default()
                .push(sample.value);
        }

        let series: Vec<TimeSeriesPoint> = days
            .into_iter()
            .map(|(date, values)| {
                let sample_count = values.len();
                let (mean, _) = mean_and_variability(values);
                TimeSeriesPoint {
                    date,
                    mean,
                    sample_count,
                }
            })
            .collect();
        let sample_count = series.iter().map(|point| point.sample_count).sum();

        TemporalSummary {
            series,
            sample_count,
            excluded,
            outside_bounds,
        }
    }
}
