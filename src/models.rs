//! Data types and associated functions and methods

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::Display;
use validator::{Validate, ValidationError};

/// Longest date range a request may span, in days.
pub const MAX_RANGE_DAYS: i64 = 366;

/// Largest number of extra filters a request may carry.
pub const MAX_FILTERS: usize = 32;

/// Largest radius accepted for a subset request, in kilometres.
pub const MAX_SUBSET_RADIUS_KM: f64 = 500.0;

/// Extra request filters, forwarded verbatim to the producer.
pub type Filters = BTreeMap<String, serde_json::Value>;

/// A single geo-tagged observation
///
/// Samples are produced by a [SampleProducer](crate::producer::SampleProducer) and discarded once
/// aggregated.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Sample {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Measured value. A `null` on the wire becomes NaN and the sample is treated as malformed.
    #[serde(deserialize_with = "nullable_value")]
    pub value: f64,
    /// Instant of the observation
    pub timestamp: DateTime<Utc>,
    /// Whether the producer considers the measurement reliable
    #[serde(
        default = "default_quality_flag",
        alias = "qualityFlag",
        deserialize_with = "flag_from_bool_or_int"
    )]
    pub quality_flag: bool,
}

impl Sample {
    /// Return a new Sample with a good quality flag.
    pub fn new(latitude: f64, longitude: f64, value: f64, timestamp: DateTime<Utc>) -> Self {
        Sample {
            latitude,
            longitude,
            value,
            timestamp,
            quality_flag: true,
        }
    }

    /// Returns true if the value is finite and the coordinates are finite and in range.
    pub fn is_well_formed(&self) -> bool {
        self.value.is_finite() && valid_latitude(self.latitude) && valid_longitude(self.longitude)
    }
}

fn default_quality_flag() -> bool {
    true
}

fn nullable_value<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

fn flag_from_bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(flag) => flag,
        Flag::Int(flag) => flag != 0,
    })
}

fn valid_latitude(latitude: f64) -> bool {
    latitude.is_finite() && (-90.0..=90.0).contains(&latitude)
}

fn valid_longitude(longitude: f64) -> bool {
    longitude.is_finite() && (-180.0..=180.0).contains(&longitude)
}

/// A rectangular geographic region in degrees
///
/// There is no constraint on the relative order of `east` and `west`. Containment is tested
/// literally as `west <= longitude <= east`, so boxes crossing the antimeridian match nothing.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_bounds"))]
pub struct BoundingBox {
    /// Northern latitude limit
    pub north: f64,
    /// Southern latitude limit
    pub south: f64,
    /// Eastern longitude limit
    pub east: f64,
    /// Western longitude limit
    pub west: f64,
}

impl BoundingBox {
    /// Return a new BoundingBox object.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        BoundingBox {
            north,
            south,
            east,
            west,
        }
    }

    /// Return a box of `radius` degrees around a point, clamped to valid coordinates.
    pub fn around(latitude: f64, longitude: f64, radius: f64) -> Self {
        BoundingBox {
            north: (latitude + radius).min(90.0),
            south: (latitude - radius).max(-90.0),
            east: (longitude + radius).min(180.0),
            west: (longitude - radius).max(-180.0),
        }
    }

    /// Returns true if the point lies within the box. Bounds are inclusive.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.south
            && latitude <= self.north
            && longitude >= self.west
            && longitude <= self.east
    }
}

/// Validate a bounding box
fn validate_bounds(bounds: &BoundingBox) -> Result<(), ValidationError> {
    if !(valid_latitude(bounds.north) && valid_latitude(bounds.south)) {
        let mut error = ValidationError::new("Bounds latitudes must be finite and within [-90, 90]");
        error.add_param("north".into(), &bounds.north);
        error.add_param("south".into(), &bounds.south);
        return Err(error);
    }
    if !(valid_longitude(bounds.east) && valid_longitude(bounds.west)) {
        let mut error =
            ValidationError::new("Bounds longitudes must be finite and within [-180, 180]");
        error.add_param("east".into(), &bounds.east);
        error.add_param("west".into(), &bounds.west);
        return Err(error);
    }
    if bounds.north <= bounds.south {
        let mut error = ValidationError::new("Bounds north must be greater than south");
        error.add_param("north".into(), &bounds.north);
        error.add_param("south".into(), &bounds.south);
        return Err(error);
    }
    Ok(())
}

/// An optional range of instants
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DateRange {
    /// Start of the range
    pub start: Option<DateTime<Utc>>,
    /// End of the range
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Return a new DateRange object.
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        DateRange { start, end }
    }

    /// Fill in missing limits.
    ///
    /// The end defaults to `now` and the start defaults to one day before the end.
    pub fn resolve(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.end.unwrap_or(now);
        let start = self.start.unwrap_or(end - Duration::days(1));
        (start, end)
    }

    /// Fill in missing limits and check the span of the resolved range.
    ///
    /// A range with only a start is open until `now`, so its span is only known here.
    pub fn resolve_bounded(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), ValidationError> {
        let (start, end) = self.resolve(now);
        validate_span(&start, &end)?;
        Ok((start, end))
    }
}

/// Validate that a range does not exceed the maximum span
fn validate_span(start: &DateTime<Utc>, end: &DateTime<Utc>) -> Result<(), ValidationError> {
    let days = (*end - *start).num_days();
    if days > MAX_RANGE_DAYS {
        let mut error = ValidationError::new("Date range must not exceed the maximum span");
        error.add_param("days".into(), &days);
        error.add_param("max_days".into(), &MAX_RANGE_DAYS);
        return Err(error);
    }
    Ok(())
}

/// Validate a pair of optional start and end instants
fn validate_date_range(
    start: &Option<DateTime<Utc>>,
    end: &Option<DateTime<Utc>>,
) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            let mut error = ValidationError::new("Date range start must not be after end");
            error.add_param("start".into(), &start.to_rfc3339());
            error.add_param("end".into(), &end.to_rfc3339());
            return Err(error);
        }
        validate_span(start, end)?;
    }
    Ok(())
}

/// Validate extra filters
fn validate_filters(filters: &Filters) -> Result<(), ValidationError> {
    if filters.len() > MAX_FILTERS {
        let mut error = ValidationError::new("Too many filters");
        error.add_param("filters".into(), &filters.len());
        error.add_param("max_filters".into(), &MAX_FILTERS);
        return Err(error);
    }
    if filters.keys().any(|key| key.is_empty()) {
        return Err(ValidationError::new("Filter names must not be empty"));
    }
    if filters
        .values()
        .any(|value| value.is_array() || value.is_object() || value.is_null())
    {
        return Err(ValidationError::new(
            "Filter values must be strings, numbers or booleans",
        ));
    }
    Ok(())
}

/// Request data for aggregations
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_request_data"))]
pub struct RequestData {
    /// Region to aggregate over
    #[validate]
    pub bounds: BoundingBox,
    /// Start of the date range
    pub start: Option<DateTime<Utc>>,
    /// End of the date range
    pub end: Option<DateTime<Utc>>,
    /// Extra producer filters
    #[validate(custom = "validate_filters")]
    pub filters: Option<Filters>,
}

impl RequestData {
    /// Returns the requested date range.
    pub fn range(&self) -> DateRange {
        DateRange::new(self.start, self.end)
    }
}

/// Validate request data
fn validate_request_data(request_data: &RequestData) -> Result<(), ValidationError> {
    validate_date_range(&request_data.start, &request_data.end)
}

/// Request data for a batch of spatial aggregations
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BatchRequestData {
    /// Individual requests, answered in order
    #[validate]
    #[validate(length(min = 1, max = 100, message = "requests length must be between 1 and 100"))]
    pub requests: Vec<RequestData>,
}

/// Request data for a subset of samples around a point
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_subset_request"))]
pub struct SubsetRequest {
    /// Latitude of the centre point
    pub latitude: f64,
    /// Longitude of the centre point
    pub longitude: f64,
    /// Radius in kilometres
    pub radius_km: Option<f64>,
    /// Start of the date range
    pub start: Option<DateTime<Utc>>,
    /// End of the date range
    pub end: Option<DateTime<Utc>>,
}

impl SubsetRequest {
    /// Returns the requested date range.
    pub fn range(&self) -> DateRange {
        DateRange::new(self.start, self.end)
    }
}

/// Validate a subset request
fn validate_subset_request(request: &SubsetRequest) -> Result<(), ValidationError> {
    if !valid_latitude(request.latitude) || !valid_longitude(request.longitude) {
        let mut error = ValidationError::new("Subset centre must be a valid coordinate");
        error.add_param("latitude".into(), &request.latitude);
        error.add_param("longitude".into(), &request.longitude);
        return Err(error);
    }
    if let Some(radius) = request.radius_km {
        if !(radius > 0.0 && radius <= MAX_SUBSET_RADIUS_KM) {
            let mut error = ValidationError::new("Subset radius must be positive and bounded");
            error.add_param("radius_km".into(), &radius);
            error.add_param("max_radius_km".into(), &MAX_SUBSET_RADIUS_KM);
            return Err(error);
        }
    }
    validate_date_range(&request.start, &request.end)
}

/// Quality classification of a location mean
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

/// Statistics for one rounded location
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LocationStat {
    /// Rounded latitude of the bucket
    pub latitude: f64,
    /// Rounded longitude of the bucket
    pub longitude: f64,
    /// Arithmetic mean of the bucket's values
    pub mean: f64,
    /// Coefficient of variation of the bucket's values
    pub variability: f64,
    /// Tier derived from the mean
    pub quality_tier: QualityTier,
    /// Number of samples in the bucket
    pub sample_count: usize,
}

/// Statistics for one UTC calendar day
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub date: NaiveDate,
    pub mean: f64,
    pub sample_count: usize,
}

/// Result of a spatial aggregation
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SpatialSummary {
    /// Location statistics keyed by bucket key
    pub buckets: BTreeMap<String, LocationStat>,
    /// Number of samples aggregated
    pub sample_count: usize,
    /// Number of malformed samples excluded
    pub excluded: usize,
}

/// Result of a temporal aggregation
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TemporalSummary {
    /// Daily statistics in ascending date order. Days without samples are omitted.
    pub series: Vec<TimeSeriesPoint>,
    /// Number of samples aggregated
    pub sample_count: usize,
    /// Number of malformed samples excluded
    pub excluded: usize,
    /// Number of well-formed samples outside the bounding box
    pub outside_bounds: usize,
}

/// Samples near a point
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SubsetResponse {
    pub samples: Vec<Sample>,
    pub excluded: usize,
    pub degraded: bool,
}

/// Statistics of both request caches
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct CacheReport {
    pub spatial: crate::cache::CacheStats,
    pub temporal: crate::cache::CacheStats,
}

/// The configured producer and whether it accepts our credentials
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProducerInfo {
    pub name: String,
    pub authenticated: bool,
}

/// Response containing the result of an aggregation and how it was obtained.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Response<T> {
    /// Aggregation result
    #[serde(flatten)]
    pub summary: T,
    /// True if the producer failed and the result is empty
    pub degraded: bool,
    /// True if the result was served from the cache
    pub cached: bool,
}

impl<T: Default> Response<T> {
    /// Return a Response for a freshly computed result.
    pub fn fresh(summary: T) -> Self {
        Response {
            summary,
            degraded: false,
            cached: false,
        }
    }

    /// Return a Response for a cached result.
    pub fn cached(summary: T) -> Self {
        Response {
            summary,
            degraded: false,
            cached: true,
        }
    }

    /// Return an empty Response after a producer failure.
    pub fn degraded() -> Self {
        Response {
            summary: T::default(),
            degraded: true,
            cached: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;
    use chrono::TimeZone;
    use serde_test::{assert_de_tokens, assert_de_tokens_error, Token};

    // The following tests use serde_test to validate the correct function of the deserialiser.
    // The validations are also tested.

    fn bounds_tokens() -> Vec<Token> {
        vec![
            Token::Str("bounds"),
            Token::Struct {
                name: "BoundingBox",
                len: 4,
            },
            Token::Str("north"),
            Token::F64(-15.0),
            Token::Str("south"),
            Token::F64(-16.0),
            Token::Str("east"),
            Token::F64(-55.0),
            Token::Str("west"),
            Token::F64(-57.0),
            Token::StructEnd,
        ]
    }

    #[test]
    fn test_required_fields() {
        let request_data = test_utils::get_test_request_data();
        let mut tokens = vec![Token::Struct {
            name: "RequestData",
            len: 1,
        }];
        tokens.extend(bounds_tokens());
        tokens.push(Token::StructEnd);
        assert_de_tokens(&request_data, &tokens);
        request_data.validate().unwrap()
    }

    #[test]
    fn test_optional_fields() {
        let request_data = test_utils::get_test_request_data_optional();
        let mut tokens = vec![Token::Struct {
            name: "RequestData",
            len: 4,
        }];
        tokens.extend(bounds_tokens());
        tokens.extend([
            Token::Str("start"),
            Token::Some,
            Token::Str("2024-05-01T00:00:00Z"),
            Token::Str("end"),
            Token::Some,
            Token::Str("2024-05-03T23:59:59Z"),
            Token::Str("filters"),
            Token::Some,
            Token::Map { len: Some(1) },
            Token::Str("product"),
            Token::Str("no2"),
            Token::MapEnd,
            Token::StructEnd,
        ]);
        assert_de_tokens(&request_data, &tokens);
        request_data.validate().unwrap()
    }

    #[test]
    fn test_missing_bounds() {
        assert_de_tokens_error::<RequestData>(
            &[
                Token::Struct {
                    name: "RequestData",
                    len: 0,
                },
                Token::StructEnd,
            ],
            "missing field `bounds`",
        )
    }

    #[test]
    fn test_unknown_field() {
        assert_de_tokens_error::<RequestData>(
            &[
                Token::Struct {
                    name: "RequestData",
                    len: 1,
                },
                Token::Str("foo"),
            ],
            "unknown field `foo`, expected one of `bounds`, `start`, `end`, `filters`",
        )
    }

    #[test]
    #[should_panic(expected = "Bounds north must be greater than south")]
    fn test_invalid_bounds_order() {
        let mut request_data = test_utils::get_test_request_data();
        request_data.bounds.north = -17.0;
        request_data.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "Bounds latitudes must be finite and within [-90, 90]")]
    fn test_invalid_bounds_latitude() {
        let mut request_data = test_utils::get_test_request_data();
        request_data.bounds.north = 91.0;
        request_data.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "Bounds longitudes must be finite and within [-180, 180]")]
    fn test_invalid_bounds_longitude_nan() {
        let mut request_data = test_utils::get_test_request_data();
        request_data.bounds.west = f64::NAN;
        request_data.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "Date range start must not be after end")]
    fn test_invalid_date_order() {
        let mut request_data = test_utils::get_test_request_data_optional();
        std::mem::swap(&mut request_data.start, &mut request_data.end);
        request_data.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "Date range must not exceed the maximum span")]
    fn test_invalid_date_span() {
        let mut request_data = test_utils::get_test_request_data_optional();
        request_data.start = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        request_data.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "Filter values must be strings, numbers or booleans")]
    fn test_invalid_filter_value() {
        let mut request_data = test_utils::get_test_request_data();
        let mut filters = Filters::new();
        filters.insert("layers".to_string(), serde_json::json!(["a", "b"]));
        request_data.filters = Some(filters);
        request_data.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "requests length must be between 1 and 100")]
    fn test_empty_batch() {
        let batch = BatchRequestData { requests: vec![] };
        batch.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "Subset radius must be positive and bounded")]
    fn test_invalid_subset_radius() {
        let request = SubsetRequest {
            latitude: -15.6,
            longitude: -56.1,
            radius_km: Some(0.0),
            start: None,
            end: None,
        };
        request.validate().unwrap()
    }

    #[test]
    fn test_sample_wire_format() {
        let sample: Sample = serde_json::from_str(
            r#"{"latitude": -15.6, "longitude": -56.1, "value": null,
                "timestamp": "2024-05-01T10:00:00Z", "qualityFlag": 0}"#,
        )
        .unwrap();
        assert!(sample.value.is_nan());
        assert!(!sample.quality_flag);
        assert!(!sample.is_well_formed());

        let sample: Sample = serde_json::from_str(
            r#"{"latitude": -15.6, "longitude": -56.1, "value": 0.3,
                "timestamp": "2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(sample.quality_flag);
        assert!(sample.is_well_formed());
    }

    #[test]
    fn test_sample_out_of_range() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert!(!Sample::new(95.0, 0.0, 1.0, timestamp).is_well_formed());
        assert!(!Sample::new(0.0, -181.0, 1.0, timestamp).is_well_formed());
        assert!(!Sample::new(0.0, 0.0, f64::INFINITY, timestamp).is_well_formed());
    }

    #[test]
    fn test_bounds_contains_inclusive() {
        let bounds = BoundingBox::new(10.0, 0.0, 20.0, 5.0);
        assert!(bounds.contains(10.0, 12.0));
        assert!(bounds.contains(0.0, 5.0));
        assert!(bounds.contains(5.0, 20.0));
        assert!(!bounds.contains(11.0, 12.0));
        assert!(!bounds.contains(5.0, 21.0));
    }

    #[test]
    fn test_bounds_around_clamps() {
        let bounds = BoundingBox::around(89.95, 179.95, 0.1);
        assert_eq!(90.0, bounds.north);
        assert_eq!(180.0, bounds.east);
        assert!((bounds.south - 89.85).abs() < 1e-9);
        assert!((bounds.west - 179.85).abs() < 1e-9);
    }

    #[test]
    fn test_date_range_resolve() {
        let now = Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap();
        let (start, end) = DateRange::default().resolve(now);
        assert_eq!(now, end);
        assert_eq!(Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(), start);
    }

    #[test]
    fn test_start_only_range_passes_schema_but_not_span() {
        let mut request_data = test_utils::get_test_request_data();
        request_data.start = Some(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
        request_data.validate().unwrap();

        let now = Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap();
        let error = request_data.range().resolve_bounded(now).unwrap_err();
        assert_eq!("Date range must not exceed the maximum span", error.code);
    }

    #[test]
    fn test_resolve_bounded_accepts_open_ranges() {
        let now = Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap();
        // End only: the start defaults to one day before the end.
        let end = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let (start, resolved_end) = DateRange::new(None, Some(end))
            .resolve_bounded(now)
            .unwrap();
        assert_eq!(end, resolved_end);
        assert_eq!(Utc.with_ymd_and_hms(2019, 12, 31, 0, 0, 0).unwrap(), start);

        // Start only, within the maximum span of now.
        let start = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let (resolved_start, end) = DateRange::new(Some(start), None)
            .resolve_bounded(now)
            .unwrap();
        assert_eq!(start, resolved_start);
        assert_eq!(now, end);
    }

    #[test]
    fn test_response_flattens_summary() {
        let response = Response::cached(TemporalSummary::default());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            serde_json::json!({
                "series": [],
                "sample_count": 0,
                "excluded": 0,
                "outside_bounds": 0,
                "degraded": false,
                "cached": true,
            }),
            json
        );
    }
}
