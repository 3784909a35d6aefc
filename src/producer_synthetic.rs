use crate::cache::Clock;
use crate::error::AirMetricsError;
use crate::models::{BoundingBox, DateRange, Filters, Sample};
use crate::producer::SampleProducer;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

/// Hours (UTC) of the daytime scans produced for each day.
pub const SCAN_HOURS: [u32; 4] = [10, 12, 14, 16];

/// Deterministic sample producer.
///
/// Produces a `grid` x `grid` lattice of samples at the centre of each cell of the requested box,
/// for each scan hour of each day in the range. Values are a pure function of position and time,
/// between 0.1 and 0.7. Every tenth sample carries a bad quality flag.
#[derive(Debug)]
pub struct SyntheticProducer {
    clock: Arc<dyn Clock>,
    grid: usize,
}

impl SyntheticProducer {
    /// Create a new synthetic producer.
    ///
    /// # Arguments
    ///
    /// * `clock`: Clock used to resolve ranges without an end
    /// * `grid`: Number of cells along each side of the box
    pub fn new(clock: Arc<dyn Clock>, grid: usize) -> Self {
        Self {
            clock,
            grid: grid.max(1),
        }
    }
}

/// Value of the synthetic field at a position and time.
fn field_value(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> f64 {
    let hours = (timestamp.timestamp() / 3600) as f64;
    0.4 + 0.3 * (latitude * 0.7 + longitude * 1.3 + hours * 0.26).sin()
}

#[async_trait]
impl SampleProducer for SyntheticProducer {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn authenticate(&self) -> Result<bool, AirMetricsError> {
        Ok(true)
    }

    #[tracing::instrument(level = "DEBUG", skip(self, _filters))]
    async fn produce(
        &self,
        bounds: &BoundingBox,
        range: &DateRange,
        _filters: Option<&Filters>,
    ) -> Result<Vec<Sample>, AirMetricsError> {
        let (start, end) = range.resolve(self.clock.now());
        let grid = self.grid;
        let cell_latitude = (bounds.north - bounds.south) / grid as f64;
        let cell_longitude = (bounds.east - bounds.west) / grid as f64;

        let mut samples = Vec::new();
        let mut index: usize = 0;
        for day in start.date_naive().iter_days() {
            if day > end.date_naive() {
                break;
            }
            for hour in SCAN_HOURS {
                let Some(naive) = day.and_hms_opt(hour, 0, 0) else {
                    continue;
                };
                let timestamp = Utc.from_utc_datetime(&naive);
                if timestamp < start || timestamp > end {
                    continue;
                }
                for row in 0..grid {
                    let latitude = bounds.south + cell_latitude * (row as f64 + 0.5);
                    for column in 0..grid {
                        let longitude = bounds.west + cell_longitude * (column as f64 + 0.5);
                        let mut sample = Sample::new(
                            latitude,
                            longitude,
                            field_value(latitude, longitude, timestamp),
                            timestamp,
                        );
                        sample.quality_flag = index % 10 != 9;
                        index += 1;
                        samples.push(sample);
                    }
                }
            }
        }
        tracing::debug!("produced {} synthetic samples", samples.len());
        Ok(samples)
    }
}
