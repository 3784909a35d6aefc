//! Aggregation operation contract and configuration.

use crate::models::{self, QualityTier};

/// Thresholds used to classify a location mean.
///
/// The defaults suit column densities in the 0 to 1 range. Other value scales need their own
/// thresholds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityThresholds {
    /// Means strictly above this are [QualityTier::High]
    pub high: f64,
    /// Means strictly above this (and not high) are [QualityTier::Medium]
    pub medium: f64,
}

impl QualityThresholds {
    /// Classify a mean.
    pub fn classify(&self, mean: f64) -> QualityTier {
        if mean > self.high {
            QualityTier::High
        } else if mean > self.medium {
            QualityTier::Medium
        } else {
            QualityTier::Low
        }
    }
}

impl Default for QualityThresholds {
    fn default() -> Self {
        QualityThresholds {
            high: 0.8,
            medium: 0.5,
        }
    }
}

/// Configuration shared by all aggregations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AggregationConfig {
    /// Number of decimal places coordinates are rounded to when bucketing
    pub precision: u32,
    /// Quality tier thresholds
    pub thresholds: QualityThresholds,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            precision: 2,
            thresholds: QualityThresholds::default(),
        }
    }
}

/// Trait for aggregation operations.
///
/// This forms the contract between the access service and the aggregators. Implementations must
/// be total: malformed samples are excluded and counted, never reported as errors.
pub trait Operation {
    /// Name of the operation, used for cache namespaces, logs and metrics.
    const NAME: &'static str;

    /// Result of the operation.
    type Output: Clone + Default + Send + 'static;

    /// Execute the operation.
    ///
    /// # Arguments
    ///
    /// * `config`: Aggregation configuration
    /// * `request_data`: RequestData object for the request
    /// * `samples`: Samples supplied by the producer
    fn execute(
        config: &AggregationConfig,
        request_data: &models::RequestData,
        samples: &[models::Sample],
    ) -> Self::Output;
}
