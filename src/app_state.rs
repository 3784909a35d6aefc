use crate::cache::{Clock, RequestCache, SystemClock};
use crate::cli::CommandLineArgs;
use crate::error::AirMetricsError;
use crate::models::{SpatialSummary, TemporalSummary};
use crate::operation::{AggregationConfig, Operation, QualityThresholds};
use crate::operations::{Spatial, Temporal};
use crate::producer::{self, SampleProducer};
use crate::resource_manager::ResourceManager;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Shared application state passed to each request handler.
#[derive(Debug)]
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Resource manager.
    pub resource_manager: ResourceManager,

    /// Source of samples.
    pub producer: Arc<dyn SampleProducer>,

    /// Bucketing precision and quality thresholds.
    pub aggregation: AggregationConfig,

    /// Cache of spatial aggregation results.
    pub spatial_cache: RequestCache<SpatialSummary>,

    /// Cache of temporal aggregation results.
    pub temporal_cache: RequestCache<TemporalSummary>,

    /// Clock shared by the caches and the producer.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Create and return an [AppState] using the producer selected on the command line.
    pub fn new(args: &CommandLineArgs) -> Result<Self, AirMetricsError> {
        if args.quality_high < args.quality_medium {
            return Err(AirMetricsError::QualityThresholds {
                high: args.quality_high,
                medium: args.quality_medium,
            });
        }
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::default());
        let producer = producer::build(args, clock.clone())?;
        Ok(Self::with_producer(args, producer, clock))
    }

    /// Create and return an [AppState] with a given producer and clock.
    pub fn with_producer(
        args: &CommandLineArgs,
        producer: Arc<dyn SampleProducer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let task_limit = args
            .thread_limit
            .or_else(|| Some(num_cpus::get().saturating_sub(1).max(1)));
        let resource_manager = ResourceManager::new(args.connection_limit, task_limit);
        let aggregation = AggregationConfig {
            precision: args.precision,
            thresholds: QualityThresholds {
                high: args.quality_high,
                medium: args.quality_medium,
            },
        };
        let ttl = Duration::from_secs(args.cache_ttl);
        let spatial_cache =
            RequestCache::new(Spatial::NAME, args.cache_capacity, ttl, clock.clone());
        let temporal_cache =
            RequestCache::new(Temporal::NAME, args.cache_capacity, ttl, clock.clone());

        Self {
            args: args.clone(),
            resource_manager,
            producer,
            aggregation,
            spatial_cache,
            temporal_cache,
            clock,
        }
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;

/// Spawn a task that periodically removes expired entries from both caches.
pub fn spawn_cache_pruner(state: SharedAppState) -> JoinHandle<()> {
    let period = Duration::from_secs(state.args.cache_prune_interval.max(1));
    tokio::spawn(async move {
        tracing::info!("starting cache prune task every {:?}", period);
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let spatial = state.spatial_cache.prune();
            let temporal = state.temporal_cache.prune();
            if spatial + temporal > 0 {
                tracing::debug!(spatial, temporal, "pruned expired cache entries");
            }
        }
    })
}
