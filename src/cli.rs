//! Command Line Interface (CLI) arguments.

use clap::{Parser, ValueEnum};
use url::Url;

/// Kind of sample producer to query.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProducerKind {
    /// Deterministic samples generated in-process
    Synthetic,
    /// Samples fetched from an HTTP API
    Http,
}

/// airmetrics command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "AIRMETRICS_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "AIRMETRICS_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "AIRMETRICS_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/airmetrics/certs/cert.pem",
        env = "AIRMETRICS_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/airmetrics/certs/key.pem",
        env = "AIRMETRICS_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for requests to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "AIRMETRICS_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to enable sending traces to Jaeger.
    #[arg(long, default_value_t = false, env = "AIRMETRICS_ENABLE_JAEGER")]
    pub enable_jaeger: bool,
    /// Whether to use Rayon for execution of aggregations.
    #[arg(long, default_value_t = false, env = "AIRMETRICS_USE_RAYON")]
    pub use_rayon: bool,
    /// Time in seconds for which aggregation results are cached
    #[arg(long, default_value_t = 1800, env = "AIRMETRICS_CACHE_TTL")]
    pub cache_ttl: u64,
    /// Maximum number of results held by each cache. Zero disables caching.
    #[arg(long, default_value_t = 100, env = "AIRMETRICS_CACHE_CAPACITY")]
    pub cache_capacity: usize,
    /// Interval in seconds between sweeps of expired cache entries
    #[arg(long, default_value_t = 60, env = "AIRMETRICS_CACHE_PRUNE_INTERVAL")]
    pub cache_prune_interval: u64,
    /// Number of decimal places to which coordinates are rounded when bucketing
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(0..=6), env = "AIRMETRICS_PRECISION")]
    pub precision: u32,
    /// Mean above which a location is classified as high
    #[arg(long, default_value_t = 0.8, env = "AIRMETRICS_QUALITY_HIGH")]
    pub quality_high: f64,
    /// Mean above which a location is classified as medium
    #[arg(long, default_value_t = 0.5, env = "AIRMETRICS_QUALITY_MEDIUM")]
    pub quality_medium: f64,
    /// Sample producer to query
    #[arg(long, value_enum, default_value_t = ProducerKind::Synthetic, env = "AIRMETRICS_PRODUCER")]
    pub producer: ProducerKind,
    /// Base URL of the HTTP producer
    #[arg(long, required_if_eq("producer", "http"), env = "AIRMETRICS_PRODUCER_URL")]
    pub producer_url: Option<Url>,
    /// Bearer token sent to the HTTP producer
    #[arg(long, env = "AIRMETRICS_PRODUCER_TOKEN", hide_env_values = true)]
    pub producer_token: Option<String>,
    /// Maximum time in milliseconds to wait for the producer
    #[arg(long, default_value_t = 10000, env = "AIRMETRICS_PRODUCER_TIMEOUT_MS")]
    pub producer_timeout_ms: u64,
    /// Number of cells along each side of a box for the synthetic producer
    #[arg(long, default_value_t = 8, env = "AIRMETRICS_SYNTHETIC_GRID")]
    pub synthetic_grid: usize,
    /// Maximum number of simultaneous producer connections.
    /// Default is unlimited.
    #[arg(long, env = "AIRMETRICS_CONNECTION_LIMIT")]
    pub connection_limit: Option<usize>,
    /// Maximum number of aggregations running at once.
    /// Default is the number of CPUs minus one.
    #[arg(long, env = "AIRMETRICS_THREAD_LIMIT")]
    pub thread_limit: Option<usize>,
    /// Number of requests of a batch run concurrently
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..), env = "AIRMETRICS_BATCH_SIZE")]
    pub batch_size: u64,
    /// Delay in milliseconds between the groups of a batch
    #[arg(long, default_value_t = 1000, env = "AIRMETRICS_BATCH_DELAY_MS")]
    pub batch_delay_ms: u64,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
