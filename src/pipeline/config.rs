//! Pipeline configuration from environment variables and CLI flags

use crate::aggregator_core::{AggregatorConfig, Reducer};
use crate::transport_core::config::{parse_flag, parse_var, ConfigError};
use std::env;
use std::time::Duration;

pub const DEFAULT_SUBSCRIBE_TOPIC: &str = "rent/+/+/+/status/banner/0";

/// Settings shared by every subscription's aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Wildcard patterns, one aggregator each
    pub subscribe_topics: Vec<String>,

    /// Aggregation window
    pub interval: Duration,

    /// Reductions retained per key
    pub recent_size: usize,

    /// Reducer identifier (avg, min, max, count)
    pub reducer: String,

    /// Replaces topic reconstruction from the pattern when set
    pub output_topic_prefix: Option<String>,

    /// Publish a timestamp-keyed JSON object instead of a bare list
    pub output_timestamps: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            subscribe_topics: vec![DEFAULT_SUBSCRIBE_TOPIC.to_string()],
            interval: Duration::from_secs(15 * 60),
            recent_size: 96,
            reducer: "avg".to_string(),
            output_topic_prefix: None,
            output_timestamps: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `SUBSCRIBE_TOPICS` comma-separated (default: rent/+/+/+/status/banner/0)
    /// - `INTERVAL_MINUTES` (default: 15), or `INTERVAL_SECS` which takes precedence
    /// - `RECENT_SIZE` (default: 96)
    /// - `REDUCER` (default: avg)
    /// - `OUTPUT_TOPIC_PREFIX` (optional)
    /// - `OUTPUT_TIMESTAMPS` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let subscribe_topics = env::var("SUBSCRIBE_TOPICS")
            .map(|s| {
                s.split(',')
                    .map(|topic| topic.trim().to_string())
                    .filter(|topic| !topic.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or(defaults.subscribe_topics);

        if subscribe_topics.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SUBSCRIBE_TOPICS must name at least one pattern".to_string(),
            ));
        }

        let interval = match env::var("INTERVAL_SECS") {
            Ok(_) => Duration::from_secs(parse_var("INTERVAL_SECS", 0u64)?),
            Err(_) => minutes_to_duration("INTERVAL_MINUTES", parse_var("INTERVAL_MINUTES", 15u64)?)?,
        };

        Ok(Self {
            subscribe_topics,
            interval,
            recent_size: parse_var("RECENT_SIZE", defaults.recent_size)?,
            reducer: env::var("REDUCER").unwrap_or(defaults.reducer),
            output_topic_prefix: env::var("OUTPUT_TOPIC_PREFIX")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            output_timestamps: parse_flag("OUTPUT_TIMESTAMPS"),
        })
    }

    /// Apply `--interval-minutes N`, `--recent N` and `--reducer NAME` overrides
    pub fn apply_args(&mut self, args: &[String]) -> Result<(), ConfigError> {
        let value_of = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|idx| args.get(idx + 1))
        };

        if let Some(raw) = value_of("--interval-minutes") {
            let minutes = raw.parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue(format!("--interval-minutes expects a number, got '{}'", raw))
            })?;
            self.interval = minutes_to_duration("--interval-minutes", minutes)?;
        }

        if let Some(raw) = value_of("--recent") {
            self.recent_size = raw.parse::<usize>().map_err(|_| {
                ConfigError::InvalidValue(format!("--recent expects a number, got '{}'", raw))
            })?;
        }

        if let Some(raw) = value_of("--reducer") {
            self.reducer = raw.clone();
        }

        Ok(())
    }

    pub fn aggregator_config(&self) -> Result<AggregatorConfig, ConfigError> {
        let reducer =
            Reducer::from_name(&self.reducer).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        AggregatorConfig::new(self.interval, self.recent_size, reducer)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }
}

fn minutes_to_duration(source: &str, minutes: u64) -> Result<Duration, ConfigError> {
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue(format!("{} is too large: {} minutes", source, minutes)))
}
