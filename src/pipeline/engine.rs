//! Aggregation Engine - routes inbound messages into aggregators and renders
//! their history snapshots as publications
//!
//! ## Architecture
//!
//! ```text
//! (topic, payload)
//!     ↓
//! TopicRouter::match_pattern_mut() → Subscription
//!     ↓
//! extract_key() + parse_sample()
//!     ↓
//! WindowedAggregator::put() / tick()
//!     ↓
//! HistorySnapshot → Publication per key (retained, at-least-once)
//! ```
//!
//! The engine holds no locks; its owner (the connection supervisor) is the
//! only caller.

use super::config::PipelineConfig;
use crate::aggregator_core::{
    AggregatorConfig, AggregatorError, HistorySnapshot, WindowedAggregator,
};
use crate::routing::{RoutingError, Subscription, SubscriptionPattern, TopicRouter};
use crate::transport_core::config::ConfigError;
use crate::transport_core::payload::{
    format_history, format_history_with_timestamps, parse_sample, PayloadError,
};
use crate::transport_core::transport::Publication;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug)]
pub enum EngineError {
    Payload(PayloadError),
    Aggregator(AggregatorError),
    Routing(RoutingError),
    Config(ConfigError),
}

impl From<PayloadError> for EngineError {
    fn from(err: PayloadError) -> Self {
        EngineError::Payload(err)
    }
}

impl From<AggregatorError> for EngineError {
    fn from(err: AggregatorError) -> Self {
        EngineError::Aggregator(err)
    }
}

impl From<RoutingError> for EngineError {
    fn from(err: RoutingError) -> Self {
        EngineError::Routing(err)
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Payload(e) => write!(f, "Payload error: {}", e),
            EngineError::Aggregator(e) => write!(f, "Aggregator error: {}", e),
            EngineError::Routing(e) => write!(f, "Routing error: {}", e),
            EngineError::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

pub struct AggregationEngine {
    router: TopicRouter,
    output_timestamps: bool,
}

impl AggregationEngine {
    pub fn new(output_timestamps: bool) -> Self {
        Self {
            router: TopicRouter::new(),
            output_timestamps,
        }
    }

    /// One subscription per configured pattern, all sharing the same
    /// aggregator settings
    pub fn from_config(config: &PipelineConfig) -> Result<Self, EngineError> {
        Self::build(config, WindowedAggregator::new)
    }

    /// Same as `from_config` with a shared custom clock (deterministic tests)
    pub fn from_config_with_timestamp_fn(
        config: &PipelineConfig,
        now_fn: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Result<Self, EngineError> {
        Self::build(config, |aggregator_config| {
            let clock = now_fn.clone();
            WindowedAggregator::new_with_timestamp_fn(aggregator_config, Box::new(move || clock()))
        })
    }

    fn build<F>(config: &PipelineConfig, make_aggregator: F) -> Result<Self, EngineError>
    where
        F: Fn(AggregatorConfig) -> WindowedAggregator,
    {
        let aggregator_config = config.aggregator_config()?;
        let mut engine = Self::new(config.output_timestamps);
        for topic in &config.subscribe_topics {
            engine.register(
                topic,
                make_aggregator(aggregator_config.clone()),
                config.output_topic_prefix.clone(),
            )?;
        }
        Ok(engine)
    }

    pub fn register(
        &mut self,
        pattern: &str,
        aggregator: WindowedAggregator,
        output_prefix: Option<String>,
    ) -> Result<usize, EngineError> {
        let pattern = SubscriptionPattern::parse(pattern)?;
        Ok(self
            .router
            .register(Subscription::new(pattern, aggregator, output_prefix)))
    }

    pub fn patterns(&self) -> Vec<String> {
        self.router
            .subscriptions()
            .iter()
            .map(|sub| sub.pattern().as_str().to_string())
            .collect()
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Route one inbound message into its aggregator.
    ///
    /// Topics without a subscription are ignored. Errors concern this message
    /// only; nothing is buffered when one is returned.
    pub fn handle_message(
        &mut self,
        topic: &str,
        payload: &str,
    ) -> Result<Vec<Publication>, EngineError> {
        let output_timestamps = self.output_timestamps;
        let Some(subscription) = self.router.match_pattern_mut(topic) else {
            log::debug!("No subscription for topic {}", topic);
            return Ok(Vec::new());
        };

        subscription.record_inbound(topic, payload);
        let key = subscription.extract_key(topic)?;
        let sample = parse_sample(payload)?;

        match subscription.aggregator_mut().put(key, sample)? {
            Some(snapshot) => Ok(render_publications(subscription, &snapshot, output_timestamps)?),
            None => Ok(Vec::new()),
        }
    }

    /// Run the elapsed-window check on every subscription
    pub fn tick_all(&mut self) -> Vec<Publication> {
        let output_timestamps = self.output_timestamps;
        let mut publications = Vec::new();

        for subscription in self.router.subscriptions_mut() {
            let Some(snapshot) = subscription.aggregator_mut().tick() else {
                continue;
            };
            match render_publications(subscription, &snapshot, output_timestamps) {
                Ok(rendered) => publications.extend(rendered),
                Err(e) => log::error!(
                    "❌ Failed to build output topics for {}: {}",
                    subscription.pattern(),
                    e
                ),
            }
        }

        publications
    }
}

fn render_publications(
    subscription: &Subscription,
    snapshot: &HistorySnapshot,
    output_timestamps: bool,
) -> Result<Vec<Publication>, RoutingError> {
    snapshot
        .iter()
        .map(|(key, history)| {
            let topic = subscription.output_topic(key)?;
            let payload = if output_timestamps {
                format_history_with_timestamps(history)
            } else {
                format_history(history)
            };
            log::debug!("📤 {} ({} entries) → {}", key, history.len(), topic);
            Ok(Publication::retained(topic, payload))
        })
        .collect()
}
