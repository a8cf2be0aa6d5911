//! Topic routing: inbound topic → subscription → aggregation key → output topic

use super::pattern::{RoutingError, SubscriptionPattern, TOPIC_SEPARATOR};
use crate::aggregator_core::{AggregationKey, WindowedAggregator};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Slice the wildcard segments of `topic` out as the aggregation key.
pub fn extract_key(topic: &str, pattern: &SubscriptionPattern) -> Result<AggregationKey, RoutingError> {
    pattern.extract_key(topic)
}

/// Rebuild the outbound topic for `key`.
///
/// With an explicit prefix the topic is `prefix/path`. Otherwise the pattern's
/// wildcards are replaced by the key segments and `path` is appended, so a key
/// extracted from a topic reproduces that topic's structure.
pub fn build_output_topic(
    key: &AggregationKey,
    pattern: &SubscriptionPattern,
    explicit_prefix: Option<&str>,
    path: &str,
) -> Result<String, RoutingError> {
    if let Some(prefix) = explicit_prefix {
        return Ok(format!("{}{}{}", prefix, TOPIC_SEPARATOR, path));
    }

    let mut segments = pattern.substitute(key)?;
    segments.push(path.to_string());
    Ok(segments.join(&TOPIC_SEPARATOR.to_string()))
}

/// A pattern bound to its own aggregator
pub struct Subscription {
    pattern: SubscriptionPattern,
    aggregator: WindowedAggregator,
    output_prefix: Option<String>,
    /// Diagnostic only: concrete topics routed here and their last raw payload
    last_payloads: BTreeMap<String, String>,
}

impl Subscription {
    pub fn new(
        pattern: SubscriptionPattern,
        aggregator: WindowedAggregator,
        output_prefix: Option<String>,
    ) -> Self {
        Self {
            pattern,
            aggregator,
            output_prefix,
            last_payloads: BTreeMap::new(),
        }
    }

    pub fn pattern(&self) -> &SubscriptionPattern {
        &self.pattern
    }

    pub fn aggregator(&self) -> &WindowedAggregator {
        &self.aggregator
    }

    pub fn aggregator_mut(&mut self) -> &mut WindowedAggregator {
        &mut self.aggregator
    }

    pub fn output_prefix(&self) -> Option<&str> {
        self.output_prefix.as_deref()
    }

    pub fn record_inbound(&mut self, topic: &str, payload: &str) {
        self.last_payloads
            .insert(topic.to_string(), payload.to_string());
    }

    pub fn seen_topics(&self) -> BTreeSet<&str> {
        self.last_payloads.keys().map(String::as_str).collect()
    }

    pub fn last_payload(&self, topic: &str) -> Option<&str> {
        self.last_payloads.get(topic).map(String::as_str)
    }

    pub fn extract_key(&self, topic: &str) -> Result<AggregationKey, RoutingError> {
        extract_key(topic, &self.pattern)
    }

    pub fn output_topic(&self, key: &AggregationKey) -> Result<String, RoutingError> {
        build_output_topic(
            key,
            &self.pattern,
            self.output_prefix(),
            &self.aggregator.config().path_descriptor(),
        )
    }
}

/// Registered subscriptions in registration order.
///
/// When several patterns match a topic, the longest literal prefix wins,
/// then the most literal segments overall, then the earliest registration.
#[derive(Default)]
pub struct TopicRouter {
    subscriptions: Vec<Subscription>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, subscription: Subscription) -> usize {
        log::info!("📌 Registered subscription: {}", subscription.pattern());
        self.subscriptions.push(subscription);
        self.subscriptions.len() - 1
    }

    pub fn match_index(&self, topic: &str) -> Option<usize> {
        self.subscriptions
            .iter()
            .enumerate()
            .filter(|(_, sub)| sub.pattern.matches(topic))
            .max_by_key(|(idx, sub)| {
                (
                    sub.pattern.literal_prefix_len(),
                    sub.pattern.literal_count(),
                    Reverse(*idx),
                )
            })
            .map(|(idx, _)| idx)
    }

    pub fn match_pattern(&self, topic: &str) -> Option<&Subscription> {
        self.match_index(topic).map(|idx| &self.subscriptions[idx])
    }

    pub fn match_pattern_mut(&mut self, topic: &str) -> Option<&mut Subscription> {
        let idx = self.match_index(topic)?;
        self.subscriptions.get_mut(idx)
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn subscriptions_mut(&mut self) -> &mut [Subscription] {
        &mut self.subscriptions
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
