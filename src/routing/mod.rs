//! Wildcard topic routing
//!
//! Maps inbound topics onto subscriptions, extracts the aggregation key from the
//! wildcard segments and rebuilds outbound topics from a key.

pub mod pattern;
pub mod router;

pub use pattern::{RoutingError, SubscriptionPattern};
pub use router::{build_output_topic, extract_key, Subscription, TopicRouter};
