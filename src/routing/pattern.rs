//! Subscription patterns with a contiguous run of single-level wildcards

use crate::aggregator_core::AggregationKey;
use std::fmt;

pub const TOPIC_SEPARATOR: char = '/';
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
pub const MULTI_LEVEL_WILDCARD: &str = "#";

#[derive(Debug)]
pub enum RoutingError {
    EmptyPattern,
    EmptySegment(String),
    MultiLevelWildcard(String),
    NoWildcard(String),
    NonContiguousWildcards(String),
    TopicMismatch { topic: String, pattern: String },
    KeyLength { pattern: String, expected: usize, got: usize },
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::EmptyPattern => write!(f, "Subscription pattern is empty"),
            RoutingError::EmptySegment(p) => write!(f, "Pattern '{}' contains an empty segment", p),
            RoutingError::MultiLevelWildcard(p) => {
                write!(f, "Pattern '{}' uses '#', only '+' wildcards are supported", p)
            }
            RoutingError::NoWildcard(p) => write!(f, "Pattern '{}' has no '+' wildcard", p),
            RoutingError::NonContiguousWildcards(p) => {
                write!(f, "Pattern '{}' has literal segments between its wildcards", p)
            }
            RoutingError::TopicMismatch { topic, pattern } => {
                write!(f, "Topic '{}' does not match pattern '{}'", topic, pattern)
            }
            RoutingError::KeyLength {
                pattern,
                expected,
                got,
            } => write!(
                f,
                "Pattern '{}' has {} wildcard(s) but key has {} segment(s)",
                pattern, expected, got
            ),
        }
    }
}

impl std::error::Error for RoutingError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionPattern {
    raw: String,
    segments: Vec<Segment>,
    lo: usize,
    hi: usize,
}

impl SubscriptionPattern {
    pub fn parse(pattern: &str) -> Result<Self, RoutingError> {
        if pattern.is_empty() {
            return Err(RoutingError::EmptyPattern);
        }

        let mut segments = Vec::new();
        for part in pattern.split(TOPIC_SEPARATOR) {
            let segment = match part {
                "" => return Err(RoutingError::EmptySegment(pattern.to_string())),
                MULTI_LEVEL_WILDCARD => {
                    return Err(RoutingError::MultiLevelWildcard(pattern.to_string()))
                }
                SINGLE_LEVEL_WILDCARD => Segment::Wildcard,
                literal => Segment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        let lo = segments
            .iter()
            .position(|s| *s == Segment::Wildcard)
            .ok_or_else(|| RoutingError::NoWildcard(pattern.to_string()))?;
        let hi = segments
            .iter()
            .rposition(|s| *s == Segment::Wildcard)
            .unwrap_or(lo);

        if segments[lo..=hi].iter().any(|s| *s != Segment::Wildcard) {
            return Err(RoutingError::NonContiguousWildcards(pattern.to_string()));
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
            lo,
            hi,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Inclusive index range `[lo, hi]` of the wildcard segments
    pub fn wildcard_range(&self) -> (usize, usize) {
        (self.lo, self.hi)
    }

    pub fn wildcard_count(&self) -> usize {
        self.hi - self.lo + 1
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Number of literal segments before the first wildcard
    pub fn literal_prefix_len(&self) -> usize {
        self.lo
    }

    pub fn literal_count(&self) -> usize {
        self.segments.len() - self.wildcard_count()
    }

    /// Wildcards match exactly one non-empty segment; lengths must agree.
    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split(TOPIC_SEPARATOR).collect();
        if parts.len() != self.segments.len() {
            return false;
        }

        self.segments.iter().zip(parts).all(|(segment, part)| match segment {
            Segment::Wildcard => !part.is_empty(),
            Segment::Literal(literal) => literal == part,
        })
    }

    pub fn extract_key(&self, topic: &str) -> Result<AggregationKey, RoutingError> {
        if !self.matches(topic) {
            return Err(RoutingError::TopicMismatch {
                topic: topic.to_string(),
                pattern: self.raw.clone(),
            });
        }

        Ok(topic
            .split(TOPIC_SEPARATOR)
            .skip(self.lo)
            .take(self.wildcard_count())
            .collect())
    }

    /// Pattern segments with the key written into the wildcard positions
    pub fn substitute(&self, key: &AggregationKey) -> Result<Vec<String>, RoutingError> {
        if key.len() != self.wildcard_count() {
            return Err(RoutingError::KeyLength {
                pattern: self.raw.clone(),
                expected: self.wildcard_count(),
                got: key.len(),
            });
        }

        Ok(self
            .segments
            .iter()
            .enumerate()
            .map(|(idx, segment)| match segment {
                Segment::Wildcard => key.parts()[idx - self.lo].clone(),
                Segment::Literal(literal) => literal.clone(),
            })
            .collect())
    }
}

impl fmt::Display for SubscriptionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANNER: &str = "rent/+/+/+/status/banner/0";

    #[test]
    fn test_wildcard_range() {
        let pattern = SubscriptionPattern::parse(BANNER).unwrap();
        assert_eq!(pattern.wildcard_range(), (1, 3));
        assert_eq!(pattern.wildcard_count(), 3);
        assert_eq!(pattern.literal_prefix_len(), 1);
        assert_eq!(pattern.literal_count(), 4);
    }

    #[test]
    fn test_extract_key() {
        let pattern = SubscriptionPattern::parse(BANNER).unwrap();
        let key = pattern
            .extract_key("rent/acct1/roomA/dev1/status/banner/0")
            .unwrap();
        assert_eq!(key.parts(), &["acct1", "roomA", "dev1"]);
    }

    #[test]
    fn test_matching_rules() {
        let pattern = SubscriptionPattern::parse(BANNER).unwrap();
        assert!(pattern.matches("rent/a/b/c/status/banner/0"));
        assert!(!pattern.matches("rent/a/b/status/banner/0"));
        assert!(!pattern.matches("rent/a/b/c/status/banner/0/extra"));
        assert!(!pattern.matches("rent/a//c/status/banner/0"));
        assert!(!pattern.matches("rent/a/b/c/status/banner/1"));
        assert!(pattern.extract_key("other/a/b/c/status/banner/0").is_err());
    }

    #[test]
    fn test_substitute_round_trip() {
        let pattern = SubscriptionPattern::parse(BANNER).unwrap();
        let topic = "rent/acct9/hall/dev42/status/banner/0";
        let key = pattern.extract_key(topic).unwrap();
        assert_eq!(pattern.substitute(&key).unwrap().join("/"), topic);

        let short = AggregationKey::from_iter(["only"]);
        assert!(matches!(
            pattern.substitute(&short),
            Err(RoutingError::KeyLength { expected: 3, got: 1, .. })
        ));
    }

    #[test]
    fn test_rejected_patterns() {
        assert!(matches!(SubscriptionPattern::parse(""), Err(RoutingError::EmptyPattern)));
        assert!(matches!(
            SubscriptionPattern::parse("a//+"),
            Err(RoutingError::EmptySegment(_))
        ));
        assert!(matches!(
            SubscriptionPattern::parse("a/#"),
            Err(RoutingError::MultiLevelWildcard(_))
        ));
        assert!(matches!(
            SubscriptionPattern::parse("a/b/c"),
            Err(RoutingError::NoWildcard(_))
        ));
        assert!(matches!(
            SubscriptionPattern::parse("a/+/b/+"),
            Err(RoutingError::NonContiguousWildcards(_))
        ));
    }
}
