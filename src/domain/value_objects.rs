use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reason a topic name was rejected before reaching the broker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvalidTopicName(pub &'static str);

/// Represents a topic name with validation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicName(String);

impl TopicName {
    /// Longest name the broker accepts
    pub const MAX_LENGTH: usize = 249;

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidTopicName> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(InvalidTopicName("Topic name cannot be empty"));
        }
        if name.len() > Self::MAX_LENGTH {
            return Err(InvalidTopicName("Topic name too long (max 249 characters)"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(InvalidTopicName("Topic name cannot contain whitespace"));
        }
        Ok(TopicName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TopicName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Broker-managed topics such as `__consumer_offsets`
pub fn is_internal_topic(name: &str) -> bool {
    name.starts_with("__")
}

/// A topic-partition pair, the unit of consumer assignment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

/// Where a freshly assigned consumer starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Earliest retained offset of each partition
    Earliest,
    /// Log end at assignment time, only records appended afterwards are seen
    Latest,
}

impl StartPosition {
    pub fn from_start(limit_applies_from_start: bool) -> Self {
        if limit_applies_from_start {
            StartPosition::Earliest
        } else {
            StartPosition::Latest
        }
    }
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPosition::Earliest => write!(f, "earliest"),
            StartPosition::Latest => write!(f, "latest"),
        }
    }
}
