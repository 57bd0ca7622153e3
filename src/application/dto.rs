use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{
    ApiError, ConsumeQuery, ConsumedMessage, DeliveryReport, ErrorKind, MessageFilter, NewTopic, OutgoingMessage,
    Result, StartPosition, TopicName,
};

/// Collects per-field problems and turns them into one validation error
#[derive(Default)]
struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    fn add(&mut self, field: impl Into<String>, detail: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| detail.into());
    }

    fn topic(&mut self, field: impl Into<String>, name: &str) -> Option<TopicName> {
        match TopicName::new(name) {
            Ok(topic) => Some(topic),
            Err(e) => {
                self.add(field, e.to_string());
                None
            }
        }
    }

    fn into_result<T>(self, kind: ErrorKind, value: impl FnOnce() -> Option<T>) -> Result<T> {
        if !self.0.is_empty() {
            return Err(ApiError::validation(kind, self.0));
        }
        value().ok_or_else(|| ApiError::validation(kind, BTreeMap::new()))
    }
}

/// Request to create a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicRequest {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
}

impl CreateTopicRequest {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            configuration: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<NewTopic> {
        let mut errors = FieldErrors::default();
        let name = errors.topic("name", &self.name);
        if self.partitions < 1 {
            errors.add("partitions", "must be at least 1");
        }
        if self.replication_factor < 1 {
            errors.add("replicationFactor", "must be at least 1");
        }
        if self.configuration.keys().any(|key| key.trim().is_empty()) {
            errors.add("configuration", "keys must not be empty");
        }

        errors.into_result(ErrorKind::InvalidTopicConfiguration, || {
            Some(NewTopic {
                name: name?,
                partitions: self.partitions,
                replication_factor: self.replication_factor,
                config: self.configuration.clone(),
            })
        })
    }
}

/// Request to alter the dynamic configuration of a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTopicConfigRequest {
    pub topic: String,
    pub config: BTreeMap<String, String>,
}

impl UpdateTopicConfigRequest {
    pub fn validate(&self) -> Result<TopicName> {
        let mut errors = FieldErrors::default();
        let topic = errors.topic("topic", &self.topic);
        if self.config.is_empty() {
            errors.add("config", "must contain at least one entry");
        } else if self.config.keys().any(|key| key.trim().is_empty()) {
            errors.add("config", "keys must not be empty");
        }
        errors.into_result(ErrorKind::InvalidTopicConfiguration, || topic)
    }
}

/// A single message to produce
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRequest {
    pub topic: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub partition: Option<i32>,
}

impl ProducerRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn validate(&self) -> Result<OutgoingMessage> {
        let mut errors = FieldErrors::default();
        let topic = errors.topic("topic", &self.topic);
        if matches!(self.partition, Some(p) if p < 0) {
            errors.add("partition", "must not be negative");
        }
        if self.headers.keys().any(|name| name.is_empty()) {
            errors.add("headers", "header names must not be empty");
        }

        errors.into_result(ErrorKind::InvalidRequest, || {
            Some(OutgoingMessage {
                topic: topic?,
                key: self.key.clone(),
                payload: self.payload.clone(),
                headers: self.headers.clone(),
                partition: self.partition,
            })
        })
    }
}

/// Where a produced record landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerResponse {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Milliseconds since the epoch
    pub timestamp: i64,
}

impl From<DeliveryReport> for ProducerResponse {
    fn from(report: DeliveryReport) -> Self {
        Self {
            topic: report.topic,
            partition: report.partition,
            offset: report.offset,
            timestamp: report.timestamp,
        }
    }
}

/// A bounded read across one or more topics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRequest {
    pub topics: Vec<String>,
    pub limit: i64,
    /// Start at the earliest retained offset instead of the log end
    #[serde(default)]
    pub limit_applies_from_start: bool,
    #[serde(default)]
    pub filters: Vec<MessageFilter>,
}

impl ConsumerRequest {
    pub fn new(topics: Vec<String>, limit: i64, limit_applies_from_start: bool) -> Self {
        Self {
            topics,
            limit,
            limit_applies_from_start,
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: MessageFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn validate(&self) -> Result<ConsumeQuery> {
        let mut errors = FieldErrors::default();
        if self.topics.is_empty() {
            errors.add("topics", "must contain at least one topic");
        }
        // A topic listed twice is read once, in first-mention order
        let mut seen = BTreeSet::new();
        let topics: Vec<_> = self
            .topics
            .iter()
            .enumerate()
            .filter_map(|(i, name)| errors.topic(format!("topics[{}]", i), name))
            .filter(|topic| seen.insert(topic.clone()))
            .collect();

        let limit = usize::try_from(self.limit).ok().filter(|limit| *limit > 0);
        if limit.is_none() {
            errors.add("limit", "must be a positive number");
        }

        let mut filters = Vec::with_capacity(self.filters.len());
        for (i, filter) in self.filters.iter().enumerate() {
            match filter.compile() {
                Ok(compiled) => filters.push(compiled),
                Err(e) => errors.add(format!("filters[{}].term", i), format!("invalid regular expression: {}", e)),
            }
        }

        let start = StartPosition::from_start(self.limit_applies_from_start);
        errors.into_result(ErrorKind::InvalidRequest, || {
            Some(ConsumeQuery {
                topics,
                limit: limit?,
                start,
                filters,
            })
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerResponse {
    pub messages: Vec<ConsumedMessage>,
}
