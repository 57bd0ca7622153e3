use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::filters::CompiledFilter;
use super::value_objects::*;

/// Replica placement of one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub partition: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

/// Partition metadata of one topic as reported by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionInfo>,
}

/// A broker known to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerInfo {
    pub id: i32,
    pub host: String,
    pub port: i32,
}

/// Snapshot of cluster metadata at the time of the call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterMetadata {
    pub brokers: Vec<BrokerInfo>,
    pub topics: Vec<TopicMetadata>,
}

impl ClusterMetadata {
    pub fn topic(&self, name: &str) -> Option<&TopicMetadata> {
        self.topics.iter().find(|t| t.name == name)
    }
}

/// Description of a topic, recomputed from the broker on every call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicInfo {
    pub topic: String,
    pub partition_count: usize,
    /// Replica count of partition zero; partitions with non-uniform
    /// replication are not reflected here
    pub replication_factor: usize,
    pub configuration: BTreeMap<String, String>,
    pub partitions: Vec<PartitionInfo>,
}

impl TopicInfo {
    pub fn from_metadata(metadata: TopicMetadata, configuration: BTreeMap<String, String>) -> Self {
        let mut partitions = metadata.partitions;
        partitions.sort_by_key(|p| p.partition);
        let replication_factor = partitions
            .iter()
            .find(|p| p.partition == 0)
            .or_else(|| partitions.first())
            .map(|p| p.replicas.len())
            .unwrap_or(0);

        Self {
            topic: metadata.name,
            partition_count: partitions.len(),
            replication_factor,
            configuration,
            partitions,
        }
    }
}

/// Topic names visible on a cluster, sorted ascending
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicList {
    pub topics: Vec<String>,
}

impl TopicList {
    pub fn new(mut topics: Vec<String>) -> Self {
        topics.sort();
        topics.dedup();
        Self { topics }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }
}

/// A topic to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopic {
    pub name: TopicName,
    pub partitions: i32,
    pub replication_factor: i32,
    pub config: BTreeMap<String, String>,
}

/// A single message to produce, still in caller text form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub topic: TopicName,
    pub key: Option<String>,
    pub payload: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub partition: Option<i32>,
}

/// A record in wire form, ready for the producer client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub topic: String,
    pub partition: Option<i32>,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: BTreeMap<String, String>,
    /// Milliseconds since the epoch
    pub timestamp: i64,
}

/// Broker acknowledgment of a produced record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
}

/// A record in wire form as returned by the consumer client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<i64>,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
}

/// A decoded record handed back to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<i64>,
    pub key: Option<String>,
    pub value: Option<String>,
    /// Header values as UTF-8 text; a repeated header name keeps its last value
    pub headers: BTreeMap<String, String>,
}

/// A consumer group known to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerGroup {
    pub group_id: String,
    pub state: String,
    pub protocol_type: String,
    pub members: usize,
}

/// Committed position of a group on one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupOffset {
    pub topic: String,
    pub partition: i32,
    pub committed: i64,
    pub log_end: i64,
    /// Records between the committed offset and the log end, never negative
    pub lag: i64,
}

impl GroupOffset {
    pub fn new(topic: impl Into<String>, partition: i32, committed: i64, log_end: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            committed,
            log_end,
            lag: (log_end - committed).max(0),
        }
    }
}

/// A validated, bounded consumption
#[derive(Debug, Clone)]
pub struct ConsumeQuery {
    pub topics: Vec<TopicName>,
    pub limit: usize,
    pub start: StartPosition,
    pub filters: Vec<CompiledFilter>,
}

impl ConsumeQuery {
    pub fn accepts(&self, message: &ConsumedMessage) -> bool {
        self.filters.iter().all(|filter| filter.accepts(message))
    }

    pub fn describe_topics(&self) -> String {
        self.topics
            .iter()
            .map(TopicName::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}
