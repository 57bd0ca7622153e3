//! In-process stand-in for a Kafka cluster, used by the `--in-memory` mode and the tests.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::{
    BrokerInfo, ClientError, ClusterClients, ClusterMetadata, ConsumerFactory, ConsumerGroup, DeliveryReport,
    FailureCode, GroupAdmin, GroupOffset, IncomingRecord, NewTopic, OutgoingRecord, PartitionInfo, RecordConsumer,
    RecordProducer, StartPosition, TopicAdmin, TopicMetadata, TopicPartition,
};
use crate::infrastructure::config::ClusterConfig;
use crate::infrastructure::registry::ClientFactory;

/// Topic-level settings the in-memory broker accepts
const KNOWN_TOPIC_CONFIGS: &[&str] = &[
    "cleanup.policy",
    "compression.type",
    "delete.retention.ms",
    "max.message.bytes",
    "min.insync.replicas",
    "retention.bytes",
    "retention.ms",
    "segment.bytes",
    "segment.ms",
];

const CONSUMER_OFFSETS_TOPIC: &str = "__consumer_offsets";

struct StoredTopic {
    partitions: Vec<PartitionLog>,
    config: BTreeMap<String, String>,
}

struct PartitionLog {
    replicas: Vec<i32>,
    records: Vec<IncomingRecord>,
}

struct ClusterState {
    brokers: Vec<BrokerInfo>,
    topics: DashMap<String, StoredTopic>,
    /// Committed offsets per group, keyed by (topic, partition)
    groups: DashMap<String, BTreeMap<(String, i32), i64>>,
    available: AtomicBool,
    arrivals: Notify,
    open_consumers: AtomicUsize,
    round_robin: AtomicU64,
}

impl ClusterState {
    fn ensure_available(&self) -> Result<(), ClientError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::kafka(FailureCode::Transport, "Broker transport failure"))
        }
    }

    fn replicas_for(&self, partition: usize, replication_factor: usize) -> Vec<i32> {
        (0..replication_factor)
            .map(|i| self.brokers[(partition + i) % self.brokers.len()].id)
            .collect()
    }

    fn build_topic(
        &self,
        partitions: usize,
        replication_factor: usize,
        overrides: &BTreeMap<String, String>,
    ) -> StoredTopic {
        let mut config = default_topic_config();
        config.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        let partitions = (0..partitions)
            .map(|p| PartitionLog {
                replicas: self.replicas_for(p, replication_factor),
                records: Vec::new(),
            })
            .collect();
        StoredTopic { partitions, config }
    }
}

fn default_topic_config() -> BTreeMap<String, String> {
    let mut config = BTreeMap::new();
    config.insert("cleanup.policy".to_string(), "delete".to_string());
    config.insert("min.insync.replicas".to_string(), "1".to_string());
    config.insert("retention.ms".to_string(), "604800000".to_string());
    config
}

fn validate_config_keys(config: &BTreeMap<String, String>) -> Result<(), ClientError> {
    match config.keys().find(|key| !KNOWN_TOPIC_CONFIGS.contains(&key.as_str())) {
        Some(key) => Err(ClientError::kafka(
            FailureCode::InvalidConfig,
            format!("Unknown topic config name: {}", key),
        )),
        None => Ok(()),
    }
}

fn unknown_topic(topic: &str) -> ClientError {
    ClientError::kafka(
        FailureCode::UnknownTopicOrPartition,
        format!("This server does not host this topic-partition: {}", topic),
    )
}

/// A broker set with topics and partition logs held in memory.
///
/// Cloning yields another handle to the same cluster.
#[derive(Clone)]
pub struct InMemoryCluster {
    state: Arc<ClusterState>,
}

impl InMemoryCluster {
    pub fn new(broker_count: usize) -> Self {
        let brokers = (0..broker_count.max(1))
            .map(|id| BrokerInfo {
                id: id as i32,
                host: "localhost".to_string(),
                port: 9092 + id as i32,
            })
            .collect();
        let state = ClusterState {
            brokers,
            topics: DashMap::new(),
            groups: DashMap::new(),
            available: AtomicBool::new(true),
            arrivals: Notify::new(),
            open_consumers: AtomicUsize::new(0),
            round_robin: AtomicU64::new(0),
        };
        let offsets_topic = state.build_topic(1, 1, &BTreeMap::new());
        state.topics.insert(CONSUMER_OFFSETS_TOPIC.to_string(), offsets_topic);
        Self { state: Arc::new(state) }
    }

    /// Simulates losing (or regaining) every broker connection
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
        self.state.arrivals.notify_waiters();
    }

    /// Consumers created and not yet released
    pub fn open_consumers(&self) -> usize {
        self.state.open_consumers.load(Ordering::SeqCst)
    }

    /// Records a committed offset for `group`, creating the group if needed
    pub fn commit_offset(&self, group: &str, topic: &str, partition: i32, offset: i64) {
        self.state
            .groups
            .entry(group.to_string())
            .or_default()
            .insert((topic.to_string(), partition), offset);
    }

    pub fn record_count(&self, topic: &str) -> usize {
        self.state
            .topics
            .get(topic)
            .map(|t| t.partitions.iter().map(|p| p.records.len()).sum())
            .unwrap_or(0)
    }

    pub fn clients(&self) -> ClusterClients {
        ClusterClients {
            admin: Arc::new(self.clone()),
            groups: Arc::new(self.clone()),
            producer: Arc::new(self.clone()),
            consumers: Arc::new(self.clone()),
        }
    }

    fn choose_partition(&self, record: &OutgoingRecord, partition_count: usize) -> Result<usize, ClientError> {
        if let Some(partition) = record.partition {
            return usize::try_from(partition)
                .ok()
                .filter(|p| *p < partition_count)
                .ok_or_else(|| {
                    ClientError::kafka(
                        FailureCode::UnknownTopicOrPartition,
                        format!("Partition {} does not exist in topic {}", partition, record.topic),
                    )
                });
        }
        let partition = match &record.key {
            Some(key) => fnv1a(key) as usize % partition_count,
            None => self.state.round_robin.fetch_add(1, Ordering::Relaxed) as usize % partition_count,
        };
        Ok(partition)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl TopicAdmin for InMemoryCluster {
    async fn create_topic(&self, topic: &NewTopic, _timeout: Duration) -> Result<(), ClientError> {
        self.state.ensure_available()?;
        let name = topic.name.as_str();

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
            return Err(ClientError::kafka(
                FailureCode::InvalidTopic,
                format!("Topic name '{}' contains illegal characters", name),
            ));
        }
        if topic.partitions < 1 {
            return Err(ClientError::kafka(
                FailureCode::InvalidPartitions,
                "Number of partitions must be larger than 0",
            ));
        }
        let broker_count = self.state.brokers.len();
        if topic.replication_factor < 1 || topic.replication_factor as usize > broker_count {
            return Err(ClientError::kafka(
                FailureCode::InvalidReplicationFactor,
                format!(
                    "Replication factor: {} larger than available brokers: {}",
                    topic.replication_factor, broker_count
                ),
            ));
        }
        validate_config_keys(&topic.config)?;

        match self.state.topics.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(ClientError::kafka(
                    FailureCode::TopicAlreadyExists,
                    format!("Topic '{}' already exists", name),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(self.state.build_topic(
                    topic.partitions as usize,
                    topic.replication_factor as usize,
                    &topic.config,
                ));
            }
        }
        debug!("In-memory topic {} created", name);
        Ok(())
    }

    async fn delete_topic(&self, topic: &str, _timeout: Duration) -> Result<(), ClientError> {
        self.state.ensure_available()?;
        self.state.topics.remove(topic).ok_or_else(|| unknown_topic(topic))?;
        self.state.arrivals.notify_waiters();
        Ok(())
    }

    async fn fetch_metadata(&self, _timeout: Duration) -> Result<ClusterMetadata, ClientError> {
        self.state.ensure_available()?;
        let topics = self
            .state
            .topics
            .iter()
            .map(|entry| TopicMetadata {
                name: entry.key().clone(),
                partitions: entry
                    .value()
                    .partitions
                    .iter()
                    .enumerate()
                    .map(|(id, log)| PartitionInfo {
                        partition: id as i32,
                        leader: log.replicas[0],
                        replicas: log.replicas.clone(),
                        isr: log.replicas.clone(),
                    })
                    .collect(),
            })
            .collect();

        Ok(ClusterMetadata {
            brokers: self.state.brokers.clone(),
            topics,
        })
    }

    async fn describe_topic_config(
        &self,
        topic: &str,
        _timeout: Duration,
    ) -> Result<BTreeMap<String, String>, ClientError> {
        self.state.ensure_available()?;
        self.state
            .topics
            .get(topic)
            .map(|t| t.config.clone())
            .ok_or_else(|| unknown_topic(topic))
    }

    async fn alter_topic_config(
        &self,
        topic: &str,
        config: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> Result<(), ClientError> {
        self.state.ensure_available()?;
        let mut stored = self.state.topics.get_mut(topic).ok_or_else(|| unknown_topic(topic))?;
        validate_config_keys(config)?;
        stored
            .config
            .extend(config.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

#[async_trait]
impl GroupAdmin for InMemoryCluster {
    async fn list_groups(&self, _timeout: Duration) -> Result<Vec<ConsumerGroup>, ClientError> {
        self.state.ensure_available()?;
        Ok(self
            .state
            .groups
            .iter()
            .map(|entry| ConsumerGroup {
                group_id: entry.key().clone(),
                state: "Empty".to_string(),
                protocol_type: "consumer".to_string(),
                members: 0,
            })
            .collect())
    }

    async fn group_offsets(
        &self,
        group: &str,
        partitions: &[TopicPartition],
        _timeout: Duration,
    ) -> Result<Vec<GroupOffset>, ClientError> {
        self.state.ensure_available()?;
        let committed = match self.state.groups.get(group) {
            Some(entry) => entry.value().clone(),
            None => return Ok(Vec::new()),
        };

        let mut offsets = Vec::new();
        for tp in partitions {
            if let Some(position) = committed.get(&(tp.topic.clone(), tp.partition)) {
                let log_end = self
                    .state
                    .topics
                    .get(&tp.topic)
                    .and_then(|t| t.partitions.get(tp.partition as usize).map(|p| p.records.len() as i64))
                    .ok_or_else(|| unknown_topic(&tp.topic))?;
                offsets.push(GroupOffset::new(tp.topic.as_str(), tp.partition, *position, log_end));
            }
        }
        Ok(offsets)
    }

    async fn delete_group(&self, group: &str, _timeout: Duration) -> Result<(), ClientError> {
        self.state.ensure_available()?;
        self.state.groups.remove(group).map(|_| ()).ok_or_else(|| {
            ClientError::kafka(
                FailureCode::GroupIdNotFound,
                format!("The group id {} does not exist", group),
            )
        })
    }
}

#[async_trait]
impl RecordProducer for InMemoryCluster {
    async fn send(&self, record: OutgoingRecord, _timeout: Duration) -> Result<DeliveryReport, ClientError> {
        self.state.ensure_available()?;
        let report = {
            let mut topic = self
                .state
                .topics
                .get_mut(&record.topic)
                .ok_or_else(|| unknown_topic(&record.topic))?;
            let partition = self.choose_partition(&record, topic.partitions.len())?;
            let log = &mut topic.partitions[partition].records;
            let offset = log.len() as i64;

            log.push(IncomingRecord {
                topic: record.topic.clone(),
                partition: partition as i32,
                offset,
                timestamp: Some(record.timestamp),
                key: record.key,
                payload: record.payload,
                headers: record
                    .headers
                    .into_iter()
                    .map(|(name, value)| (name, value.into_bytes()))
                    .collect(),
            });

            DeliveryReport {
                topic: record.topic,
                partition: partition as i32,
                offset,
                timestamp: record.timestamp,
            }
        };
        self.state.arrivals.notify_waiters();
        Ok(report)
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), ClientError> {
        Ok(())
    }
}

impl ConsumerFactory for InMemoryCluster {
    fn create_consumer(&self) -> Result<Box<dyn RecordConsumer>, ClientError> {
        self.state.ensure_available()?;
        self.state.open_consumers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryConsumer {
            state: self.state.clone(),
            positions: Vec::new(),
            next: 0,
            released: false,
        }))
    }
}

/// Reads partition logs from per-partition positions, round-robin across the assignment
pub struct InMemoryConsumer {
    state: Arc<ClusterState>,
    positions: Vec<(TopicPartition, usize)>,
    next: usize,
    released: bool,
}

impl InMemoryConsumer {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.positions.clear();
            self.state.open_consumers.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn next_record(&mut self) -> Result<Option<IncomingRecord>, ClientError> {
        let count = self.positions.len();
        for step in 0..count {
            let index = (self.next + step) % count;
            let (tp, position) = &mut self.positions[index];
            let topic = self
                .state
                .topics
                .get(&tp.topic)
                .ok_or_else(|| unknown_topic(&tp.topic))?;
            let record = topic
                .partitions
                .get(tp.partition as usize)
                .and_then(|log| log.records.get(*position))
                .cloned();
            if let Some(record) = record {
                *position += 1;
                self.next = (index + 1) % count;
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RecordConsumer for InMemoryConsumer {
    async fn assign(
        &mut self,
        partitions: &[TopicPartition],
        start: StartPosition,
        _timeout: Duration,
    ) -> Result<(), ClientError> {
        self.state.ensure_available()?;
        let mut positions = Vec::with_capacity(partitions.len());
        for tp in partitions {
            let topic = self
                .state
                .topics
                .get(&tp.topic)
                .ok_or_else(|| unknown_topic(&tp.topic))?;
            let log = topic
                .partitions
                .get(tp.partition as usize)
                .ok_or_else(|| unknown_topic(&tp.topic))?;
            let position = match start {
                StartPosition::Earliest => 0,
                StartPosition::Latest => log.records.len(),
            };
            positions.push((tp.clone(), position));
        }
        self.positions = positions;
        self.next = 0;
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<IncomingRecord>, ClientError> {
        let deadline = Instant::now() + timeout;
        let state = self.state.clone();
        loop {
            let notified = state.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            state.ensure_available()?;
            if let Some(record) = self.next_record()? {
                return Ok(Some(record));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Hands out in-memory clusters by configured name, creating them on first connect
pub struct InMemoryClientFactory {
    clusters: DashMap<String, InMemoryCluster>,
    default_broker_count: usize,
    connect_delay: Duration,
    connects: AtomicUsize,
}

impl InMemoryClientFactory {
    pub fn new(default_broker_count: usize) -> Self {
        Self {
            clusters: DashMap::new(),
            default_broker_count,
            connect_delay: Duration::ZERO,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn with_cluster(self, name: impl Into<String>, cluster: InMemoryCluster) -> Self {
        self.clusters.insert(name.into(), cluster);
        self
    }

    /// Makes every connect take at least `delay`
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn cluster(&self, name: &str) -> Option<InMemoryCluster> {
        self.clusters.get(name).map(|c| c.value().clone())
    }
}

impl Default for InMemoryClientFactory {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ClientFactory for InMemoryClientFactory {
    async fn connect(&self, config: &ClusterConfig) -> Result<ClusterClients, ClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let cluster = self
            .clusters
            .entry(config.name.clone())
            .or_insert_with(|| InMemoryCluster::new(self.default_broker_count))
            .value()
            .clone();
        Ok(cluster.clients())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TopicName;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn new_topic(name: &str, partitions: i32, replication_factor: i32) -> NewTopic {
        NewTopic {
            name: TopicName::new(name).unwrap(),
            partitions,
            replication_factor,
            config: BTreeMap::new(),
        }
    }

    fn record(topic: &str, key: Option<&str>) -> OutgoingRecord {
        OutgoingRecord {
            topic: topic.to_string(),
            partition: None,
            key: key.map(|k| k.as_bytes().to_vec()),
            payload: Some(b"payload".to_vec()),
            headers: BTreeMap::new(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn replicas_are_spread_across_brokers() {
        let cluster = InMemoryCluster::new(3);
        cluster.create_topic(&new_topic("orders", 3, 2), TIMEOUT).await.unwrap();

        let metadata = cluster.fetch_metadata(TIMEOUT).await.unwrap();
        let orders = metadata.topic("orders").unwrap();

        assert_eq!(orders.partitions[0].replicas, vec![0, 1]);
        assert_eq!(orders.partitions[2].replicas, vec![2, 0]);
    }

    #[tokio::test]
    async fn rejects_replication_beyond_broker_count() {
        let cluster = InMemoryCluster::new(1);
        let err = cluster.create_topic(&new_topic("orders", 1, 3), TIMEOUT).await.unwrap_err();
        assert_eq!(err.root_cause(), "INVALID_REPLICATION_FACTOR");
    }

    #[tokio::test]
    async fn same_key_lands_on_same_partition() {
        let cluster = InMemoryCluster::new(1);
        cluster.create_topic(&new_topic("orders", 4, 1), TIMEOUT).await.unwrap();

        let first = cluster.send(record("orders", Some("customer-7")), TIMEOUT).await.unwrap();
        let second = cluster.send(record("orders", Some("customer-7")), TIMEOUT).await.unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn poll_wakes_up_on_new_records() {
        let cluster = InMemoryCluster::new(1);
        cluster.create_topic(&new_topic("orders", 1, 1), TIMEOUT).await.unwrap();
        let mut consumer = cluster.create_consumer().unwrap();
        consumer
            .assign(&[TopicPartition::new("orders", 0)], StartPosition::Latest, TIMEOUT)
            .await
            .unwrap();

        let producer = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.send(record("orders", None), TIMEOUT).await.unwrap();
        });

        let received = consumer.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(received.unwrap().offset, 0);

        consumer.close().await;
        assert_eq!(cluster.open_consumers(), 0);
    }

    #[tokio::test]
    async fn tail_assignment_starts_at_log_end_of_assign_time() {
        let cluster = InMemoryCluster::new(1);
        cluster.create_topic(&new_topic("orders", 1, 1), TIMEOUT).await.unwrap();
        cluster.send(record("orders", None), TIMEOUT).await.unwrap();
        let mut consumer = cluster.create_consumer().unwrap();
        consumer
            .assign(&[TopicPartition::new("orders", 0)], StartPosition::Latest, TIMEOUT)
            .await
            .unwrap();

        // Appended between assign and the first poll
        cluster.send(record("orders", None), TIMEOUT).await.unwrap();

        let received = consumer.poll(TIMEOUT).await.unwrap();
        assert_eq!(received.unwrap().offset, 1);
    }

    #[tokio::test]
    async fn group_offsets_skip_partitions_without_commits() {
        let cluster = InMemoryCluster::new(1);
        cluster.create_topic(&new_topic("orders", 2, 1), TIMEOUT).await.unwrap();
        for _ in 0..3 {
            let pinned = OutgoingRecord {
                partition: Some(1),
                ..record("orders", None)
            };
            cluster.send(pinned, TIMEOUT).await.unwrap();
        }
        cluster.commit_offset("billing", "orders", 1, 1);

        let partitions = [TopicPartition::new("orders", 0), TopicPartition::new("orders", 1)];
        let offsets = cluster.group_offsets("billing", &partitions, TIMEOUT).await.unwrap();

        assert_eq!(offsets, vec![GroupOffset::new("orders", 1, 1, 3)]);
        assert_eq!(offsets[0].lag, 2);
    }

    #[tokio::test]
    async fn deleting_a_missing_group_is_group_id_not_found() {
        let cluster = InMemoryCluster::new(1);
        let err = cluster.delete_group("ghost", TIMEOUT).await.unwrap_err();
        assert_eq!(err.root_cause(), "GROUP_ID_NOT_FOUND");
    }

    #[tokio::test]
    async fn unavailable_cluster_fails_with_transport_error() {
        let cluster = InMemoryCluster::new(1);
        cluster.set_available(false);

        let err = cluster.fetch_metadata(TIMEOUT).await.unwrap_err();
        assert_eq!(err.root_cause(), "_TRANSPORT");
    }
}
